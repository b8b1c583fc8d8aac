#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{ArgValue, CallArgs, RankMap, Signature};
use opschema_solve::RankObservation;

use crate::call::bound;
use crate::decl::{RankSource, ShapeKind, ShapeSlot};
use crate::failure::RankCandidate;
use crate::schema::Schema;

/// The raw shape carried by `value` in `slot`. `None` for scalar slots and
/// for values of the wrong kind.
pub(crate) fn slot_shape(slot: &ShapeSlot, value: &ArgValue) -> Option<Vec<i64>> {
    match (slot.kind, value) {
        (ShapeKind::DataTensor, ArgValue::Tensor { shape, .. }) => Some(shape.clone()),
        (ShapeKind::List, ArgValue::List { values })
        | (ShapeKind::Tensor, ArgValue::IntTensor { values }) => Some(values.clone()),
        (ShapeKind::Tensor2D, ArgValue::IntTensor2D { rows }) => {
            let col = slot.column?;
            rows.iter().map(|r| r.get(col).copied()).collect()
        }
        _ => None,
    }
}

/// Shape of an argument read by a dims-to-rank constraint.
fn value_shape(value: &ArgValue) -> Option<Vec<i64>> {
    match value {
        ArgValue::Tensor { shape, .. } => Some(shape.clone()),
        other => other.as_ints().map(<[i64]>::to_vec),
    }
}

impl RankSource {
    /// The signature whose rank this source pins.
    pub(crate) fn sig<'s>(&'s self, schema: &'s Schema, layout: usize) -> &'s Signature {
        match self {
            RankSource::Shape { slot } => schema.slots[*slot].sig(layout),
            RankSource::RankArg { sig, .. } => sig,
            RankSource::DimRank { rank_sig, .. } => rank_sig,
            RankSource::Format { sig } => sig,
        }
    }

    pub(crate) fn observe(&self, schema: &Schema, args: &CallArgs, layout: usize) -> RankObservation {
        let observed = match self {
            RankSource::Shape { slot } => {
                let slot = &schema.slots[*slot];
                match slot.kind {
                    ShapeKind::Int => None,
                    _ => bound(args, &slot.arg)
                        .and_then(|v| slot_shape(slot, v))
                        .map(|s| s.len() as u32),
                }
            }
            RankSource::RankArg { arg, .. } => bound(args, arg)
                .and_then(ArgValue::as_int)
                .and_then(|v| u32::try_from(v).ok()),
            RankSource::DimRank {
                shape_arg,
                get_dims,
                ..
            } => bound(args, shape_arg)
                .and_then(value_shape)
                .and_then(|s| get_dims(&s))
                .and_then(|v| u32::try_from(v).ok()),
            RankSource::Format { .. } => schema
                .layouts
                .arg()
                .and_then(|a| bound(args, a))
                .and_then(ArgValue::as_str)
                .and_then(|name| schema.layouts.get(name))
                .and_then(|f| f.rank),
        };
        RankObservation {
            sig: self.sig(schema, layout).clone(),
            observed,
        }
    }

    /// Repair advice for a signed residual `observed - computed`.
    pub(crate) fn suggestion(
        &self,
        schema: &Schema,
        residual: i64,
        ranks: &RankMap,
        layout: usize,
    ) -> Option<String> {
        if residual == 0 {
            return None;
        }
        let n = residual.unsigned_abs();
        let text = match self {
            RankSource::Shape { slot } => {
                let slot = &schema.slots[*slot];
                let unit = match slot.kind {
                    ShapeKind::DataTensor => "dimension",
                    ShapeKind::Tensor2D => "row",
                    _ => "element",
                };
                let plural = if n == 1 { "" } else { "s" };
                if residual > 0 {
                    format!("Remove {n} {unit}{plural} from '{}'", slot.label())
                } else {
                    format!("Add {n} {unit}{plural} to '{}'", slot.label())
                }
            }
            RankSource::RankArg { arg, .. } => {
                let verb = if residual > 0 { "Decrease" } else { "Increase" };
                format!("{verb} '{arg}' by {n}")
            }
            RankSource::DimRank { dims_index, .. } => {
                let verb = if residual > 0 { "Decrease" } else { "Increase" };
                format!("{verb} the dimension of index '{dims_index}' by {n}")
            }
            RankSource::Format { .. } => {
                let arg = schema.layouts.arg()?;
                let name = schema.layouts.data_format(layout, ranks)?;
                format!("Change '{arg}' to '{name}'")
            }
        };
        Some(text)
    }

    /// Positions to mark in the report for a residual, keyed by the slot
    /// header or argument name they belong to.
    pub(crate) fn highlight(
        &self,
        schema: &Schema,
        residual: i64,
        ranks: &RankMap,
        layout: usize,
    ) -> Option<(String, Vec<usize>)> {
        if residual == 0 {
            return None;
        }
        match self {
            RankSource::Shape { slot } => {
                let slot = &schema.slots[*slot];
                let computed = slot.sig(layout).rank(ranks) as i64;
                let observed = computed + residual;
                let lo = computed.min(observed).max(0) as usize;
                let hi = computed.max(observed).max(0) as usize;
                Some((slot.header(), (lo..hi).collect()))
            }
            RankSource::RankArg { arg, .. } => Some((arg.clone(), vec![0])),
            RankSource::DimRank {
                shape_arg,
                dims_index,
                ..
            } => {
                let slot = schema.slots.iter().find(|s| &s.arg == shape_arg)?;
                let sig = slot.sig(layout);
                let pos = sig.indices().iter().position(|c| c == dims_index)?;
                let offset: u32 = sig.indices()[..pos]
                    .iter()
                    .map(|c| ranks.get(c).copied().unwrap_or(0))
                    .sum();
                let len = ranks.get(dims_index).copied().unwrap_or(0);
                let positions = (offset..offset + len).map(|p| p as usize).collect();
                Some((slot.header(), positions))
            }
            RankSource::Format { .. } => schema.layouts.arg().map(|a| (a.to_string(), vec![0])),
        }
    }
}

/// Packages one rank assignment and its residuals as a reportable candidate.
pub(crate) fn candidate(
    schema: &Schema,
    ranks: RankMap,
    residuals: Vec<i64>,
    layout: usize,
) -> RankCandidate {
    let mut suggestions = Vec::new();
    let mut highlights: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (src, &res) in schema.rank_sources.iter().zip(&residuals) {
        if let Some(s) = src.suggestion(schema, res, &ranks, layout) {
            suggestions.push(s);
        }
        if let Some((key, positions)) = src.highlight(schema, res, &ranks, layout) {
            highlights.entry(key).or_default().extend(positions);
        }
    }
    let data_format = schema
        .layouts
        .arg()
        .and_then(|_| schema.layouts.data_format(layout, &ranks))
        .map(String::from);
    RankCandidate {
        ranks,
        data_format,
        residuals,
        suggestions,
        highlights,
    }
}
