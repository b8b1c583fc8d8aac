#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{ArgValue, DType, IndexId, SchemaError};
use opschema_solve::{DTypeViolation, RankObservation, RankSolution};
use tracing::debug;

use crate::call::{CallState, Phase, bound};
use crate::config::CheckConfig;
use crate::decl::{ArgSpec, ShapeKind};
use crate::failure::{Failure, IndexUsage};
use crate::rank_obs::{candidate, slot_shape};
use crate::schema::Schema;

/// Node behaviours of the predicate graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PredFunc {
    /// Value kind of one argument.
    Arg(String),
    /// Bounds of an integer or rank argument.
    Range(String),
    Options(String),
    DataFormat,
    Ranks,
    IndexDims,
    Computed(IndexId),
    Minimum(IndexId),
    ComputedMatch(IndexId),
    Predicate(usize),
    DTypes,
    Predicted(usize),
}

impl PredFunc {
    /// Runs one node. `Ok(Some(_))` stops the walk with that failure.
    pub(crate) fn eval(
        &self,
        schema: &Schema,
        st: &mut CallState<'_>,
        cfg: &CheckConfig,
    ) -> Result<Option<Failure>, SchemaError> {
        let failure = match self {
            PredFunc::Arg(name) => check_kind(schema, name, st),
            PredFunc::Range(name) => check_range(schema, name, st),
            PredFunc::Options(name) => check_option(schema, name, st),
            PredFunc::DataFormat => resolve_format(schema, st),
            PredFunc::Ranks => infer_ranks(schema, st, cfg),
            PredFunc::IndexDims => index_dims(schema, st),
            PredFunc::Computed(id) => {
                compute(schema, *id, st)?;
                None
            }
            PredFunc::Minimum(id) => check_minimum(schema, *id, st),
            PredFunc::ComputedMatch(id) => match_computed(*id, st),
            PredFunc::Predicate(k) => run_predicate(schema, *k, st),
            PredFunc::DTypes => check_dtypes(schema, st),
            PredFunc::Predicted(i) => {
                predict(schema, *i, st)?;
                None
            }
        };
        Ok(failure)
    }
}

fn describe(value: &ArgValue) -> String {
    match value {
        ArgValue::IntTensor2D { rows } => format!(
            "a 2D integer tensor with {} columns",
            rows.first().map_or(0, Vec::len)
        ),
        other => other.kind_name().to_string(),
    }
}

fn check_kind(schema: &Schema, name: &str, st: &CallState<'_>) -> Option<Failure> {
    let spec = schema.specs.get(name)?;
    let value = st.arg(name);
    let ok = match (spec, value) {
        (ArgSpec::Unchecked, _) | (ArgSpec::Layout, None) => true,
        (_, None) => false,
        (ArgSpec::DataTensor, Some(ArgValue::Tensor { .. }))
        | (ArgSpec::ShapeList, Some(ArgValue::List { .. }))
        | (ArgSpec::ShapeTensor, Some(ArgValue::IntTensor { .. })) => true,
        (
            ArgSpec::ShapeInt { .. } | ArgSpec::Int { .. } | ArgSpec::Rank { .. },
            Some(ArgValue::Int { .. }),
        ) => true,
        (ArgSpec::ShapeTensor2D { slots }, Some(ArgValue::IntTensor2D { rows })) => {
            rows.iter().all(|r| r.len() == *slots)
        }
        (ArgSpec::Option { .. } | ArgSpec::Layout, Some(ArgValue::Str { .. })) => true,
        _ => false,
    };
    if ok {
        return negative_dims(spec, name, value?);
    }
    Some(Failure::ArgType {
        arg: name.to_string(),
        expected: spec.expected().to_string(),
        got: value.map_or_else(|| "nothing".to_string(), describe),
    })
}

/// Dimension sizes are never negative, whatever argument carries them.
fn negative_dims(spec: &ArgSpec, name: &str, value: &ArgValue) -> Option<Failure> {
    let dims: Vec<i64> = match (spec, value) {
        (ArgSpec::DataTensor, ArgValue::Tensor { shape, .. }) => shape.clone(),
        (ArgSpec::ShapeList, ArgValue::List { values })
        | (ArgSpec::ShapeTensor, ArgValue::IntTensor { values }) => values.clone(),
        (ArgSpec::ShapeTensor2D { .. }, ArgValue::IntTensor2D { rows }) => rows.concat(),
        (ArgSpec::ShapeInt { .. }, ArgValue::Int { value }) => vec![*value],
        _ => return None,
    };
    let bad = dims.into_iter().find(|&d| d < 0)?;
    Some(Failure::ArgType {
        arg: name.to_string(),
        expected: format!("{} of non-negative dimensions", spec.expected()),
        got: format!("dimension {bad}"),
    })
}

pub(crate) fn render_range(lo: Option<i64>, hi: Option<i64>) -> String {
    let lo = lo.map_or_else(|| "-inf".to_string(), |v| v.to_string());
    let hi = hi.map_or_else(|| "inf".to_string(), |v| v.to_string());
    format!("[{lo}, {hi}]")
}

fn check_range(schema: &Schema, name: &str, st: &CallState<'_>) -> Option<Failure> {
    let (lo, hi) = match schema.specs.get(name)? {
        ArgSpec::Int { lo, hi } => (*lo, *hi),
        ArgSpec::Rank { .. } => (Some(0), None),
        _ => return None,
    };
    let value = st.arg(name)?.as_int()?;
    let inside = lo.is_none_or(|l| value >= l) && hi.is_none_or(|h| value <= h);
    if inside {
        return None;
    }
    Some(Failure::IntOutOfRange {
        arg: name.to_string(),
        value,
        range: render_range(lo, hi),
    })
}

fn check_option(schema: &Schema, name: &str, st: &CallState<'_>) -> Option<Failure> {
    let ArgSpec::Option { options } = schema.specs.get(name)? else {
        return None;
    };
    let value = st.arg(name)?.as_str()?;
    if options.iter().any(|o| o == value) {
        return None;
    }
    Some(Failure::OptionNotInSet {
        arg: name.to_string(),
        value: value.to_string(),
        options: options.clone(),
    })
}

fn resolve_format(schema: &Schema, st: &mut CallState<'_>) -> Option<Failure> {
    let arg = schema.layouts.arg()?;
    let Some(name) = st.arg(arg).and_then(ArgValue::as_str) else {
        st.layout = schema.layouts.default_format().map_or(0, |f| f.layout);
        return None;
    };
    match schema.layouts.get(name) {
        Some(format) => {
            st.layout = format.layout;
            st.data_format = Some(format.name.clone());
            None
        }
        None => Some(Failure::OptionNotInSet {
            arg: arg.to_string(),
            value: name.to_string(),
            options: schema
                .layouts
                .formats()
                .iter()
                .map(|f| f.name.clone())
                .collect(),
        }),
    }
}

fn infer_ranks(schema: &Schema, st: &mut CallState<'_>, cfg: &CheckConfig) -> Option<Failure> {
    st.advance(Phase::Bound);
    let observations: Vec<RankObservation> = schema
        .rank_sources
        .iter()
        .map(|src| src.observe(schema, st.args, st.layout))
        .collect();
    let indices = schema.indices();
    let solution = schema.rank_cons.infer(
        &indices,
        &observations,
        cfg.max_candidates,
        cfg.inference_slack,
    );
    match solution {
        RankSolution::Unique(ranks) => {
            st.ranks = ranks;
            if let Some(arg) = schema.layouts.arg().filter(|_| st.data_format.is_none()) {
                match schema.layouts.data_format(st.layout, &st.ranks) {
                    Some(name) => st.data_format = Some(name.to_string()),
                    None => return Some(no_data_format(schema, arg, st)),
                }
            }
            st.advance(Phase::RankResolved);
            None
        }
        RankSolution::Ambiguous(all) => {
            let zeros = vec![0; observations.len()];
            let candidates = all
                .into_iter()
                .take(cfg.max_candidates)
                .map(|r| candidate(schema, r, zeros.clone(), st.layout))
                .collect();
            Some(Failure::RankInference {
                candidates,
                ambiguous: true,
            })
        }
        RankSolution::Inconsistent(near) => {
            let candidates = near
                .into_iter()
                .map(|nm| candidate(schema, nm.ranks, nm.residuals, st.layout))
                .collect();
            Some(Failure::RankInference {
                candidates,
                ambiguous: false,
            })
        }
    }
}

/// The omitted layout argument defaults to a layout with no format for the
/// resolved rank of the rank index.
fn no_data_format(schema: &Schema, arg: &str, st: &CallState<'_>) -> Failure {
    let index = schema.layouts.rank_index().unwrap_or_default();
    Failure::NoDataFormat {
        arg: arg.to_string(),
        index,
        rank: st.ranks.get(&index).copied().unwrap_or(0),
        layout: st.layout,
        formats: schema
            .layouts
            .formats()
            .iter()
            .filter(|f| f.layout == st.layout)
            .map(|f| f.name.clone())
            .collect(),
    }
}

fn index_dims(schema: &Schema, st: &mut CallState<'_>) -> Option<Failure> {
    let mut usage: BTreeMap<IndexId, Vec<BTreeMap<i64, Vec<String>>>> = BTreeMap::new();
    for slot in &schema.slots {
        let Some(value) = st.arg(&slot.arg) else {
            continue;
        };
        let sig = slot.sig(st.layout);
        let parts: Vec<(IndexId, Vec<i64>)> = if slot.kind == ShapeKind::Int {
            let Some(v) = value.as_int() else {
                continue;
            };
            sig.indices()
                .iter()
                .map(|&c| (c, vec![v; st.ranks.get(&c).copied().unwrap_or(0) as usize]))
                .collect()
        } else {
            match slot_shape(slot, value).and_then(|s| sig.split(&s, &st.ranks)) {
                Some(parts) => parts,
                None => continue,
            }
        };
        for (idx, dims) in parts {
            let comps = usage.entry(idx).or_default();
            if comps.len() < dims.len() {
                comps.resize(dims.len(), BTreeMap::new());
            }
            for (k, d) in dims.iter().enumerate() {
                comps[k].entry(*d).or_default().push(slot.label());
            }
        }
    }

    let bad: Vec<IndexUsage> = usage
        .iter()
        .map(|(&index, comps)| IndexUsage {
            index,
            components: comps.clone(),
        })
        .filter(|u| !u.is_consistent())
        .collect();
    if !bad.is_empty() {
        return Some(Failure::IndexUsage { usage: bad });
    }
    for (idx, comps) in usage {
        let dims = comps
            .iter()
            .filter_map(|c| c.keys().next().copied())
            .collect();
        st.dims.insert(idx, dims);
    }
    None
}

/// Value of an extra argument of a computed index.
fn extra_value(schema: &Schema, st: &CallState<'_>, name: &str) -> Option<ArgValue> {
    if schema.layouts.arg() == Some(name) {
        return st.data_format.as_deref().map(ArgValue::str);
    }
    bound(st.args, name).cloned()
}

fn compute(schema: &Schema, id: IndexId, st: &mut CallState<'_>) -> Result<(), SchemaError> {
    let result = {
        let extras = |name: &str| extra_value(schema, st, name);
        schema
            .computed
            .evaluate_one(id, &st.dims, &extras, &st.ranks)?
    };
    if let Some(dims) = result {
        st.computed.insert(id, dims);
    }
    Ok(())
}

fn check_minimum(schema: &Schema, id: IndexId, st: &CallState<'_>) -> Option<Failure> {
    let dims = st.computed.get(&id)?;
    let node = schema.computed.get(id)?;
    node.below_minimum(dims)
        .map(|_| Failure::ComputedBelowMinimum {
            index: id,
            dims: dims.clone(),
            min: node.min_value,
        })
}

fn match_computed(id: IndexId, st: &mut CallState<'_>) -> Option<Failure> {
    let computed = st.computed.get(&id)?.clone();
    match st.dims.get(&id) {
        Some(observed) if *observed != computed => Some(Failure::ComputedMismatch {
            index: id,
            computed,
            observed: observed.clone(),
        }),
        _ => {
            st.dims.insert(id, computed);
            None
        }
    }
}

fn run_predicate(schema: &Schema, k: usize, st: &CallState<'_>) -> Option<Failure> {
    let pred = schema.predicates.get(k)?;
    let dims: Option<Vec<&[i64]>> = pred
        .indices
        .iter()
        .map(|i| st.dims.get(i).map(Vec::as_slice))
        .collect();
    let message = (pred.func)(&dims?).err()?;
    Some(Failure::CustomPredicate {
        name: pred.name.clone(),
        indices: pred.indices.clone(),
        message,
    })
}

fn check_dtypes(schema: &Schema, st: &mut CallState<'_>) -> Option<Failure> {
    st.advance(Phase::DimsResolved);
    let dtypes: BTreeMap<String, DType> = schema
        .data_tensors()
        .filter_map(|name| match st.arg(name) {
            Some(ArgValue::Tensor { dtype, .. }) => Some((name.to_string(), *dtype)),
            _ => None,
        })
        .collect();
    st.dtypes = dtypes;
    let Some(violation) = schema.dtype_rules.check(&st.dtypes, &st.ranks, st.layout) else {
        st.advance(Phase::DTypeResolved);
        return None;
    };
    let failure = match violation {
        DTypeViolation::NotAllowed {
            tensor,
            dtype,
            allowed,
        } => Failure::DTypeNotAllowed {
            tensor,
            dtype,
            allowed,
            equated_to: None,
        },
        DTypeViolation::NotEqual {
            tensor,
            dtype,
            source,
            source_dtype,
        } => Failure::DTypeNotAllowed {
            tensor,
            dtype,
            allowed: vec![source_dtype],
            equated_to: Some((source, source_dtype)),
        },
        DTypeViolation::Excluded { exclusion } => {
            let ex = schema.dtype_rules.exclusions().get(exclusion)?.clone();
            debug!(exclusion, "dtype combination excluded");
            Failure::DTypeExcluded {
                dtypes: ex.dtypes,
                ranks: ex.ranks,
                layout: ex.layout,
            }
        }
    };
    Some(failure)
}

fn predict(schema: &Schema, i: usize, st: &mut CallState<'_>) -> Result<(), SchemaError> {
    let Some(sigs) = schema.returns.get(i) else {
        return Ok(());
    };
    let sig = &sigs[st.layout.min(sigs.len() - 1)];
    match sig.shape(&st.dims) {
        Some(shape) => {
            st.returns.insert(i, shape);
            Ok(())
        }
        None => {
            let missing = sig
                .indices()
                .iter()
                .copied()
                .find(|c| !st.dims.contains_key(c))
                .unwrap_or('?');
            Err(SchemaError::UnresolvedReturnIndex { index: i, id: missing })
        }
    }
}
