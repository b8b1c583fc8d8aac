#![forbid(unsafe_code)]

//! Plain-text diagnostics for checked calls.

use std::collections::{BTreeMap, BTreeSet};

use opschema_model::{ArgValue, IndexId, RankMap};

use crate::call::{CallOutcome, bound};
use crate::decl::{ArgSpec, ShapeKind};
use crate::failure::{Failure, IndexUsage, RankCandidate};
use crate::rank_obs::slot_shape;
use crate::schema::Schema;
use crate::table::tabulate;

fn compact(xs: &[i64]) -> String {
    let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn render_ranks(ranks: &RankMap) -> String {
    ranks
        .iter()
        .map(|(c, r)| format!("{c}={r}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// "a", "a and b", "a, b and c"
fn join_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

impl Schema {
    /// Renders the outcome of a check as a multi-line report.
    pub fn explain(&self, outcome: &CallOutcome) -> String {
        let summary = outcome.args.summary(&self.params);
        let Some(failure) = outcome.failure() else {
            let mut lines = vec![format!("Success: {summary}")];
            for (i, shape) in outcome.predicted.iter().enumerate() {
                lines.push(format!("return {i}: {}", compact(shape)));
            }
            return lines.join("\n");
        };

        let mut lines = vec![failure.to_string(), format!("Received: {summary}")];
        match failure {
            Failure::RankInference { candidates, .. } => {
                lines.extend(self.explain_candidates(outcome, candidates));
            }
            Failure::IndexUsage { usage } => {
                lines.extend(self.explain_usage(outcome, usage));
            }
            Failure::ComputedMismatch {
                index,
                computed,
                observed,
            } => {
                lines.push(String::new());
                lines.extend(self.derivation(outcome, *index, computed));
                lines.push(format!("but the arguments give {index} = {}", compact(observed)));
                lines.push(String::new());
                let marks = self.positions_of(outcome, &[*index].into_iter().collect());
                lines.extend(self.shape_table(outcome, &outcome.ranks, outcome.layout, &marks));
            }
            Failure::ComputedBelowMinimum { index, dims, min } => {
                lines.push(String::new());
                lines.extend(self.derivation(outcome, *index, dims));
                lines.push(format!("Every component of '{index}' must be at least {min}."));
            }
            Failure::CustomPredicate { indices, .. } => {
                for &c in indices {
                    if let Some(d) = outcome.dims.get(&c) {
                        lines.push(format!(
                            "  {c} ({}) = {}",
                            self.index.description(c),
                            compact(d)
                        ));
                    }
                }
            }
            Failure::DTypeNotAllowed {
                tensor,
                allowed,
                equated_to,
                ..
            } => match equated_to {
                Some((src, _)) => lines.push(format!(
                    "'{tensor}' must have the same dtype as '{src}'."
                )),
                None => {
                    let names: Vec<&str> = allowed.iter().map(|d| d.name()).collect();
                    lines.push(format!("Valid dtypes for '{tensor}': {}", names.join(", ")));
                }
            },
            Failure::DTypeExcluded {
                dtypes,
                ranks,
                layout,
            } => {
                lines.push(String::new());
                lines.push("Received unavailable configuration:".to_string());
                let mut rows = vec![vec!["config".to_string(), "value".to_string()]];
                for (t, d) in dtypes {
                    rows.push(vec![format!("{t}.dtype"), d.to_string()]);
                }
                for (c, r) in ranks {
                    rows.push(vec![
                        format!("'{}' # dims", self.index.description(*c)),
                        r.to_string(),
                    ]);
                }
                if let (Some(_), Some(arg)) = (layout, self.layouts.arg()) {
                    let value = outcome.data_format.clone().unwrap_or_default();
                    rows.push(vec![arg.to_string(), value]);
                }
                lines.extend(tabulate(&rows, "  ", &[true, false]));
                lines.push(String::new());
                lines.push(format!(
                    "Available configurations are listed in the call inventory of '{}'.",
                    self.op
                ));
            }
            Failure::NoDataFormat {
                index,
                rank,
                formats,
                ..
            } => {
                lines.push(format!(
                    "Index '{index}' ({}) has rank {rank}; the default layout offers {}.",
                    self.index.description(*index),
                    join_and(formats)
                ));
                lines.push(String::new());
                let marks = self.positions_of(outcome, &[*index].into_iter().collect());
                lines.extend(self.shape_table(outcome, &outcome.ranks, outcome.layout, &marks));
            }
            Failure::ArgType { .. }
            | Failure::IntOutOfRange { .. }
            | Failure::OptionNotInSet { .. } => {}
        }
        lines.join("\n")
    }

    fn explain_candidates(&self, outcome: &CallOutcome, candidates: &[RankCandidate]) -> Vec<String> {
        let mut lines = Vec::new();
        if candidates.is_empty() {
            lines.push(String::new());
            lines.push("No rank assignment within the search bound fits the declared limits.".to_string());
            return lines;
        }
        for (i, cand) in candidates.iter().enumerate() {
            lines.push(String::new());
            let format = cand
                .data_format
                .as_ref()
                .map(|f| format!(" ({f})"))
                .unwrap_or_default();
            lines.push(format!(
                "Candidate {} of {}: {}{format}",
                i + 1,
                candidates.len(),
                render_ranks(&cand.ranks)
            ));
            lines.extend(self.shape_table(outcome, &cand.ranks, outcome.layout, &cand.highlights));
            for s in &cand.suggestions {
                lines.push(format!("  => {s}"));
            }
        }
        lines
    }

    fn explain_usage(&self, outcome: &CallOutcome, usage: &[IndexUsage]) -> Vec<String> {
        let bad: BTreeSet<IndexId> = usage.iter().map(|u| u.index).collect();
        let marks = self.positions_of(outcome, &bad);
        let mut lines = vec![String::new()];
        lines.extend(self.shape_table(outcome, &outcome.ranks, outcome.layout, &marks));
        lines.push(String::new());
        for u in usage {
            let multi = u.components.len() > 1;
            for (k, sizes) in u.components.iter().enumerate() {
                if sizes.len() < 2 {
                    continue;
                }
                let parts: Vec<String> = sizes
                    .iter()
                    .map(|(size, args)| {
                        let quoted: Vec<String> = args.iter().map(|a| format!("'{a}'")).collect();
                        format!("size {size} in {}", join_and(&quoted))
                    })
                    .collect();
                let component = if multi {
                    format!(" component {}", k + 1)
                } else {
                    String::new()
                };
                lines.push(format!(
                    "Index '{}' ({}){component} has {}.",
                    u.index,
                    self.index.description(u.index),
                    join_and(&parts)
                ));
            }
        }
        lines
    }

    /// Derivation of a computed index, with descriptions and with values.
    fn derivation(&self, outcome: &CallOutcome, id: IndexId, result: &[i64]) -> Vec<String> {
        let mut lines = vec![format!(
            "Index '{id}' ({}) is computed as:",
            self.index.description(id)
        )];
        let by_name = self.computed.explain(
            id,
            &|i| Some(self.index.description(i).to_string()),
            &|a| Some(a.to_string()),
        );
        let by_value = self.computed.explain(
            id,
            &|i| outcome.dims.get(&i).map(|d| compact(d)),
            &|a| {
                if self.layouts.arg() == Some(a) {
                    return outcome.data_format.clone();
                }
                bound(&outcome.args, a).map(|v| match v {
                    ArgValue::Str { value } => value.clone(),
                    ArgValue::Int { value } => value.to_string(),
                    other => other.summary(a),
                })
            },
        );
        for text in [by_name, by_value].into_iter().flatten() {
            lines.push(format!("  {id} = {text}"));
        }
        lines.push(format!("  {id} = {}", compact(result)));
        lines
    }

    /// Shape positions of `indices` in every slot, keyed by slot header.
    fn positions_of(&self, outcome: &CallOutcome, indices: &BTreeSet<IndexId>) -> BTreeMap<String, Vec<usize>> {
        let mut marks = BTreeMap::new();
        for slot in &self.slots {
            let mut pos = 0usize;
            let mut hits = Vec::new();
            for &c in slot.sig(outcome.layout).indices() {
                let r = outcome.ranks.get(&c).copied().unwrap_or(0) as usize;
                if indices.contains(&c) {
                    hits.extend(pos..pos + r);
                }
                pos += r;
            }
            if !hits.is_empty() {
                marks.insert(slot.header(), hits);
            }
        }
        marks
    }

    /// Received shapes aligned with the index template of `ranks`, with a
    /// `^` row under highlighted positions.
    fn shape_table(
        &self,
        outcome: &CallOutcome,
        ranks: &RankMap,
        layout: usize,
        highlights: &BTreeMap<String, Vec<usize>>,
    ) -> Vec<String> {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mark_row = |key: &str, width: usize, rows: &mut Vec<Vec<String>>| {
            if let Some(positions) = highlights.get(key) {
                let width = width.max(positions.iter().map(|p| p + 1).max().unwrap_or(0));
                let mut row = vec![String::new()];
                row.extend((0..width).map(|p| {
                    let mark = if positions.contains(&p) { "^" } else { "" };
                    mark.to_string()
                }));
                rows.push(row);
            }
        };

        for slot in &self.slots {
            let Some(value) = bound(&outcome.args, &slot.arg) else {
                continue;
            };
            let header = slot.header();
            let sig = slot.sig(layout);
            let (cells, template): (Vec<String>, Vec<String>) = if slot.kind == ShapeKind::Int {
                let v = value.as_int().map(|v| v.to_string()).unwrap_or_default();
                (vec![v], sig.indices().iter().map(|c| c.to_string()).collect())
            } else {
                let shape = slot_shape(slot, value).unwrap_or_default();
                (
                    shape.iter().map(|d| d.to_string()).collect(),
                    sig.instantiate(ranks),
                )
            };
            let width = cells.len().max(template.len());
            let mut first = vec![header.clone()];
            first.extend(cells);
            let mut second = vec![String::new()];
            second.extend(template);
            rows.push(first);
            rows.push(second);
            mark_row(&header, width, &mut rows);
        }

        for name in &self.params {
            let value = match self.specs.get(name) {
                Some(ArgSpec::Rank { .. }) => bound(&outcome.args, name)
                    .and_then(ArgValue::as_int)
                    .map(|v| v.to_string()),
                Some(ArgSpec::Layout) => bound(&outcome.args, name)
                    .and_then(ArgValue::as_str)
                    .map(String::from),
                _ => continue,
            };
            let Some(value) = value else {
                continue;
            };
            rows.push(vec![name.clone(), value]);
            mark_row(name, 1, &mut rows);
        }

        let mut left = vec![true];
        left.extend(std::iter::repeat_n(false, 16));
        tabulate(&rows, "  ", &left)
            .into_iter()
            .map(|l| format!("  {l}"))
            .collect()
    }
}
