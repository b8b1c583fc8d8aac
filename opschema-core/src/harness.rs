#![forbid(unsafe_code)]

//! Parity harness: runs generated configurations through the predicate graph
//! and through the operation itself, and compares the two verdicts.

use std::fmt;

use opschema_model::{ArgValue, CallArgs, SchemaError};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{CheckConfig, GenConfig};
use crate::decl::ArgSpec;
use crate::generate::{Expectation, GenCase};
use crate::schema::Schema;

/// The thing a schema describes. `Err` means the operation rejected the call.
pub trait Operation: Sync {
    fn call(&self, args: &CallArgs) -> Result<Vec<ArgValue>, String>;
}

impl<F> Operation for F
where
    F: Fn(&CallArgs) -> Result<Vec<ArgValue>, String> + Sync,
{
    fn call(&self, args: &CallArgs) -> Result<Vec<ArgValue>, String> {
        self(args)
    }
}

/// Agreement between the schema and the operation on one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Verdict {
    /// Both rejected the call.
    TP,
    /// Both accepted the call.
    TN,
    /// The schema rejected a call the operation accepted.
    FP,
    /// The schema accepted a call the operation rejected.
    FN,
    /// The schema disagreed with the expectation of the case, or the
    /// predicted return shapes were wrong.
    Fail,
}

impl Verdict {
    pub const ALL: [Verdict; 5] = [Verdict::TP, Verdict::TN, Verdict::FP, Verdict::FN, Verdict::Fail];

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::TP => "TP",
            Verdict::TN => "TN",
            Verdict::FP => "FP",
            Verdict::FN => "FN",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub case: GenCase,
    pub verdict: Verdict,
    /// Status class of the predicate graph, e.g. `Success`.
    pub class: &'static str,
    pub op_error: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub op: String,
    pub results: Vec<CaseResult>,
}

impl ValidationReport {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.results.iter().filter(|r| r.verdict == verdict).count()
    }

    /// True when the schema and the operation never disagreed.
    pub fn is_clean(&self) -> bool {
        self.results
            .iter()
            .all(|r| matches!(r.verdict, Verdict::TP | Verdict::TN))
    }

    pub fn disagreements(&self) -> impl Iterator<Item = &CaseResult> {
        self.results
            .iter()
            .filter(|r| !matches!(r.verdict, Verdict::TP | Verdict::TN))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<String> = Verdict::ALL
            .iter()
            .map(|v| format!("{v}={}", self.count(*v)))
            .collect();
        write!(f, "{}: {} cases, {}", self.op, self.results.len(), counts.join(" "))
    }
}

/// Copies of `case` with one shape-bearing argument grown or shrunk by one
/// dimension. Their validity is left for the operation to decide.
pub fn adjacent_cases(schema: &Schema, case: &GenCase) -> Vec<GenCase> {
    let mut out = Vec::new();
    for name in schema.params() {
        let Some(value) = case.args.get(name) else {
            continue;
        };
        let perturbed: Vec<ArgValue> = match (schema.arg_spec(name), value) {
            (Some(ArgSpec::DataTensor), ArgValue::Tensor { shape, dtype }) => {
                grow_shrink(shape)
                    .into_iter()
                    .map(|shape| ArgValue::Tensor { shape, dtype: *dtype })
                    .collect()
            }
            (Some(ArgSpec::ShapeList), ArgValue::List { values }) => grow_shrink(values)
                .into_iter()
                .map(|values| ArgValue::List { values })
                .collect(),
            (Some(ArgSpec::ShapeTensor), ArgValue::IntTensor { values }) => grow_shrink(values)
                .into_iter()
                .map(|values| ArgValue::IntTensor { values })
                .collect(),
            (Some(ArgSpec::ShapeTensor2D { slots }), ArgValue::IntTensor2D { rows }) => {
                grow_shrink_rows(rows, *slots)
                    .into_iter()
                    .map(|rows| ArgValue::IntTensor2D { rows })
                    .collect()
            }
            _ => continue,
        };
        for value in perturbed {
            let mut next = case.clone();
            next.args.insert(name, value);
            next.returns.clear();
            next.expect = Expectation::Unknown;
            out.push(next);
        }
    }
    out
}

fn grow_shrink(xs: &[i64]) -> Vec<Vec<i64>> {
    let mut grown = xs.to_vec();
    grown.push(1);
    let mut out = vec![grown];
    if let Some((_, init)) = xs.split_last() {
        out.push(init.to_vec());
    }
    out
}

/// Row-wise `grow_shrink`: every column gains or loses its last dimension.
fn grow_shrink_rows(rows: &[Vec<i64>], columns: usize) -> Vec<Vec<Vec<i64>>> {
    let mut grown = rows.to_vec();
    grown.push(vec![1; columns]);
    let mut out = vec![grown];
    if let Some((_, init)) = rows.split_last() {
        out.push(init.to_vec());
    }
    out
}

fn classify(
    schema: &Schema,
    op: &dyn Operation,
    case: GenCase,
    cfg: &CheckConfig,
) -> Result<CaseResult, SchemaError> {
    let outcome = schema.check_with(&case.args, cfg)?;
    let class = outcome.status.class();
    let result = op.call(&case.args);

    let (verdict, note) = if case.expect == Expectation::Valid && !outcome.is_success() {
        (Verdict::Fail, Some(schema.explain(&outcome)))
    } else {
        match (outcome.is_success(), &result) {
            (true, Ok(values)) => match schema.check_return(&outcome, values) {
                Ok(()) => (Verdict::TN, None),
                Err(e) => (Verdict::Fail, Some(e.to_string())),
            },
            (true, Err(_)) => (Verdict::FN, None),
            (false, Ok(_)) => (Verdict::FP, Some(schema.explain(&outcome))),
            (false, Err(_)) => (Verdict::TP, None),
        }
    };
    if !matches!(verdict, Verdict::TP | Verdict::TN) {
        debug!(op = %schema.op(), %verdict, class, "schema and operation disagree");
    }
    Ok(CaseResult {
        case,
        verdict,
        class,
        op_error: result.err(),
        note,
    })
}

/// Runs every generated configuration and its adjacent perturbations
/// through the schema and the operation, in parallel.
pub fn validate(
    schema: &Schema,
    op: &dyn Operation,
    gen_cfg: &GenConfig,
    check_cfg: &CheckConfig,
) -> Result<ValidationReport, SchemaError> {
    let generated: Vec<GenCase> = schema.generate(gen_cfg).collect::<Result<_, _>>()?;
    let adjacent: Vec<GenCase> = generated
        .iter()
        .flat_map(|case| adjacent_cases(schema, case))
        .collect();
    let mut cases = generated;
    cases.extend(adjacent);

    let results = cases
        .into_par_iter()
        .map(|case| classify(schema, op, case, check_cfg))
        .collect::<Result<Vec<_>, _>>()?;
    let report = ValidationReport {
        op: schema.op().to_string(),
        results,
    };
    info!(
        op = %report.op,
        cases = report.results.len(),
        tp = report.count(Verdict::TP),
        tn = report.count(Verdict::TN),
        fp = report.count(Verdict::FP),
        fn_ = report.count(Verdict::FN),
        fail = report.count(Verdict::Fail),
        "validation finished"
    );
    Ok(report)
}
