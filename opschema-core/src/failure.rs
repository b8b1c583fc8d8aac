#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::Diagnostic;
use opschema_model::{DType, IndexId, RankMap};
use thiserror::Error;

/// One rank assignment offered as a possible reading of a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankCandidate {
    pub ranks: RankMap,
    /// Data format implied by `ranks` under the received layout.
    pub data_format: Option<String>,
    /// `observed - computed` per rank source; 0 where they agree.
    pub residuals: Vec<i64>,
    pub suggestions: Vec<String>,
    /// Shape positions to highlight, keyed by slot header or argument name.
    pub highlights: BTreeMap<String, Vec<usize>>,
}

/// Sizes seen for one index, per component: size -> slot headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUsage {
    pub index: IndexId,
    pub components: Vec<BTreeMap<i64, Vec<String>>>,
}

impl IndexUsage {
    pub fn is_consistent(&self) -> bool {
        self.components.iter().all(|c| c.len() <= 1)
    }
}

/// A call-time constraint violation. These are values, never panics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum Failure {
    #[error("argument '{arg}' expected {expected}, got {got}")]
    #[diagnostic(code(opschema::call::arg_type))]
    ArgType {
        arg: String,
        expected: String,
        got: String,
    },

    #[error("argument '{arg}' = {value} is outside {range}")]
    #[diagnostic(code(opschema::call::int_range))]
    IntOutOfRange {
        arg: String,
        value: i64,
        range: String,
    },

    #[error("argument '{arg}' = '{value}' is not one of {}", .options.join(", "))]
    #[diagnostic(code(opschema::call::option))]
    OptionNotInSet {
        arg: String,
        value: String,
        options: Vec<String>,
    },

    #[error("{}", if *.ambiguous {
        "argument shapes do not determine a unique set of index ranks"
    } else {
        "no set of index ranks is consistent with the argument shapes"
    })]
    #[diagnostic(
        code(opschema::call::rank_inference),
        help("each candidate below shows one interpretation and the edits that would make it valid")
    )]
    RankInference {
        candidates: Vec<RankCandidate>,
        ambiguous: bool,
    },

    #[error("indices have inconsistent sizes across arguments: {}", usage_list(.usage))]
    #[diagnostic(code(opschema::call::index_usage))]
    IndexUsage { usage: Vec<IndexUsage> },

    #[error("computed index '{index}' is {computed:?} but the arguments give {observed:?}")]
    #[diagnostic(code(opschema::call::computed_mismatch))]
    ComputedMismatch {
        index: IndexId,
        computed: Vec<i64>,
        observed: Vec<i64>,
    },

    #[error("computed index '{index}' = {dims:?} has components below the minimum {min}")]
    #[diagnostic(code(opschema::call::computed_minimum))]
    ComputedBelowMinimum {
        index: IndexId,
        dims: Vec<i64>,
        min: i64,
    },

    #[error("constraint '{name}' failed: {message}")]
    #[diagnostic(code(opschema::call::predicate))]
    CustomPredicate {
        name: String,
        indices: Vec<IndexId>,
        message: String,
    },

    #[error("tensor '{tensor}' has dtype {dtype}, {}", dtype_expectation(.allowed, .equated_to))]
    #[diagnostic(code(opschema::call::dtype))]
    DTypeNotAllowed {
        tensor: String,
        dtype: DType,
        allowed: Vec<DType>,
        equated_to: Option<(String, DType)>,
    },

    #[error("'{arg}' was omitted and layout {layout} has no format for rank {rank} of index '{index}'")]
    #[diagnostic(
        code(opschema::call::data_format),
        help("pass '{arg}' explicitly to pick a format of another layout")
    )]
    NoDataFormat {
        arg: String,
        index: IndexId,
        rank: u32,
        layout: usize,
        formats: Vec<String>,
    },

    #[error("this combination of dtypes, ranks and layout is not available")]
    #[diagnostic(code(opschema::call::dtype_excluded))]
    DTypeExcluded {
        dtypes: Vec<(String, DType)>,
        ranks: Vec<(IndexId, u32)>,
        layout: Option<usize>,
    },
}

fn usage_list(usage: &[IndexUsage]) -> String {
    usage
        .iter()
        .map(|u| format!("'{}'", u.index))
        .collect::<Vec<_>>()
        .join(", ")
}

fn dtype_expectation(allowed: &[DType], equated_to: &Option<(String, DType)>) -> String {
    match equated_to {
        Some((src, d)) => format!("but must match '{src}' which has dtype {d}"),
        None => {
            let names: Vec<&str> = allowed.iter().map(|d| d.name()).collect();
            format!("expected one of {}", names.join(", "))
        }
    }
}

impl Failure {
    /// Taxonomy class name, used by the validation harness.
    pub fn class(&self) -> &'static str {
        match self {
            Failure::ArgType { .. } => "ArgTypeFailure",
            Failure::IntOutOfRange { .. } => "IntOutOfRangeFailure",
            Failure::OptionNotInSet { .. } => "OptionNotInSetFailure",
            Failure::RankInference { .. } => "RankInferenceFailure",
            Failure::IndexUsage { .. } => "IndexUsageFailure",
            Failure::ComputedMismatch { .. } => "ComputedDimensionMismatchFailure",
            Failure::ComputedBelowMinimum { .. } => "ComputedDimensionBelowMinimumFailure",
            Failure::CustomPredicate { .. } => "CustomPredicateFailure",
            Failure::DTypeNotAllowed { .. } => "DTypeNotAllowedFailure",
            Failure::DTypeExcluded { .. } => "DTypeExcludedCombinationFailure",
            Failure::NoDataFormat { .. } => "DataFormatRankFailure",
        }
    }
}

/// Final status of a checked call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed(Failure),
}

impl Status {
    pub fn class(&self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::Failed(f) => f.class(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Status::Success => None,
            Status::Failed(f) => Some(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let f = Failure::OptionNotInSet {
            arg: "padding".into(),
            value: "FULL".into(),
            options: vec!["VALID".into(), "SAME".into()],
        };
        assert_eq!(
            f.to_string(),
            "argument 'padding' = 'FULL' is not one of VALID, SAME"
        );
        assert_eq!(f.class(), "OptionNotInSetFailure");

        let f = Failure::DTypeNotAllowed {
            tensor: "filters".into(),
            dtype: DType::Float16,
            allowed: vec![],
            equated_to: Some(("input".into(), DType::Float32)),
        };
        assert_eq!(
            f.to_string(),
            "tensor 'filters' has dtype float16, but must match 'input' which has dtype float32"
        );
    }

    #[test]
    fn test_status_class() {
        assert_eq!(Status::Success.class(), "Success");
        let s = Status::Failed(Failure::RankInference {
            candidates: vec![],
            ambiguous: false,
        });
        assert!(!s.is_success());
        assert_eq!(s.class(), "RankInferenceFailure");
    }
}
