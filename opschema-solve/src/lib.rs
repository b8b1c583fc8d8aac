#![forbid(unsafe_code)]

//! Constraint solvers behind a schema: rank enumeration and inference,
//! computed dimensions, dtype rules and layout resolution.

pub mod computed;
pub mod dtype_rules;
pub mod layout;
pub mod rank;

pub use computed::{ComputeFn, ComputedDims, ComputedNode, TemplateFn};
pub use dtype_rules::{DTypeRule, DTypeRules, DTypeViolation, Exclusion};
pub use layout::{DataFormat, Layouts};
pub use rank::{
    FeasibleRegion, NearMiss, RankConstraints, RankLimit, RankObservation, RankSolution,
    DEFAULT_RANK_CAP,
};
