#![forbid(unsafe_code)]

//! Schema authoring, call checking and configuration generation for
//! parametrized tensor operations.
//!
//! A [`SchemaBuilder`] collects declarations and wires them into two graphs:
//! the predicate graph checks one concrete call, the generative graph
//! enumerates configurations the schema accepts. Both are owned by the
//! immutable [`Schema`] returned by [`SchemaBuilder::finish`].

mod builder;
mod call;
mod config;
mod decl;
mod explain;
mod failure;
mod generate;
mod graph;
mod harness;
mod inventory;
mod predicate;
mod rank_obs;
mod schema;
mod table;

pub use builder::SchemaBuilder;
pub use call::{CallOutcome, Phase};
pub use config::{CheckConfig, GenConfig};
pub use decl::{
    ArgSpec, Decl, DimsFn, IndexGenerator, IndexGeneratorFn, IndexPredicate, IndexPredicateFn,
    RankSource, ShapeKind, ShapeSlot,
};
pub use failure::{Failure, IndexUsage, RankCandidate, Status};
pub use generate::{Configs, Expectation, GenCase};
pub use graph::{FuncGraph, Node, NodeKey, Owner, Role};
pub use harness::{CaseResult, Operation, ValidationReport, Verdict, adjacent_cases, validate};
pub use schema::Schema;
pub use table::{tabulate, transpose};

pub use opschema_model::{ArgValue, CallArgs, DType, IndexId, SchemaError, Signature};
pub use opschema_solve::{ComputeFn, TemplateFn};
