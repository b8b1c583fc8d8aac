#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Misuse of the schema authoring surface, or a schema that turned out to be
/// wrong at call time.
///
/// Authoring errors surface while the schema is being built and abort the
/// schema load. The few call-time variants (`ComputedRankMismatch`,
/// `OutputShapeMismatch`, ...) mean the schema itself is wrong, never the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum SchemaError {
    #[error("index '{id}' must be a single ASCII letter")]
    #[diagnostic(code(opschema::index))]
    InvalidIndexId { id: String },

    #[error("index '{id}' is already registered")]
    #[diagnostic(code(opschema::index))]
    DuplicateIndex { id: char },

    #[error(
        "signature '{signature}' associated with '{context}' contains unregistered indices; \
         known indices are: {known}"
    )]
    #[diagnostic(
        code(opschema::signature),
        help("register the missing index with add_index")
    )]
    UnknownIndex {
        signature: String,
        context: String,
        known: String,
    },

    #[error("signature '{signature}' repeats index '{id}'")]
    #[diagnostic(code(opschema::signature))]
    RepeatedIndex { signature: String, id: char },

    #[error("index '{id}' is already rank-constrained")]
    #[diagnostic(code(opschema::rank))]
    AlreadyConstrained { id: char },

    #[error("source index '{id}' is not rank-limited")]
    #[diagnostic(
        code(opschema::rank),
        help("give the source index explicit bounds before equating ranks to it")
    )]
    SourceNotRankLimited { id: char },

    #[error("invalid rank bounds [{min}, {max}] for '{signature}'")]
    #[diagnostic(code(opschema::rank))]
    InvalidBounds {
        signature: String,
        min: u32,
        max: u32,
    },

    #[error("'{name}' is not a parameter of '{op}'")]
    #[diagnostic(code(opschema::argument))]
    UnknownParameter { op: String, name: String },

    #[error("parameter '{name}' is already declared")]
    #[diagnostic(code(opschema::argument))]
    DuplicateArgument { name: String },

    #[error("parameters of '{op}' were never declared: {names}")]
    #[diagnostic(
        code(opschema::argument),
        help("declare every parameter, using arg_unchecked for the ones that are not checked")
    )]
    UndeclaredArguments { op: String, names: String },

    #[error("invalid dtype expression '{expr}': {reason}")]
    #[diagnostic(
        code(opschema::dtype),
        help("expressions match ([a-z]+)(8|16|32|64|128)?([+-])?, e.g. 'float', 'int32', 'int32+'")
    )]
    InvalidDTypeExpr { expr: String, reason: String },

    #[error("'{name}' is not a data tensor declared with arg_tensor")]
    #[diagnostic(code(opschema::dtype))]
    NotATensor { name: String },

    #[error("tensor '{name}' already has a dtype constraint")]
    #[diagnostic(code(opschema::dtype))]
    DTypeAlreadyConstrained { name: String },

    #[error("tensor '{name}' has no dtype constraint")]
    #[diagnostic(
        code(opschema::dtype),
        help("call valid_dtypes or equate_dtypes for every tensor argument")
    )]
    MissingDTypeConstraint { name: String },

    #[error("dtype source '{src}' for '{target}' has no valid dtypes registered")]
    #[diagnostic(code(opschema::dtype))]
    DTypeSourceUnresolved { target: String, src: String },

    #[error("invalid dtype exclusion: {reason}")]
    #[diagnostic(code(opschema::dtype))]
    InvalidExclusion { reason: String },

    #[error("layout already declared by argument '{name}'")]
    #[diagnostic(code(opschema::layout))]
    LayoutAlreadyDeclared { name: String },

    #[error("invalid layout declaration: {reason}")]
    #[diagnostic(code(opschema::layout))]
    InvalidLayout { reason: String },

    #[error("'{name}' declares {got} signatures but there are {expected} layouts")]
    #[diagnostic(code(opschema::layout))]
    LayoutSignatureCount {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("index '{id}' is already registered as a computed index")]
    #[diagnostic(code(opschema::computed))]
    DuplicateComputedIndex { id: char },

    #[error(
        "index '{id}' was already used as an input to a computed index; \
         computed_index calls must be in dependency order"
    )]
    #[diagnostic(code(opschema::computed))]
    ComputedOutOfOrder { id: char },

    #[error(
"extra argument '{name}' of index '{id}' must be an integer, rank, option or layout argument"
    )]
    #[diagnostic(code(opschema::computed))]
    InvalidExtraArgument { id: char, name: String },

    #[error("computed index '{id}' returned {got} components but its rank is {expected}")]
    #[diagnostic(code(opschema::computed))]
    ComputedRankMismatch { id: char, got: usize, expected: u32 },

    #[error("dims generator for '{outputs}' returned {got} shapes per tuple, expected {expected}")]
    #[diagnostic(code(opschema::generator))]
    GeneratorShape {
        outputs: String,
        got: usize,
        expected: usize,
    },

    #[error("evaluation graph '{graph}' contains a cycle")]
    #[diagnostic(code(opschema::graph))]
    CyclicGraph { graph: String },

    #[error("dims of index '{id}' are unavailable for return tensor {index}")]
    #[diagnostic(code(opschema::output))]
    UnresolvedReturnIndex { index: usize, id: char },

    #[error("operation returned {got} tensors but the schema declares {expected}")]
    #[diagnostic(code(opschema::output))]
    ReturnCount { got: usize, expected: usize },

    #[error("return tensor {index}: predicted shape {predicted:?} but the operation returned {actual:?}")]
    #[diagnostic(
        code(opschema::output),
        help("the schema's return signature disagrees with the operation; fix the schema")
    )]
    OutputShapeMismatch {
        index: usize,
        predicted: Vec<i64>,
        actual: Vec<i64>,
    },
}
