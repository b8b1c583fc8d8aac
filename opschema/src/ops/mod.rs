#![forbid(unsafe_code)]

//! Bundled operation schemas, each with the shape function it describes.

use opschema_core::{ArgValue, CallArgs, DType, Schema, SchemaError};

pub mod conv_transpose;
pub mod gather_nd;

/// Builds a schema.
pub type BuildFn = fn() -> Result<Schema, SchemaError>;

/// Shape-level stand-in for an operation: returns the output tensors or the
/// reason the call is rejected.
pub type ReferenceFn = fn(&CallArgs) -> Result<Vec<ArgValue>, String>;

pub struct BundledOp {
    pub name: &'static str,
    pub summary: &'static str,
    pub build: BuildFn,
    pub reference: ReferenceFn,
}

static REGISTRY: &[BundledOp] = &[
    BundledOp {
        name: "gather_nd",
        summary: "gather slices of params addressed by the last axis of indices",
        build: gather_nd::schema,
        reference: gather_nd::reference,
    },
    BundledOp {
        name: "conv_transpose",
        summary: "1D to 3D transposed convolution, channel-first or channel-last",
        build: conv_transpose::schema,
        reference: conv_transpose::reference,
    },
];

pub fn registry() -> &'static [BundledOp] {
    REGISTRY
}

pub fn find(name: &str) -> Option<&'static BundledOp> {
    REGISTRY.iter().find(|op| op.name == name)
}

/// Shape and dtype of a tensor argument.
pub(crate) fn tensor_arg<'a>(
    args: &'a CallArgs,
    name: &str,
) -> Result<(&'a [i64], DType), String> {
    match args.get(name) {
        Some(ArgValue::Tensor { shape, dtype }) => Ok((shape, *dtype)),
        _ => Err(format!("'{name}' must be a tensor")),
    }
}
