#![forbid(unsafe_code)]

//! Bundled operation schemas and the support code of the `opschema` binary.

pub mod complib;
pub mod config;
pub mod ops;

pub use config::{ConfigError, FileConfig};
pub use ops::{BundledOp, find, registry};
