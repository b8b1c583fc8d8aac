#![forbid(unsafe_code)]

//! Data model shared by every opschema crate: indices, signatures, dtypes,
//! call-time argument values and the schema error type.

pub mod dtype;
pub mod error;
pub mod index;
pub mod signature;
pub mod value;

pub use dtype::DType;
pub use error::SchemaError;
pub use index::{DimsMap, IndexId, IndexInfo, IndexRegistry, RankMap};
pub use signature::Signature;
pub use value::{ArgValue, CallArgs};
