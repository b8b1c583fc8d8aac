#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use opschema_model::{ArgValue, IndexId, Signature};

/// Derives a rank from the shape of an argument, e.g. `shape[-1]`.
pub type DimsFn = Arc<dyn Fn(&[i64]) -> Option<i64> + Send + Sync>;

/// Custom check over the dims of some indices. `Err` carries the message.
pub type IndexPredicateFn = Arc<dyn Fn(&[&[i64]]) -> Result<(), String> + Send + Sync>;

/// Produces dims tuples for some output indices from the ranks of some
/// input indices and the values of its extra arguments. Each tuple has one
/// dims vector per output index.
pub type IndexGeneratorFn =
    Arc<dyn Fn(&[u32], &[ArgValue]) -> Vec<Vec<Vec<i64>>> + Send + Sync>;

/// How a shape-bearing argument carries its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    DataTensor,
    List,
    Int,
    Tensor,
    Tensor2D,
}

/// Declared kind of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSpec {
    DataTensor,
    ShapeList,
    ShapeInt { index: IndexId },
    ShapeTensor,
    ShapeTensor2D { slots: usize },
    Int { lo: Option<i64>, hi: Option<i64> },
    Rank { sig: Signature },
    Option { options: Vec<String> },
    Layout,
    Unchecked,
}

impl ArgSpec {
    pub fn expected(&self) -> &'static str {
        match self {
            ArgSpec::DataTensor => "a tensor",
            ArgSpec::ShapeList => "an integer list",
            ArgSpec::ShapeInt { .. } | ArgSpec::Int { .. } | ArgSpec::Rank { .. } => "an integer",
            ArgSpec::ShapeTensor => "a 1D integer tensor",
            ArgSpec::ShapeTensor2D { .. } => "a 2D integer tensor",
            ArgSpec::Option { .. } | ArgSpec::Layout => "a string",
            ArgSpec::Unchecked => "anything",
        }
    }
}

/// One shape-bearing position: a whole argument, or one column of a 2D
/// shape tensor. Holds one signature per layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeSlot {
    pub arg: String,
    pub column: Option<usize>,
    pub kind: ShapeKind,
    pub sigs: Vec<Signature>,
}

impl ShapeSlot {
    pub fn sig(&self, layout: usize) -> &Signature {
        &self.sigs[layout.min(self.sigs.len() - 1)]
    }

    /// Header naming the shape of this slot in reports.
    pub fn header(&self) -> String {
        match (self.kind, self.column) {
            (ShapeKind::DataTensor, _) => format!("{}.shape", self.arg),
            (ShapeKind::Tensor, _) => format!("{}.numpy()", self.arg),
            (ShapeKind::Tensor2D, Some(c)) => format!("{}[:,{c}]", self.arg),
            _ => self.arg.clone(),
        }
    }

    /// Short name of this slot in sentences.
    pub fn label(&self) -> String {
        match self.column {
            Some(c) => format!("{}[:,{c}]", self.arg),
            None => self.arg.clone(),
        }
    }
}

/// Where an observed rank comes from at call time.
#[derive(Clone)]
pub enum RankSource {
    Shape {
        slot: usize,
    },
    RankArg {
        arg: String,
        sig: Signature,
    },
    DimRank {
        name: String,
        rank_sig: Signature,
        dims_index: IndexId,
        shape_arg: String,
        get_dims: DimsFn,
    },
    /// The rank of the layout's rank index implied by a rank-qualified format.
    Format {
        sig: Signature,
    },
}

impl fmt::Debug for RankSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankSource::Shape { slot } => write!(f, "Shape({slot})"),
            RankSource::RankArg { arg, sig } => write!(f, "RankArg({arg}, {sig})"),
            RankSource::DimRank { name, .. } => write!(f, "DimRank({name})"),
            RankSource::Format { sig } => write!(f, "Format({sig})"),
        }
    }
}

#[derive(Clone)]
pub struct IndexPredicate {
    pub name: String,
    pub indices: Vec<IndexId>,
    pub func: IndexPredicateFn,
}

#[derive(Clone)]
pub struct IndexGenerator {
    pub outputs: Vec<IndexId>,
    pub inputs: Vec<IndexId>,
    pub extra_args: Vec<String>,
    pub func: IndexGeneratorFn,
}

/// One authoring call. Both evaluation graphs are derived from the list of
/// these records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    Arg { name: String },
    Computed { index: IndexId },
    IndexPredicate { id: usize },
    IndexGenerator { id: usize },
    RankDims { source: usize, dims_index: IndexId },
    Return { id: usize },
}
