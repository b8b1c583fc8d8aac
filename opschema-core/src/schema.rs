#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{ArgValue, CallArgs, IndexId, IndexRegistry, SchemaError, Signature};
use opschema_solve::{ComputedDims, DTypeRules, Layouts, RankConstraints};
use tracing::debug;

use crate::call::{CallOutcome, CallState};
use crate::config::{CheckConfig, GenConfig};
use crate::decl::{ArgSpec, Decl, IndexGenerator, IndexPredicate, RankSource, ShapeSlot};
use crate::generate::{Configs, GenFunc};
use crate::graph::{FuncGraph, NodeKey};
use crate::predicate::PredFunc;

/// A finalized operation schema. Immutable; share it freely across threads.
pub struct Schema {
    pub(crate) op: String,
    pub(crate) params: Vec<String>,
    pub(crate) index: IndexRegistry,
    pub(crate) rank_cons: RankConstraints,
    pub(crate) computed: ComputedDims,
    pub(crate) dtype_rules: DTypeRules,
    pub(crate) layouts: Layouts,
    pub(crate) specs: BTreeMap<String, ArgSpec>,
    pub(crate) slots: Vec<ShapeSlot>,
    pub(crate) rank_sources: Vec<RankSource>,
    pub(crate) predicates: Vec<IndexPredicate>,
    pub(crate) generators: Vec<IndexGenerator>,
    pub(crate) returns: Vec<Vec<Signature>>,
    pub(crate) decls: Vec<Decl>,
    pub(crate) pred_graph: FuncGraph<PredFunc>,
    pub(crate) pred_order: Vec<usize>,
    pub(crate) gen_graph: FuncGraph<GenFunc>,
    pub(crate) gen_order: Vec<usize>,
}

impl Schema {
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn index_registry(&self) -> &IndexRegistry {
        &self.index
    }

    pub fn rank_constraints(&self) -> &RankConstraints {
        &self.rank_cons
    }

    pub fn computed_dims(&self) -> &ComputedDims {
        &self.computed
    }

    pub fn dtype_rules(&self) -> &DTypeRules {
        &self.dtype_rules
    }

    pub fn layouts(&self) -> &Layouts {
        &self.layouts
    }

    pub fn arg_spec(&self, name: &str) -> Option<&ArgSpec> {
        self.specs.get(name)
    }

    pub fn slots(&self) -> &[ShapeSlot] {
        &self.slots
    }

    pub fn decls(&self) -> &[Decl] {
        &self.decls
    }

    pub fn num_returns(&self) -> usize {
        self.returns.len()
    }

    /// Registered indices in registration order.
    pub fn indices(&self) -> Vec<IndexId> {
        self.index.ids().collect()
    }

    /// Data tensor parameters in parameter order.
    pub fn data_tensors(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| matches!(self.specs.get(*p), Some(ArgSpec::DataTensor)))
            .map(String::as_str)
    }

    /// Indices carried by scalar shape arguments; all their components are equal.
    pub(crate) fn scalar_indices(&self) -> Vec<IndexId> {
        self.specs
            .values()
            .filter_map(|s| match s {
                ArgSpec::ShapeInt { index } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Node keys of the predicate graph in evaluation order.
    pub fn predicate_order(&self) -> Vec<&NodeKey> {
        self.pred_order
            .iter()
            .map(|&i| &self.pred_graph.node(i).key)
            .collect()
    }

    /// Node keys of the generative graph in evaluation order.
    pub fn generative_order(&self) -> Vec<&NodeKey> {
        self.gen_order
            .iter()
            .map(|&i| &self.gen_graph.node(i).key)
            .collect()
    }

    pub fn check(&self, args: &CallArgs) -> Result<CallOutcome, SchemaError> {
        self.check_with(args, &CheckConfig::default())
    }

    /// Walks the predicate graph over one call, stopping at the first
    /// failure. `Err` means the schema itself is wrong.
    pub fn check_with(&self, args: &CallArgs, cfg: &CheckConfig) -> Result<CallOutcome, SchemaError> {
        let mut st = CallState::new(args);
        for &id in &self.pred_order {
            let node = self.pred_graph.node(id);
            if let Some(failure) = node.func.eval(self, &mut st, cfg)? {
                debug!(op = %self.op, node = ?node.key, class = failure.class(), "call rejected");
                return Ok(st.finish(Some(failure)));
            }
        }
        Ok(st.finish(None))
    }

    /// Compares the tensors an operation returned with the predicted shapes
    /// of a successful check. Calls that failed the check are not compared.
    pub fn check_return(&self, outcome: &CallOutcome, actual: &[ArgValue]) -> Result<(), SchemaError> {
        if !outcome.is_success() {
            return Ok(());
        }
        if actual.len() != outcome.predicted.len() {
            return Err(SchemaError::ReturnCount {
                got: actual.len(),
                expected: outcome.predicted.len(),
            });
        }
        for (index, (predicted, value)) in outcome.predicted.iter().zip(actual).enumerate() {
            let shape = match value {
                ArgValue::Tensor { shape, .. } => shape.clone(),
                other => other.as_ints().map(<[i64]>::to_vec).unwrap_or_default(),
            };
            if *predicted != shape {
                return Err(SchemaError::OutputShapeMismatch {
                    index,
                    predicted: predicted.clone(),
                    actual: shape,
                });
            }
        }
        Ok(())
    }

    /// Generated configurations. Equal configs give equal sequences.
    pub fn generate(&self, cfg: &GenConfig) -> Configs<'_> {
        Configs::new(self, cfg)
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("op", &self.op)
            .field("params", &self.params)
            .field("indices", &self.indices())
            .field("decls", &self.decls)
            .finish_non_exhaustive()
    }
}
