#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{DType, IndexId, IndexRegistry, SchemaError, Signature};
use opschema_solve::{
    ComputeFn, ComputedDims, DTypeRules, Exclusion, Layouts, RankConstraints, TemplateFn,
};
use tracing::info;

use crate::decl::{
    ArgSpec, Decl, DimsFn, IndexGenerator, IndexGeneratorFn, IndexPredicate, IndexPredicateFn,
    RankSource, ShapeKind, ShapeSlot,
};
use crate::generate::GenFunc;
use crate::graph::{FuncGraph, NodeKey, Owner, Role};
use crate::predicate::PredFunc;
use crate::schema::Schema;

/// Authoring surface of a schema. Every call records one [`Decl`]; both
/// evaluation graphs are derived from that list in [`SchemaBuilder::finish`].
pub struct SchemaBuilder {
    op: String,
    params: Vec<String>,
    index: IndexRegistry,
    rank_cons: RankConstraints,
    computed: ComputedDims,
    dtype_rules: DTypeRules,
    layouts: Layouts,
    specs: BTreeMap<String, ArgSpec>,
    slots: Vec<ShapeSlot>,
    rank_sources: Vec<RankSource>,
    predicates: Vec<IndexPredicate>,
    generators: Vec<IndexGenerator>,
    returns: Vec<Vec<Signature>>,
    decls: Vec<Decl>,
}

impl SchemaBuilder {
    /// Starts a schema for `op` whose parameters, in call order, are `params`.
    pub fn new(op: &str, params: &[&str]) -> Self {
        Self {
            op: op.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            index: IndexRegistry::new(),
            rank_cons: RankConstraints::new(),
            computed: ComputedDims::new(),
            dtype_rules: DTypeRules::new(),
            layouts: Layouts::new(),
            specs: BTreeMap::new(),
            slots: Vec::new(),
            rank_sources: Vec::new(),
            predicates: Vec::new(),
            generators: Vec::new(),
            returns: Vec::new(),
            decls: Vec::new(),
        }
    }

    fn single_index(&self, id: &str, context: &str) -> Result<IndexId, SchemaError> {
        let sig = self.index.check_sig(id, context)?;
        match sig.indices() {
            [only] => Ok(*only),
            _ => Err(SchemaError::InvalidIndexId { id: id.to_string() }),
        }
    }

    fn sigs(&self, texts: &[&str], context: &str) -> Result<Vec<Signature>, SchemaError> {
        texts.iter().map(|t| self.index.check_sig(t, context)).collect()
    }

    fn declare(&mut self, name: &str, spec: ArgSpec) -> Result<(), SchemaError> {
        if !self.params.iter().any(|p| p == name) {
            return Err(SchemaError::UnknownParameter {
                op: self.op.clone(),
                name: name.to_string(),
            });
        }
        if self.specs.contains_key(name) {
            return Err(SchemaError::DuplicateArgument {
                name: name.to_string(),
            });
        }
        self.specs.insert(name.to_string(), spec);
        self.decls.push(Decl::Arg {
            name: name.to_string(),
        });
        Ok(())
    }

    fn push_slot(&mut self, arg: &str, column: Option<usize>, kind: ShapeKind, sigs: Vec<Signature>) {
        let slot = self.slots.len();
        self.slots.push(ShapeSlot {
            arg: arg.to_string(),
            column,
            kind,
            sigs,
        });
        if kind != ShapeKind::Int {
            self.rank_sources.push(RankSource::Shape { slot });
        }
    }

    /// Registers an index. `min`/`max` bound its rank.
    pub fn add_index(
        &mut self,
        id: &str,
        description: &str,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<(), SchemaError> {
        let c = self.index.add(id, description)?;
        if min.is_some() || max.is_some() {
            let sig = self.index.check_sig(&c.to_string(), "add_index")?;
            self.rank_cons.add_limits(&sig, min, max)?;
        }
        Ok(())
    }

    /// Bounds the summed rank of `sig`.
    pub fn limit_ranks(&mut self, sig: &str, min: Option<u32>, max: Option<u32>) -> Result<(), SchemaError> {
        let sig = self.index.check_sig(sig, "limit_ranks")?;
        self.rank_cons.add_limits(&sig, min, max)
    }

    pub fn equate_ranks(&mut self, target: &str, source: &str) -> Result<(), SchemaError> {
        let target = self.single_index(target, "equate_ranks")?;
        let source = self.single_index(source, "equate_ranks")?;
        self.rank_cons.equate_ranks(target, source)
    }

    /// A data tensor. One signature, or one per layout.
    pub fn arg_tensor(&mut self, name: &str, sigs: &[&str]) -> Result<(), SchemaError> {
        let sigs = self.sigs(sigs, name)?;
        self.declare(name, ArgSpec::DataTensor)?;
        self.push_slot(name, None, ShapeKind::DataTensor, sigs);
        Ok(())
    }

    /// An integer list holding a shape.
    pub fn arg_shape_list(&mut self, name: &str, sigs: &[&str]) -> Result<(), SchemaError> {
        let sigs = self.sigs(sigs, name)?;
        self.declare(name, ArgSpec::ShapeList)?;
        self.push_slot(name, None, ShapeKind::List, sigs);
        Ok(())
    }

    /// A single integer standing for every component of `index`.
    pub fn arg_shape_int(&mut self, name: &str, index: &str) -> Result<(), SchemaError> {
        let id = self.single_index(index, name)?;
        let sig = self.index.check_sig(index, name)?;
        self.declare(name, ArgSpec::ShapeInt { index: id })?;
        self.push_slot(name, None, ShapeKind::Int, vec![sig]);
        Ok(())
    }

    /// A 1D integer tensor holding a shape.
    pub fn arg_shape_tensor(&mut self, name: &str, sigs: &[&str]) -> Result<(), SchemaError> {
        let sigs = self.sigs(sigs, name)?;
        self.declare(name, ArgSpec::ShapeTensor)?;
        self.push_slot(name, None, ShapeKind::Tensor, sigs);
        Ok(())
    }

    /// A 2D integer tensor whose columns each hold a shape. `columns[c]`
    /// lists the signatures of column `c`.
    pub fn arg_shape_tensor2d(&mut self, name: &str, columns: &[&[&str]]) -> Result<(), SchemaError> {
        let columns: Vec<Vec<Signature>> = columns
            .iter()
            .map(|c| self.sigs(c, name))
            .collect::<Result<_, _>>()?;
        self.declare(
            name,
            ArgSpec::ShapeTensor2D {
                slots: columns.len(),
            },
        )?;
        for (c, sigs) in columns.into_iter().enumerate() {
            self.push_slot(name, Some(c), ShapeKind::Tensor2D, sigs);
        }
        Ok(())
    }

    /// An integer equal to the summed rank of `sig`.
    pub fn arg_rank(&mut self, name: &str, sig: &str) -> Result<(), SchemaError> {
        let sig = self.index.check_sig(sig, name)?;
        self.declare(name, ArgSpec::Rank { sig: sig.clone() })?;
        self.rank_sources.push(RankSource::RankArg {
            arg: name.to_string(),
            sig,
        });
        Ok(())
    }

    pub fn arg_option(&mut self, name: &str, options: &[&str]) -> Result<(), SchemaError> {
        let options = options.iter().map(|o| o.to_string()).collect();
        self.declare(name, ArgSpec::Option { options })
    }

    /// The data format argument. Each format is `(name, layout, rank)`
    /// where `rank` is the rank of `rank_index` it requires, if any.
    pub fn arg_layout(
        &mut self,
        name: &str,
        formats: &[(&str, usize, Option<u32>)],
        rank_index: Option<&str>,
    ) -> Result<(), SchemaError> {
        let rank_index = rank_index
            .map(|r| self.single_index(r, name))
            .transpose()?;
        self.layouts.configure(name, formats, rank_index)?;
        self.declare(name, ArgSpec::Layout)?;
        if let Some(ri) = rank_index {
            let sig = self.index.check_sig(&ri.to_string(), name)?;
            self.rank_sources.push(RankSource::Format { sig });
        }
        Ok(())
    }

    pub fn arg_int(&mut self, name: &str, lo: Option<i64>, hi: Option<i64>) -> Result<(), SchemaError> {
        self.declare(name, ArgSpec::Int { lo, hi })
    }

    pub fn arg_unchecked(&mut self, name: &str) -> Result<(), SchemaError> {
        self.declare(name, ArgSpec::Unchecked)
    }

    fn require_tensor(&self, name: &str) -> Result<(), SchemaError> {
        match self.specs.get(name) {
            Some(ArgSpec::DataTensor) => Ok(()),
            _ => Err(SchemaError::NotATensor {
                name: name.to_string(),
            }),
        }
    }

    /// Allowed dtypes of `tensor`, as dtype expressions such as `int32+`.
    pub fn valid_dtypes(&mut self, tensor: &str, exprs: &[&str]) -> Result<(), SchemaError> {
        self.require_tensor(tensor)?;
        let mut dtypes = Vec::new();
        for expr in exprs {
            dtypes.extend(DType::parse_expr(expr)?);
        }
        self.dtype_rules.add_valid(tensor, dtypes)
    }

    pub fn equate_dtypes(&mut self, target: &str, source: &str) -> Result<(), SchemaError> {
        self.require_tensor(target)?;
        self.require_tensor(source)?;
        self.dtype_rules.add_equiv(target, source)
    }

    /// Excludes combinations. `fields` is a comma-separated list of tensor
    /// names, single index ids and `:layout`; each row gives one value per
    /// field, with `None` matching anything. Dtype cells are expressions and
    /// expand to one exclusion per dtype.
    pub fn exclude_dtypes(&mut self, fields: &str, rows: &[&[Option<&str>]]) -> Result<(), SchemaError> {
        enum Field {
            Tensor(String),
            Index(IndexId),
            Layout,
        }
        let invalid = |reason: String| SchemaError::InvalidExclusion { reason };

        let mut parsed = Vec::new();
        for f in fields.split(',').map(str::trim) {
            let field = if f == ":layout" {
                Field::Layout
            } else if matches!(self.specs.get(f), Some(ArgSpec::DataTensor)) {
                Field::Tensor(f.to_string())
            } else {
                Field::Index(self.single_index(f, "exclude_dtypes")?)
            };
            parsed.push(field);
        }

        for row in rows {
            if row.len() != parsed.len() {
                return Err(invalid(format!(
                    "row has {} values but there are {} fields",
                    row.len(),
                    parsed.len()
                )));
            }
            let mut base = Exclusion::default();
            let mut dtype_cells: Vec<(String, Vec<DType>)> = Vec::new();
            for (field, cell) in parsed.iter().zip(row.iter()) {
                let Some(cell) = cell else {
                    continue;
                };
                match field {
                    Field::Tensor(t) => dtype_cells.push((t.clone(), DType::parse_expr(cell)?)),
                    Field::Index(i) => {
                        let rank = cell
                            .parse::<u32>()
                            .map_err(|_| invalid(format!("'{cell}' is not a rank")))?;
                        base.ranks.push((*i, rank));
                    }
                    Field::Layout => {
                        let layout = cell
                            .parse::<usize>()
                            .map_err(|_| invalid(format!("'{cell}' is not a layout code")))?;
                        base.layout = Some(layout);
                    }
                }
            }
            let mut expanded = vec![base];
            for (tensor, dtypes) in &dtype_cells {
                expanded = expanded
                    .into_iter()
                    .flat_map(|ex| {
                        dtypes.iter().map(move |&d| {
                            let mut next = ex.clone();
                            next.dtypes.push((tensor.clone(), d));
                            next
                        })
                    })
                    .collect();
            }
            for ex in expanded {
                self.dtype_rules.add_exclusion(ex);
            }
        }
        Ok(())
    }

    /// Declares `output` as computed from the dims of `inputs` and the
    /// values of `extra_args`. Components below `min_value` are rejected.
    pub fn computed_index(
        &mut self,
        output: &str,
        compute: ComputeFn,
        template: TemplateFn,
        inputs: &str,
        min_value: i64,
        extra_args: &[&str],
    ) -> Result<(), SchemaError> {
        let id = self.single_index(output, "computed_index")?;
        let inputs = self.index.check_sig(inputs, "computed_index")?;
        self.check_extra_args(id, extra_args)?;
        self.computed
            .add(id, compute, template, inputs.indices(), min_value, extra_args)?;
        self.decls.push(Decl::Computed { index: id });
        Ok(())
    }

    /// Extra arguments must be scalars known before the dims are.
    fn check_extra_args(&self, id: IndexId, extra_args: &[&str]) -> Result<(), SchemaError> {
        for &name in extra_args {
            match self.specs.get(name) {
                None => {
                    return Err(SchemaError::UnknownParameter {
                        op: self.op.clone(),
                        name: name.to_string(),
                    });
                }
                Some(
                    ArgSpec::Int { .. } | ArgSpec::Rank { .. } | ArgSpec::Option { .. } | ArgSpec::Layout,
                ) => {}
                Some(_) => {
                    return Err(SchemaError::InvalidExtraArgument {
                        id,
                        name: name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// A custom check over the dims of `indices`.
    pub fn add_index_predicate(
        &mut self,
        name: &str,
        func: IndexPredicateFn,
        indices: &str,
    ) -> Result<(), SchemaError> {
        let sig = self.index.check_sig(indices, name)?;
        let id = self.predicates.len();
        self.predicates.push(IndexPredicate {
            name: name.to_string(),
            indices: sig.indices().to_vec(),
            func,
        });
        self.decls.push(Decl::IndexPredicate { id });
        Ok(())
    }

    /// A custom dims source for `outputs`, called with the ranks of `inputs`
    /// and the values of `extra_args`.
    pub fn add_index_generator(
        &mut self,
        outputs: &str,
        func: IndexGeneratorFn,
        inputs: &str,
        extra_args: &[&str],
    ) -> Result<(), SchemaError> {
        let outputs = self.index.check_sig(outputs, "add_index_generator")?;
        let inputs = self.index.check_sig(inputs, "add_index_generator")?;
        if let Some(&first) = outputs.indices().first() {
            self.check_extra_args(first, extra_args)?;
        }
        let id = self.generators.len();
        self.generators.push(IndexGenerator {
            outputs: outputs.indices().to_vec(),
            inputs: inputs.indices().to_vec(),
            extra_args: extra_args.iter().map(|a| a.to_string()).collect(),
            func,
        });
        self.decls.push(Decl::IndexGenerator { id });
        Ok(())
    }

    /// Requires `RANK(rank_sig) == get_dims(shape of shape_arg)`. When
    /// generating, every component of `dims_index` is set to that rank.
    pub fn rank_dims_constraint(
        &mut self,
        name: &str,
        get_dims: DimsFn,
        rank_sig: &str,
        dims_index: &str,
        shape_arg: &str,
    ) -> Result<(), SchemaError> {
        let rank_sig = self.index.check_sig(rank_sig, name)?;
        let dims_index = self.single_index(dims_index, name)?;
        if !self.slots.iter().any(|s| s.arg == shape_arg) {
            return Err(SchemaError::UnknownParameter {
                op: self.op.clone(),
                name: shape_arg.to_string(),
            });
        }
        let source = self.rank_sources.len();
        self.rank_sources.push(RankSource::DimRank {
            name: name.to_string(),
            rank_sig,
            dims_index,
            shape_arg: shape_arg.to_string(),
            get_dims,
        });
        self.decls.push(Decl::RankDims { source, dims_index });
        Ok(())
    }

    /// Declares the next return tensor by its signature(s).
    pub fn return_tensor(&mut self, sigs: &[&str]) -> Result<(), SchemaError> {
        let id = self.returns.len();
        let sigs = self.sigs(sigs, &format!("return {id}"))?;
        self.returns.push(sigs);
        self.decls.push(Decl::Return { id });
        Ok(())
    }

    /// Validates the declarations and derives both evaluation graphs.
    pub fn finish(mut self) -> Result<Schema, SchemaError> {
        let missing: Vec<&str> = self
            .params
            .iter()
            .filter(|p| !self.specs.contains_key(*p))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::UndeclaredArguments {
                op: self.op.clone(),
                names: missing.join(", "),
            });
        }

        for slot in &mut self.slots {
            slot.sigs = self.layouts.broadcast_sigs(&slot.label(), &slot.sigs)?;
        }
        for (i, sigs) in self.returns.iter_mut().enumerate() {
            *sigs = self.layouts.broadcast_sigs(&format!("return {i}"), sigs)?;
        }
        let tensors: Vec<String> = self
            .params
            .iter()
            .filter(|p| matches!(self.specs.get(*p), Some(ArgSpec::DataTensor)))
            .cloned()
            .collect();
        self.dtype_rules.finalize_check(&tensors)?;

        let (pred_graph, gen_graph) = self.wire();
        let pred_order = pred_graph.topo_order()?;
        let gen_order = gen_graph.topo_order()?;

        info!(
            op = %self.op,
            indices = self.index.len(),
            params = self.params.len(),
            predicate_nodes = pred_graph.len(),
            generative_nodes = gen_graph.len(),
            "schema finalized"
        );

        Ok(Schema {
            op: self.op,
            params: self.params,
            index: self.index,
            rank_cons: self.rank_cons,
            computed: self.computed,
            dtype_rules: self.dtype_rules,
            layouts: self.layouts,
            specs: self.specs,
            slots: self.slots,
            rank_sources: self.rank_sources,
            predicates: self.predicates,
            generators: self.generators,
            returns: self.returns,
            decls: self.decls,
            pred_graph,
            pred_order,
            gen_graph,
            gen_order,
        })
    }

    /// Derives the node families of both graphs from the declaration list.
    fn wire(&self) -> (FuncGraph<PredFunc>, FuncGraph<GenFunc>) {
        let mut pred: FuncGraph<PredFunc> = FuncGraph::new("predicate");
        let mut generative: FuncGraph<GenFunc> = FuncGraph::new("generative");
        let schema = NodeKey::schema;

        let format_parents: Vec<NodeKey> = self
            .layouts
            .arg()
            .map(|a| NodeKey::arg(a, Role::Value))
            .into_iter()
            .collect();
        pred.add(schema(Role::DataFormat), PredFunc::DataFormat, &format_parents);
        pred.add(schema(Role::Ranks), PredFunc::Ranks, &[schema(Role::DataFormat)]);
        pred.add(schema(Role::IndexDims), PredFunc::IndexDims, &[schema(Role::Ranks)]);
        pred.add(schema(Role::DTypes), PredFunc::DTypes, &[schema(Role::IndexDims)]);

        generative.add(schema(Role::Layout), GenFunc::Layout, &[]);
        generative.add(schema(Role::Ranks), GenFunc::Ranks, &[schema(Role::Layout)]);
        generative.add(schema(Role::DataFormat), GenFunc::DataFormat, &[schema(Role::Ranks)]);
        generative.add(schema(Role::DTypes), GenFunc::DTypes, &[schema(Role::DataFormat)]);
        generative.add(schema(Role::Dims), GenFunc::SampleDims, &[schema(Role::DTypes)]);
        generative.add(schema(Role::TensorSize), GenFunc::TensorSize, &[schema(Role::Dims)]);

        let computed_key = |id: IndexId, role: Role| NodeKey::index(id, role);

        for decl in &self.decls {
            match decl {
                Decl::Arg { name } => {
                    let value = NodeKey::arg(name, Role::Value);
                    pred.add(value.clone(), PredFunc::Arg(name.clone()), &[]);
                    let last = match self.specs.get(name) {
                        Some(ArgSpec::Int { .. } | ArgSpec::Rank { .. }) => {
                            let range = NodeKey::arg(name, Role::Range);
                            pred.add(range.clone(), PredFunc::Range(name.clone()), &[value.clone()]);
                            range
                        }
                        Some(ArgSpec::Option { .. }) => {
                            let check = NodeKey::arg(name, Role::Check);
                            pred.add(check.clone(), PredFunc::Options(name.clone()), &[value.clone()]);
                            check
                        }
                        _ => value.clone(),
                    };
                    pred.append_parent(&schema(Role::Ranks), &last);

                    let func = match self.specs.get(name) {
                        Some(ArgSpec::Int { .. }) => Some(GenFunc::Int(name.clone())),
                        Some(ArgSpec::Rank { .. }) => Some(GenFunc::RankArg(name.clone())),
                        Some(ArgSpec::Option { .. }) => Some(GenFunc::Options(name.clone())),
                        Some(ArgSpec::Unchecked) => Some(GenFunc::Unchecked(name.clone())),
                        Some(ArgSpec::Layout) | None => None,
                        Some(_) => {
                            generative.add(
                                value.clone(),
                                GenFunc::ShapeArg(name.clone()),
                                &[schema(Role::TensorSize)],
                            );
                            None
                        }
                    };
                    if let Some(func) = func {
                        generative.add(value.clone(), func, &[schema(Role::Ranks)]);
                        generative.append_parent(&schema(Role::Dims), &value);
                    }
                }
                Decl::Computed { index } => {
                    let Some(node) = self.computed.get(*index) else {
                        continue;
                    };
                    let mut parents = vec![schema(Role::IndexDims)];
                    let mut gen_parents = vec![schema(Role::Dims)];
                    for &input in &node.inputs {
                        if self.computed.is_computed(input) {
                            parents.push(computed_key(input, Role::Match));
                            gen_parents.push(computed_key(input, Role::Minimum));
                        }
                    }
                    parents.extend(node.extra_args.iter().map(|a| NodeKey::arg(a, Role::Value)));

                    let (c, m, x) = (
                        computed_key(*index, Role::Computed),
                        computed_key(*index, Role::Minimum),
                        computed_key(*index, Role::Match),
                    );
                    pred.add(c.clone(), PredFunc::Computed(*index), &parents);
                    pred.add(m.clone(), PredFunc::Minimum(*index), &[c.clone()]);
                    pred.add(x.clone(), PredFunc::ComputedMatch(*index), &[m.clone()]);
                    pred.append_parent(&schema(Role::DTypes), &x);

                    generative.add(c.clone(), GenFunc::Computed(*index), &gen_parents);
                    generative.add(m.clone(), GenFunc::Minimum(*index), &[c]);
                    generative.append_parent(&schema(Role::TensorSize), &m);
                }
                Decl::IndexPredicate { id } => {
                    let key = NodeKey::new(Owner::Predicate(*id), Role::Check);
                    let mut parents = vec![schema(Role::IndexDims)];
                    let mut gen_parents = vec![schema(Role::Dims)];
                    for &i in &self.predicates[*id].indices {
                        if self.computed.is_computed(i) {
                            parents.push(computed_key(i, Role::Match));
                            gen_parents.push(computed_key(i, Role::Minimum));
                        }
                    }
                    pred.add(key.clone(), PredFunc::Predicate(*id), &parents);
                    pred.append_parent(&schema(Role::DTypes), &key);
                    generative.add(key.clone(), GenFunc::Predicate(*id), &gen_parents);
                    generative.append_parent(&schema(Role::TensorSize), &key);
                }
                Decl::IndexGenerator { id } => {
                    let key = NodeKey::new(Owner::Generator(*id), Role::Dims);
                    let mut parents = vec![schema(Role::Ranks)];
                    for arg in &self.generators[*id].extra_args {
                        if self.layouts.arg() == Some(arg.as_str()) {
                            parents.push(schema(Role::DataFormat));
                        } else {
                            parents.push(NodeKey::arg(arg, Role::Value));
                        }
                    }
                    generative.add(key.clone(), GenFunc::Generator(*id), &parents);
                    generative.append_parent(&schema(Role::Dims), &key);
                }
                Decl::RankDims { source, dims_index } => {
                    let key = computed_key(*dims_index, Role::Dims);
                    generative.add(key.clone(), GenFunc::RankDims(*source), &[schema(Role::Ranks)]);
                    generative.append_parent(&schema(Role::Dims), &key);
                }
                Decl::Return { id } => {
                    let key = NodeKey::new(Owner::Return(*id), Role::Predicted);
                    pred.add(key.clone(), PredFunc::Predicted(*id), &[schema(Role::DTypes)]);
                    generative.add(key, GenFunc::Predicted(*id), &[schema(Role::TensorSize)]);
                }
            }
        }
        (pred, generative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opschema_model::ArgValue;
    use std::sync::Arc;

    fn base() -> SchemaBuilder {
        let mut b = SchemaBuilder::new("toy", &["x", "k", "mode"]);
        b.add_index("b", "batch", Some(1), Some(1)).unwrap();
        b.add_index("s", "spatial", Some(1), Some(2)).unwrap();
        b
    }

    #[test]
    fn test_unknown_and_duplicate_parameters() {
        let mut b = base();
        assert!(matches!(
            b.arg_tensor("y", &["bs"]),
            Err(SchemaError::UnknownParameter { .. })
        ));
        b.arg_tensor("x", &["bs"]).unwrap();
        assert_eq!(
            b.arg_tensor("x", &["bs"]),
            Err(SchemaError::DuplicateArgument { name: "x".into() })
        );
    }

    #[test]
    fn test_unknown_index_in_signature() {
        let mut b = base();
        assert!(matches!(
            b.arg_tensor("x", &["bq"]),
            Err(SchemaError::UnknownIndex { .. })
        ));
    }

    #[test]
    fn test_undeclared_parameters_fail_finish() {
        let mut b = base();
        b.arg_tensor("x", &["bs"]).unwrap();
        b.valid_dtypes("x", &["float"]).unwrap();
        match b.finish() {
            Err(SchemaError::UndeclaredArguments { names, .. }) => assert_eq!(names, "k, mode"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_dtype_fails_finish() {
        let mut b = base();
        b.arg_tensor("x", &["bs"]).unwrap();
        b.arg_int("k", Some(0), None).unwrap();
        b.arg_option("mode", &["a", "b"]).unwrap();
        assert_eq!(
            b.finish().err(),
            Some(SchemaError::MissingDTypeConstraint { name: "x".into() })
        );
    }

    #[test]
    fn test_computed_extra_args_must_be_scalars() {
        let mut b = base();
        b.add_index("o", "out", None, None).unwrap();
        b.arg_tensor("x", &["bs"]).unwrap();
        let f: ComputeFn = Arc::new(|d: &[&[i64]], _: &[ArgValue]| d[0].to_vec());
        let t: TemplateFn = Arc::new(|d: &[String], _: &[String]| d[0].clone());
        assert_eq!(
            b.computed_index("o", f, t, "s", 1, &["x"]),
            Err(SchemaError::InvalidExtraArgument {
                id: 'o',
                name: "x".into()
            })
        );
    }

    #[test]
    fn test_layout_signature_counts() {
        let mut b = SchemaBuilder::new("toy", &["x", "fmt"]);
        b.add_index("b", "batch", Some(1), Some(1)).unwrap();
        b.add_index("c", "channel", Some(1), Some(1)).unwrap();
        b.arg_tensor("x", &["bc", "cb", "bc"]).unwrap();
        b.valid_dtypes("x", &["int32"]).unwrap();
        b.arg_layout("fmt", &[("NC", 0, None), ("CN", 1, None)], None)
            .unwrap();
        assert_eq!(
            b.finish().err(),
            Some(SchemaError::LayoutSignatureCount {
                name: "x".into(),
                got: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn test_exclusion_rows_expand_dtype_expressions() {
        let mut b = base();
        b.arg_tensor("x", &["bs"]).unwrap();
        b.valid_dtypes("x", &["float"]).unwrap();
        b.exclude_dtypes("x,s", &[&[Some("float32+"), Some("2")]])
            .unwrap();
        let ex = b.dtype_rules.exclusions();
        assert_eq!(ex.len(), 2);
        assert_eq!(ex[0].dtypes, vec![("x".to_string(), DType::Float32)]);
        assert_eq!(ex[1].ranks, vec![('s', 2)]);
        assert!(matches!(
            b.exclude_dtypes("x,s", &[&[Some("float32")]]),
            Err(SchemaError::InvalidExclusion { .. })
        ));
    }

    #[test]
    fn test_graphs_are_wired_from_declarations() {
        let mut b = base();
        b.arg_tensor("x", &["bs"]).unwrap();
        b.valid_dtypes("x", &["float"]).unwrap();
        b.arg_int("k", Some(0), Some(4)).unwrap();
        b.arg_option("mode", &["a", "b"]).unwrap();
        b.return_tensor(&["bs"]).unwrap();
        let schema = b.finish().unwrap();

        let pred = schema.predicate_order();
        let pos = |k: &NodeKey| pred.iter().position(|p| *p == k).unwrap();
        assert!(pos(&NodeKey::arg("k", Role::Range)) < pos(&NodeKey::schema(Role::Ranks)));
        assert!(pos(&NodeKey::schema(Role::IndexDims)) < pos(&NodeKey::schema(Role::DTypes)));
        assert_eq!(
            pred.last().map(|k| k.owner.clone()),
            Some(Owner::Return(0))
        );

        let generative = schema.generative_order();
        let gpos = |k: &NodeKey| generative.iter().position(|p| *p == k).unwrap();
        assert!(gpos(&NodeKey::arg("mode", Role::Value)) < gpos(&NodeKey::schema(Role::Dims)));
        assert!(gpos(&NodeKey::schema(Role::TensorSize)) < gpos(&NodeKey::arg("x", Role::Value)));
    }
}
