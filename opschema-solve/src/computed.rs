#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use opschema_model::{ArgValue, DimsMap, IndexId, RankMap, SchemaError};

/// Computes the dims of a computed index from the dims of its inputs (in
/// declaration order) and the values of its extra arguments.
pub type ComputeFn = Arc<dyn Fn(&[&[i64]], &[ArgValue]) -> Vec<i64> + Send + Sync>;

/// Renders a derivation. Receives one string per input index and one per
/// extra argument; either descriptions or concrete values.
pub type TemplateFn = Arc<dyn Fn(&[String], &[String]) -> String + Send + Sync>;

#[derive(Clone)]
pub struct ComputedNode {
    pub output: IndexId,
    pub inputs: Vec<IndexId>,
    pub extra_args: Vec<String>,
    pub min_value: i64,
    compute: ComputeFn,
    template: TemplateFn,
}

impl fmt::Debug for ComputedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedNode")
            .field("output", &self.output)
            .field("inputs", &self.inputs)
            .field("extra_args", &self.extra_args)
            .field("min_value", &self.min_value)
            .finish_non_exhaustive()
    }
}

impl ComputedNode {
    /// First component below the declared minimum, as (position, value).
    pub fn below_minimum(&self, dims: &[i64]) -> Option<(usize, i64)> {
        dims.iter()
            .copied()
            .enumerate()
            .find(|&(_, d)| d < self.min_value)
    }
}

/// Dependency-ordered registry of computed indices.
#[derive(Debug, Clone, Default)]
pub struct ComputedDims {
    nodes: Vec<ComputedNode>,
    used_as_input: BTreeSet<IndexId>,
}

impl ComputedDims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        output: IndexId,
        compute: ComputeFn,
        template: TemplateFn,
        inputs: &[IndexId],
        min_value: i64,
        extra_args: &[&str],
    ) -> Result<(), SchemaError> {
        if self.is_computed(output) {
            return Err(SchemaError::DuplicateComputedIndex { id: output });
        }
        if self.used_as_input.contains(&output) || inputs.contains(&output) {
            return Err(SchemaError::ComputedOutOfOrder { id: output });
        }
        self.used_as_input.extend(inputs.iter().copied());
        self.nodes.push(ComputedNode {
            output,
            inputs: inputs.to_vec(),
            extra_args: extra_args.iter().map(|s| s.to_string()).collect(),
            min_value,
            compute,
            template,
        });
        Ok(())
    }

    pub fn is_computed(&self, id: IndexId) -> bool {
        self.nodes.iter().any(|n| n.output == id)
    }

    pub fn get(&self, id: IndexId) -> Option<&ComputedNode> {
        self.nodes.iter().find(|n| n.output == id)
    }

    pub fn nodes(&self) -> &[ComputedNode] {
        &self.nodes
    }

    pub fn outputs(&self) -> impl Iterator<Item = IndexId> + '_ {
        self.nodes.iter().map(|n| n.output)
    }

    /// Evaluates one computed index. `Ok(None)` if an input's dims or an
    /// extra argument is not available yet.
    pub fn evaluate_one(
        &self,
        id: IndexId,
        dims: &DimsMap,
        extras: &dyn Fn(&str) -> Option<ArgValue>,
        ranks: &RankMap,
    ) -> Result<Option<Vec<i64>>, SchemaError> {
        let Some(node) = self.get(id) else {
            return Ok(None);
        };
        let mut inputs: Vec<&[i64]> = Vec::with_capacity(node.inputs.len());
        for i in &node.inputs {
            match dims.get(i) {
                Some(d) => inputs.push(d),
                None => return Ok(None),
            }
        }
        let mut values = Vec::with_capacity(node.extra_args.len());
        for name in &node.extra_args {
            match extras(name) {
                Some(v) => values.push(v),
                None => return Ok(None),
            }
        }
        let result = (node.compute)(&inputs, &values);
        let expected = ranks.get(&id).copied().unwrap_or(0);
        if result.len() != expected as usize {
            return Err(SchemaError::ComputedRankMismatch {
                id,
                got: result.len(),
                expected,
            });
        }
        Ok(Some(result))
    }

    /// Evaluates every computed index in registration order, inserting the
    /// results into `dims`. Returns the indices computed by this call.
    pub fn evaluate_all(
        &self,
        dims: &mut DimsMap,
        extras: &dyn Fn(&str) -> Option<ArgValue>,
        ranks: &RankMap,
    ) -> Result<Vec<IndexId>, SchemaError> {
        let mut done = Vec::new();
        for node in &self.nodes {
            if let Some(v) = self.evaluate_one(node.output, dims, extras, ranks)? {
                dims.insert(node.output, v);
                done.push(node.output);
            }
        }
        Ok(done)
    }

    /// Non-computed indices that `id` ultimately depends on, in first-seen order.
    pub fn input_closure(&self, id: IndexId) -> Vec<IndexId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        let mut seen = BTreeSet::new();
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            match self.get(cur) {
                Some(node) => stack.extend(node.inputs.iter().rev().copied()),
                None if cur != id => out.push(cur),
                None => {}
            }
        }
        out
    }

    /// Indices not computed by anything but read by some computed index.
    pub fn input_indices(&self) -> Vec<IndexId> {
        let mut out: Vec<IndexId> = Vec::new();
        for node in &self.nodes {
            for &i in &node.inputs {
                if !self.is_computed(i) && !out.contains(&i) {
                    out.push(i);
                }
            }
        }
        out
    }

    /// Derivation text of `id`. `describe` renders an input index, `extra`
    /// renders an extra argument; both return `None` to skip the rendering.
    pub fn explain(
        &self,
        id: IndexId,
        describe: &dyn Fn(IndexId) -> Option<String>,
        extra: &dyn Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let node = self.get(id)?;
        let inputs: Option<Vec<String>> = node.inputs.iter().map(|&i| describe(i)).collect();
        let extras: Option<Vec<String>> = node.extra_args.iter().map(|a| extra(a)).collect();
        Some((node.template)(&inputs?, &extras?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dilate() -> ComputeFn {
        Arc::new(|dims: &[&[i64]], extra: &[ArgValue]| -> Vec<i64> {
            let d = extra.first().and_then(|v| v.as_int()).unwrap_or(1);
            dims[0].iter().map(|f| (f - 1) * d + 1).collect()
        })
    }

    fn dilate_t() -> TemplateFn {
        Arc::new(|dims: &[String], extra: &[String]| {
            format!("({} - 1) * {} + 1", dims[0], extra[0])
        })
    }

    fn ranks(pairs: &[(char, u32)]) -> RankMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_registration_order_enforced() {
        let mut cd = ComputedDims::new();
        cd.add('o', dilate(), dilate_t(), &['g'], 1, &["d"]).unwrap();
        assert_eq!(
            cd.add('g', dilate(), dilate_t(), &['f'], 1, &["d"]),
            Err(SchemaError::ComputedOutOfOrder { id: 'g' })
        );
        assert_eq!(
            cd.add('o', dilate(), dilate_t(), &['f'], 1, &["d"]),
            Err(SchemaError::DuplicateComputedIndex { id: 'o' })
        );
    }

    #[test]
    fn test_evaluate_chain() {
        let mut cd = ComputedDims::new();
        cd.add('g', dilate(), dilate_t(), &['f'], 1, &["d"]).unwrap();
        cd.add('h', dilate(), dilate_t(), &['g'], 1, &["d"]).unwrap();
        let mut dims: DimsMap = [('f', vec![3, 2])].into_iter().collect();
        let extras = |name: &str| (name == "d").then(|| ArgValue::int(2));
        let done = cd
            .evaluate_all(&mut dims, &extras, &ranks(&[('f', 2), ('g', 2), ('h', 2)]))
            .unwrap();
        assert_eq!(done, vec!['g', 'h']);
        assert_eq!(dims[&'g'], vec![5, 3]);
        assert_eq!(dims[&'h'], vec![9, 5]);
        assert_eq!(cd.input_closure('h'), vec!['f']);
        assert_eq!(cd.input_indices(), vec!['f']);
    }

    #[test]
    fn test_missing_inputs_and_rank_mismatch() {
        let mut cd = ComputedDims::new();
        cd.add('g', dilate(), dilate_t(), &['f'], 1, &["d"]).unwrap();
        let none = |_: &str| -> Option<ArgValue> { None };
        let dims: DimsMap = [('f', vec![3])].into_iter().collect();
        assert_eq!(cd.evaluate_one('g', &dims, &none, &ranks(&[('g', 1)])), Ok(None));

        let extras = |_: &str| Some(ArgValue::int(1));
        assert_eq!(
            cd.evaluate_one('g', &dims, &extras, &ranks(&[('g', 2)])),
            Err(SchemaError::ComputedRankMismatch {
                id: 'g',
                got: 1,
                expected: 2
            })
        );
    }

    #[test]
    fn test_minimum_and_explain() {
        let mut cd = ComputedDims::new();
        cd.add('g', dilate(), dilate_t(), &['f'], 1, &["d"]).unwrap();
        let node = cd.get('g').unwrap();
        assert_eq!(node.below_minimum(&[3, 0, 2]), Some((1, 0)));
        assert_eq!(node.below_minimum(&[1, 1]), None);

        let text = cd.explain(
            'g',
            &|i| Some(format!("'{i}'")),
            &|a| Some(a.to_string()),
        );
        assert_eq!(text.as_deref(), Some("('f' - 1) * d + 1"));
    }
}
