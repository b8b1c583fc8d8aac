#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use opschema_model::{IndexId, SchemaError};

/// What a node belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Owner {
    Schema,
    Arg(String),
    Index(IndexId),
    Return(usize),
    Predicate(usize),
    Generator(usize),
}

/// What a node does for its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Root,
    Value,
    Range,
    Layout,
    DataFormat,
    Ranks,
    IndexDims,
    Dims,
    Computed,
    Minimum,
    Match,
    Check,
    DTypes,
    TensorSize,
    Predicted,
    ReturnShape,
}

/// Typed node identity: one node per role per owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub owner: Owner,
    pub role: Role,
}

impl NodeKey {
    pub fn new(owner: Owner, role: Role) -> Self {
        Self { owner, role }
    }

    pub fn schema(role: Role) -> Self {
        Self::new(Owner::Schema, role)
    }

    pub fn arg(name: &str, role: Role) -> Self {
        Self::new(Owner::Arg(name.to_string()), role)
    }

    pub fn index(id: IndexId, role: Role) -> Self {
        Self::new(Owner::Index(id), role)
    }
}

#[derive(Debug, Clone)]
pub struct Node<F> {
    pub key: NodeKey,
    pub func: F,
    parents: Vec<NodeKey>,
}

impl<F> Node<F> {
    pub fn parents(&self) -> &[NodeKey] {
        &self.parents
    }
}

/// A DAG of node functions addressed by [`NodeKey`].
#[derive(Debug, Clone)]
pub struct FuncGraph<F> {
    name: &'static str,
    nodes: Vec<Node<F>>,
    lookup: BTreeMap<NodeKey, usize>,
}

impl<F> FuncGraph<F> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            nodes: Vec::new(),
            lookup: BTreeMap::new(),
        }
    }

    /// Adds a node, or appends `parents` to the existing node with this key.
    pub fn add(&mut self, key: NodeKey, func: F, parents: &[NodeKey]) {
        if let Some(&id) = self.lookup.get(&key) {
            for p in parents {
                self.push_parent(id, p);
            }
            return;
        }
        let id = self.nodes.len();
        self.lookup.insert(key.clone(), id);
        self.nodes.push(Node {
            key,
            func,
            parents: Vec::new(),
        });
        for p in parents {
            self.push_parent(id, p);
        }
    }

    pub fn append_parent(&mut self, key: &NodeKey, parent: &NodeKey) {
        if let Some(&id) = self.lookup.get(key) {
            self.push_parent(id, parent);
        }
    }

    fn push_parent(&mut self, id: usize, parent: &NodeKey) {
        let node = &mut self.nodes[id];
        if node.key != *parent && !node.parents.contains(parent) {
            node.parents.push(parent.clone());
        }
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.lookup.contains_key(key)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Node<F>> {
        self.lookup.get(key).map(|&id| &self.nodes[id])
    }

    pub fn node(&self, id: usize) -> &Node<F> {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.iter().map(|n| &n.key)
    }

    /// Kahn's algorithm; among ready nodes the earliest added goes first.
    /// Parents that were never added are ignored.
    pub fn topo_order(&self) -> Result<Vec<usize>, SchemaError> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (id, node) in self.nodes.iter().enumerate() {
            for p in &node.parents {
                if let Some(&pid) = self.lookup.get(p) {
                    indegree[id] += 1;
                    children[pid].push(id);
                }
            }
        }
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &c in &children[id] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    ready.insert(c);
                }
            }
        }
        if order.len() != n {
            return Err(SchemaError::CyclicGraph {
                graph: self.name.to_string(),
            });
        }
        Ok(order)
    }

    /// Every node `key` depends on, transitively.
    pub fn ancestors(&self, key: &NodeKey) -> BTreeSet<NodeKey> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&NodeKey> = self
            .get(key)
            .map(|n| n.parents.iter().collect())
            .unwrap_or_default();
        while let Some(k) = stack.pop() {
            if !seen.insert(k.clone()) {
                continue;
            }
            if let Some(node) = self.get(k) {
                stack.extend(node.parents.iter());
            }
        }
        seen
    }
}
