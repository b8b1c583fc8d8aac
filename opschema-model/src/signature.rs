#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::index::{DimsMap, IndexId, RankMap};

/// Ordered sequence of distinct index letters describing a shape, e.g. `bik`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<IndexId>);

impl Signature {
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut seen = Vec::with_capacity(text.len());
        for c in text.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(SchemaError::InvalidIndexId { id: c.to_string() });
            }
            if seen.contains(&c) {
                return Err(SchemaError::RepeatedIndex {
                    signature: text.to_string(),
                    id: c,
                });
            }
            seen.push(c);
        }
        Ok(Signature(seen))
    }

    pub fn indices(&self) -> &[IndexId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: IndexId) -> bool {
        self.0.contains(&id)
    }

    /// Total rank of the signature. Indices missing from `ranks` count as 0.
    pub fn rank(&self, ranks: &RankMap) -> u32 {
        self.0.iter().map(|c| ranks.get(c).copied().unwrap_or(0)).sum()
    }

    /// Per-dimension index names: rank-1 indices appear bare, higher ranks get a
    /// 1-based suffix, rank-0 indices vanish. `bse` with s=2 gives `b s1 s2 e`.
    pub fn instantiate(&self, ranks: &RankMap) -> Vec<String> {
        let mut out = Vec::new();
        for &c in &self.0 {
            let r = ranks.get(&c).copied().unwrap_or(0);
            if r == 1 {
                out.push(c.to_string());
            } else {
                out.extend((1..=r).map(|i| format!("{c}{i}")));
            }
        }
        out
    }

    /// Concatenates the dims of each index in order, or `None` if any is missing.
    pub fn shape(&self, dims: &DimsMap) -> Option<Vec<i64>> {
        let mut shape = Vec::new();
        for c in &self.0 {
            shape.extend_from_slice(dims.get(c)?);
        }
        Some(shape)
    }

    /// Splits a concrete shape into per-index dims given the ranks.
    /// Returns `None` when the shape length does not equal the signature rank.
    pub fn split(&self, shape: &[i64], ranks: &RankMap) -> Option<Vec<(IndexId, Vec<i64>)>> {
        if shape.len() != self.rank(ranks) as usize {
            return None;
        }
        let mut offset = 0;
        let mut parts = Vec::with_capacity(self.0.len());
        for &c in &self.0 {
            let r = ranks.get(&c).copied().unwrap_or(0) as usize;
            parts.push((c, shape[offset..offset + r].to_vec()));
            offset += r;
        }
        Some(parts)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.0 {
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl FromStr for Signature {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signature::parse(s)
    }
}
