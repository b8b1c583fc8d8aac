#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use crate::error::SchemaError;
use crate::signature::Signature;

/// Single-letter identifier of a semantic index.
pub type IndexId = char;

/// Ranks assigned to every index of a schema.
pub type RankMap = BTreeMap<IndexId, u32>;

/// Dimension vector of every index whose dims are known.
pub type DimsMap = BTreeMap<IndexId, Vec<i64>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub id: IndexId,
    pub description: String,
    pub registration: usize,
}

/// Registered indices in registration order.
#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    entries: Vec<IndexInfo>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: &str, description: &str) -> Result<IndexId, SchemaError> {
        let mut chars = id.chars();
        let letter = match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => c,
            _ => {
                return Err(SchemaError::InvalidIndexId { id: id.to_string() });
            }
        };
        if self.contains(letter) {
            return Err(SchemaError::DuplicateIndex { id: letter });
        }
        let registration = self.entries.len();
        self.entries.push(IndexInfo {
            id: letter,
            description: description.to_string(),
            registration,
        });
        Ok(letter)
    }

    pub fn contains(&self, id: IndexId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn get(&self, id: IndexId) -> Option<&IndexInfo> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn description(&self, id: IndexId) -> &str {
        self.get(id).map(|e| e.description.as_str()).unwrap_or("")
    }

    pub fn ids(&self) -> impl Iterator<Item = IndexId> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexInfo> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses `text` as a signature whose indices must all be registered.
    /// `context` names the argument or declaration for the error message.
    pub fn check_sig(&self, text: &str, context: &str) -> Result<Signature, SchemaError> {
        let sig: Signature = text.parse()?;
        if sig.indices().iter().all(|&c| self.contains(c)) {
            Ok(sig)
        } else {
            Err(SchemaError::UnknownIndex {
                signature: text.to_string(),
                context: context.to_string(),
                known: self.ids().collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_rejects_bad_ids() {
        let mut reg = IndexRegistry::new();
        assert!(reg.add("b", "batch").is_ok());
        assert_eq!(
            reg.add("b", "again"),
            Err(SchemaError::DuplicateIndex { id: 'b' })
        );
        assert!(matches!(
            reg.add("bb", "two letters"),
            Err(SchemaError::InvalidIndexId { .. })
        ));
        assert!(matches!(
            reg.add("1", "digit"),
            Err(SchemaError::InvalidIndexId { .. })
        ));
        assert!(matches!(
            reg.add("", "empty"),
            Err(SchemaError::InvalidIndexId { .. })
        ));
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut reg = IndexRegistry::new();
        for (id, d) in [("s", "spatial"), ("b", "batch"), ("c", "channel")] {
            reg.add(id, d).unwrap();
        }
        assert_eq!(reg.ids().collect::<String>(), "sbc");
        assert_eq!(reg.description('c'), "channel");
        assert_eq!(reg.get('b').unwrap().registration, 1);
    }

    #[test]
    fn test_check_sig_reports_unknown_index() {
        let mut reg = IndexRegistry::new();
        reg.add("b", "batch").unwrap();
        reg.add("i", "input spatial").unwrap();
        assert!(reg.check_sig("bi", "input").is_ok());
        let err = reg.check_sig("bik", "input").unwrap_err();
        assert!(err.to_string().contains("'input'"));
        assert!(err.to_string().contains("bi"));
    }
}
