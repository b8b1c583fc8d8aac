#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{DType, IndexId, RankMap, SchemaError};

/// How a tensor's dtype is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DTypeRule {
    Valid(Vec<DType>),
    Equal(String),
}

/// One excluded combination. Fields absent from the record are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusion {
    pub dtypes: Vec<(String, DType)>,
    pub ranks: Vec<(IndexId, u32)>,
    pub layout: Option<usize>,
}

impl Exclusion {
    pub fn matches(&self, dtypes: &BTreeMap<String, DType>, ranks: &RankMap, layout: usize) -> bool {
        self.dtypes
            .iter()
            .all(|(t, d)| dtypes.get(t) == Some(d))
            && self.ranks.iter().all(|(i, r)| ranks.get(i) == Some(r))
            && self.layout.is_none_or(|l| l == layout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DTypeViolation {
    NotAllowed {
        tensor: String,
        dtype: DType,
        allowed: Vec<DType>,
    },
    NotEqual {
        tensor: String,
        dtype: DType,
        source: String,
        source_dtype: DType,
    },
    Excluded {
        exclusion: usize,
    },
}

/// Valid-dtype sets, equivalences and excluded combinations of a schema.
#[derive(Debug, Clone, Default)]
pub struct DTypeRules {
    order: Vec<String>,
    rules: BTreeMap<String, DTypeRule>,
    exclusions: Vec<Exclusion>,
}

impl DTypeRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_rule(&self, tensor: &str) -> bool {
        self.rules.contains_key(tensor)
    }

    pub fn rule(&self, tensor: &str) -> Option<&DTypeRule> {
        self.rules.get(tensor)
    }

    pub fn add_valid(&mut self, tensor: &str, dtypes: Vec<DType>) -> Result<(), SchemaError> {
        if self.has_rule(tensor) {
            return Err(SchemaError::DTypeAlreadyConstrained {
                name: tensor.to_string(),
            });
        }
        let mut dtypes = dtypes;
        dtypes.sort();
        dtypes.dedup();
        self.order.push(tensor.to_string());
        self.rules.insert(tensor.to_string(), DTypeRule::Valid(dtypes));
        Ok(())
    }

    pub fn add_equiv(&mut self, target: &str, source: &str) -> Result<(), SchemaError> {
        if self.has_rule(target) {
            return Err(SchemaError::DTypeAlreadyConstrained {
                name: target.to_string(),
            });
        }
        if !matches!(self.rules.get(source), Some(DTypeRule::Valid(_))) {
            return Err(SchemaError::DTypeSourceUnresolved {
                target: target.to_string(),
                src: source.to_string(),
            });
        }
        self.order.push(target.to_string());
        self.rules
            .insert(target.to_string(), DTypeRule::Equal(source.to_string()));
        Ok(())
    }

    pub fn add_exclusion(&mut self, exclusion: Exclusion) {
        self.exclusions.push(exclusion);
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    /// Tensors in rule registration order.
    pub fn tensors(&self) -> &[String] {
        &self.order
    }

    /// Every declared tensor must have exactly one resolution path.
    pub fn finalize_check(&self, tensors: &[String]) -> Result<(), SchemaError> {
        match tensors.iter().find(|t| !self.has_rule(t)) {
            Some(t) => Err(SchemaError::MissingDTypeConstraint { name: t.clone() }),
            None => Ok(()),
        }
    }

    /// First violated rule, checking allowed sets and equalities in
    /// registration order and exclusions last.
    pub fn check(
        &self,
        dtypes: &BTreeMap<String, DType>,
        ranks: &RankMap,
        layout: usize,
    ) -> Option<DTypeViolation> {
        for tensor in &self.order {
            let Some(&dtype) = dtypes.get(tensor) else {
                continue;
            };
            match &self.rules[tensor] {
                DTypeRule::Valid(allowed) => {
                    if !allowed.contains(&dtype) {
                        return Some(DTypeViolation::NotAllowed {
                            tensor: tensor.clone(),
                            dtype,
                            allowed: allowed.clone(),
                        });
                    }
                }
                DTypeRule::Equal(source) => {
                    if let Some(&source_dtype) = dtypes.get(source) {
                        if source_dtype != dtype {
                            return Some(DTypeViolation::NotEqual {
                                tensor: tensor.clone(),
                                dtype,
                                source: source.clone(),
                                source_dtype,
                            });
                        }
                    }
                }
            }
        }
        self.exclusions
            .iter()
            .position(|ex| ex.matches(dtypes, ranks, layout))
            .map(|exclusion| DTypeViolation::Excluded { exclusion })
    }

    /// Every non-excluded dtype assignment for the given ranks and layout,
    /// as the cross product of the valid sets with equated tensors copied.
    pub fn combinations(&self, ranks: &RankMap, layout: usize) -> Vec<BTreeMap<String, DType>> {
        let mut combos: Vec<BTreeMap<String, DType>> = vec![BTreeMap::new()];
        for tensor in &self.order {
            if let DTypeRule::Valid(allowed) = &self.rules[tensor] {
                combos = combos
                    .into_iter()
                    .flat_map(|c| {
                        allowed.iter().map(move |&d| {
                            let mut next = c.clone();
                            next.insert(tensor.clone(), d);
                            next
                        })
                    })
                    .collect();
            }
        }
        for combo in &mut combos {
            for tensor in &self.order {
                if let DTypeRule::Equal(source) = &self.rules[tensor] {
                    if let Some(&d) = combo.get(source) {
                        combo.insert(tensor.clone(), d);
                    }
                }
            }
        }
        combos.retain(|c| !self.exclusions.iter().any(|ex| ex.matches(c, ranks, layout)));
        combos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> DTypeRules {
        let mut r = DTypeRules::new();
        r.add_valid("input", DType::parse_expr("float").unwrap()).unwrap();
        r.add_equiv("filters", "input").unwrap();
        r
    }

    #[test]
    fn test_registration_errors() {
        let mut r = rules();
        assert!(matches!(
            r.add_valid("input", vec![DType::Int32]),
            Err(SchemaError::DTypeAlreadyConstrained { .. })
        ));
        assert!(matches!(
            r.add_equiv("bias", "filters"),
            Err(SchemaError::DTypeSourceUnresolved { .. })
        ));
        assert_eq!(
            r.finalize_check(&["input".into(), "bias".into()]),
            Err(SchemaError::MissingDTypeConstraint { name: "bias".into() })
        );
    }

    #[test]
    fn test_check_not_allowed_and_not_equal() {
        let r = rules();
        let ranks = RankMap::new();
        let mut d = BTreeMap::new();
        d.insert("input".to_string(), DType::Int32);
        d.insert("filters".to_string(), DType::Int32);
        assert!(matches!(
            r.check(&d, &ranks, 0),
            Some(DTypeViolation::NotAllowed { .. })
        ));
        d.insert("input".to_string(), DType::Float32);
        assert!(matches!(
            r.check(&d, &ranks, 0),
            Some(DTypeViolation::NotEqual { .. })
        ));
        d.insert("filters".to_string(), DType::Float32);
        assert_eq!(r.check(&d, &ranks, 0), None);
    }

    #[test]
    fn test_exclusions_take_precedence() {
        let mut r = rules();
        r.add_exclusion(Exclusion {
            dtypes: vec![("input".into(), DType::Float64)],
            ranks: vec![('i', 3)],
            layout: Some(0),
        });
        let deep: RankMap = [('i', 3)].into_iter().collect();
        let shallow: RankMap = [('i', 2)].into_iter().collect();

        let combos = r.combinations(&deep, 0);
        assert_eq!(combos.len(), 2);
        assert!(combos.iter().all(|c| c["input"] != DType::Float64));
        assert!(combos.iter().all(|c| c["filters"] == c["input"]));
        assert_eq!(r.combinations(&shallow, 0).len(), 3);
        assert_eq!(r.combinations(&deep, 1).len(), 3);

        let mut d = BTreeMap::new();
        d.insert("input".to_string(), DType::Float64);
        d.insert("filters".to_string(), DType::Float64);
        assert_eq!(
            r.check(&d, &deep, 0),
            Some(DTypeViolation::Excluded { exclusion: 0 })
        );
    }
}
