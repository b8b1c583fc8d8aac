#![forbid(unsafe_code)]

use serde::Deserialize;

use opschema_solve::DEFAULT_RANK_CAP;

/// Settings of the generative graph.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GenConfig {
    /// Seed of the dims sampler. Equal seeds give equal sequences.
    pub seed: u64,
    /// Upper bound on the element count of every generated data tensor.
    pub target_tensor_elements: u64,
    /// Largest sampled dimension size.
    pub max_dim: i64,
    /// Dims samples kept per categorical combination.
    pub dims_samples: usize,
    pub max_sample_attempts: usize,
    /// Rank bound for free indices without an explicit maximum.
    pub rank_enum_cap: u32,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            target_tensor_elements: 100_000,
            max_dim: 30,
            dims_samples: 1,
            max_sample_attempts: 50,
            rank_enum_cap: DEFAULT_RANK_CAP,
        }
    }
}

/// Settings of the predicate graph.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Near-miss rank candidates reported on a rank inference failure.
    pub max_candidates: usize,
    /// Extra rank allowed above the largest observed rank when searching
    /// for near misses.
    pub inference_slack: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            inference_slack: 1,
        }
    }
}
