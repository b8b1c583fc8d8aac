#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{IndexId, RankMap, SchemaError, Signature};
use tracing::debug;

/// Default enumeration bound for a free index without an explicit maximum.
pub const DEFAULT_RANK_CAP: u32 = 10_000;

/// Closed range on the summed rank of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankLimit {
    pub min: u32,
    pub max: u32,
}

/// Registered rank limits and index equivalences of one schema.
#[derive(Debug, Clone, Default)]
pub struct RankConstraints {
    limits: BTreeMap<Signature, RankLimit>,
    equiv: BTreeMap<IndexId, IndexId>,
}

impl RankConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `min <= RANK(sig) <= max`. Repeated limits on the same
    /// signature intersect.
    pub fn add_limits(
        &mut self,
        sig: &Signature,
        min: Option<u32>,
        max: Option<u32>,
    ) -> Result<(), SchemaError> {
        if let [only] = sig.indices() {
            if self.index_equated(*only) {
                return Err(SchemaError::AlreadyConstrained { id: *only });
            }
        }
        let prev = self.limits.get(sig).copied().unwrap_or(RankLimit {
            min: 0,
            max: DEFAULT_RANK_CAP,
        });
        let merged = RankLimit {
            min: prev.min.max(min.unwrap_or(0)),
            max: prev.max.min(max.unwrap_or(DEFAULT_RANK_CAP)),
        };
        if merged.min > merged.max {
            return Err(SchemaError::InvalidBounds {
                signature: sig.to_string(),
                min: merged.min,
                max: merged.max,
            });
        }
        self.limits.insert(sig.clone(), merged);
        Ok(())
    }

    /// Declares RANK(target) := RANK(source).
    pub fn equate_ranks(&mut self, target: IndexId, source: IndexId) -> Result<(), SchemaError> {
        if self.index_limited(target) || self.index_equated(target) {
            return Err(SchemaError::AlreadyConstrained { id: target });
        }
        if !self.index_limited(source) {
            return Err(SchemaError::SourceNotRankLimited { id: source });
        }
        self.equiv.insert(target, source);
        Ok(())
    }

    pub fn index_limited(&self, id: IndexId) -> bool {
        self.limits.keys().any(|s| s.indices() == [id])
    }

    pub fn index_equated(&self, id: IndexId) -> bool {
        self.equiv.contains_key(&id)
    }

    pub fn equated_to(&self, id: IndexId) -> Option<IndexId> {
        self.equiv.get(&id).copied()
    }

    /// The free index whose rank `id` takes.
    pub fn root(&self, id: IndexId) -> IndexId {
        let mut cur = id;
        while let Some(&next) = self.equiv.get(&cur) {
            cur = next;
        }
        cur
    }

    pub fn limit(&self, sig: &Signature) -> Option<RankLimit> {
        self.limits.get(sig).copied()
    }

    pub fn limits(&self) -> impl Iterator<Item = (&Signature, &RankLimit)> {
        self.limits.iter()
    }

    /// Every rank assignment of `indices` satisfying the registered limits,
    /// with each free index bounded by `cap`.
    pub fn feasible_region(&self, indices: &[IndexId], cap: u32) -> FeasibleRegion {
        self.region_with(indices, cap, &[])
    }

    fn region_with(
        &self,
        indices: &[IndexId],
        cap: u32,
        extra: &[(Signature, RankLimit)],
    ) -> FeasibleRegion {
        let vars: Vec<IndexId> = indices
            .iter()
            .copied()
            .filter(|c| !self.index_equated(*c))
            .collect();
        let equated: Vec<(IndexId, IndexId)> = indices
            .iter()
            .copied()
            .filter(|c| self.index_equated(*c))
            .map(|c| (c, self.root(c)))
            .collect();

        let rows: Vec<Row> = self
            .limits
            .iter()
            .map(|(s, l)| (s, l))
            .chain(extra.iter().map(|(s, l)| (s, l)))
            .map(|(sig, limit)| {
                let mut coef = vec![0u32; vars.len()];
                for &c in sig.indices() {
                    let root = self.root(c);
                    if let Some(pos) = vars.iter().position(|&v| v == root) {
                        coef[pos] += 1;
                    }
                }
                let last = coef.iter().rposition(|&k| k > 0);
                Row {
                    coef,
                    min: limit.min,
                    max: limit.max,
                    last,
                }
            })
            .collect();

        // a row with no variables is a constant zero sum
        let exhausted = rows.iter().any(|r| r.last.is_none() && r.min > 0);
        FeasibleRegion {
            vars,
            equated,
            rows,
            cap,
            assign: Vec::new(),
            frames: vec![0],
            exhausted,
        }
    }

    /// Resolves index ranks from observed signature ranks.
    ///
    /// Observations with `observed: None` constrain nothing but still appear
    /// in the residual vectors of near misses (with residual 0).
    pub fn infer(
        &self,
        indices: &[IndexId],
        observations: &[RankObservation],
        max_candidates: usize,
        slack: u32,
    ) -> RankSolution {
        let max_obs = observations
            .iter()
            .filter_map(|o| o.observed)
            .max()
            .unwrap_or(0);
        let cap = max_obs.saturating_add(slack);

        let extra: Vec<(Signature, RankLimit)> = observations
            .iter()
            .filter_map(|o| {
                o.observed
                    .map(|r| (o.sig.clone(), RankLimit { min: r, max: r }))
            })
            .collect();
        let exact: Vec<RankMap> = self
            .region_with(indices, cap, &extra)
            .take(max_candidates.max(1) + 1)
            .collect();

        match exact.len() {
            1 => {
                debug!(ranks = ?exact[0], "rank inference resolved");
                return RankSolution::Unique(exact.into_iter().next().unwrap_or_default());
            }
            n if n > 1 => {
                debug!(candidates = n, "rank inference ambiguous");
                return RankSolution::Ambiguous(exact);
            }
            _ => {}
        }

        let mut best: Vec<NearMiss> = Vec::new();
        let mut best_total = u64::MAX;
        for ranks in self.feasible_region(indices, cap) {
            let residuals: Vec<i64> = observations
                .iter()
                .map(|o| match o.observed {
                    Some(r) => r as i64 - o.sig.rank(&ranks) as i64,
                    None => 0,
                })
                .collect();
            let total: u64 = residuals.iter().map(|r| r.unsigned_abs()).sum();
            if total < best_total {
                best_total = total;
                best.clear();
            }
            if total == best_total && best.len() < max_candidates {
                best.push(NearMiss {
                    ranks,
                    residuals,
                    total,
                });
            }
        }
        debug!(
            candidates = best.len(),
            total = best_total,
            "rank inference inconsistent"
        );
        RankSolution::Inconsistent(best)
    }
}

#[derive(Debug, Clone)]
struct Row {
    coef: Vec<u32>,
    min: u32,
    max: u32,
    last: Option<usize>,
}

impl Row {
    fn partial(&self, assign: &[u32]) -> i64 {
        assign
            .iter()
            .zip(&self.coef)
            .map(|(&v, &k)| v as i64 * k as i64)
            .sum()
    }
}

/// Lazy depth-first enumeration of the rank assignments allowed by a set of
/// sum-range rows. Variables are assigned in index registration order; a
/// branch is cut as soon as a row's upper bound is exceeded or a fully
/// assigned row misses its lower bound.
#[derive(Debug, Clone)]
pub struct FeasibleRegion {
    vars: Vec<IndexId>,
    equated: Vec<(IndexId, IndexId)>,
    rows: Vec<Row>,
    cap: u32,
    assign: Vec<u32>,
    frames: Vec<u32>,
    exhausted: bool,
}

impl FeasibleRegion {
    fn upper(&self, k: usize) -> i64 {
        let mut hi = self.cap as i64;
        for row in &self.rows {
            let c = row.coef[k] as i64;
            if c == 0 {
                continue;
            }
            let room = row.max as i64 - row.partial(&self.assign);
            hi = hi.min(room.div_euclid(c));
        }
        hi
    }

    fn prefix_ok(&self) -> bool {
        let n = self.assign.len();
        self.rows.iter().all(|row| {
            let partial = row.partial(&self.assign);
            if partial > row.max as i64 {
                return false;
            }
            match row.last {
                Some(last) if last < n => partial >= row.min as i64,
                _ => true,
            }
        })
    }

    fn emit(&self) -> RankMap {
        let mut ranks: RankMap = self
            .vars
            .iter()
            .copied()
            .zip(self.assign.iter().copied())
            .collect();
        for &(target, root) in &self.equated {
            let r = ranks.get(&root).copied().unwrap_or(0);
            ranks.insert(target, r);
        }
        ranks
    }
}

impl Iterator for FeasibleRegion {
    type Item = RankMap;

    fn next(&mut self) -> Option<RankMap> {
        if self.exhausted {
            return None;
        }
        if self.vars.is_empty() {
            self.exhausted = true;
            return Some(self.emit());
        }
        loop {
            let k = self.frames.len() - 1;
            let v = self.frames[k];
            if v as i64 > self.upper(k) {
                self.frames.pop();
                if self.frames.is_empty() {
                    self.exhausted = true;
                    return None;
                }
                self.assign.pop();
                continue;
            }
            self.frames[k] += 1;
            self.assign.push(v);
            if !self.prefix_ok() {
                self.assign.pop();
                continue;
            }
            if self.assign.len() == self.vars.len() {
                let ranks = self.emit();
                self.assign.pop();
                return Some(ranks);
            }
            self.frames.push(0);
        }
    }
}

/// Observed rank of one signature at call time. `None` means the value does
/// not determine a rank (e.g. a broadcast scalar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankObservation {
    pub sig: Signature,
    pub observed: Option<u32>,
}

/// Rank assignment that violates some observations, with the signed
/// residual `observed - computed` per observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMiss {
    pub ranks: RankMap,
    pub residuals: Vec<i64>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankSolution {
    Unique(RankMap),
    Ambiguous(Vec<RankMap>),
    Inconsistent(Vec<NearMiss>),
}
