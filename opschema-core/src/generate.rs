#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{ArgValue, CallArgs, DType, DimsMap, IndexId, RankMap, SchemaError};
use opschema_solve::FeasibleRegion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::GenConfig;
use crate::decl::{ArgSpec, RankSource, ShapeKind};
use crate::schema::Schema;

/// What a checked call of a case is expected to give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Produced by the generative graph; must pass the predicate graph.
    Valid,
    /// A perturbation whose validity only the operation can tell.
    Unknown,
}

/// One fully bound configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenCase {
    pub layout: usize,
    pub data_format: Option<String>,
    pub ranks: RankMap,
    pub dtypes: BTreeMap<String, DType>,
    pub dims: DimsMap,
    pub args: CallArgs,
    pub returns: Vec<Vec<i64>>,
    pub expect: Expectation,
}

/// Node behaviours of the generative graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GenFunc {
    Layout,
    Ranks,
    DataFormat,
    DTypes,
    Options(String),
    Int(String),
    RankArg(String),
    Unchecked(String),
    Generator(usize),
    /// Forces the dims of a dims-to-rank index from the ranks.
    RankDims(usize),
    SampleDims,
    Computed(IndexId),
    Minimum(IndexId),
    Predicate(usize),
    TensorSize,
    ShapeArg(String),
    Predicted(usize),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GenState {
    layout: usize,
    data_format: Option<String>,
    ranks: RankMap,
    dtypes: BTreeMap<String, DType>,
    dims: DimsMap,
    args: CallArgs,
    returns: Vec<Vec<i64>>,
}

impl GenState {
    fn rank(&self, id: IndexId) -> u32 {
        self.ranks.get(&id).copied().unwrap_or(0)
    }

    fn into_case(self) -> GenCase {
        GenCase {
            layout: self.layout,
            data_format: self.data_format,
            ranks: self.ranks,
            dtypes: self.dtypes,
            dims: self.dims,
            args: self.args,
            returns: self.returns,
            expect: Expectation::Valid,
        }
    }
}

enum Alternatives {
    Listed(std::vec::IntoIter<GenState>),
    Region {
        base: GenState,
        region: Box<FeasibleRegion>,
    },
    Samples {
        base: GenState,
        attempt: usize,
    },
}

impl Alternatives {
    fn one(st: GenState) -> Self {
        Alternatives::Listed(vec![st].into_iter())
    }

    fn none() -> Self {
        Alternatives::Listed(Vec::new().into_iter())
    }

    fn next_state(&mut self, schema: &Schema, cfg: &GenConfig, rng: &mut StdRng) -> Option<GenState> {
        match self {
            Alternatives::Listed(it) => it.next(),
            Alternatives::Region { base, region } => {
                let ranks = region.next()?;
                let mut st = base.clone();
                st.ranks = ranks;
                Some(st)
            }
            Alternatives::Samples { base, attempt } => {
                if *attempt >= cfg.max_sample_attempts {
                    return None;
                }
                let st = sample_dims(schema, cfg, base, *attempt, rng);
                *attempt += 1;
                Some(st)
            }
        }
    }
}

struct Frame {
    pos: usize,
    alts: Alternatives,
    sampler: bool,
    hits: usize,
}

/// Draws sizes for every index not yet sized. Later attempts draw from a
/// smaller range so that tight size limits are eventually met.
fn sample_dims(
    schema: &Schema,
    cfg: &GenConfig,
    base: &GenState,
    attempt: usize,
    rng: &mut StdRng,
) -> GenState {
    let total = cfg.max_sample_attempts.max(1) as i64;
    let cap = (cfg.max_dim * (total - attempt as i64) / total).max(1);
    let scalar = schema.scalar_indices();
    let mut st = base.clone();
    for id in schema.index.ids() {
        if schema.computed.is_computed(id) || st.dims.contains_key(&id) {
            continue;
        }
        let rank = st.rank(id) as usize;
        let dims = if scalar.contains(&id) {
            vec![rng.gen_range(1..=cap); rank]
        } else {
            (0..rank).map(|_| rng.gen_range(1..=cap)).collect()
        };
        st.dims.insert(id, dims);
    }
    if attempt > 0 {
        debug!(attempt, cap, "resampling dims");
    }
    st
}

impl GenFunc {
    fn expand(
        &self,
        schema: &Schema,
        cfg: &GenConfig,
        mut st: GenState,
    ) -> Result<Alternatives, SchemaError> {
        let alts = match self {
            GenFunc::Layout => {
                let states: Vec<GenState> = (0..schema.layouts.num_layouts())
                    .map(|layout| GenState {
                        layout,
                        ..st.clone()
                    })
                    .collect();
                Alternatives::Listed(states.into_iter())
            }
            GenFunc::Ranks => {
                let region = schema
                    .rank_cons
                    .feasible_region(&schema.indices(), cfg.rank_enum_cap);
                Alternatives::Region {
                    base: st,
                    region: Box::new(region),
                }
            }
            GenFunc::DataFormat => match schema.layouts.arg() {
                None => Alternatives::one(st),
                Some(arg) => match schema.layouts.data_format(st.layout, &st.ranks) {
                    None => Alternatives::none(),
                    Some(name) => {
                        st.data_format = Some(name.to_string());
                        st.args.insert(arg, ArgValue::str(name));
                        Alternatives::one(st)
                    }
                },
            },
            GenFunc::DTypes => {
                let states: Vec<GenState> = schema
                    .dtype_rules
                    .combinations(&st.ranks, st.layout)
                    .into_iter()
                    .map(|dtypes| GenState {
                        dtypes,
                        ..st.clone()
                    })
                    .collect();
                Alternatives::Listed(states.into_iter())
            }
            GenFunc::Options(name) => {
                let Some(ArgSpec::Option { options }) = schema.specs.get(name) else {
                    return Ok(Alternatives::one(st));
                };
                let states: Vec<GenState> = options
                    .iter()
                    .map(|o| {
                        let mut next = st.clone();
                        next.args.insert(name, ArgValue::str(o));
                        next
                    })
                    .collect();
                Alternatives::Listed(states.into_iter())
            }
            GenFunc::Int(name) => {
                if let Some(ArgSpec::Int { lo, hi }) = schema.specs.get(name) {
                    let v = lo.map_or(0, |l| l.max(0));
                    let v = hi.map_or(v, |h| v.min(h));
                    st.args.insert(name, ArgValue::int(v));
                }
                Alternatives::one(st)
            }
            GenFunc::RankArg(name) => {
                if let Some(ArgSpec::Rank { sig }) = schema.specs.get(name) {
                    let rank = sig.rank(&st.ranks);
                    st.args.insert(name, ArgValue::int(rank as i64));
                }
                Alternatives::one(st)
            }
            GenFunc::Unchecked(name) => {
                st.args.insert(name, ArgValue::None);
                Alternatives::one(st)
            }
            GenFunc::Generator(k) => {
                let generator = &schema.generators[*k];
                let in_ranks: Vec<u32> = generator.inputs.iter().map(|&i| st.rank(i)).collect();
                let extras: Vec<ArgValue> = generator
                    .extra_args
                    .iter()
                    .map(|a| st.args.get(a).cloned().unwrap_or(ArgValue::None))
                    .collect();
                let mut states = Vec::new();
                for tuple in (generator.func)(&in_ranks, &extras) {
                    if tuple.len() != generator.outputs.len() {
                        return Err(SchemaError::GeneratorShape {
                            outputs: generator.outputs.iter().collect(),
                            got: tuple.len(),
                            expected: generator.outputs.len(),
                        });
                    }
                    let fits = generator
                        .outputs
                        .iter()
                        .zip(&tuple)
                        .all(|(&o, d)| d.len() == st.rank(o) as usize);
                    if !fits {
                        debug!(generator = k, "skipping dims tuple of the wrong rank");
                        continue;
                    }
                    let mut next = st.clone();
                    next.dims.extend(generator.outputs.iter().copied().zip(tuple));
                    states.push(next);
                }
                Alternatives::Listed(states.into_iter())
            }
            GenFunc::RankDims(src) => {
                if let Some(RankSource::DimRank {
                    rank_sig,
                    dims_index,
                    ..
                }) = schema.rank_sources.get(*src)
                {
                    let value = rank_sig.rank(&st.ranks) as i64;
                    let len = st.rank(*dims_index) as usize;
                    st.dims.insert(*dims_index, vec![value; len]);
                }
                Alternatives::one(st)
            }
            GenFunc::SampleDims => Alternatives::Samples {
                base: st,
                attempt: 0,
            },
            GenFunc::Computed(id) => {
                let result = {
                    let extras = |name: &str| st.args.get(name).cloned();
                    schema
                        .computed
                        .evaluate_one(*id, &st.dims, &extras, &st.ranks)?
                };
                match result {
                    Some(dims) => {
                        st.dims.insert(*id, dims);
                        Alternatives::one(st)
                    }
                    None => Alternatives::none(),
                }
            }
            GenFunc::Minimum(id) => {
                let below = schema
                    .computed
                    .get(*id)
                    .zip(st.dims.get(id))
                    .and_then(|(node, dims)| node.below_minimum(dims));
                match below {
                    Some(_) => Alternatives::none(),
                    None => Alternatives::one(st),
                }
            }
            GenFunc::Predicate(k) => {
                let pred = &schema.predicates[*k];
                let dims: Option<Vec<&[i64]>> = pred
                    .indices
                    .iter()
                    .map(|i| st.dims.get(i).map(Vec::as_slice))
                    .collect();
                let passed = dims.is_some_and(|d| (pred.func)(&d).is_ok());
                if passed {
                    Alternatives::one(st)
                } else {
                    Alternatives::none()
                }
            }
            GenFunc::TensorSize => {
                let fits = schema
                    .slots
                    .iter()
                    .filter(|s| s.kind == ShapeKind::DataTensor)
                    .all(|s| match s.sig(st.layout).shape(&st.dims) {
                        Some(shape) => {
                            let n = shape
                                .iter()
                                .fold(1u64, |acc, &d| acc.saturating_mul(d.max(0) as u64));
                            n <= cfg.target_tensor_elements
                        }
                        None => false,
                    });
                if fits {
                    Alternatives::one(st)
                } else {
                    Alternatives::none()
                }
            }
            GenFunc::ShapeArg(name) => match materialize(schema, name, &st) {
                Some(value) => {
                    st.args.insert(name, value);
                    Alternatives::one(st)
                }
                None => Alternatives::none(),
            },
            GenFunc::Predicted(i) => {
                let sigs = &schema.returns[*i];
                let sig = &sigs[st.layout.min(sigs.len() - 1)];
                let Some(shape) = sig.shape(&st.dims) else {
                    let id = sig
                        .indices()
                        .iter()
                        .copied()
                        .find(|c| !st.dims.contains_key(c))
                        .unwrap_or('?');
                    return Err(SchemaError::UnresolvedReturnIndex { index: *i, id });
                };
                if st.returns.len() <= *i {
                    st.returns.resize(*i + 1, Vec::new());
                }
                st.returns[*i] = shape;
                Alternatives::one(st)
            }
        };
        Ok(alts)
    }
}

/// Builds the value of one shape-bearing argument from the sampled dims.
fn materialize(schema: &Schema, name: &str, st: &GenState) -> Option<ArgValue> {
    let mut slots: Vec<_> = schema.slots.iter().filter(|s| s.arg == name).collect();
    slots.sort_by_key(|s| s.column);
    let first = slots.first()?;
    let value = match schema.specs.get(name)? {
        ArgSpec::DataTensor => ArgValue::Tensor {
            shape: first.sig(st.layout).shape(&st.dims)?,
            dtype: *st.dtypes.get(name)?,
        },
        ArgSpec::ShapeList => ArgValue::List {
            values: first.sig(st.layout).shape(&st.dims)?,
        },
        ArgSpec::ShapeTensor => ArgValue::IntTensor {
            values: first.sig(st.layout).shape(&st.dims)?,
        },
        ArgSpec::ShapeInt { index } => {
            ArgValue::int(st.dims.get(index)?.first().copied().unwrap_or(1))
        }
        ArgSpec::ShapeTensor2D { .. } => {
            let columns: Option<Vec<Vec<i64>>> = slots
                .iter()
                .map(|s| s.sig(st.layout).shape(&st.dims))
                .collect();
            let columns = columns?;
            let nrows = columns.first().map_or(0, Vec::len);
            if columns.iter().any(|c| c.len() != nrows) {
                return None;
            }
            let rows = (0..nrows)
                .map(|r| columns.iter().map(|c| c[r]).collect())
                .collect();
            ArgValue::IntTensor2D { rows }
        }
        _ => return None,
    };
    Some(value)
}

/// Lazy, finite, restartable sequence of generated configurations.
///
/// Walks the generative graph depth first. Categorical nodes branch over
/// their legal values; the dims sampler branches over random draws until it
/// has produced `dims_samples` complete configurations.
pub struct Configs<'s> {
    schema: &'s Schema,
    cfg: GenConfig,
    rng: StdRng,
    stack: Vec<Frame>,
    started: bool,
}

impl<'s> Configs<'s> {
    pub(crate) fn new(schema: &'s Schema, cfg: &GenConfig) -> Self {
        Self {
            schema,
            cfg: cfg.clone(),
            rng: StdRng::seed_from_u64(cfg.seed),
            stack: Vec::new(),
            started: false,
        }
    }

    fn frame(&self, pos: usize, st: GenState) -> Result<Frame, SchemaError> {
        let node = self.schema.gen_graph.node(self.schema.gen_order[pos]);
        Ok(Frame {
            pos,
            alts: node.func.expand(self.schema, &self.cfg, st)?,
            sampler: node.func == GenFunc::SampleDims,
            hits: 0,
        })
    }

    /// Counts a finished configuration against the innermost sampler and
    /// closes the sampler once its quota is met.
    fn record_hit(&mut self) {
        let quota = self.cfg.dims_samples.max(1);
        if let Some(idx) = self.stack.iter().rposition(|f| f.sampler) {
            let frame = &mut self.stack[idx];
            frame.hits += 1;
            if frame.hits >= quota {
                frame.alts = Alternatives::none();
                self.stack.truncate(idx + 1);
            }
        }
    }
}

impl Iterator for Configs<'_> {
    type Item = Result<GenCase, SchemaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            if self.schema.gen_order.is_empty() {
                return None;
            }
            match self.frame(0, GenState::default()) {
                Ok(frame) => self.stack.push(frame),
                Err(e) => return Some(Err(e)),
            }
        }
        loop {
            let schema = self.schema;
            let frame = self.stack.last_mut()?;
            let Some(st) = frame.alts.next_state(schema, &self.cfg, &mut self.rng) else {
                if frame.sampler && frame.hits == 0 {
                    warn!(op = %schema.op, "no dims sample satisfied the constraints");
                }
                self.stack.pop();
                continue;
            };
            let pos = frame.pos + 1;
            if pos == schema.gen_order.len() {
                self.record_hit();
                return Some(Ok(st.into_case()));
            }
            match self.frame(pos, st) {
                Ok(frame) => self.stack.push(frame),
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}
