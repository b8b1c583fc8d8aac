#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use opschema_model::{ArgValue, CallArgs, DType, DimsMap, RankMap};

use crate::failure::{Failure, Status};

/// Progress of one call through the predicate graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Unchecked,
    Bound,
    RankResolved,
    DimsResolved,
    DTypeResolved,
    Success,
    Failed,
}

/// Working state of one call. Owned by a single evaluation.
#[derive(Debug, Clone)]
pub(crate) struct CallState<'a> {
    pub args: &'a CallArgs,
    pub phase: Phase,
    pub layout: usize,
    pub data_format: Option<String>,
    pub ranks: RankMap,
    pub dims: DimsMap,
    pub computed: DimsMap,
    pub dtypes: BTreeMap<String, DType>,
    pub returns: BTreeMap<usize, Vec<i64>>,
}

impl<'a> CallState<'a> {
    pub fn new(args: &'a CallArgs) -> Self {
        Self {
            args,
            phase: Phase::Unchecked,
            layout: 0,
            data_format: None,
            ranks: RankMap::new(),
            dims: DimsMap::new(),
            computed: DimsMap::new(),
            dtypes: BTreeMap::new(),
            returns: BTreeMap::new(),
        }
    }

    /// Moves forward to `phase`; never moves back.
    pub fn advance(&mut self, phase: Phase) {
        self.phase = self.phase.max(phase);
    }

    pub fn arg(&self, name: &str) -> Option<&'a ArgValue> {
        bound(self.args, name)
    }

    pub fn finish(self, failure: Option<Failure>) -> CallOutcome {
        let (status, reached) = match failure {
            Some(f) => (Status::Failed(f), self.phase),
            None => (Status::Success, Phase::Success),
        };
        CallOutcome {
            status,
            reached,
            args: self.args.clone(),
            layout: self.layout,
            data_format: self.data_format,
            ranks: self.ranks,
            dims: self.dims,
            dtypes: self.dtypes,
            predicted: self.returns.into_values().collect(),
        }
    }
}

/// A bound value, treating an explicit `None` as absent.
pub(crate) fn bound<'a>(args: &'a CallArgs, name: &str) -> Option<&'a ArgValue> {
    args.get(name).filter(|v| **v != ArgValue::None)
}

/// Result of checking one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: Status,
    /// Last phase completed before the status was decided.
    pub reached: Phase,
    pub args: CallArgs,
    pub layout: usize,
    pub data_format: Option<String>,
    pub ranks: RankMap,
    pub dims: DimsMap,
    pub dtypes: BTreeMap<String, DType>,
    /// Predicted return shapes, in declaration order.
    pub predicted: Vec<Vec<i64>>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.status.failure()
    }

    /// `Failed` once a failure is recorded, otherwise `Success`.
    pub fn phase(&self) -> Phase {
        if self.is_success() {
            Phase::Success
        } else {
            Phase::Failed
        }
    }
}
