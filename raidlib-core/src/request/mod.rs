// vim: tw=80
//! Request lifecycle.
//!
//! An [`Iots`] tracks one logical I/O from the time the library accepts it
//! until its completion is delivered.  It is carried out by one or more
//! [`Siots`], each covering a single stripe range.  SIOTS of the same IOTS
//! whose ranges overlap are serialized by a stripe lock scoped to that IOTS.
//!
//! Nothing here ever blocks.  Operations that would have to wait record why
//! and return; whatever they were waiting on later restarts them through a
//! [`Scheduler`].

use std::{
    slice,
    sync::Arc,
};

#[cfg(test)] use mockall::automock;

use crate::types::*;

mod iots;
mod lock;
mod services;
mod siots;

pub use self::iots::{
    Completion,
    Generation,
    Iots,
    IotsStatus,
    RequestId,
    RequestInfo,
};
pub use self::services::{
    Allocation,
    EdgeHandle,
    EdgeProvider,
    MemoryHandle,
    MemoryService,
    MetadataService,
    Scheduler,
    WriteLog,
};
#[cfg(test)]
pub use self::services::{
    MockEdgeProvider,
    MockMemoryService,
    MockMetadataService,
    MockScheduler,
    MockWriteLog,
};
pub use self::siots::{Park, Siots, SiotsId, SiotsParams};

/// Outcome of one step of a state machine
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// Keep going
    Executing,
    /// Stopped.  Something else will restart it.
    Waiting,
    Done,
}

/// One RAID algorithm's state machine for a SIOTS
#[cfg_attr(test, automock)]
pub trait SiotsAlgorithm: Send + Sync {
    /// Advance `siots` by one state.  Must not block.
    fn step(&self, iots: &Arc<Iots>, siots: SiotsId) -> Result<StepResult>;
}

/// Step `siots` until it finishes or has to wait.
///
/// Whatever it waits on restarts it through the [`Scheduler`], which calls
/// this again.
pub fn drive(algorithm: &dyn SiotsAlgorithm, iots: &Arc<Iots>,
             siots: SiotsId) -> Result<StepResult>
{
    loop {
        match algorithm.step(iots, siots)? {
            StepResult::Executing => continue,
            done_or_waiting => return Ok(done_or_waiting),
        }
    }
}

/// One unit of deferred work
#[derive(Debug)]
pub enum Restart {
    /// Resume generating SIOTS for the IOTS
    Iots(Arc<Iots>),
    Siots(Arc<Iots>, SiotsId),
    /// Deliver the IOTS's completion
    Complete(Arc<Iots>),
}

/// Work collected while holding a lock, to be run after releasing it.
#[derive(Debug, Default)]
pub struct RestartList(Vec<Restart>);

impl RestartList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_iots(&mut self, iots: Arc<Iots>) {
        self.0.push(Restart::Iots(iots));
    }

    pub fn push_siots(&mut self, iots: Arc<Iots>, siots: SiotsId) {
        self.0.push(Restart::Siots(iots, siots));
    }

    pub fn push_complete(&mut self, iots: Arc<Iots>) {
        self.0.push(Restart::Complete(iots));
    }

    pub fn append(&mut self, mut other: RestartList) {
        self.0.append(&mut other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> slice::Iter<'_, Restart> {
        self.0.iter()
    }

    /// Hand everything to the scheduler, in the order it was collected.
    pub fn run(self, scheduler: &dyn Scheduler) {
        for restart in self.0 {
            match restart {
                Restart::Iots(iots) => scheduler.restart_iots(iots),
                Restart::Siots(iots, siots) =>
                    scheduler.restart_siots(iots, siots),
                Restart::Complete(iots) => scheduler.complete_iots(iots),
            }
        }
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use std::sync::atomic::{AtomicU32, Ordering};

use mockall::Sequence;
use pretty_assertions::assert_eq;
use super::*;

fn dummy_iots(id: u64) -> Arc<Iots> {
    let info = RequestInfo::new(RequestId(id), Opcode::Read, 0, 1);
    Arc::new(Iots::new(info, Arc::new(MockMemoryService::new()),
                       Box::new(|_| ())))
}

#[test]
fn run_in_order() {
    let a = dummy_iots(1);
    let b = dummy_iots(2);
    let mut seq = Sequence::new();
    let mut scheduler = MockScheduler::new();
    scheduler.expect_restart_siots()
        .once()
        .in_sequence(&mut seq)
        .withf(|iots, siots| iots.id() == RequestId(1) && *siots == SiotsId(3))
        .return_const(());
    scheduler.expect_restart_iots()
        .once()
        .in_sequence(&mut seq)
        .withf(|iots| iots.id() == RequestId(2))
        .return_const(());
    scheduler.expect_complete_iots()
        .once()
        .in_sequence(&mut seq)
        .withf(|iots| iots.id() == RequestId(1))
        .return_const(());

    let mut list = RestartList::new();
    list.push_siots(a.clone(), SiotsId(3));
    let mut other = RestartList::new();
    other.push_iots(b);
    other.push_complete(a);
    list.append(other);
    assert_eq!(list.len(), 3);
    list.run(&scheduler);
}

#[test]
fn drive_until_waiting() {
    let iots = dummy_iots(1);
    let steps = AtomicU32::new(0);
    let mut algorithm = MockSiotsAlgorithm::new();
    algorithm.expect_step()
        .withf(|_, siots| *siots == SiotsId(0))
        .times(3)
        .returning(move |_, _| {
            if steps.fetch_add(1, Ordering::Relaxed) < 2 {
                Ok(StepResult::Executing)
            } else {
                Ok(StepResult::Waiting)
            }
        });
    assert_eq!(drive(&algorithm, &iots, SiotsId(0)), Ok(StepResult::Waiting));
}

#[test]
fn drive_error() {
    let iots = dummy_iots(1);
    let mut algorithm = MockSiotsAlgorithm::new();
    algorithm.expect_step()
        .once()
        .returning(|_, _| Err(Error::InternalInconsistency));
    assert_eq!(drive(&algorithm, &iots, SiotsId(0)),
               Err(Error::InternalInconsistency));
}

#[test]
fn empty() {
    let scheduler = MockScheduler::new();
    let list = RestartList::new();
    assert!(list.is_empty());
    list.run(&scheduler);
}
}
// LCOV_EXCL_STOP
