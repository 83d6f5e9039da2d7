// vim: tw=80
//! End-to-end tests of the public API, driven by in-memory collaborators

// rstest_reuse must be imported at the crate root for macro reasons
// https://github.com/la10736/rstest/issues/128
#![allow(clippy::single_component_path_imports)]
use rstest_reuse;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use raidlib_core::{
    request::{
        Allocation,
        EdgeHandle,
        EdgeProvider,
        Iots,
        MemoryHandle,
        MemoryService,
        MetadataService,
        RequestId,
        Scheduler,
        SiotsId,
        WriteLog,
    },
    types::*,
};

macro_rules! t {
    ($e:expr) => (match $e {
        Ok(e) => e,
        Err(e) => panic!("{} failed with {:?}", stringify!($e), e),
    })
}

/// Something a [`FakeScheduler`] was asked to do
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scheduled {
    Iots(RequestId),
    Siots(RequestId, SiotsId),
    Complete(RequestId),
}

/// Records work instead of running it
#[derive(Default)]
struct FakeScheduler {
    log: Mutex<Vec<Scheduled>>,
    completed: Mutex<Vec<Arc<Iots>>>,
}

impl FakeScheduler {
    fn log(&self) -> Vec<Scheduled> {
        self.log.lock().clone()
    }

    /// Requests whose completion is waiting to be delivered
    fn take_completed(&self) -> Vec<Arc<Iots>> {
        std::mem::take(&mut *self.completed.lock())
    }
}

impl Scheduler for FakeScheduler {
    fn restart_iots(&self, iots: Arc<Iots>) {
        self.log.lock().push(Scheduled::Iots(iots.id()));
    }

    fn restart_siots(&self, iots: Arc<Iots>, siots: SiotsId) {
        self.log.lock().push(Scheduled::Siots(iots.id(), siots));
    }

    fn complete_iots(&self, iots: Arc<Iots>) {
        self.log.lock().push(Scheduled::Complete(iots.id()));
        self.completed.lock().push(iots);
    }
}

/// An allocator that never defers, and whose aborts always succeed
#[derive(Default)]
struct NullMemory {
    next: AtomicUsize,
    aborts: AtomicUsize,
}

impl MemoryService for NullMemory {
    fn allocate(&self, _bytes: u32) -> Result<Allocation> {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(Allocation::Ready(MemoryHandle(handle as u64)))
    }

    fn abort_request(&self, _handle: MemoryHandle) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Paged metadata that answers at once.  Reading chunk info returns whatever
/// was last marked.
#[derive(Default)]
struct InstantMetadata {
    marked: Mutex<Vec<(RequestId, LbaT, BlockCountT, PositionBitmask)>>,
}

impl MetadataService for InstantMetadata {
    fn write_nr_bits(&self, request: RequestId, lba: LbaT, blocks: BlockCountT,
                     bitmask: PositionBitmask) -> Result<()>
    {
        self.marked.lock().push((request, lba, blocks, bitmask));
        Ok(())
    }

    fn read_chunk_info(&self, request: RequestId, _lba: LbaT,
                       _blocks: BlockCountT) -> Result<PositionBitmask>
    {
        Ok(self.marked.lock().iter()
            .filter(|m| m.0 == request)
            .fold(PositionBitmask::EMPTY, |acc, m| acc | m.3))
    }
}

#[derive(Default)]
struct CountingWriteLog {
    aborts: AtomicUsize,
}

impl WriteLog for CountingWriteLog {
    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drives that appear only after being polled `delay` times
struct SlowEdges {
    delay: usize,
    polls: AtomicUsize,
}

impl EdgeProvider for SlowEdges {
    fn get_edge(&self, position: PositionT) -> Result<EdgeHandle> {
        if self.polls.fetch_add(1, Ordering::Relaxed) < self.delay {
            Err(Error::NotFound)
        } else {
            Ok(EdgeHandle(u64::from(position)))
        }
    }
}

mod geometry;
mod quiesce;
mod raw_mirror;
