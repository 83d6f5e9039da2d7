// vim: tw=80
//! Interfaces to the collaborators that surround the RAID library.
//!
//! The library never blocks on any of these.  A collaborator that cannot
//! finish immediately returns `Err(Error::Pending)` and later calls back into
//! the library when it completes.

use std::sync::Arc;

#[cfg(test)] use mockall::automock;

use crate::types::*;
use super::{Iots, RequestId, SiotsId};

/// Identifies an outstanding memory allocation
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MemoryHandle(pub u64);

/// Identifies a bound drive edge
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EdgeHandle(pub u64);

/// Outcome of an allocation request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Allocation {
    /// The buffers are available now
    Ready(MemoryHandle),
    /// The allocator will call back later.  The handle may be used to abort.
    Deferred(MemoryHandle),
}

/// Buffer allocator
#[cfg_attr(test, automock)]
pub trait MemoryService: Send + Sync {
    /// Request `bytes` of buffer space
    fn allocate(&self, bytes: u32) -> Result<Allocation>;

    /// Abort an allocation that has not yet completed.
    ///
    /// Must be harmless even if the allocation is completing concurrently.
    fn abort_request(&self, handle: MemoryHandle) -> Result<()>;
}

/// Paged metadata that tracks which chunks need rebuild
#[cfg_attr(test, automock)]
pub trait MetadataService: Send + Sync {
    /// Durably mark `[lba, lba + blocks)` as needing rebuild on every
    /// position in `bitmask`.
    ///
    /// If this returns `Err(Error::Pending)`, the outcome is later delivered
    /// to `RaidGroup::mark_nr_complete`.
    fn write_nr_bits(&self, request: RequestId, lba: LbaT, blocks: BlockCountT,
                     bitmask: PositionBitmask) -> Result<()>;

    /// Read back which positions still need rebuild within
    /// `[lba, lba + blocks)`.
    ///
    /// If this returns `Err(Error::Pending)`, the outcome is later delivered
    /// to `RaidGroup::chunk_info_complete`.
    fn read_chunk_info(&self, request: RequestId, lba: LbaT,
                       blocks: BlockCountT) -> Result<PositionBitmask>;
}

/// The write log that protects parity groups from write holes
#[cfg_attr(test, automock)]
pub trait WriteLog: Send + Sync {
    /// Fail every request waiting for a write log slot
    fn abort(&self);
}

/// Runs state machines.  Every method must return without running them
/// inline, since the caller may still be unwinding its own state.
#[cfg_attr(test, automock)]
pub trait Scheduler: Send + Sync {
    /// Resume generating sub-requests for `iots`
    fn restart_iots(&self, iots: Arc<Iots>);

    /// Resume one sub-request
    fn restart_siots(&self, iots: Arc<Iots>, siots: SiotsId);

    /// `iots` is finished.  Deliver its completion.
    fn complete_iots(&self, iots: Arc<Iots>);
}

/// Connections from a raw mirror to its drives
#[cfg_attr(test, automock)]
pub trait EdgeProvider: Send + Sync {
    /// Returns `Err(Error::NotFound)` while the drive is still being created.
    fn get_edge(&self, position: PositionT) -> Result<EdgeHandle>;
}
