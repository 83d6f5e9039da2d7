// vim: tw=80
//! Per-stripe sub-requests

use std::fmt::{self, Display, Formatter};

use crate::types::*;
use super::MemoryHandle;

/// Names one SIOTS within its IOTS.  Never reused by the same IOTS.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SiotsId(pub u32);

impl Display for SiotsId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "siots{}", self.0)
    }
}

/// Why a SIOTS is not running
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Park {
    /// Running, or runnable
    #[default]
    Running,
    /// Stopped for a quiesce.  Restarts when the IOTS is unquiesced.
    Quiesced,
    /// Stopped until a continue clears its `needs_continue` bits
    ShutdownContinue,
    /// Waiting for a conflicting SIOTS of the same IOTS to finish
    LockWait,
    /// Waiting to upgrade its stripe lock
    UpgradeWait,
}

/// The stripe range a SIOTS covers, as chosen by its algorithm
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SiotsParams {
    pub parity_start: LbaT,
    pub parity_count: BlockCountT,
    pub xfer_count: BlockCountT,
    pub logical_parity_start: LbaT,
    pub logical_parity_count: BlockCountT,
    /// Rebuild and verify algorithms lock the whole logical parity range
    /// instead of just the blocks they transfer.
    pub rebuild_or_verify: bool,
}

impl SiotsParams {
    pub fn new(parity_start: LbaT, parity_count: BlockCountT) -> Self {
        SiotsParams {
            parity_start,
            parity_count,
            xfer_count: parity_count,
            logical_parity_start: parity_start,
            logical_parity_count: parity_count,
            rebuild_or_verify: false,
        }
    }
}

#[derive(Debug)]
pub struct Siots {
    id: SiotsId,
    parent: Option<SiotsId>,
    pub(super) nested: Vec<SiotsId>,
    params: SiotsParams,
    pub(super) park: Park,
    wait_count: u32,
    pub(super) needs_continue: PositionBitmask,
    pub(super) continue_bitmask: PositionBitmask,
    pub(super) received_continue: bool,
    failed_positions: PositionBitmask,
    journal_slot: bool,
    upgrade_owner: bool,
    pub(super) memory_wait: Option<MemoryHandle>,
    pub(super) memory_aborted: bool,
    pub(super) aborted: bool,
    pub(super) was_delayed: bool,
}

impl Siots {
    pub(super) fn new(id: SiotsId, parent: Option<SiotsId>,
                      params: SiotsParams) -> Self
    {
        Siots {
            id,
            parent,
            nested: Vec::new(),
            params,
            park: Park::Running,
            wait_count: 0,
            needs_continue: PositionBitmask::EMPTY,
            continue_bitmask: PositionBitmask::EMPTY,
            received_continue: false,
            failed_positions: PositionBitmask::EMPTY,
            journal_slot: false,
            upgrade_owner: false,
            memory_wait: None,
            memory_aborted: false,
            aborted: false,
            was_delayed: false,
        }
    }

    pub fn id(&self) -> SiotsId {
        self.id
    }

    pub fn parent(&self) -> Option<SiotsId> {
        self.parent
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub fn nested(&self) -> &[SiotsId] {
        &self.nested
    }

    pub fn params(&self) -> &SiotsParams {
        &self.params
    }

    pub fn park(&self) -> Park {
        self.park
    }

    /// Number of drive operations this SIOTS has outstanding
    pub fn wait_count(&self) -> u32 {
        self.wait_count
    }

    pub fn set_wait_count(&mut self, wait_count: u32) {
        self.wait_count = wait_count;
    }

    pub fn needs_continue(&self) -> PositionBitmask {
        self.needs_continue
    }

    /// Stop until a continue arrives for every position in `mask`
    pub fn wait_shutdown_continue(&mut self, mask: PositionBitmask) {
        self.needs_continue |= mask;
        self.park = Park::ShutdownContinue;
    }

    pub fn continue_bitmask(&self) -> PositionBitmask {
        self.continue_bitmask
    }

    pub fn received_continue(&self) -> bool {
        self.received_continue
    }

    pub fn failed_positions(&self) -> PositionBitmask {
        self.failed_positions
    }

    pub fn set_failed_positions(&mut self, mask: PositionBitmask) {
        self.failed_positions = mask;
    }

    /// Does this SIOTS hold a write-log slot?
    pub fn holds_journal_slot(&self) -> bool {
        self.journal_slot
    }

    pub fn set_journal_slot(&mut self, held: bool) {
        self.journal_slot = held;
    }

    pub fn is_upgrade_owner(&self) -> bool {
        self.upgrade_owner
    }

    pub fn set_upgrade_owner(&mut self, owner: bool) {
        self.upgrade_owner = owner;
    }

    pub fn begin_memory_wait(&mut self, handle: MemoryHandle) {
        self.memory_wait = Some(handle);
    }

    /// The allocator has answered.  Returns whether the wait was aborted.
    pub fn memory_complete(&mut self) -> bool {
        self.memory_wait = None;
        std::mem::take(&mut self.memory_aborted)
    }

    pub fn is_waiting_for_memory(&self) -> bool {
        self.memory_wait.is_some()
    }

    /// Flag the outstanding memory wait, if any, as aborted.  Returns the
    /// handle to abort, the first time only.
    pub(super) fn abort_memory_wait(&mut self) -> Option<MemoryHandle> {
        match self.memory_wait {
            Some(handle) if !self.memory_aborted => {
                self.memory_aborted = true;
                Some(handle)
            }
            _ => None
        }
    }

    /// Was the algorithm aborted out from under a memory wait?
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Did this SIOTS ever have to wait behind an earlier one?
    pub fn was_delayed(&self) -> bool {
        self.was_delayed
    }

    /// Parked in one of the quiescent states with nothing outstanding
    pub fn is_quiesced(&self) -> bool {
        self.park != Park::Running && self.wait_count == 0
    }

    pub fn is_lock_waiting(&self) -> bool {
        matches!(self.park, Park::LockWait | Park::UpgradeWait)
    }

    /// The inclusive range of parity-relative blocks this SIOTS occupies,
    /// before any 4K alignment.
    pub fn lock_range(&self) -> (LbaT, LbaT) {
        let (start, count) = if self.params.rebuild_or_verify {
            (self.params.logical_parity_start,
             self.params.logical_parity_count)
        } else {
            (self.params.parity_start, self.params.parity_count)
        };
        (start, start + count.max(1) - 1)
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use super::*;

#[test]
fn lock_range() {
    let mut params = SiotsParams::new(256, 128);
    params.logical_parity_start = 0;
    params.logical_parity_count = 1024;
    let siots = Siots::new(SiotsId(0), None, params);
    assert_eq!(siots.lock_range(), (256, 383));

    params.rebuild_or_verify = true;
    let siots = Siots::new(SiotsId(1), None, params);
    assert_eq!(siots.lock_range(), (0, 1023));
}

#[test]
fn quiesced_requires_idle() {
    let mut siots = Siots::new(SiotsId(0), None, SiotsParams::new(0, 1));
    assert!(!siots.is_quiesced());
    siots.wait_shutdown_continue(PositionBitmask::single(2));
    siots.set_wait_count(1);
    assert!(!siots.is_quiesced());
    siots.set_wait_count(0);
    assert!(siots.is_quiesced());
    assert_eq!(siots.needs_continue(), PositionBitmask::single(2));
}

#[test]
fn memory_wait() {
    let mut siots = Siots::new(SiotsId(4), Some(SiotsId(3)),
                               SiotsParams::new(0, 1));
    assert!(siots.is_nested());
    siots.begin_memory_wait(MemoryHandle(9));
    assert!(siots.is_waiting_for_memory());
    assert_eq!(siots.abort_memory_wait(), Some(MemoryHandle(9)));
    assert_eq!(siots.abort_memory_wait(), None);
    assert!(siots.memory_complete());
    siots.begin_memory_wait(MemoryHandle(10));
    assert!(!siots.memory_complete());
    assert!(!siots.is_waiting_for_memory());
}
}
// LCOV_EXCL_STOP
