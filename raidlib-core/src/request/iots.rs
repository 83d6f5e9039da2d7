// vim: tw=80
//! The IOTS state machine and its quiesce protocol

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::types::*;
use super::{
    Allocation,
    MemoryHandle,
    MemoryService,
    Park,
    RestartList,
    Scheduler,
    Siots,
    SiotsId,
    SiotsParams,
    StepResult,
};

/// Identifies one request for the lifetime of the library
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(pub u64);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "req{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum IotsStatus {
    /// A pool slot that was never claimed
    NotUsed,
    /// Accepted by the raid group but not yet handed to the library
    #[default]
    NotStartedToLibrary,
    AtLibrary,
    /// Held back by the raid group until its quiesce ends
    WaitingForQuiesce,
    /// Parked while the raid group updates metadata on its behalf
    LibraryWaitingForContinue,
    Complete,
}

/// Progress of breaking an IOTS into SIOTS
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Generation {
    #[default]
    Idle,
    Generating,
    Allocating,
}

/// Delivers the final `{status, qualifier}` of a request.  Called once.
pub type Completion = Box<dyn FnOnce(BlockResult) + Send>;

/// Fixed description of a request, as read from its transport envelope
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestInfo {
    pub id: RequestId,
    pub opcode: Opcode,
    pub lba: LbaT,
    pub blocks: BlockCountT,
    /// Targets the group's paged metadata region
    pub metadata: bool,
    /// Issued by the background monitor
    pub monitor_op: bool,
    /// Must run to completion even while the group is quiescing
    pub do_not_quiesce: bool,
    /// The group has 4K drives, so lock ranges are widened to 4K
    pub needs_alignment: bool,
}

impl RequestInfo {
    pub fn new(id: RequestId, opcode: Opcode, lba: LbaT, blocks: BlockCountT)
        -> Self
    {
        RequestInfo {
            id,
            opcode,
            lba,
            blocks,
            metadata: false,
            monitor_op: false,
            do_not_quiesce: false,
            needs_alignment: false,
        }
    }
}

/// State guarded by the per-IOTS lock
#[derive(Debug)]
pub(super) struct IotsInner {
    pub(super) status: IotsStatus,
    pub(super) generation: Generation,
    pub(super) quiesce: bool,
    pub(super) abort: bool,
    pub(super) abort_for_shutdown: bool,
    /// The request may skip degraded-mode processing
    pub(super) non_degraded: bool,
    /// Some SIOTS has failed
    pub(super) error: bool,
    pub(super) upgrade_waiters: bool,
    pub(super) was_quiesced: bool,
    pub(super) cancelled: bool,
    pub(super) memory_wait: Option<MemoryHandle>,
    pub(super) memory_aborted: bool,
    pub(super) result: BlockResult,
    pub(super) rebuild_logging_bitmask: PositionBitmask,
    pub(super) needs_rebuild_bitmask: PositionBitmask,
    /// Positions that failed on SIOTS that have already finished
    pub(super) failed_positions: PositionBitmask,
    pub(super) stripe_crossings: u32,
    pub(super) blocks_generated: BlockCountT,
    pub(super) arena: BTreeMap<SiotsId, Siots>,
    /// Top-level SIOTS, oldest first
    pub(super) queue: Vec<SiotsId>,
    pub(super) outstanding: usize,
    next_id: u32,
}

impl IotsInner {
    fn new() -> Self {
        IotsInner {
            status: IotsStatus::NotStartedToLibrary,
            generation: Generation::Idle,
            quiesce: false,
            abort: false,
            abort_for_shutdown: false,
            non_degraded: false,
            error: false,
            upgrade_waiters: false,
            was_quiesced: false,
            cancelled: false,
            memory_wait: None,
            memory_aborted: false,
            result: BlockResult::default(),
            rebuild_logging_bitmask: PositionBitmask::EMPTY,
            needs_rebuild_bitmask: PositionBitmask::EMPTY,
            failed_positions: PositionBitmask::EMPTY,
            stripe_crossings: 0,
            blocks_generated: 0,
            arena: BTreeMap::new(),
            queue: Vec::new(),
            outstanding: 0,
            next_id: 0,
        }
    }

    pub(super) fn siots(&self, id: SiotsId) -> Result<&Siots> {
        self.arena.get(&id).ok_or(Error::InvalidParams)
    }

    pub(super) fn siots_mut(&mut self, id: SiotsId) -> Result<&mut Siots> {
        self.arena.get_mut(&id).ok_or(Error::InvalidParams)
    }

    /// The first nested SIOTS of `siots`, if any
    pub(super) fn first_nested(&self, siots: &Siots) -> Option<&Siots> {
        siots.nested.first().and_then(|id| self.arena.get(id))
    }

    /// Every SIOTS in queue order, each followed by its nested SIOTS
    pub(super) fn tree_ids(&self) -> Vec<SiotsId> {
        let mut ids = Vec::with_capacity(self.arena.len());
        for id in self.queue.iter() {
            ids.push(*id);
            if let Some(siots) = self.arena.get(id) {
                ids.extend_from_slice(&siots.nested);
            }
        }
        ids
    }

    fn is_quiesced(&self) -> bool {
        if self.status != IotsStatus::AtLibrary ||
            self.memory_wait.is_some() ||
            self.generation != Generation::Idle
        {
            return false;
        }
        let mut quiesced = 0;
        for id in self.queue.iter() {
            let Some(siots) = self.arena.get(id) else {
                return false;
            };
            let parked = siots.is_quiesced() || siots.nested.iter()
                .filter_map(|n| self.arena.get(n))
                .any(Siots::is_quiesced);
            if !parked {
                return false;
            }
            quiesced += 1;
        }
        if quiesced != self.outstanding {
            // A SIOTS is in the middle of removing itself
            return false;
        }
        if quiesced == 0 {
            return self.quiesce;
        }
        true
    }

    /// Unpark every quiesced SIOTS, returning their ids
    fn take_quiesced(&mut self) -> Vec<SiotsId> {
        let mut restarted = Vec::new();
        for id in self.tree_ids() {
            if let Some(siots) = self.arena.get_mut(&id) {
                if siots.park == Park::Quiesced {
                    siots.park = Park::Running;
                    restarted.push(id);
                }
            }
        }
        restarted
    }

    /// Flag the IOTS's own memory wait as aborted
    fn abort_iots_memory(&mut self) -> Option<MemoryHandle> {
        match self.memory_wait {
            Some(handle) if !self.memory_aborted => {
                self.memory_aborted = true;
                Some(handle)
            }
            _ => None
        }
    }

    fn abort_siots_memory(&mut self, mark_aborted: bool) -> Vec<MemoryHandle> {
        let mut handles = Vec::new();
        for siots in self.arena.values_mut() {
            if mark_aborted && siots.is_waiting_for_memory() {
                siots.aborted = true;
            }
            handles.extend(siots.abort_memory_wait());
        }
        handles
    }
}

/// One logical I/O request
pub struct Iots {
    info: RequestInfo,
    time_stamp: Instant,
    memory: Arc<dyn MemoryService>,
    callback: Mutex<Option<Completion>>,
    pub(super) inner: Mutex<IotsInner>,
}

impl Iots {
    pub fn new(info: RequestInfo, memory: Arc<dyn MemoryService>,
               callback: Completion) -> Self
    {
        Iots {
            info,
            time_stamp: Instant::now(),
            memory,
            callback: Mutex::new(Some(callback)),
            inner: Mutex::new(IotsInner::new()),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, IotsInner> {
        self.inner.lock()
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    pub fn id(&self) -> RequestId {
        self.info.id
    }

    pub fn opcode(&self) -> Opcode {
        self.info.opcode
    }

    /// When the library accepted the request
    pub fn time_stamp(&self) -> Instant {
        self.time_stamp
    }

    pub fn status(&self) -> IotsStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: IotsStatus) {
        self.lock().status = status;
    }

    pub fn generation(&self) -> Generation {
        self.lock().generation
    }

    pub fn set_generation(&self, generation: Generation) {
        self.lock().generation = generation;
    }

    /// Hand the request to the library and begin generating SIOTS
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        if !matches!(inner.status,
            IotsStatus::NotStartedToLibrary | IotsStatus::WaitingForQuiesce)
        {
            error!(request = %self.info.id, status = ?inner.status,
                "start of a request that is already started");
            return Err(Error::InternalInconsistency);
        }
        inner.status = IotsStatus::AtLibrary;
        inner.generation = Generation::Generating;
        inner.non_degraded = inner.rebuild_logging_bitmask.is_empty();
        Ok(())
    }

    pub fn result(&self) -> BlockResult {
        self.lock().result
    }

    /// Replace the request's status outright
    pub fn set_result(&self, result: BlockResult) {
        self.lock().result = result;
    }

    /// Merge a sub-request's status into the request's status
    pub fn merge_status(&self, status: BlockStatus, qualifier: BlockQualifier)
    {
        let mut inner = self.lock();
        if status != BlockStatus::Success {
            inner.error = true;
        }
        inner.result.merge(BlockResult::new(status, qualifier));
    }

    pub fn has_error(&self) -> bool {
        self.lock().error
    }

    pub fn is_quiescing(&self) -> bool {
        self.lock().quiesce
    }

    pub fn mark_unquiesced(&self) {
        self.lock().quiesce = false;
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().abort
    }

    pub fn is_aborted_for_shutdown(&self) -> bool {
        self.lock().abort_for_shutdown
    }

    pub fn is_non_degraded(&self) -> bool {
        self.lock().non_degraded
    }

    /// Has the transport asked to cancel this request?
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn set_cancelled(&self) {
        self.lock().cancelled = true;
    }

    pub fn rebuild_logging_bitmask(&self) -> PositionBitmask {
        self.lock().rebuild_logging_bitmask
    }

    pub fn set_rebuild_logging_bitmask(&self, mask: PositionBitmask) {
        self.lock().rebuild_logging_bitmask = mask;
    }

    /// Positions the paged metadata says still need rebuild
    pub fn needs_rebuild_bitmask(&self) -> PositionBitmask {
        self.lock().needs_rebuild_bitmask
    }

    pub fn set_chunk_info(&self, needs_rebuild: PositionBitmask) {
        self.lock().needs_rebuild_bitmask = needs_rebuild;
    }

    pub fn outstanding_requests(&self) -> usize {
        self.lock().outstanding
    }

    pub fn increment_stripe_crossings(&self) {
        let mut inner = self.lock();
        inner.stripe_crossings = inner.stripe_crossings.saturating_add(1);
    }

    pub fn stripe_crossings(&self) -> u32 {
        self.lock().stripe_crossings
    }

    pub fn is_metadata_operation(&self) -> bool {
        self.info.metadata
    }

    /// Background operations address a single drive rather than the group
    pub fn is_background_request(&self) -> bool {
        self.info.opcode.is_disk_based()
    }

    /// Has every block been handed to a SIOTS, and every SIOTS finished?
    pub fn is_request_complete(&self) -> bool {
        let inner = self.lock();
        inner.blocks_generated >= self.info.blocks && inner.outstanding == 0
    }

    /// Is the request older than `threshold`, as of `now`?
    pub fn is_expired(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.time_stamp) > threshold
    }

    /// Every position that has failed on any SIOTS of this request
    pub fn failed_io_positions(&self) -> PositionBitmask {
        let inner = self.lock();
        inner.arena.values()
            .fold(inner.failed_positions, |acc, s| acc | s.failed_positions())
    }

    pub(crate) fn take_was_quiesced(&self) -> bool {
        std::mem::take(&mut self.lock().was_quiesced)
    }

    pub(crate) fn set_was_quiesced(&self) {
        self.lock().was_quiesced = true;
    }

    pub fn begin_memory_wait(&self, handle: MemoryHandle) {
        let mut inner = self.lock();
        inner.memory_wait = Some(handle);
        inner.memory_aborted = false;
    }

    /// The allocator has answered.  Returns whether the wait was aborted.
    pub fn memory_complete(&self) -> bool {
        let mut inner = self.lock();
        inner.memory_wait = None;
        inner.memory_aborted
    }

    pub fn is_waiting_for_memory(&self) -> bool {
        self.lock().memory_wait.is_some()
    }

    /// Allocate buffers for `blocks` on behalf of the IOTS itself.
    ///
    /// Returns `Waiting` if the allocator deferred.  Resume once it calls
    /// back, after [`Iots::memory_complete`].
    pub fn allocate(&self, blocks: BlockCountT) -> Result<StepResult> {
        let bytes = checked_byte_count(blocks).ok_or(Error::InvalidParams)?;
        match self.memory.allocate(bytes)? {
            Allocation::Ready(_) => Ok(StepResult::Executing),
            Allocation::Deferred(handle) => {
                self.begin_memory_wait(handle);
                Ok(StepResult::Waiting)
            }
        }
    }

    /// Like [`Iots::allocate`], but the wait belongs to one SIOTS
    pub fn allocate_for_siots(&self, id: SiotsId, blocks: BlockCountT)
        -> Result<StepResult>
    {
        let bytes = checked_byte_count(blocks).ok_or(Error::InvalidParams)?;
        self.lock().siots(id)?;
        match self.memory.allocate(bytes)? {
            Allocation::Ready(_) => Ok(StepResult::Executing),
            Allocation::Deferred(handle) => {
                self.with_siots(id, |s| s.begin_memory_wait(handle))?;
                Ok(StepResult::Waiting)
            }
        }
    }

    fn abort_memory(&self, handles: Vec<MemoryHandle>) {
        for handle in handles {
            if let Err(e) = self.memory.abort_request(handle) {
                // The allocation may be completing concurrently
                warn!(request = %self.info.id, ?handle, "memory abort: {e}");
            }
        }
    }

    /// Append a top-level SIOTS covering `params`
    pub fn add_siots(&self, params: SiotsParams) -> Result<SiotsId> {
        if params.parity_count == 0 {
            return Err(Error::InvalidParams);
        }
        let mut inner = self.lock();
        let id = SiotsId(inner.next_id);
        inner.next_id += 1;
        inner.arena.insert(id, Siots::new(id, None, params));
        inner.queue.push(id);
        inner.outstanding += 1;
        inner.blocks_generated += params.xfer_count;
        Ok(id)
    }

    /// Add a SIOTS nested beneath `parent`, which must be top-level
    pub fn add_nested_siots(&self, parent: SiotsId, params: SiotsParams)
        -> Result<SiotsId>
    {
        if params.parity_count == 0 {
            return Err(Error::InvalidParams);
        }
        let mut inner = self.lock();
        if inner.siots(parent)?.is_nested() {
            return Err(Error::InvalidParams);
        }
        let id = SiotsId(inner.next_id);
        inner.next_id += 1;
        inner.arena.insert(id, Siots::new(id, Some(parent), params));
        inner.siots_mut(parent)?.nested.push(id);
        Ok(id)
    }

    /// Run `f` against one SIOTS while holding the IOTS lock
    pub fn with_siots<F, R>(&self, id: SiotsId, f: F) -> Result<R>
        where F: FnOnce(&mut Siots) -> R
    {
        let mut inner = self.lock();
        inner.siots_mut(id).map(f)
    }

    /// Remove a finished SIOTS and wake whichever lock waiter it unblocks.
    pub fn siots_complete(self: &Arc<Self>, id: SiotsId, result: BlockResult,
                          scheduler: &dyn Scheduler) -> Result<()>
    {
        let waiter = {
            let mut inner = self.lock();
            let siots = inner.siots(id)?;
            if siots.wait_count() != 0 || !siots.nested.is_empty() {
                error!(request = %self.info.id, siots = %id,
                    wait_count = siots.wait_count(),
                    "completing a SIOTS that still has work outstanding");
                return Err(Error::InternalInconsistency);
            }
            let parent = siots.parent();
            let failed = siots.failed_positions();
            inner.arena.remove(&id);
            match parent {
                Some(p) => inner.siots_mut(p)?.nested.retain(|n| *n != id),
                None => {
                    inner.queue.retain(|q| *q != id);
                    inner.outstanding = inner.outstanding.checked_sub(1)
                        .ok_or(Error::InternalInconsistency)?;
                }
            }
            inner.failed_positions |= failed;
            if result.status != BlockStatus::Success {
                inner.error = true;
            }
            inner.result.merge(result);
            if inner.quiesce {
                None
            } else {
                inner.first_lock_waiter(&self.info)?
            }
        };
        if let Some(w) = waiter {
            scheduler.restart_siots(self.clone(), w);
        }
        Ok(())
    }

    pub fn mark_complete(&self) {
        self.lock().status = IotsStatus::Complete;
    }

    /// Deliver the completion.  It is an error to deliver it twice.
    pub fn invoke_callback(&self) -> Result<()> {
        let callback = self.callback.lock().take();
        let result = self.result();
        match callback {
            Some(cb) => {
                cb(result);
                Ok(())
            }
            None => {
                error!(request = %self.info.id, "completion delivered twice");
                Err(Error::InternalInconsistency)
            }
        }
    }

    /// Ask the request to stop at its next safe point.
    ///
    /// Returns without waiting; poll [`Iots::is_quiesced`].
    pub fn quiesce(&self) {
        let handles = {
            let mut inner = self.lock();
            if inner.status != IotsStatus::AtLibrary {
                return;
            }
            inner.quiesce = true;
            inner.non_degraded = false;
            let mut handles: Vec<_> = inner.abort_iots_memory()
                .into_iter()
                .collect();
            if inner.generation == Generation::Idle {
                handles.extend(inner.abort_siots_memory(false));
            }
            handles
        };
        self.abort_memory(handles);
    }

    /// Has every live SIOTS stopped?
    pub fn is_quiesced(&self) -> bool {
        self.lock().is_quiesced()
    }

    /// Release SIOTS waiting on a continue for any position in `mask`
    ///
    /// Either every SIOTS is released or, on error, none are changed.
    pub fn continue_request(&self, mask: PositionBitmask) -> Result<()> {
        let mut inner = self.lock();
        let ids = inner.tree_ids();
        for id in ids.iter() {
            let siots = inner.siots(*id)?;
            let released = siots.park == Park::ShutdownContinue &&
                (siots.needs_continue & !mask).is_empty();
            if released && siots.wait_count() != 0 {
                error!(request = %self.info.id, siots = %id,
                    wait_count = siots.wait_count(),
                    "continue of a SIOTS with I/O outstanding");
                return Err(Error::InternalInconsistency);
            }
        }
        for id in ids {
            let siots = inner.siots_mut(id)?;
            siots.received_continue = true;
            siots.continue_bitmask |= mask;
            siots.needs_continue = siots.needs_continue & !mask;
            if siots.park == Park::ShutdownContinue &&
                siots.needs_continue.is_empty()
            {
                siots.park = Park::Quiesced;
            }
        }
        debug!(request = %self.info.id, %mask, "continue");
        Ok(())
    }

    /// Unpark every quiesced SIOTS onto `list`
    pub fn get_siots_to_restart(self: &Arc<Self>, list: &mut RestartList) {
        let restarted = self.lock().take_quiesced();
        for id in restarted {
            list.push_siots(self.clone(), id);
        }
    }

    /// End a quiesce, collecting everything that must run again.
    pub fn get_quiesced_ts_to_restart(self: &Arc<Self>,
                                      list: &mut RestartList) -> Result<()>
    {
        let mut inner = self.lock();
        if !inner.quiesce {
            return Ok(());
        }
        inner.quiesce = false;
        if inner.status == IotsStatus::Complete {
            return Ok(());
        }
        inner.status = IotsStatus::AtLibrary;
        let restarted = inner.take_quiesced();
        let mut restart_iots = false;
        if restarted.is_empty() {
            if inner.outstanding == 0 {
                restart_iots = true;
            } else if let Some(first) = inner.queue.first().copied() {
                let siots = inner.siots_mut(first)?;
                if siots.is_lock_waiting() {
                    siots.park = Park::Running;
                    list.push_siots(self.clone(), first);
                }
            }
        }
        for id in restarted {
            list.push_siots(self.clone(), id);
        }
        if inner.memory_aborted && inner.memory_wait.is_none() {
            inner.memory_aborted = false;
            restart_iots = true;
        }
        if restart_iots {
            inner.generation = Generation::Generating;
            list.push_iots(self.clone());
        }
        Ok(())
    }

    fn fail_and_quiesce(self: &Arc<Self>, qualifier: BlockQualifier,
                        for_shutdown: bool, list: &mut RestartList)
        -> Result<()>
    {
        {
            let mut inner = self.lock();
            if inner.status == IotsStatus::Complete {
                error!(request = %self.info.id,
                    "draining a request that already completed");
                return Err(Error::InternalInconsistency);
            }
            inner.result = BlockResult::new(BlockStatus::IoFailed, qualifier);
            if for_shutdown {
                inner.abort_for_shutdown = true;
            } else {
                inner.abort = true;
            }
        }
        self.quiesce();
        let mut inner = self.lock();
        if inner.is_quiesced() {
            inner.status = IotsStatus::Complete;
            list.push_complete(self.clone());
            Ok(())
        } else {
            Err(Error::Pending)
        }
    }

    /// Fail the request because its raid group is going away.
    ///
    /// Returns `Pending` until every SIOTS has stopped; call again once more
    /// progress has been made.
    pub fn handle_shutdown(self: &Arc<Self>, list: &mut RestartList)
        -> Result<()>
    {
        self.fail_and_quiesce(BlockQualifier::RetryNotPossible, true, list)
    }

    /// Like [`Iots::handle_shutdown`], but the failure is retryable.
    pub fn handle_config_change(self: &Arc<Self>, list: &mut RestartList)
        -> Result<()>
    {
        self.fail_and_quiesce(BlockQualifier::RetryPossible, false, list)
    }

    pub fn abort(&self) {
        let handles = {
            let mut inner = self.lock();
            inner.abort = true;
            let mut handles: Vec<_> = inner.abort_iots_memory()
                .into_iter()
                .collect();
            handles.extend(inner.abort_siots_memory(false));
            handles
        };
        self.abort_memory(handles);
    }

    /// Break a monitor operation out of its memory waits.
    ///
    /// Aborted SIOTS finish through their algorithm's aborted path.
    pub fn abort_monitor_op(&self) -> Result<()> {
        let handles = {
            let mut inner = self.lock();
            if inner.status != IotsStatus::AtLibrary {
                return Err(Error::InvalidParams);
            }
            let mut handles = Vec::new();
            if let Some(h) = inner.abort_iots_memory() {
                inner.abort = true;
                handles.push(h);
            }
            handles.extend(inner.abort_siots_memory(true));
            handles
        };
        debug!(request = %self.info.id, aborted = handles.len(),
               "abort monitor operation");
        self.abort_memory(handles);
        Ok(())
    }

    /// Restart quiesced SIOTS that hold a write-log slot, so they can give
    /// it back.  Returns whether any slot holders remain.
    pub fn queue_not_finished(self: &Arc<Self>, list: &mut RestartList)
        -> bool
    {
        let mut inner = self.lock();
        if inner.status != IotsStatus::AtLibrary {
            return false;
        }
        inner.quiesce = true;
        if inner.generation != Generation::Idle {
            return false;
        }
        let mut remaining = false;
        for id in inner.tree_ids() {
            let Some(siots) = inner.arena.get_mut(&id) else {
                continue;
            };
            if siots.holds_journal_slot() {
                remaining = true;
                if siots.park == Park::Quiesced {
                    siots.park = Park::Running;
                    list.push_siots(self.clone(), id);
                }
            }
        }
        remaining
    }

    /// Park a SIOTS at a safe point if its IOTS is quiescing.
    ///
    /// Returns `true` if the SIOTS must stop now.
    pub fn mark_quiesced(&self, id: SiotsId) -> Result<bool> {
        let handle = {
            let mut inner = self.lock();
            let quiescing = inner.quiesce;
            let siots = inner.siots_mut(id)?;
            if self.info.do_not_quiesce ||
                (self.info.monitor_op && !siots.is_waiting_for_memory()) ||
                !quiescing
            {
                return Ok(false);
            }
            if siots.wait_count() != 0 {
                return Ok(false);
            }
            if siots.is_waiting_for_memory() {
                siots.abort_memory_wait()
            } else {
                siots.park = Park::Quiesced;
                return Ok(true);
            }
        };
        self.abort_memory(handle.into_iter().collect());
        Ok(false)
    }

    /// Resume after the raid group has finished updating metadata for this
    /// request.
    pub fn restart_after_metadata_update(self: &Arc<Self>,
                                         scheduler: &dyn Scheduler)
        -> Result<()>
    {
        let needs_rebuild = self.needs_rebuild_bitmask();
        self.continue_request(needs_rebuild)?;
        self.lock().quiesce = true;
        let mut list = RestartList::new();
        self.get_quiesced_ts_to_restart(&mut list)?;
        list.run(scheduler);
        Ok(())
    }
}

impl Debug for Iots {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Iots")
            .field("info", &self.info)
            .field("time_stamp", &self.time_stamp)
            .field("inner", &self.inner)
            .finish()
    }
}

// LCOV_EXCL_STOP
