// vim: tw=80
//! Raid-group-wide quiesce coordination.
//!
//! A [`RaidGroup`] owns the set of requests currently registered against it,
//! the "termination queue".  One group-wide lock guards that set, while each
//! request keeps its own lock for its internals.  The group lock is never
//! held while calling into a request's memory or metadata collaborators:
//! work is collected under the lock and carried out after dropping it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    geometry::GeometryDescriptor,
    request::{
        Completion,
        Iots,
        IotsStatus,
        MemoryService,
        MetadataService,
        RequestId,
        RequestInfo,
        RestartList,
        Scheduler,
        WriteLog,
    },
    types::*,
};

/// The group's collaborators
#[derive(Clone)]
pub struct GroupServices {
    pub memory: Arc<dyn MemoryService>,
    pub metadata: Arc<dyn MetadataService>,
    pub scheduler: Arc<dyn Scheduler>,
    /// Only parity groups have a write log
    pub write_log: Option<Arc<dyn WriteLog>>,
}

/// Which metadata step a request must retry
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetadataRetry {
    MarkNr,
    GetChunkInfo,
}

/// Census of the termination queue
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IoCounts {
    pub outstanding: usize,
    pub quiesced: usize,
    pub not_started: usize,
    pub metadata: usize,
}

#[derive(Debug, Default)]
struct GroupInner {
    queue: Vec<Arc<Iots>>,
    quiesced: bool,
    quiescing: bool,
    /// Previously quiesced requests that have not yet completed
    quiesced_count: usize,
    rebuild_logging_bitmask: PositionBitmask,
    /// Requests whose metadata update failed, awaiting the monitor's retry
    retry: Vec<(Arc<Iots>, MetadataRetry)>,
}

impl GroupInner {
    fn find(&self, id: RequestId) -> Option<Arc<Iots>> {
        self.queue.iter().find(|i| i.id() == id).cloned()
    }

    fn forget_quiesced(&mut self, iots: &Iots) {
        if iots.take_was_quiesced() {
            self.quiesced_count = self.quiesced_count.saturating_sub(1);
        }
    }
}

pub struct RaidGroup {
    geometry: GeometryDescriptor,
    services: GroupServices,
    next_request: AtomicU64,
    inner: Mutex<GroupInner>,
}

impl RaidGroup {
    pub fn new(geometry: GeometryDescriptor, services: GroupServices) -> Self {
        RaidGroup {
            geometry,
            services,
            next_request: AtomicU64::new(0),
            inner: Mutex::new(GroupInner::default()),
        }
    }

    pub fn geometry(&self) -> &GeometryDescriptor {
        &self.geometry
    }

    pub fn object_id(&self) -> ObjectId {
        self.geometry.object_id()
    }

    /// Build a request against this group.  It is not yet registered.
    pub fn new_request(&self, opcode: Opcode, lba: LbaT, blocks: BlockCountT,
                       callback: Completion) -> Arc<Iots>
    {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        let mut info = RequestInfo::new(id, opcode, lba, blocks);
        info.metadata = !opcode.is_disk_based() &&
            self.geometry.is_metadata_io(lba);
        info.needs_alignment = self.geometry.needs_alignment();
        let iots = Iots::new(info, self.services.memory.clone(), callback);
        iots.set_rebuild_logging_bitmask(self.rebuild_logging_bitmask());
        Arc::new(iots)
    }

    /// Put a request on the termination queue without starting it
    pub fn register(&self, iots: Arc<Iots>) {
        self.inner.lock().queue.push(iots);
    }

    /// Register a request and hand it to the library, unless the group is
    /// quiescing, in which case it is held until [`RaidGroup::unquiesce`].
    pub fn submit(&self, iots: Arc<Iots>) -> Result<()> {
        let held = {
            let mut inner = self.inner.lock();
            inner.queue.push(iots.clone());
            inner.quiescing || inner.quiesced
        };
        if held {
            iots.set_status(IotsStatus::WaitingForQuiesce);
        } else {
            iots.start()?;
            self.services.scheduler.restart_iots(iots);
        }
        Ok(())
    }

    /// Deliver a finished request's completion and drop it from the queue.
    pub fn iots_complete(&self, iots: &Arc<Iots>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let before = inner.queue.len();
            inner.queue.retain(|i| !Arc::ptr_eq(i, iots));
            if inner.queue.len() == before {
                error!(object = %self.object_id(), request = %iots.id(),
                    "completion of an unregistered request");
                return Err(Error::InternalInconsistency);
            }
            inner.forget_quiesced(iots);
        }
        iots.mark_complete();
        iots.invoke_callback()
    }

    fn snapshot(&self) -> Vec<Arc<Iots>> {
        self.inner.lock().queue.clone()
    }

    pub fn rebuild_logging_bitmask(&self) -> PositionBitmask {
        self.inner.lock().rebuild_logging_bitmask
    }

    pub fn set_rebuild_logging_bitmask(&self, mask: PositionBitmask) {
        self.inner.lock().rebuild_logging_bitmask = mask;
    }

    pub fn is_quiesced(&self) -> bool {
        self.inner.lock().quiesced
    }

    pub fn is_quiescing(&self) -> bool {
        self.inner.lock().quiescing
    }

    pub fn quiesced_count(&self) -> usize {
        self.inner.lock().quiesced_count
    }

    /// Ask every request to stop.  Returns `true` once all have stopped.
    ///
    /// Poll until it returns `true`.
    pub fn quiesce(&self) -> bool {
        let queue = {
            let mut inner = self.inner.lock();
            if inner.quiesced {
                return true;
            }
            inner.quiescing = true;
            inner.queue.clone()
        };
        let mut all = true;
        for iots in queue.iter() {
            if iots.status() == IotsStatus::AtLibrary {
                iots.quiesce();
                all &= iots.is_quiesced();
            }
        }
        if all {
            let count = self.calc_quiesced_count();
            let mut inner = self.inner.lock();
            inner.quiescing = false;
            inner.quiesced = true;
            debug!(object = %self.object_id(), count, "quiesced");
        }
        all
    }

    /// End a quiesce and restart everything it stopped.
    pub fn unquiesce(&self) -> Result<()> {
        let queue = {
            let mut inner = self.inner.lock();
            inner.quiesced = false;
            inner.quiescing = false;
            inner.queue.clone()
        };
        let mut list = RestartList::new();
        for iots in queue.iter() {
            match iots.status() {
                IotsStatus::WaitingForQuiesce => {
                    iots.start()?;
                    list.push_iots(iots.clone());
                }
                IotsStatus::AtLibrary => {
                    iots.get_quiesced_ts_to_restart(&mut list)?;
                }
                _ => ()
            }
        }
        list.run(&*self.services.scheduler);
        Ok(())
    }

    /// Fail every registered request because the group is going away.
    ///
    /// Returns `Pending` while any request remains registered.  Call again
    /// as requests make progress.
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn handle_shutdown(&self) -> Result<()> {
        let queue = {
            let mut inner = self.inner.lock();
            inner.quiesced = false;
            inner.quiescing = false;
            inner.queue.clone()
        };
        if self.geometry.is_parity_type() {
            if let Some(write_log) = &self.services.write_log {
                write_log.abort();
            }
        }
        let failed = BlockResult::new(BlockStatus::IoFailed,
                                      BlockQualifier::RetryNotPossible);
        let mut list = RestartList::new();
        let mut pending = false;
        for iots in queue.iter() {
            match iots.status() {
                IotsStatus::NotUsed => continue,
                IotsStatus::NotStartedToLibrary |
                IotsStatus::WaitingForQuiesce => {
                    iots.set_result(failed);
                    iots.mark_complete();
                    list.push_complete(iots.clone());
                }
                IotsStatus::Complete => (),
                _ => match iots.handle_shutdown(&mut list) {
                    Ok(()) => self.inner.lock().forget_quiesced(iots),
                    Err(Error::Pending) => (),
                    Err(e) => {
                        error!(request = %iots.id(), "shutdown: {e}");
                    }
                }
            }
            pending = true;
        }
        debug!(restarts = list.len(), "shutdown");
        list.run(&*self.services.scheduler);
        if pending {
            Err(Error::Pending)
        } else {
            Ok(())
        }
    }

    /// Let quiesced requests continue past a change in drive state.
    ///
    /// Every request is refreshed with the group's rebuild-logging bitmask
    /// and continued against it.  Writes to a degraded group instead first
    /// durably mark the affected range as needing rebuild, and resume once
    /// that update finishes rather than at the next unquiesce.
    ///
    /// A failure on one request does not hold up the others.  Requests whose
    /// metadata update failed are parked for
    /// [`retry_metadata_updates`](Self::retry_metadata_updates).  Returns the
    /// first failure once every request has been visited.
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn handle_continue(&self) -> Result<()> {
        let (queue, group_mask) = {
            let inner = self.inner.lock();
            (inner.queue.clone(), inner.rebuild_logging_bitmask)
        };
        let mut first_err = None;
        for iots in queue.iter() {
            if iots.status() != IotsStatus::AtLibrary {
                continue;
            }
            iots.set_rebuild_logging_bitmask(group_mask);
            let r = if !group_mask.is_empty() &&
                iots.opcode().is_media_modify()
            {
                iots.set_status(IotsStatus::LibraryWaitingForContinue);
                iots.mark_unquiesced();
                self.mark_nr(iots)
            } else {
                iots.continue_request(group_mask)
            };
            if let Err(e) = r {
                warn!(request = %iots.id(), "continue: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn park_for_retry(&self, iots: Arc<Iots>, step: MetadataRetry) -> Error {
        warn!(object = %self.object_id(), request = %iots.id(), ?step,
              "metadata update failed");
        self.inner.lock().retry.push((iots, step));
        Error::MetadataIoFailed
    }

    fn mark_nr(&self, iots: &Arc<Iots>) -> Result<()> {
        let info = iots.info();
        let mask = iots.rebuild_logging_bitmask();
        match self.services.metadata.write_nr_bits(info.id, info.lba,
                                                   info.blocks, mask)
        {
            Err(Error::Pending) => Ok(()),
            r => self.mark_nr_complete(info.id, r),
        }
    }

    fn get_chunk_info(&self, iots: &Arc<Iots>) -> Result<()> {
        let info = iots.info();
        match self.services.metadata.read_chunk_info(info.id, info.lba,
                                                     info.blocks)
        {
            Err(Error::Pending) => Ok(()),
            r => self.chunk_info_complete(info.id, r),
        }
    }

    /// The needs-rebuild marking for request `id` has finished.
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn mark_nr_complete(&self, id: RequestId, result: Result<()>)
        -> Result<()>
    {
        let (iots, current) = {
            let inner = self.inner.lock();
            (inner.find(id).ok_or(Error::InvalidParams)?,
             inner.rebuild_logging_bitmask)
        };
        if result.is_err() {
            return Err(self.park_for_retry(iots, MetadataRetry::MarkNr));
        }
        if !iots.rebuild_logging_bitmask().is_superset(current) {
            // More drives went away while we were marking
            iots.set_rebuild_logging_bitmask(current);
            return self.mark_nr(&iots);
        }
        self.get_chunk_info(&iots)
    }

    /// The chunk information for request `id` has been read.
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn chunk_info_complete(&self, id: RequestId,
                               result: Result<PositionBitmask>) -> Result<()>
    {
        let iots = self.inner.lock().find(id).ok_or(Error::InvalidParams)?;
        match result {
            Ok(needs_rebuild) => {
                iots.set_chunk_info(needs_rebuild);
                iots.restart_after_metadata_update(&*self.services.scheduler)
            }
            Err(_) => {
                Err(self.park_for_retry(iots, MetadataRetry::GetChunkInfo))
            }
        }
    }

    /// Retry every metadata update that previously failed.
    ///
    /// Each update that fails again is parked for the next call.  Returns the
    /// first failure once every parked request has been retried.
    pub fn retry_metadata_updates(&self) -> Result<()> {
        let retry = std::mem::take(&mut self.inner.lock().retry);
        let mut first_err = None;
        for (iots, step) in retry.iter() {
            let r = match step {
                MetadataRetry::MarkNr => self.mark_nr(iots),
                MetadataRetry::GetChunkInfo => self.get_chunk_info(iots),
            };
            if let Err(e) = r {
                debug!(request = %iots.id(), ?step, "retry: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Requests awaiting a metadata retry
    pub fn metadata_retries(&self) -> Vec<(RequestId, MetadataRetry)> {
        self.inner.lock().retry.iter()
            .map(|(iots, step)| (iots.id(), *step))
            .collect()
    }

    /// Tag every registered request as quiesced, and count them.
    pub fn calc_quiesced_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut count = 0;
        let queue = inner.queue.clone();
        for iots in queue.iter() {
            inner.forget_quiesced(iots);
            iots.set_was_quiesced();
            count += 1;
        }
        inner.quiesced_count = count;
        count
    }

    /// Quiesce only the requests that access paged metadata
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn quiesce_md_ops(&self) {
        for iots in self.snapshot().iter() {
            let eligible = !matches!(iots.status(),
                IotsStatus::NotUsed |
                IotsStatus::NotStartedToLibrary |
                IotsStatus::WaitingForQuiesce);
            if eligible && !iots.opcode().is_disk_based() &&
                iots.is_metadata_operation()
            {
                iots.quiesce();
            }
        }
    }

    /// Fail every in-flight metadata request, as for a shutdown.
    ///
    /// Returns `Pending` while any remain registered.
    #[tracing::instrument(skip(self), fields(object = %self.object_id()))]
    pub fn abort_all_metadata_operations(&self) -> Result<()> {
        let mut list = RestartList::new();
        let mut pending = false;
        for iots in self.snapshot().iter() {
            if !iots.is_metadata_operation() {
                continue;
            }
            pending = true;
            if iots.status() != IotsStatus::AtLibrary {
                continue;
            }
            match iots.handle_shutdown(&mut list) {
                Ok(()) => self.inner.lock().forget_quiesced(iots),
                Err(Error::Pending) => (),
                Err(e) => error!(request = %iots.id(), "metadata abort: {e}"),
            }
        }
        list.run(&*self.services.scheduler);
        if pending {
            Err(Error::Pending)
        } else {
            Ok(())
        }
    }

    /// Abort requests whose transport envelope has been cancelled
    pub fn handle_aborted_packets(&self) {
        for iots in self.snapshot().iter() {
            if iots.is_cancelled() && iots.status() == IotsStatus::AtLibrary {
                debug!(request = %iots.id(), "abort cancelled request");
                iots.abort();
            }
        }
    }

    /// Every position that has failed on any registered request
    pub fn find_failed_io_positions(&self) -> PositionBitmask {
        self.snapshot().iter()
            .filter(|i| i.status() != IotsStatus::NotUsed)
            .fold(PositionBitmask::EMPTY, |acc, i| acc | i.failed_io_positions())
    }

    /// Is a request with this opcode being held by a quiesce?
    pub fn is_request_quiesced(&self, opcode: Opcode) -> bool {
        self.snapshot().iter()
            .filter(|i| i.opcode() == opcode)
            .any(|i| match i.status() {
                IotsStatus::WaitingForQuiesce => true,
                IotsStatus::AtLibrary => i.is_quiesced(),
                _ => false
            })
    }

    pub fn count_ios(&self) -> IoCounts {
        let mut counts = IoCounts::default();
        for iots in self.snapshot().iter() {
            match iots.status() {
                IotsStatus::NotUsed => continue,
                IotsStatus::NotStartedToLibrary |
                IotsStatus::WaitingForQuiesce => counts.not_started += 1,
                IotsStatus::AtLibrary if iots.is_quiesced() =>
                    counts.quiesced += 1,
                _ => ()
            }
            counts.outstanding += 1;
            if iots.is_metadata_operation() {
                counts.metadata += 1;
            }
        }
        counts
    }

    /// Report requests that have been registered for too long
    pub fn handle_stuck_io(&self, now: Instant) -> Vec<Arc<Iots>> {
        let threshold = self.geometry.options().stuck_io_threshold();
        let stuck: Vec<_> = self.snapshot().into_iter()
            .filter(|i| i.status() != IotsStatus::NotUsed)
            .filter(|i| i.is_expired(threshold, now))
            .collect();
        for iots in stuck.iter() {
            error!(object = %self.object_id(), request = %iots.id(),
                opcode = ?iots.opcode(), lba = iots.info().lba,
                blocks = iots.info().blocks, status = ?iots.status(),
                "stuck request");
        }
        stuck
    }
}

// LCOV_EXCL_STOP
