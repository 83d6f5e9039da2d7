// vim: tw=80
//! Stripe lock among the SIOTS of a single IOTS.
//!
//! SIOTS are queued in LBA order.  A SIOTS may run only if its stripe range
//! conflicts with no earlier SIOTS, and with no later SIOTS that is itself
//! running.  SIOTS of different IOTS never contend here.

use std::sync::Arc;

use tracing::{error, trace};

use crate::{
    geometry::align_lock_range,
    types::*,
};
use super::{
    iots::IotsInner,
    Iots,
    Park,
    RequestInfo,
    Scheduler,
    Siots,
    SiotsId,
    StepResult,
};

fn overlaps(a: (LbaT, LbaT), b: (LbaT, LbaT)) -> bool {
    !(a.1 < b.0 || b.1 < a.0)
}

impl IotsInner {
    /// The SIOTS whose place in the queue decides the lock for `id`
    fn lock_owner(&self, id: SiotsId) -> Result<SiotsId> {
        Ok(self.siots(id)?.parent().unwrap_or(id))
    }

    fn aligned(info: &RequestInfo, range: (LbaT, LbaT)) -> (LbaT, LbaT) {
        if info.needs_alignment {
            align_lock_range(range.0, range.1)
        } else {
            range
        }
    }

    fn conflicts(info: &RequestInfo, siots: &Siots, range: (LbaT, LbaT))
        -> bool
    {
        overlaps(Self::aligned(info, siots.lock_range()), range)
    }

    /// The range an owner asks for, widened to cover its first nested SIOTS
    fn requested_range(&self, info: &RequestInfo, owner: &Siots)
        -> (LbaT, LbaT)
    {
        let p = owner.params();
        let mut start = p.parity_start;
        let mut end = p.parity_start + p.parity_count.max(1) - 1;
        if let Some(nested) = self.first_nested(owner) {
            let n = nested.params();
            start = start.min(n.parity_start);
            end = end.max(n.parity_start + n.xfer_count.max(1) - 1);
        }
        Self::aligned(info, (start, end))
    }

    fn queue_position(&self, owner: SiotsId) -> Result<usize> {
        self.queue.iter()
            .position(|id| *id == owner)
            .ok_or(Error::InternalInconsistency)
    }

    fn get_lock(&self, info: &RequestInfo, owner: SiotsId) -> Result<bool> {
        let siots = self.siots(owner)?;
        if self.upgrade_waiters &&
            !self.first_nested(siots).is_some_and(Siots::is_upgrade_owner)
        {
            trace!(siots = %owner, "lock held for upgrade owner");
            return Ok(false);
        }
        let range = self.requested_range(info, siots);
        let pos = self.queue_position(owner)?;
        for prev in self.queue[..pos].iter().rev() {
            let prev = self.siots(*prev)?;
            if Self::conflicts(info, prev, range) ||
                self.first_nested(prev)
                    .is_some_and(|n| Self::conflicts(info, n, range))
            {
                trace!(siots = %owner, blocker = %prev.id(),
                    "lock not granted");
                return Ok(false);
            }
        }
        for next in self.queue[pos + 1..].iter() {
            let next = self.siots(*next)?;
            let nested = self.first_nested(next);
            let waiting = next.is_lock_waiting() ||
                nested.is_some_and(Siots::is_lock_waiting);
            if waiting {
                continue;
            }
            if Self::conflicts(info, next, range) ||
                nested.is_some_and(|n| Self::conflicts(info, n, range))
            {
                trace!(siots = %owner, blocker = %next.id(),
                    "lock not granted");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(super) fn is_startable(&self, info: &RequestInfo, owner: SiotsId)
        -> Result<bool>
    {
        if self.error && info.opcode == Opcode::Read &&
            self.queue_position(owner)? == 0
        {
            // The first read of a failed request may always proceed
            return Ok(true);
        }
        self.get_lock(info, owner)
    }

    /// May `id` upgrade its lock?  Only if every other SIOTS is waiting and
    /// it belongs to the oldest SIOTS.
    fn is_upgradable(&self, id: SiotsId) -> Result<bool> {
        let owner = self.lock_owner(id)?;
        for other in self.queue.iter().filter(|q| **q != owner) {
            let other = self.siots(*other)?;
            let busy = if other.nested.is_empty() {
                !other.is_lock_waiting()
            } else {
                other.nested.iter()
                    .filter(|n| **n != id)
                    .filter_map(|n| self.arena.get(n))
                    .any(|n| !n.is_lock_waiting())
            };
            if busy {
                return Ok(false);
            }
        }
        Ok(self.queue.first() == Some(&owner))
    }

    fn clear_upgrade_waiters_if_none(&mut self) {
        let any = self.arena.values().any(|s| s.park == Park::UpgradeWait);
        if !any {
            self.upgrade_waiters = false;
        }
    }

    /// Find an upgrade waiter that can now proceed, and unpark it
    fn restart_upgrade_waiter(&mut self) -> Result<Option<SiotsId>> {
        if !self.upgrade_waiters {
            return Ok(None);
        }
        for top in self.queue.clone() {
            let mut candidates = self.siots(top)?.nested.clone();
            candidates.push(top);
            for id in candidates {
                if self.siots(id)?.park == Park::UpgradeWait &&
                    self.is_upgradable(id)?
                {
                    self.siots_mut(id)?.park = Park::Running;
                    self.clear_upgrade_waiters_if_none();
                    trace!(siots = %id, "restart upgrade waiter");
                    return Ok(Some(id));
                }
            }
        }
        Ok(None)
    }

    /// Find the first lock waiter that can now run, and unpark it.
    pub(super) fn first_lock_waiter(&mut self, info: &RequestInfo)
        -> Result<Option<SiotsId>>
    {
        if let Some(id) = self.restart_upgrade_waiter()? {
            return Ok(Some(id));
        }
        for id in self.queue.clone() {
            let siots = self.siots(id)?;
            let nested = siots.nested.first().copied();
            if siots.park == Park::LockWait && self.is_startable(info, id)? {
                self.siots_mut(id)?.park = Park::Running;
                trace!(siots = %id, "restart lock waiter");
                return Ok(Some(id));
            }
            if let Some(n) = nested {
                if self.siots(n)?.park == Park::LockWait &&
                    self.is_startable(info, id)?
                {
                    self.siots_mut(n)?.park = Park::Running;
                    trace!(siots = %n, "restart nested lock waiter");
                    return Ok(Some(n));
                }
            }
        }
        Ok(None)
    }

    /// The SIOTS queued immediately before `id` on the same queue
    fn prev_of(&self, id: SiotsId) -> Result<Option<SiotsId>> {
        let siblings = match self.siots(id)?.parent() {
            Some(p) => &self.siots(p)?.nested,
            None => &self.queue,
        };
        let pos = siblings.iter()
            .position(|s| *s == id)
            .ok_or(Error::InternalInconsistency)?;
        Ok(pos.checked_sub(1).map(|p| siblings[p]))
    }
}

impl Iots {
    /// Acquire the stripe lock for `id`.
    ///
    /// If the lock is not available the SIOTS parks in [`Park::LockWait`].
    /// Unless the request is quiescing, another waiter that has since become
    /// runnable is handed to `scheduler`.
    pub fn get_siots_lock(self: &Arc<Self>, id: SiotsId,
                          scheduler: &dyn Scheduler) -> Result<StepResult>
    {
        let (step, waiter) = {
            let mut inner = self.lock();
            let owner = inner.lock_owner(id)?;
            if inner.is_startable(self.info(), owner)? {
                (StepResult::Executing, None)
            } else {
                let wait_count = inner.siots(id)?.wait_count();
                if inner.queue.len() <= 1 || inner.outstanding <= 1 ||
                    wait_count != 0
                {
                    error!(request = %self.id(), siots = %id,
                        queued = inner.queue.len(),
                        outstanding = inner.outstanding, wait_count,
                        "lock denied with nothing to wait for");
                    return Err(Error::InternalInconsistency);
                }
                let siots = inner.siots_mut(id)?;
                siots.park = Park::LockWait;
                siots.was_delayed = true;
                let waiter = if !inner.quiesce || self.is_metadata_operation() {
                    inner.first_lock_waiter(self.info())?
                } else {
                    None
                };
                (StepResult::Waiting, waiter)
            }
        };
        if let Some(w) = waiter {
            scheduler.restart_siots(self.clone(), w);
        }
        Ok(step)
    }

    /// Can `id` run right now?
    pub fn is_startable(&self, id: SiotsId) -> Result<bool> {
        let inner = self.lock();
        let owner = inner.lock_owner(id)?;
        inner.is_startable(self.info(), owner)
    }

    /// Wait until every SIOTS queued ahead of `id` has finished.
    pub fn wait_previous(self: &Arc<Self>, id: SiotsId,
                         scheduler: &dyn Scheduler) -> Result<StepResult>
    {
        let (step, waiter) = {
            let mut inner = self.lock();
            if inner.prev_of(id)?.is_none() {
                (StepResult::Executing, None)
            } else {
                let siots = inner.siots_mut(id)?;
                siots.park = Park::LockWait;
                siots.was_delayed = true;
                (StepResult::Waiting, inner.restart_upgrade_waiter()?)
            }
        };
        if let Some(w) = waiter {
            scheduler.restart_siots(self.clone(), w);
        }
        Ok(step)
    }

    /// Upgrade the lock held by `id` so that it excludes every other SIOTS.
    ///
    /// If that is not yet possible, `id` parks in [`Park::UpgradeWait`] and
    /// no other SIOTS may take a lock until it has been restarted.
    pub fn request_upgrade(&self, id: SiotsId) -> Result<StepResult> {
        let mut inner = self.lock();
        if inner.is_upgradable(id)? {
            return Ok(StepResult::Executing);
        }
        inner.siots_mut(id)?.park = Park::UpgradeWait;
        inner.upgrade_waiters = true;
        Ok(StepResult::Waiting)
    }
}

// LCOV_EXCL_STOP
