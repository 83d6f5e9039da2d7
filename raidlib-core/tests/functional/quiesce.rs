// vim: tw=80
//! Raid group quiesce, continue and shutdown

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use pretty_assertions::assert_eq;

use raidlib_core::{
    config::LibraryOptions,
    geometry::*,
    group::{GroupServices, IoCounts, RaidGroup},
    request::{Generation, Iots, IotsStatus, SiotsId, SiotsParams},
    types::*,
};
use super::*;

struct Harness {
    group: RaidGroup,
    scheduler: Arc<FakeScheduler>,
    metadata: Arc<InstantMetadata>,
    write_log: Arc<CountingWriteLog>,
    callbacks: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let mut gd = GeometryDescriptor::new(ObjectId(0x77), ClassId::Parity,
            Arc::new(LibraryOptions::default()));
        gd.init();
        t!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 30, 1 << 20));
        t!(gd.set_metadata_configuration(1 << 29, 1 << 20, 0, 1 << 19));
        let scheduler = Arc::new(FakeScheduler::default());
        let metadata = Arc::new(InstantMetadata::default());
        let write_log = Arc::new(CountingWriteLog::default());
        let services = GroupServices {
            memory: Arc::new(NullMemory::default()),
            metadata: metadata.clone(),
            scheduler: scheduler.clone(),
            write_log: Some(write_log.clone()),
        };
        Harness {
            group: RaidGroup::new(gd, services),
            scheduler,
            metadata,
            write_log,
            callbacks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submit a write whose SIOTS have all been generated
    fn write(&self, lba: LbaT, nsiots: u64) -> (Arc<Iots>, Vec<SiotsId>) {
        let callbacks = self.callbacks.clone();
        let iots = self.group.new_request(Opcode::Write, lba, 128 * nsiots,
            Box::new(move |result| {
                assert_eq!(result.status, BlockStatus::IoFailed);
                assert_eq!(result.qualifier, BlockQualifier::RetryNotPossible);
                callbacks.fetch_add(1, Ordering::Relaxed);
            }));
        t!(self.group.submit(iots.clone()));
        let ids = (0..nsiots)
            .map(|i| t!(iots.add_siots(SiotsParams::new(lba + i * 128, 128))))
            .collect();
        iots.set_generation(Generation::Idle);
        (iots, ids)
    }

    /// Deliver every completion the scheduler has been handed
    fn deliver(&self) -> usize {
        let completed = self.scheduler.take_completed();
        for iots in completed.iter() {
            t!(self.group.iots_complete(iots));
        }
        completed.len()
    }
}

/// Shut down a group with requests in every stage of their lifecycle
#[test_log::test]
fn shutdown_drain() {
    let h = Harness::new();
    let requests = (0..6)
        .map(|i| h.write(i * 1024, 2))
        .collect::<Vec<_>>();
    assert_eq!(h.group.calc_quiesced_count(), 6);
    assert!(!h.group.quiesce());

    // Submitted mid-quiesce, so never started
    let callbacks = h.callbacks.clone();
    let late = h.group.new_request(Opcode::Read, 0, 8, Box::new(move |r| {
        assert_eq!(r.status, BlockStatus::IoFailed);
        callbacks.fetch_add(1, Ordering::Relaxed);
    }));
    t!(h.group.submit(late.clone()));
    assert_eq!(late.status(), IotsStatus::WaitingForQuiesce);
    assert_eq!(h.group.count_ios(), IoCounts {
        outstanding: 7, quiesced: 0, not_started: 1, metadata: 0
    });

    assert_eq!(h.group.handle_shutdown(), Err(Error::Pending));
    assert_eq!(h.deliver(), 1);

    // Half of the SIOTS reach a safe point
    for (iots, ids) in requests.iter() {
        assert_eq!(iots.mark_quiesced(ids[0]), Ok(true));
    }
    assert_eq!(h.group.handle_shutdown(), Err(Error::Pending));
    assert_eq!(h.deliver(), 0);

    for (iots, ids) in requests.iter() {
        assert_eq!(iots.mark_quiesced(ids[1]), Ok(true));
    }
    assert_eq!(h.group.handle_shutdown(), Err(Error::Pending));
    assert_eq!(h.deliver(), 6);
    assert_eq!(h.group.quiesced_count(), 0);

    assert_eq!(h.group.handle_shutdown(), Ok(()));
    assert_eq!(h.callbacks.load(Ordering::Relaxed), 7);
    assert_eq!(h.write_log.aborts.load(Ordering::Relaxed), 4);
    assert_eq!(h.group.count_ios(), IoCounts::default());
}

/// A quiesce followed by a drive loss and a continue
#[test]
fn degraded_continue() {
    let h = Harness::new();
    let (w, wids) = h.write(0, 2);
    assert!(!h.group.quiesce());
    for id in wids.iter() {
        assert_eq!(w.mark_quiesced(*id), Ok(true));
    }
    assert!(h.group.quiesce());
    assert!(h.group.is_request_quiesced(Opcode::Write));

    // Position 3 goes away.  One SIOTS was talking to it.
    h.group.set_rebuild_logging_bitmask(PositionBitmask(0b1000));
    t!(w.with_siots(wids[1], |s| s.wait_shutdown_continue(PositionBitmask(0b1000))));
    t!(h.group.handle_continue());

    let marked = h.metadata.marked.lock().clone();
    assert_eq!(marked, vec![(w.id(), 0, 256, PositionBitmask(0b1000))]);
    assert_eq!(w.needs_rebuild_bitmask(), PositionBitmask(0b1000));
    assert_eq!(w.status(), IotsStatus::AtLibrary);
    assert!(!w.is_quiescing());
    let restarted = h.scheduler.log().into_iter()
        .filter(|s| matches!(s, Scheduled::Siots(..)))
        .collect::<Vec<_>>();
    assert_eq!(restarted, vec![
        Scheduled::Siots(w.id(), wids[0]),
        Scheduled::Siots(w.id(), wids[1])
    ]);
}

/// Metadata requests can be quiesced and failed without disturbing user I/O
#[test]
fn metadata_operations() {
    let h = Harness::new();
    let (user, _) = h.write(0, 1);
    let (md, mids) = h.write(1 << 29, 1);
    assert_eq!(h.group.count_ios().metadata, 1);
    h.group.quiesce_md_ops();
    assert!(md.is_quiescing());
    assert!(!user.is_quiescing());

    assert_eq!(md.mark_quiesced(mids[0]), Ok(true));
    assert_eq!(h.group.abort_all_metadata_operations(), Err(Error::Pending));
    assert_eq!(h.deliver(), 1);
    assert_eq!(h.group.abort_all_metadata_operations(), Ok(()));
    assert_eq!(user.status(), IotsStatus::AtLibrary);
}
