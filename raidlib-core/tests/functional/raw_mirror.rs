// vim: tw=80

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use pretty_assertions::assert_eq;

use raidlib_core::{
    config::LibraryOptions,
    group::GroupServices,
    raw_mirror::RawMirror,
    request::IotsStatus,
    types::*,
};
use super::*;

fn harness(width: u32, delay: usize) -> (RawMirror, Arc<FakeScheduler>) {
    let options = LibraryOptions {
        edge_retry_count: 10,
        edge_retry_interval_ms: 1,
        ..Default::default()
    };
    let scheduler = Arc::new(FakeScheduler::default());
    let services = GroupServices {
        memory: Arc::new(NullMemory::default()),
        metadata: Arc::new(InstantMetadata::default()),
        scheduler: scheduler.clone(),
        write_log: None,
    };
    let edges = Arc::new(SlowEdges { delay, polls: AtomicUsize::new(0) });
    let rm = t!(RawMirror::new(width, 0x2000, 0x10000, Arc::new(options),
                               edges, services));
    (rm, scheduler)
}

#[test_log::test]
fn bind_slow_drives() {
    let (rm, _) = harness(3, 4);
    t!(rm.bind_edges());
    for position in 0..3 {
        assert_eq!(rm.edge(position), Some(EdgeHandle(u64::from(position))));
    }
}

#[test]
fn bind_missing_drive() {
    let (rm, _) = harness(2, 100);
    assert_eq!(rm.bind_edges(), Err(Error::NotFound));
}

/// A three-way mirror keeps writing with one drive down
#[test]
fn one_drive_down() {
    let (rm, scheduler) = harness(3, 0);
    t!(rm.bind_edges());
    t!(rm.set_down_disk(1));
    let status = Arc::new(parking_lot::Mutex::new(None));
    let status2 = status.clone();
    let iots = t!(rm.start_io(Opcode::Write, 0x100, 64, Box::new(move |r| {
        *status2.lock() = Some(r);
    })));
    assert_eq!(iots.status(), IotsStatus::AtLibrary);
    assert_eq!(iots.rebuild_logging_bitmask(), PositionBitmask(0b010));
    assert_eq!(scheduler.log(), vec![Scheduled::Iots(iots.id())]);

    t!(rm.complete_iots(&iots));
    assert_eq!(*status.lock(), Some(BlockResult::default()));

    t!(rm.clear_down_disk(1));
    let iots = t!(rm.start_io(Opcode::Write, 0x100, 64, Box::new(|_| ())));
    assert_eq!(iots.rebuild_logging_bitmask(), PositionBitmask::EMPTY);
    assert!(iots.is_non_degraded());
}

#[test]
fn every_drive_down() {
    let (rm, scheduler) = harness(2, 0);
    t!(rm.set_down_disk(0));
    t!(rm.set_down_disk(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let iots = t!(rm.start_io(Opcode::Write, 0, 8, Box::new(move |r| {
        assert_eq!(r.status, BlockStatus::IoFailed);
        assert_eq!(r.qualifier, BlockQualifier::RetryNotPossible);
        calls2.fetch_add(1, Ordering::Relaxed);
    })));
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(iots.status(), IotsStatus::Complete);
    assert!(scheduler.log().is_empty());
}
