// vim: tw=80
//! Layout scenarios through the public descriptor API

use std::sync::Arc;

use itertools::Itertools;
use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rstest::rstest;
use rstest_reuse::{apply, template};

use raidlib_core::{
    config::LibraryOptions,
    geometry::*,
    types::*,
};

fn configured(raid_type: RaidType, width: u32) -> GeometryDescriptor {
    let options = LibraryOptions {
        debug_cross_checks: true,
        ..Default::default()
    };
    let mut gd = GeometryDescriptor::new(ObjectId(0x42),
                                         raid_type.owning_class(),
                                         Arc::new(options));
    gd.init();
    let (element_size, epp) = t!(GeometryDescriptor::determine_element_size(
            raid_type, false));
    t!(gd.set_configuration(width, raid_type, element_size, epp, 1 << 40,
                            1 << 20));
    gd
}

#[template]
#[rstest]
#[case(RaidType::Raid0, 4)]
#[case(RaidType::Raid1, 3)]
#[case(RaidType::Raid3, 9)]
#[case(RaidType::Raid5, 5)]
#[case(RaidType::Raid6, 6)]
#[case(RaidType::Raid10, 4)]
fn layouts(#[case] raid_type: RaidType, #[case] width: u32) {}

#[test]
fn raid5_right_symmetric() {
    let gd = configured(RaidType::Raid5, 5);
    let sg = t!(gd.get_lun_geometry(0));
    assert_eq!(sg.start_index, 0);
    assert_eq!(sg.parity_stripe, 0);
    assert_eq!(sg.positions()[4], 0);

    let sg = t!(gd.get_lun_geometry(130));
    assert_eq!(sg.start_index, 1);
}

#[test]
fn unconfigured() {
    let mut gd = GeometryDescriptor::new(ObjectId(1), ClassId::Parity,
                                         Arc::new(LibraryOptions::default()));
    assert_eq!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 30, 2048),
               Err(Error::NotInitialized));
    assert_eq!(gd.get_lun_geometry(0).map(|_| ()), Err(Error::NotInitialized));
    gd.init();
    assert_eq!(gd.get_lun_geometry(0).map(|_| ()), Err(Error::NotInitialized));
    assert!(!gd.is_ready_for_io());
}

#[test]
fn wrong_class() {
    let mut gd = GeometryDescriptor::new(ObjectId(1), ClassId::Mirror,
                                         Arc::new(LibraryOptions::default()));
    gd.init();
    assert_eq!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 30, 2048),
               Err(Error::InvalidParams));
}

/// Configure a group all the way to ready-for-I/O on 4K drives
#[test]
fn negotiate_4k() {
    let mut gd = configured(RaidType::Raid5, 5);
    t!(gd.set_metadata_configuration(1 << 39, 1 << 20, (1 << 39) + (1 << 20),
                                     1 << 19));
    t!(gd.refresh_block_sizes(PositionBitmask(0b1)));
    assert!(gd.is_ready_for_io());
    assert!(gd.needs_alignment());
    assert_eq!(gd.align_io(3, 2), (0, 8));
    assert!(gd.is_metadata_io(1 << 39));
    assert!(!gd.is_metadata_io((1 << 39) - 1));
    assert_eq!(t!(gd.journal_info()).slot_size, 136);
}

/// Every extent array is a permutation of the group's positions, and the
/// small-read fast path finds the same starting position as the full
/// calculation.
#[apply(layouts)]
fn random_lbas(#[case] raid_type: RaidType, #[case] width: u32) {
    let gd = configured(raid_type, width);
    let mut rng = XorShiftRng::seed_from_u64(0xdead_beef);
    for _ in 0..512 {
        let lba = rng.gen_range(0..1u64 << 36);
        let sg = t!(gd.get_lun_geometry(lba));
        let seen = sg.positions().iter().copied().sorted().collect_vec();
        assert_eq!(seen, (0..sg.width()).collect_vec());
        let sr = t!(gd.get_small_read_geometry(lba));
        assert_eq!(sr.position, sg.start_position());
        assert_eq!(sr.logical_parity_start, sg.logical_parity_start);
    }
}
