// vim: tw=80
//! Stripe geometry for RAID3, RAID5 and RAID6

use fixedbitset::FixedBitSet;

use crate::types::*;
use super::{
    credits,
    get_stripe_range,
    CreditRequest,
    GeometryDescriptor,
    ParityPositions,
    RotationScheme,
    SmallReadGeometry,
    SmallWriteGeometry,
    StripeCalculator,
    StripeGeometry,
};

/// Stripe calculator for rotating-parity layouts
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParityLayout {
    scheme: RotationScheme,
}

/// Layout parameters, validated
#[derive(Clone, Copy, Debug)]
struct Params {
    width: PositionT,
    parity_count: u16,
    element_size: BlockCountT,
    elements_per_parity: BlockCountT,
}

impl Params {
    fn data_disks(&self) -> PositionT {
        self.width - self.parity_count
    }

    fn blocks_per_data_stripe(&self) -> BlockCountT {
        self.element_size * BlockCountT::from(self.data_disks())
    }
}

/// Where an LBA lands, without building the extent array
#[derive(Clone, Copy, Debug)]
struct Located {
    parity_stripe: u64,
    parity: PositionT,
    start_index: PositionT,
    start_offset: LbaT,
    logical_parity_start: LbaT,
}

impl ParityLayout {
    pub fn new(scheme: RotationScheme) -> Self {
        ParityLayout { scheme }
    }

    pub fn scheme(&self) -> RotationScheme {
        self.scheme
    }

    fn params(geo: &GeometryDescriptor) -> Result<Params> {
        let raid_type = geo.raid_type().ok_or(Error::NotInitialized)?;
        let parity_count = raid_type.parity_count();
        let width = geo.position_width()?;
        let min_width = match parity_count {
            1 => 3,
            2 => 4,
            _ => return Err(Error::InvalidParams)
        };
        let element_size = BlockCountT::from(geo.element_size());
        let elements_per_parity = BlockCountT::from(geo.elements_per_parity());
        if width < min_width || element_size == 0 || elements_per_parity == 0 {
            return Err(Error::InvalidParams);
        }
        Ok(Params { width, parity_count, element_size, elements_per_parity })
    }

    fn locate(&self, p: &Params, lba: LbaT) -> Located {
        let stripe = lba / p.blocks_per_data_stripe();
        let parity_stripe = stripe / p.elements_per_parity;
        let start_index = ((lba / p.element_size) %
                           BlockCountT::from(p.data_disks())) as PositionT;
        Located {
            parity_stripe,
            parity: self.scheme.parity_position(parity_stripe, p.width,
                                                p.parity_count),
            start_index,
            start_offset: (stripe % p.elements_per_parity) * p.element_size +
                lba % p.element_size,
            logical_parity_start: parity_stripe * p.elements_per_parity *
                p.element_size,
        }
    }

    fn parity_positions(p: &Params, loc: &Located) -> ParityPositions {
        if p.parity_count == 2 {
            ParityPositions::Dual {
                row: loc.parity,
                diagonal: RotationScheme::diagonal_parity_position(loc.parity,
                                                                   p.width),
            }
        } else {
            ParityPositions::Single(loc.parity)
        }
    }

    /// Compare a fast-path result against the full calculation
    fn cross_check_small(&self, geo: &GeometryDescriptor, lba: LbaT,
                         small: &SmallReadGeometry) -> Result<()>
    {
        let full = self.lun_geometry(geo, lba)?;
        if full.start_position() != small.position ||
            full.logical_parity_start != small.logical_parity_start ||
            full.start_offset_rel_parity_stripe !=
                small.start_offset_rel_parity_stripe
        {
            tracing::error!(object_id = %geo.object_id(), lba,
                "small geometry {:?} disagrees with full geometry {:?}",
                small, full);
            return Err(Error::InternalInconsistency);
        }
        Ok(())
    }
}

impl StripeCalculator for ParityLayout {
    fn lun_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<StripeGeometry>
    {
        let p = Self::params(geo)?;
        let loc = self.locate(&p, lba);
        let blocks_per_parity_stripe = p.blocks_per_data_stripe() *
            p.elements_per_parity;

        let mut sg = StripeGeometry::new(p.width)?;
        sg.start_index = loc.start_index;
        sg.parity_stripe = loc.parity_stripe;
        let remaining = blocks_per_parity_stripe -
            (lba - loc.parity_stripe * blocks_per_parity_stripe);
        if remaining > MAX_BLOCKS_PER_REQUEST {
            tracing::trace!(lba, remaining, "clamping blocks remaining in parity");
        }
        sg.blocks_remaining_in_parity = remaining.min(MAX_BLOCKS_PER_REQUEST);
        sg.max_blocks = sg.blocks_remaining_in_parity;
        sg.blocks_remaining_in_data = p.element_size - lba % p.element_size;
        sg.start_offset_rel_parity_stripe = loc.start_offset;
        sg.logical_parity_start = loc.logical_parity_start;
        sg.logical_parity_count = p.elements_per_parity * p.element_size;

        let mut seen = FixedBitSet::with_capacity(usize::from(p.width));
        for physical in 0..p.width {
            let slot = self.scheme.extent_position(physical, loc.parity,
                p.width, p.parity_count)
                .map_err(|_| Error::InternalInconsistency)?;
            if seen.put(usize::from(slot)) {
                tracing::error!(object_id = %geo.object_id(), lba, physical,
                    slot, "duplicate position in extent array");
                return Err(Error::InternalInconsistency);
            }
            sg.positions_mut()[usize::from(slot)] = physical;
        }

        if geo.options().cross_checks_enabled() {
            let range = get_stripe_range(lba, 1, geo.element_size(),
                                         p.data_disks(), 1);
            if range[0].start_lba != sg.logical_parity_start +
                sg.start_offset_rel_parity_stripe
            {
                tracing::error!(object_id = %geo.object_id(), lba,
                    "parity range {:?} disagrees with geometry {:?}",
                    range[0], sg);
                return Err(Error::InternalInconsistency);
            }
        }
        Ok(sg)
    }

    fn physical_geometry(&self, geo: &GeometryDescriptor, pba: LbaT)
        -> Result<StripeGeometry>
    {
        let p = Self::params(geo)?;
        let lba = (pba / p.element_size) * p.blocks_per_data_stripe() +
            pba % p.element_size;
        let mut sg = self.lun_geometry(geo, lba)?;
        let remaining = sg.logical_parity_count -
            sg.start_offset_rel_parity_stripe;
        if sg.start_index != 0 ||
            (remaining + sg.start_offset_rel_parity_stripe) % p.element_size
                != 0
        {
            tracing::error!(object_id = %geo.object_id(), pba,
                "physical geometry {:?} is not aligned to position 0", sg);
            return Err(Error::InternalInconsistency);
        }
        sg.blocks_remaining_in_parity = remaining;
        Ok(sg)
    }

    fn small_read_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallReadGeometry>
    {
        let p = Self::params(geo)?;
        let loc = self.locate(&p, lba);
        let position = self.scheme.physical_position(loc.start_index,
            loc.parity, p.width, p.parity_count)?;
        let small = SmallReadGeometry {
            position,
            start_offset_rel_parity_stripe: loc.start_offset,
            logical_parity_start: loc.logical_parity_start,
        };
        if geo.options().cross_checks_enabled() {
            self.cross_check_small(geo, lba, &small)?;
        }
        Ok(small)
    }

    fn small_write_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallWriteGeometry>
    {
        let p = Self::params(geo)?;
        let loc = self.locate(&p, lba);
        let read = self.small_read_geometry(geo, lba)?;
        let parity = Self::parity_positions(&p, &loc);
        if geo.options().cross_checks_enabled() {
            let full = self.lun_geometry(geo, lba)?;
            let positions = full.positions();
            let row = positions[usize::from(p.data_disks())];
            let diagonal = positions[usize::from(p.width) - 1];
            if Some(row) != parity.row() ||
                (p.parity_count == 2 && Some(diagonal) != parity.diagonal())
            {
                tracing::error!(object_id = %geo.object_id(), lba,
                    "small write parity {:?} disagrees with {:?}",
                    parity, positions);
                return Err(Error::InternalInconsistency);
            }
        }
        Ok(SmallWriteGeometry { read, parity })
    }

    fn disk_ios(&self, geo: &GeometryDescriptor, req: &CreditRequest) -> u32 {
        credits::parity_disk_ios(geo, req)
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use std::sync::Arc;

use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use rstest::rstest;
use rstest_reuse::{apply, template};
use super::*;
use crate::{
    config::LibraryOptions,
    geometry::{ClassId, RaidType},
};

fn raid_geometry(raid_type: RaidType, width: u32, scheme: RotationScheme)
    -> GeometryDescriptor
{
    let options = LibraryOptions {
        rotation: scheme,
        debug_cross_checks: true,
        ..Default::default()
    };
    let mut gd = GeometryDescriptor::new(ObjectId(0x20), ClassId::Parity,
                                         Arc::new(options));
    gd.init();
    gd.set_configuration(width, raid_type, 128, 8, 1 << 30, 2048).unwrap();
    gd
}

#[template]
#[rstest]
#[case(RaidType::Raid5, 3)]
#[case(RaidType::Raid5, 5)]
#[case(RaidType::Raid5, 16)]
#[case(RaidType::Raid3, 9)]
#[case(RaidType::Raid6, 4)]
#[case(RaidType::Raid6, 6)]
#[case(RaidType::Raid6, 16)]
fn layouts(#[case] raid_type: RaidType, #[case] width: u32) {}

#[test]
fn r5_lba0() {
    let gd = raid_geometry(RaidType::Raid5, 5, RotationScheme::RightSymmetric);
    let sg = gd.get_lun_geometry(0).unwrap();
    assert_eq!(sg.start_index, 0);
    assert_eq!(sg.parity_stripe, 0);
    assert_eq!(sg.positions()[4], 0);
    assert_eq!(sg.positions(), &[4, 3, 2, 1, 0]);
    assert_eq!(sg.blocks_remaining_in_data, 128);
    assert_eq!(sg.blocks_remaining_in_parity, 4096);
    assert_eq!(sg.logical_parity_start, 0);
    assert_eq!(sg.logical_parity_count, 1024);
}

#[test]
fn r5_lba130() {
    let gd = raid_geometry(RaidType::Raid5, 5, RotationScheme::RightSymmetric);
    let sg = gd.get_lun_geometry(130).unwrap();
    assert_eq!(sg.start_index, 1);
    assert_eq!(sg.blocks_remaining_in_data, 126);
    assert_eq!(sg.start_offset_rel_parity_stripe, 2);
    assert_eq!(sg.start_position(), 3);
}

#[test]
fn r5_second_data_stripe() {
    let gd = raid_geometry(RaidType::Raid5, 5, RotationScheme::RightSymmetric);
    // First block of data stripe 1, still in parity stripe 0
    let sg = gd.get_lun_geometry(512).unwrap();
    assert_eq!(sg.start_index, 0);
    assert_eq!(sg.parity_stripe, 0);
    assert_eq!(sg.start_offset_rel_parity_stripe, 128);
    assert_eq!(sg.blocks_remaining_in_parity, 4096 - 512);
}

#[test]
fn r6_parity_stripe1() {
    let gd = raid_geometry(RaidType::Raid6, 6, RotationScheme::RightSymmetric);
    // 4 data disks * 128 blocks * 8 elements per parity
    let sg = gd.get_lun_geometry(4096).unwrap();
    assert_eq!(sg.parity_stripe, 1);
    assert_eq!(sg.positions()[4], 2);
    assert_eq!(sg.positions()[5], 3);
    assert_eq!(sg.logical_parity_start, 1024);
    let sw = gd.get_small_write_geometry(4096).unwrap();
    assert_eq!(sw.parity, ParityPositions::Dual{row: 2, diagonal: 3});
    assert_eq!(sw.read.position, 1);
}

#[test]
fn physical() {
    let gd = raid_geometry(RaidType::Raid5, 5, RotationScheme::RightSymmetric);
    // Per-drive block 130 is in data stripe 1, 2 blocks in
    let sg = gd.get_physical_geometry(130).unwrap();
    assert_eq!(sg.start_index, 0);
    assert_eq!(sg.start_offset_rel_parity_stripe, 130);
    assert_eq!(sg.blocks_remaining_in_parity, 1024 - 130);
    // Parity stripe 1 starts at per-drive block 1024
    let sg = gd.get_physical_geometry(1024).unwrap();
    assert_eq!(sg.parity_stripe, 1);
    assert_eq!(sg.positions()[4], 1);
    assert_eq!(sg.blocks_remaining_in_parity, 1024);
}

/// Every extent array is a permutation of the physical positions
#[apply(layouts)]
fn no_duplicate_positions(#[case] raid_type: RaidType, #[case] width: u32,
                          #[values(RotationScheme::RightSymmetric,
                                   RotationScheme::LeftSymmetric,
                                   RotationScheme::RightAsymmetric,
                                   RotationScheme::LeftAsymmetric)]
                          scheme: RotationScheme)
{
    let gd = raid_geometry(raid_type, width, scheme);
    let mut rng = XorShiftRng::seed_from_u64(0x1d_c0ff_ee);
    for _ in 0..256 {
        let lba = rng.gen_range(0..1u64 << 36);
        let sg = gd.get_lun_geometry(lba).unwrap();
        let mut seen = sg.positions().to_vec();
        seen.sort_unstable();
        assert_eq!(seen, (0..width as PositionT).collect::<Vec<_>>());
        assert_eq!(sg.blocks_remaining_in_data + lba % 128, 128);
    }
}

/// The fast paths agree with the full calculation
#[apply(layouts)]
fn small_agrees(#[case] raid_type: RaidType, #[case] width: u32) {
    let gd = raid_geometry(raid_type, width, RotationScheme::RightSymmetric);
    let mut rng = XorShiftRng::seed_from_u64(42);
    for _ in 0..256 {
        let lba = rng.gen_range(0..1u64 << 36);
        let sg = gd.get_lun_geometry(lba).unwrap();
        let sr = gd.get_small_read_geometry(lba).unwrap();
        assert_eq!(sr.position, sg.positions()[usize::from(sg.start_index)]);
        assert_eq!(sr.logical_parity_start, sg.logical_parity_start);
        assert_eq!(sr.start_offset_rel_parity_stripe,
                   sg.start_offset_rel_parity_stripe);
        let sw = gd.get_small_write_geometry(lba).unwrap();
        let pc = raid_type.parity_count() as usize;
        assert_eq!(sw.parity.row(), Some(sg.positions()[width as usize - pc]));
    }
}

/// Consecutive parity stripes rotate parity across every position
#[apply(layouts)]
fn parity_rotates(#[case] raid_type: RaidType, #[case] width: u32) {
    let gd = raid_geometry(raid_type, width, RotationScheme::RightSymmetric);
    let pc = u64::from(raid_type.parity_count());
    let data_disks = u64::from(width) - pc;
    let bpps = 128 * 8 * data_disks;
    let mut hit = vec![false; width as usize];
    for psn in 0..u64::from(width) {
        let sg = gd.get_lun_geometry(psn * bpps).unwrap();
        assert_eq!(sg.parity_stripe, psn);
        for p in sg.positions()[data_disks as usize..].iter() {
            hit[usize::from(*p)] = true;
        }
    }
    assert!(hit.iter().all(|h| *h));
}
}
// LCOV_EXCL_STOP
