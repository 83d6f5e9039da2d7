// vim: tw=80
//! Per-request stripe geometry, and the pure range arithmetic built on it

use crate::types::*;

/// Most parity extents a single stripe range can split into
pub const MAX_PARITY_EXTENTS: usize = 2;

/// A contiguous range of parity-relative blocks
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Extent {
    pub start_lba: LbaT,
    pub size: BlockCountT,
}

impl Extent {
    pub const fn new(start_lba: LbaT, size: BlockCountT) -> Self {
        Extent { start_lba, size }
    }

    /// Last block covered by this extent.  Meaningless if `size == 0`.
    pub fn end_lba(&self) -> LbaT {
        self.start_lba + self.size - 1
    }
}

/// Shape of a request starting at one LBA
///
/// Computed fresh for every request and consumed immediately by whatever
/// splits the request into per-stripe pieces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StripeGeometry {
    /// Data position where the request begins
    pub start_index: PositionT,
    /// Parity stripe containing the starting LBA
    pub parity_stripe: u64,
    /// Blocks left before the parity rotates
    pub blocks_remaining_in_parity: BlockCountT,
    /// Blocks left in the current stripe element
    pub blocks_remaining_in_data: BlockCountT,
    /// Offset of the starting LBA within its parity stripe, on one drive
    pub start_offset_rel_parity_stripe: LbaT,
    pub logical_parity_start: LbaT,
    pub logical_parity_count: BlockCountT,
    /// Largest request this layout can describe from here
    pub max_blocks: BlockCountT,
    width: PositionT,
    position: [PositionT; MAX_ARRAY_WIDTH],
}

impl StripeGeometry {
    pub(super) fn new(width: PositionT) -> Result<Self> {
        if usize::from(width) > MAX_ARRAY_WIDTH || width == 0 {
            return Err(Error::InvalidParams);
        }
        Ok(StripeGeometry {
            start_index: 0,
            parity_stripe: 0,
            blocks_remaining_in_parity: 0,
            blocks_remaining_in_data: 0,
            start_offset_rel_parity_stripe: 0,
            logical_parity_start: 0,
            logical_parity_count: 0,
            max_blocks: 0,
            width,
            position: [0; MAX_ARRAY_WIDTH],
        })
    }

    /// The extent array: data slots first, then row parity, then diagonal
    /// parity.  Each entry is a physical position.
    pub fn positions(&self) -> &[PositionT] {
        &self.position[..usize::from(self.width)]
    }

    pub(super) fn positions_mut(&mut self) -> &mut [PositionT] {
        &mut self.position[..usize::from(self.width)]
    }

    pub fn width(&self) -> PositionT {
        self.width
    }

    /// Physical position holding the first block of the request
    pub fn start_position(&self) -> PositionT {
        self.position[usize::from(self.start_index)]
    }
}

/// Result of a small-read fast path
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SmallReadGeometry {
    pub position: PositionT,
    pub start_offset_rel_parity_stripe: LbaT,
    pub logical_parity_start: LbaT,
}

/// Where a parity stripe keeps its parity
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParityPositions {
    None,
    Single(PositionT),
    Dual {
        row: PositionT,
        diagonal: PositionT,
    },
}

impl ParityPositions {
    pub fn count(&self) -> u16 {
        match self {
            ParityPositions::None => 0,
            ParityPositions::Single(_) => 1,
            ParityPositions::Dual{..} => 2,
        }
    }

    pub fn row(&self) -> Option<PositionT> {
        match self {
            ParityPositions::None => None,
            ParityPositions::Single(p) => Some(*p),
            ParityPositions::Dual{row, ..} => Some(*row),
        }
    }

    pub fn diagonal(&self) -> Option<PositionT> {
        match self {
            ParityPositions::Dual{diagonal, ..} => Some(*diagonal),
            _ => None,
        }
    }
}

/// Result of a small-write fast path: the data position plus the parity
/// positions it must update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SmallWriteGeometry {
    pub read: SmallReadGeometry,
    pub parity: ParityPositions,
}

/// Find the parity-relative range touched by `blocks` blocks at `lba`.
///
/// A request that ends in a later stripe's first element, but covers less
/// than one element in total, touches two discontiguous pieces of the parity
/// range.  With `max_extents > 1` those come back as two extents; otherwise
/// the first extent covers both.  The second extent is empty when unused.
pub fn get_stripe_range(lba: LbaT, blocks: BlockCountT,
                        element_size: ElementSizeT, data_disks: u16,
                        max_extents: usize) -> [Extent; MAX_PARITY_EXTENTS]
{
    let bpe = BlockCountT::from(element_size);
    let bps = BlockCountT::from(data_disks) * bpe;
    let mut range = [Extent::default(); MAX_PARITY_EXTENTS];
    let mut blocks = blocks;

    let mut parity_start = bpe * (lba / bps);
    let mut parity_count = bpe;
    let element_offset = lba % bpe;
    if blocks <= bpe - element_offset {
        // Entirely within one element
        parity_start += element_offset;
        parity_count = blocks;
    } else if bpe > bps - lba % bps {
        // Starts in the last element of the stripe
        parity_start += element_offset;
        parity_count -= element_offset;
    } else if blocks < bpe && max_extents > 1 {
        range[1] = Extent::new(parity_start + element_offset,
                               parity_count - element_offset);
        parity_count = (blocks + lba) % bpe;
    }

    blocks -= blocks.min(bps - lba % bps);
    parity_count += (blocks / bps) * bpe;
    blocks %= bps;
    parity_count += blocks.min(bpe);

    range[0] = Extent::new(parity_start, parity_count);
    range
}

/// Blocks a read-modify-write must pre-read, per data position
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PrereadBlocks {
    /// Blocks to read from each data position before the written range
    pub read1: Vec<BlockCountT>,
    /// Blocks to read from each data position after the written range
    pub read2: Vec<BlockCountT>,
}

/// Calculate how much of each data position a partial-stripe write must read
/// in order to recompute parity.
///
/// `lda` is the logical data address of the write and `geometry` its stripe
/// geometry.  `parity_start` and `parity_count` are the parity range of the
/// write, as from [`get_stripe_range`].
pub fn calc_preread_blocks(lda: LbaT,
                           geometry: &StripeGeometry,
                           blocks_to_write: BlockCountT,
                           element_size: ElementSizeT,
                           data_disks: u16,
                           parity_start: LbaT,
                           parity_count: BlockCountT) -> Result<PrereadBlocks>
{
    macro_rules! check {
        ($cond:expr) => {
            if !($cond) {
                tracing::error!(lda, blocks_to_write, parity_start,
                    parity_count, "preread inconsistency: {}",
                    stringify!($cond));
                return Err(Error::InternalInconsistency);
            }
        }
    }

    let bpe = BlockCountT::from(element_size);
    let bps = bpe * BlockCountT::from(data_disks);
    let ndisks = usize::from(data_disks);
    let mut pr = PrereadBlocks {
        read1: vec![0; ndisks],
        read2: vec![0; ndisks],
    };
    check!(bpe > 0 && ndisks > 0);
    check!(geometry.blocks_remaining_in_data <= bpe);
    check!(usize::from(geometry.start_index) < ndisks);

    let start_write_offset = bpe - geometry.blocks_remaining_in_data;
    let starts_mid_stripe = geometry.start_index != 0 ||
        start_write_offset != 0;
    check!(starts_mid_stripe == (lda % bps != 0));
    if starts_mid_stripe {
        let read_offset = parity_start % bpe;
        let read_limit = parity_count.min(bpe - read_offset);
        let write_bound = start_write_offset;
        check!(write_bound == lda % bpe);
        check!(write_bound >= read_offset &&
               write_bound < read_offset + read_limit);
        let data_pos = usize::from(geometry.start_index);
        check!(data_pos as u64 == (lda / bpe) % BlockCountT::from(data_disks));
        // The starting position reads only up to the write; every earlier
        // position reads its whole share of the parity range.
        pr.read1[data_pos] += write_bound - read_offset;
        for r in pr.read1[..data_pos].iter_mut() {
            *r += read_limit;
        }
    }

    let end_lda = lda + blocks_to_write;
    let blocks_before_write = BlockCountT::from(geometry.start_index) * bpe +
        start_write_offset;
    let mut write_bound = (blocks_before_write + blocks_to_write) % bpe;
    check!(write_bound == end_lda % bpe);
    let data_pos = ((blocks_before_write + blocks_to_write) / bpe) %
        BlockCountT::from(data_disks);
    check!(data_pos == (end_lda / bpe) % BlockCountT::from(data_disks));
    let ends_mid_stripe = data_pos != 0 || write_bound != 0;
    check!(ends_mid_stripe == (end_lda % bps != 0));
    if ends_mid_stripe {
        let mut read_limit = (parity_start + parity_count) % bpe;
        if read_limit == 0 {
            read_limit = bpe;
        }
        let read_offset = read_limit.saturating_sub(parity_count);
        if write_bound == 0 {
            write_bound = read_offset;
        }
        check!(write_bound >= read_offset && write_bound <= read_limit);
        let data_pos = data_pos as usize;
        pr.read2[data_pos] += read_limit - write_bound;
        for r in pr.read2[data_pos + 1..].iter_mut() {
            *r += read_limit - read_offset;
        }
    }
    Ok(pr)
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use rstest::rstest;
use super::*;

mod stripe_range {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Within a single element
    #[test]
    fn one_element() {
        let r = get_stripe_range(130, 10, 128, 4, 2);
        assert_eq!(r[0], Extent::new(2, 10));
        assert_eq!(r[1].size, 0);
    }

    /// A full stripe covers exactly one element's worth of parity
    #[test]
    fn full_stripe() {
        let r = get_stripe_range(512, 512, 128, 4, 2);
        assert_eq!(r[0], Extent::new(128, 128));
        assert_eq!(r[1].size, 0);
    }

    /// Starting in the last element of a stripe, continuing into the next
    #[test]
    fn last_element() {
        let r = get_stripe_range(400, 200, 128, 4, 2);
        // 112 blocks in stripe 0's last element, 88 in stripe 1's first.
        assert_eq!(r[0], Extent::new(16, 200));
    }

    /// A short request that crosses an element boundary touches the tail of
    /// one element and the head of the next
    #[test]
    fn split() {
        let r = get_stripe_range(120, 10, 128, 4, 2);
        assert_eq!(r[0], Extent::new(0, 2));
        assert_eq!(r[1], Extent::new(120, 8));
    }

    #[test]
    fn split_one_extent() {
        let r = get_stripe_range(120, 10, 128, 4, 1);
        assert_eq!(r[0], Extent::new(0, 128));
        assert_eq!(r[1].size, 0);
    }

    #[test]
    fn multi_stripe() {
        let r = get_stripe_range(0, 2048, 128, 4, 2);
        assert_eq!(r[0], Extent::new(0, 512));
    }
}

/// A single stripe geometry for a 4+1 RAID5 with 128-block elements,
/// right-symmetric, parity stripe 0.
fn r5_geo(lba: LbaT) -> StripeGeometry {
    let mut geo = StripeGeometry::new(5).unwrap();
    geo.start_index = ((lba / 128) % 4) as PositionT;
    geo.blocks_remaining_in_data = 128 - lba % 128;
    geo
}

#[test]
fn preread_aligned_full_stripe() {
    let geo = r5_geo(0);
    let pr = calc_preread_blocks(0, &geo, 512, 128, 4, 0, 128).unwrap();
    assert_eq!(pr.read1, vec![0, 0, 0, 0]);
    assert_eq!(pr.read2, vec![0, 0, 0, 0]);
}

#[test]
fn preread_single_element() {
    // Write all of data position 1
    let geo = r5_geo(128);
    let pr = calc_preread_blocks(128, &geo, 128, 128, 4, 0, 128).unwrap();
    assert_eq!(pr.read1, vec![128, 0, 0, 0]);
    assert_eq!(pr.read2, vec![0, 0, 128, 128]);
}

#[rstest]
#[case(10, 20)]
#[case(130, 200)]
#[case(300, 1)]
#[case(0, 100)]
#[case(500, 12)]
fn preread_conservation(#[case] lba: LbaT, #[case] blocks: BlockCountT) {
    // Within a single stripe, every block of the parity range on every data
    // position gets either written or pre-read.
    let geo = r5_geo(lba);
    let range = get_stripe_range(lba, blocks, 128, 4, 1);
    let pr = calc_preread_blocks(lba, &geo, blocks, 128, 4,
                                 range[0].start_lba, range[0].size).unwrap();
    let read: u64 = pr.read1.iter().chain(pr.read2.iter()).sum();
    assert_eq!(read + blocks, 4 * range[0].size);
}

#[test]
fn preread_inconsistent() {
    // The geometry claims a stripe-aligned start but the LDA isn't
    let geo = r5_geo(0);
    assert_eq!(calc_preread_blocks(5, &geo, 10, 128, 4, 0, 128),
               Err(Error::InternalInconsistency));
}
}
// LCOV_EXCL_STOP
