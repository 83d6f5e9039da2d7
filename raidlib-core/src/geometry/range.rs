// vim: tw=80
//! LBA range arithmetic: lock ranges, chunk ranges, extent bounds and 4K
//! alignment
use crate::types::*;
use super::{get_stripe_range, GeometryDescriptor, WRITE_LOG_SIZE};

impl GeometryDescriptor {
    fn locks_whole_stripes(&self) -> bool {
        self.is_parity_type() || self.is_raid0()
    }

    fn range_data_disks(&self) -> Result<u64> {
        let dd = self.data_disks()?;
        if dd == 0 || self.element_size() == 0 {
            return Err(Error::InvalidParams);
        }
        Ok(u64::from(dd))
    }

    /// Range of the stripe lock needed for a request, as `(start, count)`.
    ///
    /// Parity and RAID0 groups lock whole stripe numbers.  Mirrors lock
    /// exactly the blocks they touch.
    pub fn calculate_lock_range(&self, lba: LbaT, blocks: BlockCountT)
        -> Result<(LbaT, BlockCountT)>
    {
        if !self.locks_whole_stripes() {
            return Ok((lba, blocks));
        }
        let dd = self.range_data_disks()?;
        let range = get_stripe_range(lba, blocks, self.element_size(),
                                     dd as u16, 1);
        Ok((range[0].start_lba, range[0].size))
    }

    /// Stripe lock range for a zeroing request.  The request is first
    /// expanded to whole zeroing chunks of `chunk_size` blocks per drive.
    pub fn calculate_zero_lock_range(&self, lba: LbaT, blocks: BlockCountT,
                                     chunk_size: BlockCountT)
        -> Result<(LbaT, BlockCountT)>
    {
        let dd = self.range_data_disks()?;
        if chunk_size == 0 || blocks == 0 {
            return Err(Error::InvalidParams);
        }
        let element_size = BlockCountT::from(self.element_size());
        let chunk_blocks = chunk_size * dd;
        let offset = lba % chunk_blocks;
        let lba = lba - offset;
        let blocks = (blocks + offset).div_ceil(chunk_blocks) * chunk_blocks;
        let unit = if self.locks_whole_stripes() {
            element_size * dd
        } else {
            element_size
        };
        let start = lba / unit;
        let end = (lba + blocks - 1) / unit;
        Ok((start, end - start + 1))
    }

    /// Lock range for a request addressed by per-drive block, as
    /// `(start, count)` in per-drive blocks.
    pub fn calculate_lock_range_physical(&self, pba: LbaT, blocks: BlockCountT)
        -> Result<(LbaT, BlockCountT)>
    {
        let dd = self.range_data_disks()?;
        if blocks == 0 {
            return Err(Error::InvalidParams);
        }
        let element_size = BlockCountT::from(self.element_size());
        let (start, end) = if self.locks_whole_stripes() {
            (pba / element_size, (pba + blocks - 1) / element_size)
        } else {
            ((pba / element_size) * dd, ((pba + blocks - 1) / element_size) * dd)
        };
        Ok((start * element_size, (end - start + 1) * element_size))
    }

    /// Which zeroing chunks a request touches, as `(first, count)`
    pub fn calculate_chunk_range(&self, lba: LbaT, blocks: BlockCountT,
                                 chunk_size: BlockCountT)
        -> Result<(u64, u64)>
    {
        let dd = self.range_data_disks()?;
        if chunk_size == 0 || blocks == 0 {
            return Err(Error::InvalidParams);
        }
        let range = get_stripe_range(lba, blocks, self.element_size(),
                                     dd as u16, 2);
        let stripe_lba = range[0].start_lba;
        let stripe_blocks = if range[1].size != 0 {
            range[1].end_lba() - range[0].start_lba + 1
        } else {
            range[0].size
        };
        let chunk = stripe_lba / chunk_size;
        let last = (stripe_lba + stripe_blocks - 1) / chunk_size;
        Ok((chunk, last - chunk + 1))
    }

    /// Does a per-drive request stray out of its region?
    ///
    /// User I/O must stay below the metadata region, metadata I/O must stay
    /// within it, and journal I/O must stay within the write log.  With
    /// `allow_full_journal`, a request may also start below the write log.
    pub fn does_request_exceed_extent(&self, start_lba: LbaT,
                                      blocks: BlockCountT,
                                      allow_full_journal: bool) -> bool
    {
        if self.attributes().extent_pool || blocks == 0 {
            return false;
        }
        let Ok(dd) = self.range_data_disks() else {
            return true;
        };
        let end_lba = start_lba.saturating_add(blocks - 1);
        if self.metadata_start_lba() == INVALID_LBA {
            return end_lba >= self.configured_capacity() / dd;
        }
        let md_start = self.metadata_start_lba() / dd;
        let md_capacity = if self.metadata_capacity() == INVALID_LBA {
            0
        } else {
            self.metadata_capacity() / dd
        };
        let md_end = (md_start + md_capacity).saturating_sub(1);
        if end_lba < md_start {
            return false;
        }
        let journal = self.journal_start_lba();
        if journal == INVALID_LBA || end_lba < journal {
            (start_lba < md_start && end_lba >= md_start) ||
                (start_lba >= md_start && end_lba > md_end)
        } else {
            let journal_end = journal + WRITE_LOG_SIZE - 1;
            if allow_full_journal {
                end_lba > journal_end
            } else {
                start_lba < journal || end_lba > journal_end
            }
        }
    }

    /// Is a group-relative LBA inside the write log?
    pub fn is_journal_io(&self, lba: LbaT) -> bool {
        let journal = self.journal_start_lba();
        if journal == INVALID_LBA {
            return false;
        }
        match self.data_disks() {
            Ok(dd) => lba >= journal.saturating_mul(u64::from(dd)),
            Err(_) => false
        }
    }

    pub fn is_metadata_io(&self, lba: LbaT) -> bool {
        self.metadata_start_lba() != INVALID_LBA &&
            lba >= self.metadata_start_lba()
    }

    /// Offset of the containing raid group, for raw mirrors.  Zero otherwise.
    pub fn raid_group_offset(&self) -> LbaT {
        self.raw_mirror_info()
            .map(|info| info.rg_offset)
            .unwrap_or(0)
    }

    pub fn is_stripe_aligned(&self, lba: LbaT, blocks: BlockCountT) -> bool {
        let Ok(dd) = self.range_data_disks() else {
            return false;
        };
        let bps = BlockCountT::from(self.element_size()) * dd;
        lba % bps == 0 && (lba + blocks) % bps == 0
    }

    /// Does the request fit within a single stripe element?
    pub fn is_single_position(&self, lba: LbaT, blocks: BlockCountT) -> bool {
        let element_size = BlockCountT::from(self.element_size());
        if element_size == 0 || blocks == 0 {
            return false;
        }
        blocks <= element_size &&
            lba / element_size == (lba + blocks - 1) / element_size
    }

    /// Does any position use 4K-native drives?
    pub fn needs_alignment(&self) -> bool {
        !self.bitmask_4k().is_empty()
    }

    pub fn io_needs_alignment(&self, lba: LbaT, blocks: BlockCountT) -> bool {
        lba % BLOCKS_PER_4K != 0 || (lba + blocks) % BLOCKS_PER_4K != 0
    }

    /// Expand a request to 4K boundaries, as `(lba, blocks)`
    pub fn align_io(&self, lba: LbaT, blocks: BlockCountT)
        -> (LbaT, BlockCountT)
    {
        let start = lba - lba % BLOCKS_PER_4K;
        let end = (lba + blocks).next_multiple_of(BLOCKS_PER_4K);
        (start, end - start)
    }

    /// Expand an inclusive lock range to 4K boundaries
    pub fn align_lock_request(&self, start: LbaT, end: LbaT) -> (LbaT, LbaT) {
        align_lock_range(start, end)
    }

    pub fn is_aligned_to_optimal_block_size(&self, lba: LbaT,
                                            blocks: BlockCountT) -> bool
    {
        let optimal = BlockCountT::from(self.optimal_block_size());
        optimal != 0 && lba % optimal == 0 && blocks % optimal == 0
    }

    /// Every position of this group
    pub fn valid_bitmask(&self) -> Result<PositionBitmask> {
        PositionBitmask::all(self.width() as usize)
    }
}

/// Expand an inclusive `[start, end]` range to 4K boundaries
pub fn align_lock_range(start: LbaT, end: LbaT) -> (LbaT, LbaT) {
    let start = start - start % BLOCKS_PER_4K;
    let end = (end + 1).next_multiple_of(BLOCKS_PER_4K) - 1;
    (start, end)
}

/// Convert a per-drive block to a parity-stripe-relative LBA
pub fn map_pba_to_lba(fru_lba: LbaT, logical_parity_start: LbaT,
                      pstart_lba: LbaT) -> Result<LbaT>
{
    fru_lba.checked_sub(logical_parity_start)
        .and_then(|diff| pstart_lba.checked_add(diff))
        .ok_or(Error::InvalidParams)
}

/// Like [`map_pba_to_lba`], but relative to an offset within the parity
/// stripe
pub fn map_pba_to_lba_relative(fru_lba: LbaT, logical_parity_start: LbaT,
                               pstart_lba: LbaT, pstripe_offset: LbaT)
    -> Result<LbaT>
{
    let rel = lba_parity_range_offset(fru_lba, logical_parity_start,
                                      pstart_lba, pstripe_offset)?;
    pstart_lba.checked_add(rel).ok_or(Error::InvalidParams)
}

/// Offset of a per-drive block from `pstripe_offset` within its parity
/// stripe
pub fn lba_parity_range_offset(fru_lba: LbaT, logical_parity_start: LbaT,
                               _pstart_lba: LbaT, pstripe_offset: LbaT)
    -> Result<LbaT>
{
    fru_lba.checked_sub(logical_parity_start)
        .and_then(|diff| diff.checked_sub(pstripe_offset))
        .ok_or(Error::InvalidParams)
}

pub fn map_lba_to_pstripe_offset(lba: LbaT, pstart_lba: LbaT) -> Result<LbaT> {
    lba.checked_sub(pstart_lba).ok_or(Error::InvalidParams)
}

// LCOV_EXCL_STOP
