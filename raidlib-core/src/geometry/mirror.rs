// vim: tw=80
//! Stripe geometry and read balancing for mirrors

use parking_lot::Mutex;

use crate::types::*;
use super::{
    credits,
    CreditRequest,
    GeometryDescriptor,
    ParityPositions,
    SmallReadGeometry,
    SmallWriteGeometry,
    StripeCalculator,
    StripeGeometry,
};

/// Stripe calculator for every mirrored layout.
///
/// Each position holds a full copy, so every position is identity-mapped and
/// a request never crosses a parity boundary.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MirrorLayout;

impl StripeCalculator for MirrorLayout {
    fn lun_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<StripeGeometry>
    {
        let width = geo.position_width()?;
        let element_size = BlockCountT::from(geo.element_size());
        if element_size == 0 {
            return Err(Error::InvalidParams);
        }
        let mut sg = StripeGeometry::new(width)?;
        for (i, p) in sg.positions_mut().iter_mut().enumerate() {
            *p = i as PositionT;
        }
        sg.start_index = 0;
        sg.parity_stripe = lba / element_size;
        sg.blocks_remaining_in_parity = MAX_BLOCKS_PER_REQUEST;
        sg.blocks_remaining_in_data = element_size - lba % element_size;
        sg.start_offset_rel_parity_stripe = 0;
        sg.logical_parity_start = lba;
        sg.logical_parity_count = MAX_BLOCKS_PER_REQUEST;
        sg.max_blocks = BlockCountT::MAX;
        Ok(sg)
    }

    /// Mirrors address every drive the same way as the group
    fn physical_geometry(&self, geo: &GeometryDescriptor, pba: LbaT)
        -> Result<StripeGeometry>
    {
        self.lun_geometry(geo, pba)
    }

    fn small_read_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallReadGeometry>
    {
        geo.position_width()?;
        Ok(SmallReadGeometry {
            position: geo.mirror_preferred_position().unwrap_or(0),
            start_offset_rel_parity_stripe: 0,
            logical_parity_start: lba,
        })
    }

    fn small_write_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallWriteGeometry>
    {
        Ok(SmallWriteGeometry {
            read: self.small_read_geometry(geo, lba)?,
            parity: ParityPositions::None,
        })
    }

    fn disk_ios(&self, geo: &GeometryDescriptor, req: &CreditRequest) -> u32 {
        credits::mirror_disk_ios(geo, req)
    }
}

/// A mirror read position chosen by
/// [`GeometryDescriptor::select_mirror_read_position`].
///
/// Hand it back to
/// [`GeometryDescriptor::mirror_read_complete`] when the read finishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub struct MirrorRead {
    pub position: PositionT,
    /// Was the read accounted to the [`ReadOptimizer`]?
    pub(super) optimized: bool,
}

impl MirrorRead {
    pub fn is_optimized(&self) -> bool {
        self.optimized
    }
}

/// Per-position statistics kept by the [`ReadOptimizer`]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PositionStats {
    /// Reads issued to this position that have not yet completed
    pub outstanding: u32,
    /// Start of the most recent read issued to this position
    pub last_lba: LbaT,
}

/// Spreads mirror reads across positions.
///
/// Reads go to the least busy healthy position, with ties broken in favor of
/// the position whose last read was nearest.
#[derive(Debug)]
pub struct ReadOptimizer {
    stats: Mutex<Vec<PositionStats>>,
}

impl ReadOptimizer {
    pub fn new(width: usize) -> Self {
        ReadOptimizer {
            stats: Mutex::new(vec![PositionStats::default(); width])
        }
    }

    /// Choose a position for a read of `lba` and account for it
    pub fn determine_position(&self, lba: LbaT, degraded: PositionBitmask)
        -> Result<PositionT>
    {
        let mut stats = self.stats.lock();
        let best = stats.iter()
            .enumerate()
            .filter(|(i, _)| !degraded.contains(*i as PositionT))
            .min_by_key(|(_, s)| (s.outstanding, s.last_lba.abs_diff(lba)))
            .map(|(i, _)| i)
            .ok_or(Error::InvalidPosition)?;
        stats[best].outstanding += 1;
        stats[best].last_lba = lba;
        Ok(best as PositionT)
    }

    pub fn read_complete(&self, position: PositionT) {
        let mut stats = self.stats.lock();
        match stats.get_mut(usize::from(position)) {
            Some(s) => s.outstanding = s.outstanding.saturating_sub(1),
            None => tracing::warn!(position, "read completion for bad position")
        }
    }

    pub fn stats(&self, position: PositionT) -> Option<PositionStats> {
        self.stats.lock().get(usize::from(position)).copied()
    }
}

// LCOV_EXCL_STOP
