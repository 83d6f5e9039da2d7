// vim: tw=80
//! Stripe geometry for RAID0 and RAID10

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

/// Stripe calculator for RAID0, and for the striper above RAID10's mirrors.
///
/// Data positions map one-to-one onto physical positions.  There is no
/// parity, so a "parity stripe" is simply one data stripe.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StriperLayout;

impl StriperLayout {
    fn params(geo: &GeometryDescriptor) -> Result<(PositionT, BlockCountT)> {
        let width = geo.position_width()?;
        let element_size = BlockCountT::from(geo.element_size());
        if element_size == 0 {
            return Err(Error::InvalidParams);
        }
        Ok((width, element_size))
    }
}

impl StripeCalculator for StriperLayout {
    fn lun_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<StripeGeometry>
    {
        let (width, element_size) = Self::params(geo)?;
        let w = BlockCountT::from(width);
        let stripe = lba / (element_size * w);

        let mut sg = StripeGeometry::new(width)?;
        for (i, p) in sg.positions_mut().iter_mut().enumerate() {
            *p = i as PositionT;
        }
        sg.start_index = ((lba / element_size) % w) as PositionT;
        sg.parity_stripe = stripe;
        sg.blocks_remaining_in_parity = w * geo.options().max_backend_io_blocks;
        sg.blocks_remaining_in_data = element_size - lba % element_size;
        sg.start_offset_rel_parity_stripe = lba % element_size;
        sg.logical_parity_start = stripe * element_size;
        sg.logical_parity_count = element_size;
        sg.max_blocks = BlockCountT::MAX;
        Ok(sg)
    }

    fn physical_geometry(&self, geo: &GeometryDescriptor, pba: LbaT)
        -> Result<StripeGeometry>
    {
        let (width, element_size) = Self::params(geo)?;
        let lba = (pba / element_size) * element_size *
            BlockCountT::from(width) + pba % element_size;
        self.lun_geometry(geo, lba)
    }

    fn small_read_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallReadGeometry>
    {
        let (width, element_size) = Self::params(geo)?;
        let stripe = lba / (element_size * BlockCountT::from(width));
        Ok(SmallReadGeometry {
            position: ((lba / element_size) % BlockCountT::from(width))
                as PositionT,
            start_offset_rel_parity_stripe: lba % element_size,
            logical_parity_start: stripe * element_size,
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
        credits::striper_disk_ios(geo, req)
    }
}

// LCOV_EXCL_STOP
