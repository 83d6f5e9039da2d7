// vim: tw=80
//! Layout position mapping
//!
//! Parity layouts rotate their parity column from one parity stripe to the
//! next.  Everything that needs to know where data lives, whether it be the
//! full extent array, the small-request fast paths or the pre-read
//! calculation, goes through this module so that they all agree.
//!
//! Terms:
//!
//! - *physical position*: index of a drive within the array, `[0, width)`.
//! - *data position*: index of a data element within its stripe, excluding
//!   parity, `[0, width - parity_count)`.
//! - *extent index*: index into a `StripeGeometry::position` array.  Data
//!   positions come first, followed by row parity and then diagonal parity.

use serde_derive::{Deserialize, Serialize};

use crate::types::*;

/// How the parity column rotates, and how data fills the remaining columns.
///
/// The "right" schemes advance the parity column by `parity_count` positions
/// with each parity stripe, the "left" schemes move it backwards.  In the
/// symmetric schemes data wraps around starting next to parity; in the
/// asymmetric schemes data fills the non-parity columns in ascending order.
/// Dual-parity layouts always place diagonal parity immediately after row
/// parity.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub enum RotationScheme {
    /// Data element `d` lives at `parity - 1 - d`, wrapping
    #[default]
    RightSymmetric,
    /// Data element `d` lives at `parity + parity_count + d`, wrapping
    LeftSymmetric,
    RightAsymmetric,
    LeftAsymmetric,
}

impl RotationScheme {
    pub const ALL: [RotationScheme; 4] = [
        RotationScheme::RightSymmetric,
        RotationScheme::LeftSymmetric,
        RotationScheme::RightAsymmetric,
        RotationScheme::LeftAsymmetric,
    ];

    /// Physical position of the row parity for the given parity stripe
    pub fn parity_position(self, parity_stripe: u64, width: PositionT,
                           parity_count: u16) -> PositionT
    {
        let w = u64::from(width);
        let advance = (parity_stripe * u64::from(parity_count)) % w;
        let p = match self {
            RotationScheme::RightSymmetric |
            RotationScheme::RightAsymmetric => advance,
            RotationScheme::LeftSymmetric |
            RotationScheme::LeftAsymmetric =>
                (2 * w - u64::from(parity_count) - advance) % w,
        };
        p as PositionT
    }

    /// Physical position of the diagonal parity, for dual-parity layouts
    pub fn diagonal_parity_position(parity_position: PositionT,
                                    width: PositionT) -> PositionT
    {
        (parity_position + 1) % width
    }

    fn is_parity(physical: PositionT, parity: PositionT, width: PositionT,
                 parity_count: u16) -> bool
    {
        physical == parity ||
            (parity_count == 2 &&
             physical == Self::diagonal_parity_position(parity, width))
    }

    /// Map a physical position to its logical data position
    pub fn data_position(self, physical: PositionT, parity: PositionT,
                         width: PositionT, parity_count: u16)
        -> Result<PositionT>
    {
        if physical >= width || parity >= width ||
            Self::is_parity(physical, parity, width, parity_count)
        {
            return Err(Error::InvalidPosition);
        }
        let logical = match self {
            RotationScheme::RightSymmetric => {
                if physical > parity {
                    parity + width - 1 - physical
                } else {
                    parity - 1 - physical
                }
            },
            RotationScheme::LeftSymmetric => {
                (physical + 2 * width - parity - parity_count) % width
            },
            RotationScheme::RightAsymmetric |
            RotationScheme::LeftAsymmetric => {
                let skipped = if parity_count == 2 {
                    let dparity = Self::diagonal_parity_position(parity, width);
                    u16::from(parity < physical) + u16::from(dparity < physical)
                } else {
                    u16::from(parity < physical)
                };
                physical - skipped
            }
        };
        if logical >= width - parity_count {
            return Err(Error::InvalidPosition);
        }
        Ok(logical)
    }

    /// Map a logical data position back to its physical position
    pub fn physical_position(self, data: PositionT, parity: PositionT,
                             width: PositionT, parity_count: u16)
        -> Result<PositionT>
    {
        if parity >= width || parity_count >= width ||
            data >= width - parity_count
        {
            return Err(Error::InvalidPosition);
        }
        let physical = match self {
            RotationScheme::RightSymmetric => (parity + width - 1 - data) % width,
            RotationScheme::LeftSymmetric => (parity + parity_count + data) % width,
            RotationScheme::RightAsymmetric |
            RotationScheme::LeftAsymmetric => {
                let mut parities = [parity,
                    Self::diagonal_parity_position(parity, width)];
                let parities = &mut parities[0..usize::from(parity_count)];
                parities.sort_unstable();
                let mut physical = data;
                for p in parities.iter() {
                    if *p <= physical {
                        physical += 1;
                    }
                }
                physical
            }
        };
        Ok(physical)
    }

    /// Map a physical position to its slot in the extent array.
    ///
    /// Row parity lands in slot `width - parity_count`, diagonal parity in
    /// slot `width - 1`, and data in its data position.
    pub fn extent_position(self, physical: PositionT, parity: PositionT,
                           width: PositionT, parity_count: u16)
        -> Result<PositionT>
    {
        if physical == parity {
            Ok(width - parity_count)
        } else if parity_count == 2 &&
            physical == Self::diagonal_parity_position(parity, width)
        {
            Ok(width - 1)
        } else {
            self.data_position(physical, parity, width, parity_count)
        }
    }

    /// Inverse of [`extent_position`](Self::extent_position)
    pub fn extent_to_physical(self, extent: PositionT, parity: PositionT,
                              width: PositionT, parity_count: u16)
        -> Result<PositionT>
    {
        if extent >= width {
            Err(Error::InvalidPosition)
        } else if extent == width - parity_count {
            Ok(parity)
        } else if parity_count == 2 && extent == width - 1 {
            Ok(Self::diagonal_parity_position(parity, width))
        } else {
            self.physical_position(extent, parity, width, parity_count)
        }
    }
}

// LCOV_EXCL_STOP
