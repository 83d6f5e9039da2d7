// vim: tw=80
//! I/O credit accounting
//!
//! Every request is charged a number of credits before it may start.  The
//! charge approximates how many drive I/Os the request will generate,
//! inflated for degraded and zeroing operation.

use crate::types::*;
use super::{GeometryDescriptor, RaidType};

/// Everything the credit calculation needs to know about one request
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreditRequest {
    pub opcode: Opcode,
    pub lba: LbaT,
    pub blocks: BlockCountT,
    /// Some of the touched area has not been zeroed yet
    pub zeroing: bool,
    pub degraded: bool,
    /// The request came from the host, not a background service
    pub normal_priority: bool,
    /// Credits available to the whole group
    pub max_credits: u32,
}

impl CreditRequest {
    pub fn new(opcode: Opcode, lba: LbaT, blocks: BlockCountT) -> Self {
        CreditRequest {
            opcode,
            lba,
            blocks,
            zeroing: false,
            degraded: false,
            normal_priority: true,
            max_credits: u32::MAX,
        }
    }
}

/// Number of distinct elements touched by `blocks` starting at `lba`
fn elements_spanned(lba: LbaT, blocks: BlockCountT, element_size: u64) -> u64 {
    if blocks == 0 {
        0
    } else {
        (lba + blocks - 1) / element_size - lba / element_size + 1
    }
}

fn is_write_family(opcode: Opcode) -> bool {
    matches!(opcode,
        Opcode::Write |
        Opcode::EncryptionRekeyWrite |
        Opcode::WriteVerify |
        Opcode::WriteNonCached |
        Opcode::CorruptData |
        Opcode::Zero |
        Opcode::WriteZeros
    )
}

fn is_verify_family(opcode: Opcode) -> bool {
    opcode.is_verify() || opcode == Opcode::Rebuild
}

fn to_credits(weight: u64) -> u32 {
    u32::try_from(weight).unwrap_or(u32::MAX)
}

/// Shared inputs to the per-layout calculations
struct Charge {
    /// Degraded host requests pay extra, unless sequential mirroring is
    /// disabled
    penalize: bool,
    ceiling: u64,
}

impl Charge {
    fn new(geo: &GeometryDescriptor, req: &CreditRequest) -> Self {
        let penalize = req.degraded && req.normal_priority &&
            !geo.attributes().mirror_sequential_disabled;
        let ceiling = req.max_credits
            .checked_div(geo.options().credits_ceiling_divisor)
            .unwrap_or(req.max_credits);
        Charge { penalize, ceiling: u64::from(ceiling) }
    }

    fn weigh(&self, drives: u64, multiplier: u64) -> u32 {
        let weight = drives * multiplier;
        if multiplier > 1 && self.penalize {
            to_credits(weight.min(self.ceiling))
        } else {
            to_credits(weight)
        }
    }
}

pub(super) fn parity_disk_ios(geo: &GeometryDescriptor, req: &CreditRequest)
    -> u32
{
    let (Ok(dd), Ok(pd)) = (geo.data_disks(), geo.parity_disks()) else {
        return 0;
    };
    let opts = geo.options();
    let element_size = u64::from(geo.element_size());
    if element_size == 0 {
        return 0;
    }
    let width = u64::from(geo.width());
    let (dd, pd) = (u64::from(dd), u64::from(pd));
    let stripe = dd * element_size;
    let charge = Charge::new(geo, req);
    let (lba, blocks) = (req.lba, req.blocks);

    match req.opcode {
        Opcode::Read => {
            let mut multiplier = 1;
            if req.zeroing {
                multiplier += u64::from(opts.zeroing_multiplier);
            }
            if charge.penalize {
                multiplier += u64::from(opts.parity_degraded_read_multiplier);
            }
            if blocks <= element_size {
                return to_credits(multiplier);
            }
            let drives = if blocks / element_size < dd {
                elements_spanned(lba, blocks, element_size)
            } else {
                dd
            };
            charge.weigh(drives, multiplier)
        },
        Opcode::Write | Opcode::EncryptionRekeyWrite
            if geo.attributes().vault => 0,
        op if is_write_family(op) => {
            let mut multiplier = 1;
            let mut drives = if blocks < stripe {
                elements_spanned(lba, blocks, element_size) + pd
            } else {
                width
            };
            if req.degraded {
                if geo.attributes().write_logging {
                    multiplier += u64::from(opts.degraded_multiplier);
                    if charge.penalize {
                        multiplier +=
                            u64::from(opts.parity_degraded_write_multiplier);
                    }
                    drives = logged_write_drives(lba, blocks, stripe,
                        element_size, width, pd);
                }
            } else if req.zeroing {
                multiplier += u64::from(opts.zeroing_multiplier);
            }
            charge.weigh(drives, multiplier)
        },
        op if is_verify_family(op) => {
            let epp = u64::from(geo.elements_per_parity());
            if epp == 0 {
                0
            } else {
                to_credits(blocks / (element_size * epp) * width)
            }
        },
        Opcode::EncryptionReadPaged => 2,
        _ => 0
    }
}

/// Drives touched by a degraded, write-logged write.  The unaligned head and
/// tail are each charged as a separate partial-stripe write.
fn logged_write_drives(lba: LbaT, blocks: BlockCountT, stripe: u64,
                       element_size: u64, width: u64, pd: u64) -> u64
{
    let front = if lba % stripe != 0 || blocks < stripe {
        blocks.min(stripe - lba % stripe)
    } else {
        0
    };
    let tail = (lba + blocks) % stripe;
    let end = if tail != 0 && lba / stripe != (lba + blocks) / stripe {
        tail
    } else {
        0
    };
    let middle = blocks - front - end;
    let mut drives = 0;
    if front > 0 {
        drives += elements_spanned(lba, front, element_size) + pd;
    }
    if end > 0 {
        drives += (end - 1) / element_size + 1 + pd;
    }
    if middle > 0 {
        drives += width;
    }
    drives
}

pub(super) fn mirror_disk_ios(geo: &GeometryDescriptor, req: &CreditRequest)
    -> u32
{
    let opts = geo.options();
    let width = u64::from(geo.width());
    let charge = Charge::new(geo, req);
    let penalty = |multiplier: u32, drives: u64| {
        if multiplier != 0 && charge.penalize {
            charge.weigh(drives, u64::from(multiplier))
        } else {
            to_credits(drives)
        }
    };
    match req.opcode {
        Opcode::Read => penalty(opts.mirror_degraded_read_multiplier, 1),
        op if is_write_family(op) =>
            penalty(opts.mirror_degraded_write_multiplier, width),
        op if is_verify_family(op) => to_credits(width),
        Opcode::EncryptionReadPaged => 2,
        _ => 0
    }
}

pub(super) fn striper_disk_ios(geo: &GeometryDescriptor, req: &CreditRequest)
    -> u32
{
    let element_size = u64::from(geo.element_size());
    if element_size == 0 {
        return 0;
    }
    let width = u64::from(geo.width());
    let blocks = req.blocks;
    let elements = blocks.div_ceil(element_size);
    match req.opcode {
        Opcode::Read => {
            if blocks <= element_size {
                1
            } else {
                to_credits(elements.min(width))
            }
        },
        op if is_write_family(op) => {
            let drives = if blocks < width * element_size {
                elements
            } else {
                width
            };
            if geo.raid_type() == Some(RaidType::Raid10) {
                to_credits(drives * 2)
            } else {
                to_credits(drives)
            }
        },
        op if is_verify_family(op) => to_credits(width),
        _ => 0
    }
}

// LCOV_EXCL_STOP
