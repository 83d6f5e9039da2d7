// vim: tw=80
//! RAID group geometry
//!
//! A [`GeometryDescriptor`] records the shape of one raid group.  It is built
//! up in stages (`init`, `set_configuration`, `set_block_sizes`,
//! `set_metadata_configuration`) by the object that owns the group, after
//! which it is read-only and may be shared by every request against that
//! group.  The per-layout stripe calculators in this module turn an LBA plus a
//! descriptor into a [`StripeGeometry`].

use std::sync::Arc;

use crate::{
    config::LibraryOptions,
    types::*,
};

mod credits;
mod mirror;
mod parity;
mod position;
mod range;
mod stripe;
mod striper;

pub use self::credits::CreditRequest;
pub use self::mirror::{MirrorLayout, MirrorRead, ReadOptimizer};
pub use self::parity::ParityLayout;
pub use self::position::RotationScheme;
pub use self::range::{
    align_lock_range,
    lba_parity_range_offset,
    map_lba_to_pstripe_offset,
    map_pba_to_lba,
    map_pba_to_lba_relative,
};
pub use self::stripe::{
    calc_preread_blocks,
    get_stripe_range,
    Extent,
    ParityPositions,
    PrereadBlocks,
    SmallReadGeometry,
    SmallWriteGeometry,
    StripeGeometry,
    MAX_PARITY_EXTENTS,
};
pub use self::striper::StriperLayout;

/// Default stripe element size, in blocks
pub const SECTORS_PER_ELEMENT: ElementSizeT = 128;
/// Stripe element size for bandwidth-optimized groups
pub const SECTORS_PER_ELEMENT_BANDWIDTH: ElementSizeT = 1024;
/// Default number of stripe elements between parity rotations
pub const ELEMENTS_PER_PARITY: u32 = 8;
pub const ELEMENTS_PER_PARITY_BANDWIDTH: u32 = 2;
/// Largest optimal block size a drive may report
pub const MAX_OPTIMAL_BLOCK_SIZE: BlockCountT = 64;
/// Smallest block size a drive may import
pub const MIN_IMPORTED_BLOCK_SIZE: u32 = 512;
/// Size of the parity write log, in per-drive blocks
pub const WRITE_LOG_SIZE: BlockCountT = 65536;
/// Write log slots carry this many extra blocks beyond one element, to keep
/// them 4K-aligned
const WRITE_LOG_SLOT_PAD: u32 = 8;
/// Width of a virtual drive (spare) object
pub const VIRTUAL_DRIVE_WIDTH: u32 = 2;

/// The layouts supported by the library
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RaidType {
    Raid0,
    Raid1,
    Raid3,
    Raid5,
    Raid6,
    Raid10,
    /// A two-way mirror underneath a RAID10 striper
    MirrorUnderStriper,
    /// A mirror with no owning object, used for bootstrap metadata
    RawMirror,
    /// A provision drive's internal metadata mirror
    MetadataMirror,
    Spare,
}

impl RaidType {
    pub fn is_parity(self) -> bool {
        matches!(self, RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6)
    }

    pub fn is_striper(self) -> bool {
        matches!(self, RaidType::Raid0 | RaidType::Raid10)
    }

    pub fn is_mirror(self) -> bool {
        !self.is_parity() && !self.is_striper()
    }

    /// Parity positions per stripe
    pub fn parity_count(self) -> u16 {
        match self {
            RaidType::Raid3 | RaidType::Raid5 => 1,
            RaidType::Raid6 => 2,
            _ => 0
        }
    }

    /// Class of object that may own a group of this type
    pub fn owning_class(self) -> ClassId {
        match self {
            RaidType::Raid1 |
            RaidType::MirrorUnderStriper |
            RaidType::RawMirror => ClassId::Mirror,
            RaidType::Raid0 | RaidType::Raid10 => ClassId::Striper,
            RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6 =>
                ClassId::Parity,
            RaidType::Spare => ClassId::VirtualDrive,
            RaidType::MetadataMirror => ClassId::ProvisionDrive,
        }
    }
}

/// Kind of object that owns a geometry descriptor
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ClassId {
    Mirror,
    Striper,
    Parity,
    VirtualDrive,
    ProvisionDrive,
}

/// Configuration progress of a descriptor.  Each state implies all earlier
/// ones.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum GeometryState {
    Uninitialized,
    Initialized,
    Configured,
    MetadataConfigured,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BlockSizeState {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Optional behaviors of a raid group
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RaidAttributes {
    /// This is the system vault.  Cached writes to it cost no credits.
    pub vault: bool,
    /// Degraded parity writes go through the write log
    pub write_logging: bool,
    /// The group is carved from an extent pool and has no fixed extent
    pub extent_pool: bool,
    pub proactive_sparing: bool,
    /// Degraded requests are not charged extra credits
    pub mirror_sequential_disabled: bool,
}

/// Parity write log parameters
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JournalInfo {
    /// Per-drive start of the write log, or `INVALID_LBA`
    pub start_lba: LbaT,
    pub slot_size: u32,
    pub slot_count: u32,
}

impl Default for JournalInfo {
    fn default() -> Self {
        JournalInfo {
            start_lba: INVALID_LBA,
            slot_size: 0,
            slot_count: 0,
        }
    }
}

/// Placement of a raw mirror on its drives
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawMirrorInfo {
    /// Offset of the raw mirror's block 0 on each drive
    pub physical_offset: LbaT,
    /// Offset of the raid group that contains the raw mirror
    pub rg_offset: LbaT,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TypeSpecific {
    None,
    Journal(JournalInfo),
    RawMirror(RawMirrorInfo),
}

/// Per-layout stripe arithmetic
#[enum_dispatch::enum_dispatch(Calculator)]
pub trait StripeCalculator {
    /// Full geometry of a request starting at `lba`
    fn lun_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<StripeGeometry>;

    /// Geometry for a request addressed by per-drive block `pba`.  The result
    /// always starts at data position 0.
    fn physical_geometry(&self, geo: &GeometryDescriptor, pba: LbaT)
        -> Result<StripeGeometry>;

    /// Just the starting position of a request known to touch one position
    fn small_read_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallReadGeometry>;

    /// Like `small_read_geometry`, plus the parity positions to update
    fn small_write_geometry(&self, geo: &GeometryDescriptor, lba: LbaT)
        -> Result<SmallWriteGeometry>;

    /// I/O credits a request costs
    fn disk_ios(&self, geo: &GeometryDescriptor, req: &CreditRequest) -> u32;
}

#[derive(Clone, Copy, Debug)]
#[enum_dispatch::enum_dispatch]
pub enum Calculator {
    Parity(ParityLayout),
    Striper(StriperLayout),
    Mirror(MirrorLayout),
}

/// Shape of one raid group
#[derive(Debug)]
pub struct GeometryDescriptor {
    object_id: ObjectId,
    class_id: ClassId,
    options: Arc<LibraryOptions>,
    state: GeometryState,
    block_sizes: BlockSizeState,
    negotiate_complete: bool,
    raid_type: Option<RaidType>,
    width: u32,
    element_size: ElementSizeT,
    elements_per_parity: u32,
    exported_block_size: u32,
    imported_block_size: u32,
    optimal_block_size: u32,
    configured_capacity: LbaT,
    max_blocks_per_drive: BlockCountT,
    metadata_start_lba: LbaT,
    metadata_capacity: LbaT,
    metadata_copy_offset: LbaT,
    bitmask_4k: PositionBitmask,
    attributes: RaidAttributes,
    type_specific: TypeSpecific,
    mirror_preferred_position: Option<PositionT>,
    read_optimizer: Option<ReadOptimizer>,
}

impl GeometryDescriptor {
    /// Create an uninitialized descriptor.  It must be `init`ed before use.
    pub fn new(object_id: ObjectId, class_id: ClassId,
               options: Arc<LibraryOptions>) -> Self
    {
        GeometryDescriptor {
            object_id,
            class_id,
            options,
            state: GeometryState::Uninitialized,
            block_sizes: BlockSizeState::Unknown,
            negotiate_complete: false,
            raid_type: None,
            width: 0,
            element_size: 0,
            elements_per_parity: 0,
            exported_block_size: 0,
            imported_block_size: 0,
            optimal_block_size: 0,
            configured_capacity: INVALID_LBA,
            max_blocks_per_drive: 0,
            metadata_start_lba: INVALID_LBA,
            metadata_capacity: INVALID_LBA,
            metadata_copy_offset: INVALID_LBA,
            bitmask_4k: PositionBitmask::EMPTY,
            attributes: RaidAttributes::default(),
            type_specific: TypeSpecific::None,
            mirror_preferred_position: None,
            read_optimizer: None,
        }
    }

    /// Reset everything but the identity and options, and mark initialized
    pub fn init(&mut self) {
        let object_id = self.object_id;
        let class_id = self.class_id;
        let options = self.options.clone();
        *self = GeometryDescriptor::new(object_id, class_id, options);
        self.exported_block_size = BYTES_PER_BLOCK as u32;
        self.state = GeometryState::Initialized;
    }

    fn check_initialized(&self) -> Result<()> {
        if self.state < GeometryState::Initialized {
            Err(Error::NotInitialized)
        } else {
            Ok(())
        }
    }

    fn check_configured(&self) -> Result<RaidType> {
        match self.raid_type {
            Some(rt) if self.state >= GeometryState::Configured => Ok(rt),
            _ => Err(Error::NotInitialized)
        }
    }

    fn validate_raid_type(&self, raid_type: RaidType) -> Result<()> {
        self.check_initialized()?;
        if raid_type.owning_class() != self.class_id {
            tracing::warn!(object_id = %self.object_id,
                "raid type {:?} does not belong to class {:?}",
                raid_type, self.class_id);
            return Err(Error::InvalidParams);
        }
        Ok(())
    }

    /// Set the group's shape.  Allowed once, after `init`.
    pub fn set_configuration(&mut self,
                             width: u32,
                             raid_type: RaidType,
                             element_size: ElementSizeT,
                             elements_per_parity: u32,
                             configured_capacity: LbaT,
                             max_blocks_per_drive: BlockCountT) -> Result<()>
    {
        self.check_initialized()?;
        if self.state >= GeometryState::Configured {
            tracing::error!(object_id = %self.object_id,
                "geometry is already configured");
            return Err(Error::InvalidParams);
        }
        self.validate_raid_type(raid_type)?;
        if element_size == 0 ||
            max_blocks_per_drive < BlockCountT::from(element_size) ||
            (raid_type.is_parity() && elements_per_parity == 0)
        {
            return Err(Error::InvalidParams);
        }
        let drives = if raid_type == RaidType::Raid10 {
            width.checked_mul(2).ok_or(Error::InvalidParams)?
        } else {
            width
        };
        Self::validate_width(raid_type, drives)?;

        self.raid_type = Some(raid_type);
        self.width = width;
        self.configured_capacity = configured_capacity;
        self.element_size = element_size;
        self.elements_per_parity = elements_per_parity;
        self.max_blocks_per_drive = max_blocks_per_drive;
        self.type_specific = if raid_type.is_parity() {
            TypeSpecific::Journal(JournalInfo::default())
        } else if raid_type == RaidType::RawMirror {
            TypeSpecific::RawMirror(RawMirrorInfo::default())
        } else {
            TypeSpecific::None
        };
        if raid_type.is_mirror() {
            self.read_optimizer = Some(ReadOptimizer::new(width as usize));
        }
        self.state = GeometryState::Configured;
        Ok(())
    }

    /// Set the block sizes negotiated with the drives
    pub fn set_block_sizes(&mut self, exported: u32, imported: u32,
                           optimal: u32) -> Result<()>
    {
        self.exported_block_size = exported;
        self.imported_block_size = imported;
        self.optimal_block_size = optimal;
        if self.state < GeometryState::Configured ||
            u64::from(exported) != BYTES_PER_BLOCK ||
            imported < MIN_IMPORTED_BLOCK_SIZE ||
            optimal < 1 ||
            self.max_blocks_per_drive < MAX_OPTIMAL_BLOCK_SIZE
        {
            self.block_sizes = BlockSizeState::Invalid;
            return Err(Error::InvalidParams);
        }
        self.block_sizes = BlockSizeState::Valid;
        Ok(())
    }

    /// Record which positions are 4K drives, and renegotiate block sizes if
    /// that changed.
    pub fn refresh_block_sizes(&mut self, bitmask_4k: PositionBitmask)
        -> Result<()>
    {
        if bitmask_4k == self.bitmask_4k {
            return Ok(());
        }
        self.bitmask_4k = bitmask_4k;
        if bitmask_4k.is_empty() {
            self.set_block_sizes(BYTES_PER_BLOCK as u32, BYTES_PER_BLOCK as u32,
                                 1)
        } else {
            self.set_block_sizes(BYTES_PER_BLOCK as u32,
                                 (BYTES_PER_BLOCK * BLOCKS_PER_4K) as u32,
                                 BLOCKS_PER_4K as u32)
        }
    }

    /// Configure the metadata region.  Parity groups also set up their write
    /// log here.
    pub fn set_metadata_configuration(&mut self,
                                      metadata_start_lba: LbaT,
                                      metadata_capacity: LbaT,
                                      metadata_copy_offset: LbaT,
                                      journal_start_lba: LbaT) -> Result<()>
    {
        let raid_type = self.check_configured()?;
        self.metadata_start_lba = metadata_start_lba;
        self.metadata_capacity = metadata_capacity;
        self.metadata_copy_offset = metadata_copy_offset;
        if raid_type.is_parity() {
            let slot_size = self.element_size + WRITE_LOG_SLOT_PAD;
            self.type_specific = TypeSpecific::Journal(JournalInfo {
                start_lba: journal_start_lba,
                slot_size,
                slot_count: (WRITE_LOG_SIZE / BlockCountT::from(slot_size))
                    as u32,
            });
        }
        self.state = GeometryState::MetadataConfigured;
        Ok(())
    }

    pub fn set_negotiate_complete(&mut self) {
        self.negotiate_complete = true;
    }

    pub fn set_attributes(&mut self, attributes: RaidAttributes) {
        self.attributes = attributes;
    }

    /// Record where a raw mirror lives on its drives
    pub fn set_raw_mirror_offsets(&mut self, physical_offset: LbaT,
                                  rg_offset: LbaT) -> Result<()>
    {
        match &mut self.type_specific {
            TypeSpecific::RawMirror(info) => {
                info.physical_offset = physical_offset;
                info.rg_offset = rg_offset;
                Ok(())
            },
            _ => Err(Error::WrongRaidType)
        }
    }

    /// Disable the mirror read optimizer and always read from `position`, or
    /// reenable it with `None`.
    pub fn set_mirror_preferred_position(&mut self, position: Option<PositionT>)
        -> Result<()>
    {
        let raid_type = self.check_configured()?;
        if !raid_type.is_mirror() {
            return Err(Error::WrongRaidType);
        }
        if let Some(p) = position {
            if u32::from(p) >= self.width {
                return Err(Error::InvalidPosition);
            }
        }
        self.mirror_preferred_position = position;
        Ok(())
    }

    /// Check that `width` is legal for `raid_type`.  For RAID10, `width`
    /// counts every mirrored drive.
    pub fn validate_width(raid_type: RaidType, width: u32) -> Result<()> {
        let ok = match raid_type {
            RaidType::Raid5 => (3..=16).contains(&width),
            RaidType::Raid6 => (4..=16).contains(&width) && width % 2 == 0,
            RaidType::Raid3 => width == 5 || width == 9,
            RaidType::Raid0 => width == 1 || (3..=16).contains(&width),
            RaidType::Raid10 => (2..=32).contains(&width) && width % 2 == 0,
            RaidType::Raid1 | RaidType::RawMirror => (2..=3).contains(&width),
            RaidType::MirrorUnderStriper => width == 2,
            RaidType::Spare => width == VIRTUAL_DRIVE_WIDTH,
            RaidType::MetadataMirror => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidParams)
        }
    }

    /// Default element size and elements per parity stripe for a new group
    pub fn determine_element_size(raid_type: RaidType, bandwidth: bool)
        -> Result<(ElementSizeT, u32)>
    {
        let element_size = if bandwidth {
            SECTORS_PER_ELEMENT_BANDWIDTH
        } else {
            SECTORS_PER_ELEMENT
        };
        match raid_type {
            RaidType::Raid3 | RaidType::Raid5 | RaidType::Raid6 => {
                let epp = if bandwidth {
                    ELEMENTS_PER_PARITY_BANDWIDTH
                } else {
                    ELEMENTS_PER_PARITY
                };
                Ok((element_size, epp))
            },
            RaidType::Raid0 | RaidType::Raid10 | RaidType::Raid1 |
            RaidType::MirrorUnderStriper | RaidType::RawMirror =>
                Ok((element_size, 0)),
            RaidType::MetadataMirror | RaidType::Spare =>
                Err(Error::InvalidParams)
        }
    }

    /// Number of positions holding distinct data
    pub fn data_disks(&self) -> Result<u16> {
        let raid_type = self.check_configured()?;
        let w = self.width as u16;
        Ok(match raid_type {
            RaidType::Raid1 | RaidType::Spare | RaidType::MirrorUnderStriper |
            RaidType::MetadataMirror | RaidType::RawMirror => 1,
            RaidType::Raid10 | RaidType::Raid0 => w,
            RaidType::Raid3 | RaidType::Raid5 => w - 1,
            RaidType::Raid6 => w - 2,
        })
    }

    /// Number of redundant positions.  For mirrors, every copy but one.
    pub fn parity_disks(&self) -> Result<u16> {
        let raid_type = self.check_configured()?;
        let w = self.width as u16;
        Ok(match raid_type {
            RaidType::Raid1 | RaidType::Spare | RaidType::MirrorUnderStriper |
            RaidType::MetadataMirror | RaidType::RawMirror => w - 1,
            RaidType::Raid10 => w / 2,
            RaidType::Raid3 | RaidType::Raid5 => 1,
            RaidType::Raid0 => 0,
            RaidType::Raid6 => 2,
        })
    }

    pub fn is_ready_for_io(&self) -> bool {
        self.block_sizes == BlockSizeState::Valid
    }

    /// The stripe calculator for this group's layout
    pub fn calculator(&self) -> Result<Calculator> {
        let raid_type = self.check_configured()?;
        Ok(if raid_type.is_parity() {
            Calculator::Parity(ParityLayout::new(self.options.rotation))
        } else if raid_type.is_striper() {
            Calculator::Striper(StriperLayout)
        } else {
            Calculator::Mirror(MirrorLayout)
        })
    }

    pub fn get_lun_geometry(&self, lba: LbaT) -> Result<StripeGeometry> {
        self.calculator()?.lun_geometry(self, lba)
    }

    pub fn get_physical_geometry(&self, pba: LbaT) -> Result<StripeGeometry> {
        self.calculator()?.physical_geometry(self, pba)
    }

    pub fn get_small_read_geometry(&self, lba: LbaT)
        -> Result<SmallReadGeometry>
    {
        self.calculator()?.small_read_geometry(self, lba)
    }

    pub fn get_small_write_geometry(&self, lba: LbaT)
        -> Result<SmallWriteGeometry>
    {
        self.calculator()?.small_write_geometry(self, lba)
    }

    /// I/O credits charged for `req`.  Unconfigured groups charge nothing.
    pub fn calc_disk_ios(&self, req: &CreditRequest) -> u32 {
        self.calculator()
            .map(|c| c.disk_ios(self, req))
            .unwrap_or(0)
    }

    /// Pick a position for a mirror read of `lba`, avoiding `degraded`
    /// positions.  The caller must report the read's completion with
    /// [`mirror_read_complete`](Self::mirror_read_complete).
    pub fn select_mirror_read_position(&self, lba: LbaT,
                                       degraded: PositionBitmask)
        -> Result<MirrorRead>
    {
        let raid_type = self.check_configured()?;
        if !raid_type.is_mirror() {
            return Err(Error::WrongRaidType);
        }
        if let Some(position) = self.mirror_preferred_position {
            if !degraded.contains(position) {
                return Ok(MirrorRead { position, optimized: false });
            }
        }
        match &self.read_optimizer {
            Some(ro) => {
                let position = ro.determine_position(lba, degraded)?;
                Ok(MirrorRead { position, optimized: true })
            },
            None => Err(Error::InternalInconsistency)
        }
    }

    pub fn mirror_read_complete(&self, read: MirrorRead) {
        if read.optimized {
            match &self.read_optimizer {
                Some(ro) => ro.read_complete(read.position),
                None => tracing::warn!(object_id = %self.object_id,
                    position = read.position,
                    "optimized read completed without an optimizer"),
            }
        }
    }

    /// Parity write log parameters.  Only parity groups have them.
    pub fn journal_info(&self) -> Result<&JournalInfo> {
        match &self.type_specific {
            TypeSpecific::Journal(info) => Ok(info),
            _ => Err(Error::WrongRaidType)
        }
    }

    /// Per-drive start of the write log, or `INVALID_LBA` if there isn't one
    pub fn journal_start_lba(&self) -> LbaT {
        self.journal_info()
            .map(|j| j.start_lba)
            .unwrap_or(INVALID_LBA)
    }

    pub fn raw_mirror_info(&self) -> Result<&RawMirrorInfo> {
        match &self.type_specific {
            TypeSpecific::RawMirror(info) => Ok(info),
            _ => Err(Error::WrongRaidType)
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    pub fn state(&self) -> GeometryState {
        self.state
    }

    pub fn block_size_state(&self) -> BlockSizeState {
        self.block_sizes
    }

    pub fn is_negotiate_complete(&self) -> bool {
        self.negotiate_complete
    }

    pub fn raid_type(&self) -> Option<RaidType> {
        self.raid_type
    }

    /// Is this a parity layout?  False until configured.
    pub fn is_parity_type(&self) -> bool {
        self.raid_type.map(RaidType::is_parity).unwrap_or(false)
    }

    pub fn is_raid0(&self) -> bool {
        self.raid_type == Some(RaidType::Raid0)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Width as a position count, for the stripe calculators
    pub(crate) fn position_width(&self) -> Result<PositionT> {
        if self.width == 0 || self.width as usize > MAX_ARRAY_WIDTH {
            return Err(Error::InvalidParams);
        }
        Ok(self.width as PositionT)
    }

    pub fn element_size(&self) -> ElementSizeT {
        self.element_size
    }

    pub fn elements_per_parity(&self) -> u32 {
        self.elements_per_parity
    }

    pub fn exported_block_size(&self) -> u32 {
        self.exported_block_size
    }

    pub fn imported_block_size(&self) -> u32 {
        self.imported_block_size
    }

    pub fn optimal_block_size(&self) -> u32 {
        self.optimal_block_size
    }

    pub fn configured_capacity(&self) -> LbaT {
        self.configured_capacity
    }

    pub fn max_blocks_per_drive(&self) -> BlockCountT {
        self.max_blocks_per_drive
    }

    pub fn metadata_start_lba(&self) -> LbaT {
        self.metadata_start_lba
    }

    pub fn metadata_capacity(&self) -> LbaT {
        self.metadata_capacity
    }

    pub fn metadata_copy_offset(&self) -> LbaT {
        self.metadata_copy_offset
    }

    pub fn bitmask_4k(&self) -> PositionBitmask {
        self.bitmask_4k
    }

    pub fn attributes(&self) -> &RaidAttributes {
        &self.attributes
    }

    pub fn mirror_preferred_position(&self) -> Option<PositionT> {
        self.mirror_preferred_position
    }

    pub fn read_optimizer(&self) -> Option<&ReadOptimizer> {
        self.read_optimizer.as_ref()
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
use pretty_assertions::assert_eq;
use rstest::rstest;
use super::*;

fn descriptor(class_id: ClassId) -> GeometryDescriptor {
    let mut gd = GeometryDescriptor::new(ObjectId(0x10a), class_id,
                                         Arc::new(LibraryOptions::default()));
    gd.init();
    gd
}

#[test]
fn init() {
    let gd = descriptor(ClassId::Parity);
    assert_eq!(gd.state(), GeometryState::Initialized);
    assert_eq!(gd.exported_block_size(), 520);
    assert_eq!(gd.imported_block_size(), 0);
    assert_eq!(gd.element_size(), 0);
    assert_eq!(gd.metadata_start_lba(), INVALID_LBA);
    assert_eq!(gd.configured_capacity(), INVALID_LBA);
    assert!(!gd.is_ready_for_io());
}

#[test]
fn not_initialized() {
    let mut gd = GeometryDescriptor::new(ObjectId(1), ClassId::Parity,
                                         Arc::new(LibraryOptions::default()));
    assert_eq!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048),
               Err(Error::NotInitialized));
    assert_eq!(gd.data_disks(), Err(Error::NotInitialized));
    assert_eq!(gd.get_lun_geometry(0).unwrap_err(), Error::NotInitialized);
}

#[test]
fn configure_raid5() {
    let mut gd = descriptor(ClassId::Parity);
    gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048).unwrap();
    assert_eq!(gd.state(), GeometryState::Configured);
    assert_eq!(gd.data_disks(), Ok(4));
    assert_eq!(gd.parity_disks(), Ok(1));
    assert_eq!(gd.journal_start_lba(), INVALID_LBA);
    assert_eq!(gd.raw_mirror_info(), Err(Error::WrongRaidType));
    // Reconfiguring is not allowed
    assert_eq!(gd.set_configuration(6, RaidType::Raid5, 128, 8, 1 << 20, 2048),
               Err(Error::InvalidParams));
}

#[test]
fn configure_wrong_class() {
    let mut gd = descriptor(ClassId::Striper);
    assert_eq!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048),
               Err(Error::InvalidParams));
    assert_eq!(gd.state(), GeometryState::Initialized);
    assert_eq!(gd.raid_type(), None);
}

#[test]
fn configure_small_max_blocks() {
    let mut gd = descriptor(ClassId::Parity);
    assert_eq!(gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 64),
               Err(Error::InvalidParams));
}

#[test]
fn configure_raid10_counts_mirrors() {
    let mut gd = descriptor(ClassId::Striper);
    // 17 mirrors is 34 drives
    assert_eq!(gd.set_configuration(17, RaidType::Raid10, 128, 0, 1 << 20,
                                    2048),
               Err(Error::InvalidParams));
    gd.set_configuration(3, RaidType::Raid10, 128, 0, 1 << 20, 2048).unwrap();
    assert_eq!(gd.data_disks(), Ok(3));
    assert_eq!(gd.parity_disks(), Ok(1));
}

#[rstest]
#[case(RaidType::Raid5, 2, false)]
#[case(RaidType::Raid5, 3, true)]
#[case(RaidType::Raid5, 16, true)]
#[case(RaidType::Raid5, 17, false)]
#[case(RaidType::Raid6, 4, true)]
#[case(RaidType::Raid6, 5, false)]
#[case(RaidType::Raid6, 16, true)]
#[case(RaidType::Raid3, 5, true)]
#[case(RaidType::Raid3, 6, false)]
#[case(RaidType::Raid3, 9, true)]
#[case(RaidType::Raid0, 1, true)]
#[case(RaidType::Raid0, 2, false)]
#[case(RaidType::Raid0, 3, true)]
#[case(RaidType::Raid10, 2, true)]
#[case(RaidType::Raid10, 3, false)]
#[case(RaidType::Raid10, 32, true)]
#[case(RaidType::Raid1, 1, false)]
#[case(RaidType::Raid1, 3, true)]
#[case(RaidType::RawMirror, 4, false)]
#[case(RaidType::MirrorUnderStriper, 2, true)]
#[case(RaidType::MirrorUnderStriper, 3, false)]
#[case(RaidType::Spare, 2, true)]
fn validate_width(#[case] rt: RaidType, #[case] width: u32,
                  #[case] valid: bool)
{
    assert_eq!(GeometryDescriptor::validate_width(rt, width).is_ok(), valid);
}

#[rstest]
#[case(RaidType::Raid5, false, Ok((128, 8)))]
#[case(RaidType::Raid6, true, Ok((1024, 2)))]
#[case(RaidType::Raid0, false, Ok((128, 0)))]
#[case(RaidType::RawMirror, true, Ok((1024, 0)))]
#[case(RaidType::Spare, false, Err(Error::InvalidParams))]
fn determine_element_size(#[case] rt: RaidType, #[case] bandwidth: bool,
                          #[case] expected: Result<(ElementSizeT, u32)>)
{
    assert_eq!(GeometryDescriptor::determine_element_size(rt, bandwidth),
               expected);
}

mod block_sizes {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn before_configuration() {
        let mut gd = descriptor(ClassId::Parity);
        assert_eq!(gd.set_block_sizes(520, 520, 1), Err(Error::InvalidParams));
        assert_eq!(gd.block_size_state(), BlockSizeState::Invalid);
    }

    #[rstest]
    #[case(512, 520, 1)]
    #[case(520, 511, 1)]
    #[case(520, 520, 0)]
    fn invalid(#[case] exported: u32, #[case] imported: u32,
               #[case] optimal: u32)
    {
        let mut gd = descriptor(ClassId::Parity);
        gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048)
            .unwrap();
        assert_eq!(gd.set_block_sizes(exported, imported, optimal),
                   Err(Error::InvalidParams));
        assert!(!gd.is_ready_for_io());
    }

    /// Drives that can't accept an optimal-sized request are unusable
    #[test]
    fn small_max_blocks_per_drive() {
        let mut gd = descriptor(ClassId::Mirror);
        gd.set_configuration(2, RaidType::Raid1, 32, 0, 1 << 20, 32).unwrap();
        assert_eq!(gd.set_block_sizes(520, 520, 1), Err(Error::InvalidParams));
    }

    #[test]
    fn valid() {
        let mut gd = descriptor(ClassId::Parity);
        gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048)
            .unwrap();
        gd.set_block_sizes(520, 4160, 8).unwrap();
        assert!(gd.is_ready_for_io());
    }

    #[test]
    fn refresh() {
        let mut gd = descriptor(ClassId::Parity);
        gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048)
            .unwrap();
        gd.refresh_block_sizes(PositionBitmask(0b100)).unwrap();
        assert_eq!(gd.imported_block_size(), 4160);
        assert_eq!(gd.optimal_block_size(), 8);
        gd.refresh_block_sizes(PositionBitmask::EMPTY).unwrap();
        assert_eq!(gd.imported_block_size(), 520);
        assert_eq!(gd.optimal_block_size(), 1);
        assert!(gd.is_ready_for_io());
    }
}

#[test]
fn metadata_configuration_parity() {
    let mut gd = descriptor(ClassId::Parity);
    gd.set_configuration(5, RaidType::Raid5, 128, 8, 1 << 20, 2048).unwrap();
    gd.set_metadata_configuration(0x4000, 0x400, 0x200, 0x3000).unwrap();
    assert_eq!(gd.state(), GeometryState::MetadataConfigured);
    let j = gd.journal_info().unwrap();
    assert_eq!(j.start_lba, 0x3000);
    assert_eq!(j.slot_size, 136);
    assert_eq!(j.slot_count, 481);
}

#[test]
fn metadata_configuration_mirror() {
    let mut gd = descriptor(ClassId::Mirror);
    gd.set_configuration(2, RaidType::Raid1, 128, 0, 1 << 20, 2048).unwrap();
    gd.set_metadata_configuration(0x4000, 0x400, 0x200, 0x3000).unwrap();
    assert_eq!(gd.journal_info(), Err(Error::WrongRaidType));
    assert_eq!(gd.journal_start_lba(), INVALID_LBA);
    assert_eq!(gd.metadata_copy_offset(), 0x200);
}

#[test]
fn raw_mirror_offsets() {
    let mut gd = descriptor(ClassId::Mirror);
    gd.set_configuration(3, RaidType::RawMirror, 128, 0, 1 << 20, 2048)
        .unwrap();
    gd.set_raw_mirror_offsets(0x10000, 0x800).unwrap();
    assert_eq!(gd.raw_mirror_info(),
               Ok(&RawMirrorInfo{physical_offset: 0x10000, rg_offset: 0x800}));
    let mut r1 = descriptor(ClassId::Mirror);
    r1.set_configuration(2, RaidType::Raid1, 128, 0, 1 << 20, 2048).unwrap();
    assert_eq!(r1.set_raw_mirror_offsets(0, 0), Err(Error::WrongRaidType));
}

#[test]
fn preferred_position() {
    let mut gd = descriptor(ClassId::Mirror);
    gd.set_configuration(3, RaidType::Raid1, 128, 0, 1 << 20, 2048).unwrap();
    assert_eq!(gd.set_mirror_preferred_position(Some(3)),
               Err(Error::InvalidPosition));
    gd.set_mirror_preferred_position(Some(2)).unwrap();
    let read = gd.select_mirror_read_position(0, PositionBitmask::EMPTY)
        .unwrap();
    assert_eq!(read.position, 2);
    // A degraded preferred position falls back to the optimizer
    let read = gd.select_mirror_read_position(0, PositionBitmask(0b100))
        .unwrap();
    assert_ne!(read.position, 2);
    assert!(read.is_optimized());
}
}
// LCOV_EXCL_STOP
