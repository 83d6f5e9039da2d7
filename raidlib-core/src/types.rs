// vim: tw=80
//! Common type definitions used throughout the RAID library

use std::{
    fmt::{self, Display, Formatter},
    ops::{BitAnd, BitOr, BitOrAssign, Not},
};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Indexes a block.  Blocks are always 520 bytes on the exported side.
pub type LbaT = u64;

/// A count of blocks
pub type BlockCountT = u64;

/// Blocks per stripe element
pub type ElementSizeT = u32;

/// Index of a physical position within an array.
pub type PositionT = u16;

/// Size in bytes of one exported block
pub const BYTES_PER_BLOCK: u64 = 520;

/// Number of 520-byte blocks that make up one 4K physical sector
pub const BLOCKS_PER_4K: u64 = 8;

/// Widest array any layout may have
pub const MAX_ARRAY_WIDTH: usize = 16;

/// Largest number of blocks a single request may describe
pub const MAX_BLOCKS_PER_REQUEST: BlockCountT = u32::MAX as BlockCountT;

/// Sentinel LBA for a region that has not been configured
pub const INVALID_LBA: LbaT = LbaT::MAX;

/// The RAID library's error type
#[derive(Clone, Copy, Debug, Deserialize, Error, Eq, Hash, PartialEq,
         Serialize)]
pub enum Error {
    /// Caller-supplied parameters violate a structural precondition
    #[error("Invalid parameters")]
    InvalidParams,
    /// An invariant that the library itself maintains was found violated
    #[error("Internal inconsistency")]
    InternalInconsistency,
    /// A collaborator has not completed yet.  Not a failure.
    #[error("Operation pending")]
    Pending,
    /// A metadata operation failed with a retryable status
    #[error("Metadata I/O failed")]
    MetadataIoFailed,
    #[error("Shutdown in progress")]
    ShutdownInProgress,
    #[error("Configuration change in progress")]
    ConfigChanging,
    /// The geometry descriptor was used before `init`
    #[error("Geometry not initialized")]
    NotInitialized,
    /// A physical position that cannot hold data for this parity rotation
    #[error("Invalid position")]
    InvalidPosition,
    /// The type-specific geometry was accessed through the wrong RAID type
    #[error("Wrong RAID type")]
    WrongRaidType,
    /// A drive edge does not exist (yet)
    #[error("Not found")]
    NotFound,
    /// A collaborator request was aborted
    #[error("Aborted")]
    Aborted,
}

impl Error {
    /// Could a retry of the same operation succeed?
    pub fn is_retryable(self) -> bool {
        matches!(self,
            Error::Pending |
            Error::MetadataIoFailed |
            Error::ConfigChanging |
            Error::NotFound
        )
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// Coarse completion status of a block operation
#[derive(Clone, Copy, Debug, Default, Eq, Hash, IntoPrimitive, PartialEq,
         TryFromPrimitive)]
#[repr(u8)]
pub enum BlockStatus {
    #[default]
    Invalid = 0,
    Success = 1,
    Timeout = 2,
    MediaError = 3,
    IoFailed = 4,
    RequestAborted = 5,
    NotReady = 6,
    InvalidRequest = 7,
}

/// Refines a `BlockStatus`.  Tells the upper layers whether a retry may help
#[derive(Clone, Copy, Debug, Default, Eq, Hash, IntoPrimitive, PartialEq,
         TryFromPrimitive)]
#[repr(u8)]
pub enum BlockQualifier {
    #[default]
    None = 0,
    RetryPossible = 1,
    RetryNotPossible = 2,
    ClientAborted = 3,
    RaidlibAborted = 4,
    CapacityExceeded = 5,
    UnexpectedError = 6,
    TooManyDeadPositions = 7,
    UnalignedRequest = 8,
    Congested = 9,
    StillCongested = 10,
    WriteLogAborted = 11,
}

/// Relative severity of a sub-request's completion status.
///
/// When several sub-requests finish with different statuses, the request
/// reports the one with the highest precedence.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ErrorPrecedence {
    NoError,
    StillCongested,
    Congested,
    Timeout,
    MediaError,
    DeviceDead,
    Aborted,
    NotReady,
    InvalidRequest,
}

impl ErrorPrecedence {
    pub fn of(status: BlockStatus, qualifier: BlockQualifier) -> Self {
        match (status, qualifier) {
            (BlockStatus::Success, _) => ErrorPrecedence::NoError,
            (BlockStatus::IoFailed, BlockQualifier::StillCongested) =>
                ErrorPrecedence::StillCongested,
            (BlockStatus::IoFailed, BlockQualifier::Congested) =>
                ErrorPrecedence::Congested,
            (BlockStatus::Timeout, _) => ErrorPrecedence::Timeout,
            (BlockStatus::MediaError, _) => ErrorPrecedence::MediaError,
            (BlockStatus::IoFailed, _) => ErrorPrecedence::DeviceDead,
            (BlockStatus::RequestAborted, _) => ErrorPrecedence::Aborted,
            (BlockStatus::NotReady, _) => ErrorPrecedence::NotReady,
            (BlockStatus::InvalidRequest, _) |
            (BlockStatus::Invalid, _) => ErrorPrecedence::InvalidRequest,
        }
    }
}

/// A `{status, qualifier}` pair, as delivered to a completion callback
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct BlockResult {
    pub status: BlockStatus,
    pub qualifier: BlockQualifier,
}

impl BlockResult {
    pub const fn new(status: BlockStatus, qualifier: BlockQualifier) -> Self {
        BlockResult { status, qualifier }
    }

    pub const fn success() -> Self {
        BlockResult::new(BlockStatus::Success, BlockQualifier::None)
    }

    pub fn precedence(&self) -> ErrorPrecedence {
        ErrorPrecedence::of(self.status, self.qualifier)
    }

    /// Merge `other` into `self`, keeping whichever takes precedence.
    ///
    /// An `Invalid` status is always replaced.
    pub fn merge(&mut self, other: BlockResult) {
        if self.status == BlockStatus::Invalid ||
            other.precedence() > self.precedence()
        {
            *self = other;
        }
    }
}

impl Display for BlockResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.status, self.qualifier)
    }
}

/// Block operation codes understood by the library
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Opcode {
    Read,
    Write,
    WriteNonCached,
    WriteVerify,
    Zero,
    WriteZeros,
    CorruptData,
    Verify,
    ReadOnlyVerify,
    ErrorVerify,
    IncompleteWriteVerify,
    SystemVerify,
    VerifySpecificArea,
    ReadOnlyVerifySpecificArea,
    Rebuild,
    MarkForRebuild,
    EncryptionReadPaged,
    EncryptionRekeyWrite,
    WriteLogHeaderRead,
    NegotiateBlockSize,
    InitiateVerify,
}

impl Opcode {
    /// Does this operation modify the media?
    pub fn is_media_modify(self) -> bool {
        matches!(self,
            Opcode::Write |
            Opcode::WriteNonCached |
            Opcode::WriteVerify |
            Opcode::Zero |
            Opcode::WriteZeros |
            Opcode::CorruptData |
            Opcode::EncryptionRekeyWrite
        )
    }

    /// Is the LBA of this operation relative to a single drive rather than
    /// the whole RAID group?
    pub fn is_disk_based(self) -> bool {
        matches!(self,
            Opcode::Rebuild |
            Opcode::Verify |
            Opcode::EncryptionReadPaged |
            Opcode::MarkForRebuild |
            Opcode::ReadOnlyVerify |
            Opcode::ErrorVerify |
            Opcode::IncompleteWriteVerify |
            Opcode::SystemVerify |
            Opcode::VerifySpecificArea |
            Opcode::ReadOnlyVerifySpecificArea |
            Opcode::WriteLogHeaderRead
        )
    }

    pub fn is_verify(self) -> bool {
        matches!(self,
            Opcode::Verify |
            Opcode::ReadOnlyVerify |
            Opcode::ErrorVerify |
            Opcode::IncompleteWriteVerify |
            Opcode::SystemVerify |
            Opcode::VerifySpecificArea |
            Opcode::ReadOnlyVerifySpecificArea
        )
    }
}

/// A set of array positions, one bit per position.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
         Serialize)]
pub struct PositionBitmask(pub u16);

impl PositionBitmask {
    pub const EMPTY: PositionBitmask = PositionBitmask(0);

    /// Every position of a `width`-wide array
    pub fn all(width: usize) -> Result<Self> {
        if width > MAX_ARRAY_WIDTH {
            return Err(Error::InvalidParams);
        }
        Ok(PositionBitmask(((1u32 << width) - 1) as u16))
    }

    /// The set holding only `position`.  Empty if `position` is beyond the
    /// widest possible array.
    pub fn single(position: PositionT) -> Self {
        if usize::from(position) < MAX_ARRAY_WIDTH {
            PositionBitmask(1 << position)
        } else {
            PositionBitmask::EMPTY
        }
    }

    pub fn contains(self, position: PositionT) -> bool {
        (position as usize) < MAX_ARRAY_WIDTH && self.0 & (1 << position) != 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, position: PositionT) {
        *self |= PositionBitmask::single(position);
    }

    pub fn remove(&mut self, position: PositionT) {
        self.0 &= !PositionBitmask::single(position).0;
    }

    /// Is every bit of `other` also set in `self`?
    pub fn is_superset(self, other: PositionBitmask) -> bool {
        other.0 & !self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item=PositionT> {
        (0..MAX_ARRAY_WIDTH as PositionT).filter(move |p| self.contains(*p))
    }
}

impl BitAnd for PositionBitmask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        PositionBitmask(self.0 & rhs.0)
    }
}

impl BitOr for PositionBitmask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        PositionBitmask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PositionBitmask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Not for PositionBitmask {
    type Output = Self;

    fn not(self) -> Self {
        PositionBitmask(!self.0)
    }
}

impl Display for PositionBitmask {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Identifies the object that owns a geometry, for diagnostics only
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq,
         PartialOrd, Serialize)]
pub struct ObjectId(pub u32);

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Compute `blocks * BYTES_PER_BLOCK`, provided the result fits in 32 bits.
pub fn checked_byte_count(blocks: BlockCountT) -> Option<u32> {
    blocks.checked_mul(BYTES_PER_BLOCK)
        .and_then(|bytes| u32::try_from(bytes).ok())
}

// LCOV_EXCL_STOP
