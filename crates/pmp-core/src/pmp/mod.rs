//! Protection-region encoding and slot programming.

/// Pure descriptor encoders and decoders.
pub mod encoding;
/// Lock-aware programming of PMP slots through a [`crate::Hart`].
pub mod programmer;

pub use encoding::{
    cfg_octet, decode_region, encode_na4, encode_napot, with_cfg_octet, AddressMode,
    AddressRange, EncodedRegion, RegionConfig, RegionLock, RegionPermissions, CFG_A_MASK,
    CFG_A_SHIFT, CFG_L, CFG_R, CFG_RWX_MASK, CFG_W, CFG_X, NA4_SIZE, NAPOT_MIN_SIZE,
};
pub use programmer::{PmpProgrammer, ProgrammedRegion};

use thiserror::Error;

/// Configuration errors returned synchronously by the region encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum PmpError {
    /// NA4 address is not a multiple of four.
    #[error("address {addr:#010x} is not 4-byte aligned")]
    UnalignedAddress {
        /// Rejected address.
        addr: u32,
    },
    /// NAPOT size is not a power of two of at least 8 bytes, or base is misaligned.
    #[error("region of {size:#x} bytes at {base:#010x} is not a naturally aligned power of two")]
    InvalidSize {
        /// Requested base.
        base: u32,
        /// Requested size.
        size: u32,
    },
    /// Target slot holds a locked rule and rule locking bypass is off, or the
    /// hart did not accept the write.
    #[error("pmp region {index} is locked")]
    RegionLocked {
        /// Locked slot.
        index: u8,
    },
    /// Slot index is outside the implemented entries.
    #[error("pmp region index {index} is out of range")]
    InvalidIndex {
        /// Rejected slot.
        index: u8,
    },
}
