//! Pure encoders from region descriptions to `pmpcfg` octets and `pmpaddr` values.
//!
//! Permission encodings follow the Smepmp rule table, which is what the
//! harness runs under once machine mode lockdown is enabled: a locked rule
//! applies to machine mode only, an unlocked rule to user mode only, and the
//! shared encodings (otherwise reserved `W`-without-`R` patterns) apply to both.

use crate::PmpError;

/// `pmpcfg` octet read bit.
pub const CFG_R: u8 = 1 << 0;
/// `pmpcfg` octet write bit.
pub const CFG_W: u8 = 1 << 1;
/// `pmpcfg` octet execute bit.
pub const CFG_X: u8 = 1 << 2;
/// Mask of the permission bits.
pub const CFG_RWX_MASK: u8 = CFG_R | CFG_W | CFG_X;
/// Bit offset of the address-matching field.
pub const CFG_A_SHIFT: u8 = 3;
/// Mask of the two-bit address-matching field.
pub const CFG_A_MASK: u8 = 0b11 << CFG_A_SHIFT;
/// `pmpcfg` octet lock bit.
pub const CFG_L: u8 = 1 << 7;

/// Smallest region a NAPOT encoding can describe.
pub const NAPOT_MIN_SIZE: u32 = 8;
/// Size of the region an NA4 encoding describes.
pub const NA4_SIZE: u32 = 4;

/// Lock state requested for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegionLock {
    /// Rule applies to user mode and may be rewritten freely.
    #[default]
    Unlocked,
    /// Rule applies to machine mode; rewriting needs rule locking bypass.
    Locked,
}

/// Permission sets the harness can program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RegionPermissions {
    /// No access.
    #[default]
    None,
    /// Read only.
    ReadOnly,
    /// Write only. `W` without `R` is reserved, so this widens to read-write.
    WriteOnly,
    /// Read and write.
    ReadWrite,
    /// Execute only.
    ExecuteOnly,
    /// Read-write for both machine and user mode.
    SharedReadWrite,
    /// Execute-only for both machine and user mode.
    SharedExecuteOnly,
}

impl RegionPermissions {
    /// Returns `true` for encodings that are visible across privilege levels.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::SharedReadWrite | Self::SharedExecuteOnly)
    }
}

/// Lock and permissions for one region, independent of its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionConfig {
    /// Lock state. Ignored for shared permissions, whose encoding fixes it.
    pub lock: RegionLock,
    /// Permission set.
    pub permissions: RegionPermissions,
}

impl RegionConfig {
    /// Creates a region configuration.
    #[must_use]
    pub const fn new(lock: RegionLock, permissions: RegionPermissions) -> Self {
        Self { lock, permissions }
    }

    /// Returns the `L` and `RWX` bits of the configuration octet.
    #[must_use]
    pub const fn octet_bits(self) -> u8 {
        let lock = match self.lock {
            RegionLock::Unlocked => 0,
            RegionLock::Locked => CFG_L,
        };

        match self.permissions {
            RegionPermissions::None => lock,
            RegionPermissions::ReadOnly => lock | CFG_R,
            RegionPermissions::WriteOnly | RegionPermissions::ReadWrite => lock | CFG_R | CFG_W,
            RegionPermissions::ExecuteOnly => lock | CFG_X,
            RegionPermissions::SharedReadWrite => CFG_W | CFG_X,
            RegionPermissions::SharedExecuteOnly => CFG_L | CFG_W,
        }
    }
}

/// Address-matching mode of a PMP entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressMode {
    /// Entry disabled.
    Off = 0,
    /// Top of range, using the previous entry's address as the bottom.
    Tor = 1,
    /// Naturally aligned four-byte region.
    Na4 = 2,
    /// Naturally aligned power-of-two region.
    Napot = 3,
}

impl AddressMode {
    /// Extracts the address-matching mode from a configuration octet.
    #[must_use]
    pub const fn from_octet(octet: u8) -> Self {
        match (octet & CFG_A_MASK) >> CFG_A_SHIFT {
            0 => Self::Off,
            1 => Self::Tor,
            2 => Self::Na4,
            _ => Self::Napot,
        }
    }

    /// Returns the mode's bits positioned in a configuration octet.
    #[must_use]
    pub const fn octet_bits(self) -> u8 {
        (self as u8) << CFG_A_SHIFT
    }
}

/// Byte range `[start, start + size)` covered by a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressRange {
    /// First covered byte.
    pub start: u32,
    /// Covered length in bytes.
    pub size: u64,
}

impl AddressRange {
    /// Exclusive end of the range.
    #[must_use]
    pub const fn end(self) -> u64 {
        self.start as u64 + self.size
    }

    /// Returns `true` when `addr` lies inside the range.
    #[must_use]
    pub const fn contains(self, addr: u32) -> bool {
        addr >= self.start && (addr as u64) < self.end()
    }
}

/// Register values for one programmed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodedRegion {
    /// Full configuration octet, including the address-matching mode.
    pub cfg: u8,
    /// Value for the entry's `pmpaddr` register.
    pub addr: u32,
    /// Range the entry covers.
    pub range: AddressRange,
}

/// Encodes a four-byte region at `addr`.
///
/// # Errors
///
/// Returns [`PmpError::UnalignedAddress`] when `addr` is not a multiple of 4.
pub const fn encode_na4(config: RegionConfig, addr: u32) -> Result<EncodedRegion, PmpError> {
    if addr % NA4_SIZE != 0 {
        return Err(PmpError::UnalignedAddress { addr });
    }

    Ok(EncodedRegion {
        cfg: config.octet_bits() | AddressMode::Na4.octet_bits(),
        addr: addr >> 2,
        range: AddressRange {
            start: addr,
            size: NA4_SIZE as u64,
        },
    })
}

/// Encodes the naturally aligned power-of-two region `[base, base + size)`.
///
/// # Errors
///
/// Returns [`PmpError::InvalidSize`] when `size` is not a power of two of at
/// least [`NAPOT_MIN_SIZE`] bytes or `base` is not aligned to `size`.
pub const fn encode_napot(
    config: RegionConfig,
    base: u32,
    size: u32,
) -> Result<EncodedRegion, PmpError> {
    if !size.is_power_of_two() || size < NAPOT_MIN_SIZE || base % size != 0 {
        return Err(PmpError::InvalidSize { base, size });
    }

    // The low (size/8 - 1) ones encode the size; base bits above it are kept.
    let addr = (base >> 2) | ((size >> 3) - 1);

    Ok(EncodedRegion {
        cfg: config.octet_bits() | AddressMode::Napot.octet_bits(),
        addr,
        range: AddressRange {
            start: base,
            size: size as u64,
        },
    })
}

/// Decodes the range covered by an NA4 or NAPOT entry.
///
/// Returns `None` for disabled and TOR entries (TOR depends on the previous
/// entry) and for NAPOT ranges that do not fit the 32-bit address space.
#[must_use]
pub const fn decode_region(cfg: u8, pmpaddr: u32) -> Option<AddressRange> {
    match AddressMode::from_octet(cfg) {
        AddressMode::Off | AddressMode::Tor => None,
        AddressMode::Na4 => {
            let start = (pmpaddr as u64) << 2;
            if start > u32::MAX as u64 {
                return None;
            }
            Some(AddressRange {
                start: start as u32,
                size: NA4_SIZE as u64,
            })
        }
        AddressMode::Napot => {
            let ones = pmpaddr.trailing_ones();
            if ones > 29 {
                return None;
            }
            let size = 1u64 << (ones + 3);
            let start = ((pmpaddr as u64) & !((1u64 << ones) - 1)) << 2;
            if start + size > 1u64 << 32 {
                return None;
            }
            Some(AddressRange {
                start: start as u32,
                size,
            })
        }
    }
}

/// Extracts the configuration octet for entry `index` from its `pmpcfgN` value.
#[must_use]
pub const fn cfg_octet(pmpcfg: u32, index: u8) -> u8 {
    (pmpcfg >> ((index % 4) * 8)) as u8
}

/// Replaces the configuration octet for entry `index` inside a `pmpcfgN` value.
#[must_use]
pub const fn with_cfg_octet(pmpcfg: u32, index: u8, octet: u8) -> u32 {
    let shift = (index % 4) * 8;
    (pmpcfg & !(0xFF << shift)) | ((octet as u32) << shift)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::{
        cfg_octet, decode_region, encode_na4, encode_napot, with_cfg_octet, AddressMode,
        AddressRange, RegionConfig, RegionLock, RegionPermissions, CFG_L, CFG_R, CFG_W, CFG_X,
    };
    use crate::PmpError;

    const NONE: RegionConfig = RegionConfig::new(RegionLock::Unlocked, RegionPermissions::None);

    #[rstest]
    #[case(RegionLock::Unlocked, RegionPermissions::None, 0)]
    #[case(RegionLock::Locked, RegionPermissions::None, CFG_L)]
    #[case(RegionLock::Unlocked, RegionPermissions::ReadOnly, CFG_R)]
    #[case(RegionLock::Locked, RegionPermissions::ReadOnly, CFG_L | CFG_R)]
    #[case(RegionLock::Unlocked, RegionPermissions::WriteOnly, CFG_R | CFG_W)]
    #[case(RegionLock::Locked, RegionPermissions::ReadWrite, CFG_L | CFG_R | CFG_W)]
    #[case(RegionLock::Unlocked, RegionPermissions::ExecuteOnly, CFG_X)]
    #[case(RegionLock::Locked, RegionPermissions::SharedReadWrite, CFG_W | CFG_X)]
    #[case(RegionLock::Unlocked, RegionPermissions::SharedExecuteOnly, CFG_L | CFG_W)]
    fn permission_octets_follow_rule_table(
        #[case] lock: RegionLock,
        #[case] permissions: RegionPermissions,
        #[case] expected: u8,
    ) {
        assert_eq!(RegionConfig::new(lock, permissions).octet_bits(), expected);
    }

    #[rstest]
    #[case(0x0020_0001)]
    #[case(0x0020_0002)]
    #[case(0x0020_0003)]
    #[case(u32::MAX)]
    fn na4_rejects_unaligned_addresses(#[case] addr: u32) {
        assert_eq!(
            encode_na4(NONE, addr),
            Err(PmpError::UnalignedAddress { addr })
        );
    }

    #[test]
    fn na4_sets_mode_and_shifts_address() {
        let region = encode_na4(NONE, 0x0020_0004).expect("aligned address");
        assert_eq!(AddressMode::from_octet(region.cfg), AddressMode::Na4);
        assert_eq!(region.addr, 0x0008_0001);
        assert_eq!(
            region.range,
            AddressRange {
                start: 0x0020_0004,
                size: 4
            }
        );
    }

    #[rstest]
    #[case(0, 12)]
    #[case(0x1000, 12)]
    #[case(0, 4)]
    #[case(0, 0)]
    #[case(0x0010_0008, 16)]
    fn napot_rejects_bad_sizes_and_misaligned_bases(#[case] base: u32, #[case] size: u32) {
        assert_eq!(
            encode_napot(NONE, base, size),
            Err(PmpError::InvalidSize { base, size })
        );
    }

    #[test]
    fn napot_encodes_shared_windows() {
        let code = encode_napot(
            RegionConfig::new(RegionLock::Unlocked, RegionPermissions::SharedExecuteOnly),
            0x0010_0000,
            0x0008_0000,
        )
        .expect("aligned window");
        assert_eq!(code.addr, 0x0004_FFFF);
        assert_eq!(code.cfg, CFG_L | CFG_W | AddressMode::Napot.octet_bits());

        let data = encode_napot(NONE, 0, 0x0040_0000).expect("aligned window");
        assert_eq!(data.addr, 0x0007_FFFF);
    }

    #[test]
    fn disabled_and_tor_entries_decode_to_nothing() {
        assert_eq!(decode_region(AddressMode::Off.octet_bits(), 0x1234), None);
        assert_eq!(decode_region(AddressMode::Tor.octet_bits(), 0x1234), None);
    }

    #[test]
    fn octet_helpers_touch_only_their_lane() {
        let packed = with_cfg_octet(0xAABB_CCDD, 2, 0x11);
        assert_eq!(packed, 0xAA11_CCDD);
        assert_eq!(cfg_octet(packed, 2), 0x11);
        assert_eq!(cfg_octet(packed, 7), 0xAA);
    }

    proptest! {
        #[test]
        fn napot_decode_inverts_encode(shift in 3u32..32, slot in any::<u32>()) {
            let size = 1u32 << shift;
            let base = slot.wrapping_mul(size);
            let region = encode_napot(NONE, base, size).expect("valid napot request");
            prop_assert_eq!(
                decode_region(region.cfg, region.addr),
                Some(AddressRange { start: base, size: u64::from(size) })
            );
        }

        #[test]
        fn na4_accepts_exactly_word_aligned_addresses(addr in any::<u32>()) {
            match encode_na4(NONE, addr) {
                Ok(region) => {
                    prop_assert_eq!(addr % 4, 0);
                    prop_assert_eq!(region.range, AddressRange { start: addr, size: 4 });
                    prop_assert_eq!(
                        decode_region(region.cfg, region.addr),
                        Some(region.range)
                    );
                }
                Err(error) => {
                    prop_assert_ne!(addr % 4, 0);
                    prop_assert_eq!(error, PmpError::UnalignedAddress { addr });
                }
            }
        }
    }
}
