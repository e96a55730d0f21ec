//! Build-time layout of the harness: region slots, shared windows and probes.

use crate::AccessKind;

/// Value the read probe word holds at reset.
pub const READ_PROBE_SEED: u32 = 0xFACE_F00D;
/// Value stored by the write probe access.
pub const WRITE_PROBE_VALUE: u32 = 0xDEAD_BEEF;

/// An always-allowed window programmed once before any case runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SharedWindow {
    /// PMP slot holding the window.
    pub index: u8,
    /// Window base; must be aligned to `size`.
    pub base: u32,
    /// Window size; a power of two of at least 8 bytes.
    pub size: u32,
}

/// Addresses the monitored accesses target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProbeLayout {
    /// Word read by read cases.
    pub read_word: u32,
    /// Word written by write cases.
    pub write_word: u32,
    /// Entry of the routine called by instruction-fetch cases.
    pub instruction: u32,
}

impl ProbeLayout {
    /// Returns the probe address exercised by `kind`.
    #[must_use]
    pub const fn address_for(&self, kind: AccessKind) -> u32 {
        match kind {
            AccessKind::Read => self.read_word,
            AccessKind::Write => self.write_word,
            AccessKind::InstructionFetch => self.instruction,
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HarnessConfig {
    /// Slot reprogrammed by every case. Must be lower-numbered than the windows.
    pub test_region: u8,
    /// Shared execute-only window over the harness code.
    pub shared_code: SharedWindow,
    /// Shared read-write window over the harness data.
    pub shared_data: SharedWindow,
    /// Probe addresses.
    pub probes: ProbeLayout,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test_region: 0,
            shared_code: SharedWindow {
                index: 1,
                base: 0x0010_0000,
                size: 0x0008_0000,
            },
            shared_data: SharedWindow {
                index: 2,
                base: 0x0000_0000,
                size: 0x0040_0000,
            },
            probes: ProbeLayout {
                read_word: 0x0020_0000,
                write_word: 0x0020_0004,
                instruction: 0x0010_0400,
            },
        }
    }
}
