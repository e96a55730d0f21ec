//! Harness state reachable from the trap path.

use thiserror::Error;

use crate::config::SharedWindow;
use crate::csr::Hart;
use crate::pmp::{PmpProgrammer, RegionConfig, RegionLock, RegionPermissions};
use crate::{ExpectationLedger, HarnessConfig, PmpError};

/// Configuration of the shared execute-only window over the harness code.
pub const SHARED_EXECUTE: RegionConfig =
    RegionConfig::new(RegionLock::Unlocked, RegionPermissions::SharedExecuteOnly);
/// Configuration of the shared read-write window over the harness data.
pub const SHARED_READ_WRITE: RegionConfig =
    RegionConfig::new(RegionLock::Unlocked, RegionPermissions::SharedReadWrite);

/// Failure to establish the always-allowed windows before the first case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("could not configure shared {window} region")]
pub struct SetupError {
    /// Which window failed (`"X"` or `"RW"`).
    pub window: &'static str,
    /// Encoder failure.
    #[source]
    pub source: PmpError,
}

/// State the trap dispatcher consults and updates.
///
/// Owned by the harness and lent to the dispatcher for each trap; there is no
/// ambient global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapContext {
    /// Armed expectation and observed outcome.
    pub ledger: ExpectationLedger,
    /// Slot programmer carrying the relock capability.
    pub pmp: PmpProgrammer,
    /// Slot the current case reprograms.
    pub test_region: u8,
    /// Configuration the trap path applies after an expected fault.
    pub allow_config: RegionConfig,
}

impl TrapContext {
    /// Creates a disarmed context for `config`.
    #[must_use]
    pub const fn new(config: &HarnessConfig) -> Self {
        Self {
            ledger: ExpectationLedger::new(),
            pmp: PmpProgrammer::new(),
            test_region: config.test_region,
            allow_config: RegionConfig::new(RegionLock::Unlocked, RegionPermissions::None),
        }
    }

    /// Enters rule locking bypass and machine mode lockdown, then programs
    /// both shared windows.
    ///
    /// If the hart refuses the bypass the windows are still attempted; a
    /// window the hart then ignores is reported as [`SetupError`].
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] naming the window that could not be programmed.
    pub fn prepare<H: Hart>(
        &mut self,
        hart: &mut H,
        config: &HarnessConfig,
    ) -> Result<(), SetupError> {
        if !self.pmp.enable_rule_locking_bypass(hart) {
            log::warn!("continuing without rule locking bypass");
        }
        PmpProgrammer::enable_machine_mode_lockdown(hart);

        self.configure_window(hart, config.shared_code, SHARED_EXECUTE, "X")?;
        self.configure_window(hart, config.shared_data, SHARED_READ_WRITE, "RW")
    }

    fn configure_window<H: Hart>(
        &self,
        hart: &mut H,
        window: SharedWindow,
        region: RegionConfig,
        name: &'static str,
    ) -> Result<(), SetupError> {
        self.pmp
            .configure_napot(hart, window.index, region, window.base, window.size)
            .map(|_| ())
            .map_err(|source| SetupError {
                window: name,
                source,
            })
    }
}
