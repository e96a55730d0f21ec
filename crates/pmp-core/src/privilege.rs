//! Privilege levels and the trap-mediated gate between them.
//!
//! A transition is a single `ecall` carrying the requested level in `a0`. The
//! dispatcher's service-call path writes the level into `mstatus.MPP` and steps
//! `mepc` past the `ecall`, so `mret` resumes after it at the new level.

use std::fmt;

use thiserror::Error;

use crate::csr::{Hart, Instruction, MSTATUS_MPP_SHIFT};
use crate::console::Console;
use crate::dispatch::{deliver, FatalTrap};
use crate::TrapContext;

/// Service-call argument requesting user mode.
pub const SERVICE_CALL_ENTER_USER: u32 = 0;
/// Service-call argument requesting machine mode.
pub const SERVICE_CALL_ENTER_MACHINE: u32 = 1;

/// Execution privilege level, valued as in `mstatus.MPP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// User mode.
    User = 0,
    /// Supervisor mode. Not used by the harness.
    Supervisor = 1,
    /// Machine mode.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Decodes a two-bit `MPP` value. The reserved encoding `2` yields `None`.
    #[must_use]
    pub const fn from_mpp(bits: u32) -> Option<Self> {
        match bits & 0b11 {
            0 => Some(Self::User),
            1 => Some(Self::Supervisor),
            3 => Some(Self::Machine),
            _ => None,
        }
    }

    /// Returns the level's bits positioned in `mstatus`.
    #[must_use]
    pub const fn mpp_bits(self) -> u32 {
        (self as u32) << MSTATUS_MPP_SHIFT
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::Supervisor => "supervisor",
            Self::Machine => "machine",
        })
    }
}

/// A recognised privilege-transition service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionRequest {
    /// Return from the trap into user mode.
    EnterUser,
    /// Return from the trap into machine mode.
    EnterMachine,
}

impl TransitionRequest {
    /// Builds the request for `level`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UnsupportedLevel`] for supervisor mode.
    pub const fn for_level(level: PrivilegeLevel) -> Result<Self, GateError> {
        match level {
            PrivilegeLevel::User => Ok(Self::EnterUser),
            PrivilegeLevel::Machine => Ok(Self::EnterMachine),
            PrivilegeLevel::Supervisor => Err(GateError::UnsupportedLevel(level)),
        }
    }

    /// Decodes a service-call argument.
    #[must_use]
    pub const fn from_arg(arg: u32) -> Option<Self> {
        match arg {
            SERVICE_CALL_ENTER_USER => Some(Self::EnterUser),
            SERVICE_CALL_ENTER_MACHINE => Some(Self::EnterMachine),
            _ => None,
        }
    }

    /// Service-call argument carried in `a0`.
    #[must_use]
    pub const fn arg(self) -> u32 {
        match self {
            Self::EnterUser => SERVICE_CALL_ENTER_USER,
            Self::EnterMachine => SERVICE_CALL_ENTER_MACHINE,
        }
    }

    /// Level the hart runs at after the trap returns.
    #[must_use]
    pub const fn target(self) -> PrivilegeLevel {
        match self {
            Self::EnterUser => PrivilegeLevel::User,
            Self::EnterMachine => PrivilegeLevel::Machine,
        }
    }
}

/// Gate refusals, reported to the caller without touching the hart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum GateError {
    /// The gate only moves between user and machine mode.
    #[error("privilege level {0} is not supported by the gate")]
    UnsupportedLevel(PrivilegeLevel),
}

/// Failure of a requested transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// Request refused before any trap was issued.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// The trap path halted.
    #[error(transparent)]
    Fatal(#[from] FatalTrap),
}

/// Switches the hart to `level` through a service-call trap.
///
/// Returns once the trap has been handled and execution has resumed after the
/// `ecall`, now running at `level`.
///
/// # Errors
///
/// Returns [`TransitionError::Gate`] for unsupported levels and
/// [`TransitionError::Fatal`] when the trap path halts.
pub fn switch_privilege_level<H: Hart, C: Console>(
    context: &mut TrapContext,
    hart: &mut H,
    console: &mut C,
    level: PrivilegeLevel,
) -> Result<(), TransitionError> {
    let request = TransitionRequest::for_level(level)?;
    log::debug!("requesting transition to {level} mode");
    deliver(
        context,
        hart,
        console,
        Instruction::ServiceCall { arg: request.arg() },
    )?;
    Ok(())
}
