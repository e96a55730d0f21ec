use std::fmt;

use crate::PrivilegeLevel;

/// `mcause` for an instruction access fault.
pub const MCAUSE_INSN_ACCESS: u32 = 1;
/// `mcause` for a load access fault.
pub const MCAUSE_LOAD_ACCESS: u32 = 5;
/// `mcause` for a store/AMO access fault.
pub const MCAUSE_STORE_ACCESS: u32 = 7;
/// `mcause` for an environment call from user mode.
pub const MCAUSE_ECALL_U: u32 = 8;
/// `mcause` for an environment call from supervisor mode.
pub const MCAUSE_ECALL_S: u32 = 9;
/// `mcause` for an environment call from machine mode.
pub const MCAUSE_ECALL_M: u32 = 11;
/// `mcause` bit distinguishing asynchronous interrupts from exceptions.
pub const MCAUSE_INTERRUPT: u32 = 1 << 31;

/// Memory access kinds the protection unit can deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Instruction fetch.
    InstructionFetch,
    /// Data read.
    Read,
    /// Data write.
    Write,
}

impl AccessKind {
    /// Returns the access-fault `mcause` raised when this access is denied.
    #[must_use]
    pub const fn mcause(self) -> u32 {
        match self {
            Self::InstructionFetch => MCAUSE_INSN_ACCESS,
            Self::Read => MCAUSE_LOAD_ACCESS,
            Self::Write => MCAUSE_STORE_ACCESS,
        }
    }

    /// Maps an access-fault `mcause` back to its access kind.
    #[must_use]
    pub const fn from_mcause(mcause: u32) -> Option<Self> {
        match mcause {
            MCAUSE_INSN_ACCESS => Some(Self::InstructionFetch),
            MCAUSE_LOAD_ACCESS => Some(Self::Read),
            MCAUSE_STORE_ACCESS => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstructionFetch => "instruction fetch",
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Classification of a trap by its `mcause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapCause {
    /// `ecall` issued from user or machine mode.
    ServiceCall {
        /// Privilege level the call was issued from.
        from: PrivilegeLevel,
    },
    /// Protection violation of the given kind.
    AccessFault(AccessKind),
    /// Anything else, including interrupts and supervisor `ecall`.
    Unexpected(u32),
}

impl TrapCause {
    /// Decodes a raw `mcause` value.
    #[must_use]
    pub const fn from_mcause(mcause: u32) -> Self {
        if mcause & MCAUSE_INTERRUPT != 0 {
            return Self::Unexpected(mcause);
        }

        match mcause {
            MCAUSE_ECALL_U => Self::ServiceCall {
                from: PrivilegeLevel::User,
            },
            MCAUSE_ECALL_M => Self::ServiceCall {
                from: PrivilegeLevel::Machine,
            },
            _ => match AccessKind::from_mcause(mcause) {
                Some(kind) => Self::AccessFault(kind),
                None => Self::Unexpected(mcause),
            },
        }
    }
}
