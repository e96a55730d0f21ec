//! Control and status register surface consumed by the harness.
//!
//! The harness never touches hardware directly. Everything it needs from the
//! hart (register reads and writes, issuing one instruction, returning from a
//! trap) goes through the [`Hart`] trait so that the same protocol runs against
//! real silicon glue or the software model in [`crate::sim`].

use std::fmt;

/// Number of PMP entries implemented by an RV32 hart with the full register set.
pub const PMP_ENTRY_COUNT: usize = 16;
/// Number of `pmpcfgN` registers; each holds four configuration octets.
pub const PMP_CFG_REGISTER_COUNT: usize = PMP_ENTRY_COUNT / 4;

/// Bit offset of the `mstatus.MPP` field.
pub const MSTATUS_MPP_SHIFT: u32 = 11;
/// Mask of the two-bit `mstatus.MPP` field.
pub const MSTATUS_MPP_MASK: u32 = 0b11 << MSTATUS_MPP_SHIFT;

/// `mseccfg.MML`: machine mode lockdown.
pub const MSECCFG_MML: u32 = 1 << 0;
/// `mseccfg.MMWP`: machine mode whitelist policy.
pub const MSECCFG_MMWP: u32 = 1 << 1;
/// `mseccfg.RLB`: rule locking bypass.
pub const MSECCFG_RLB: u32 = 1 << 2;

/// Width in bytes of one instruction; `mepc` advances by this much past an `ecall`.
pub const INSTRUCTION_BYTES: u32 = 4;

/// Machine-level CSRs the harness reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Csr {
    /// Machine status; only `MPP` is used.
    Mstatus,
    /// Trap cause code.
    Mcause,
    /// Trap value; the faulting address for access faults.
    Mtval,
    /// Saved return address of the trapping instruction.
    Mepc,
    /// Machine security configuration (`MML`, `MMWP`, `RLB`).
    Mseccfg,
    /// One of the `pmpcfg0..=3` registers.
    Pmpcfg(u8),
    /// One of the `pmpaddr0..=15` registers.
    Pmpaddr(u8),
}

impl Csr {
    /// Returns the architectural CSR number.
    #[must_use]
    pub const fn number(self) -> u16 {
        match self {
            Self::Mstatus => 0x300,
            Self::Mepc => 0x341,
            Self::Mcause => 0x342,
            Self::Mtval => 0x343,
            Self::Mseccfg => 0x747,
            Self::Pmpcfg(n) => 0x3A0 + n as u16,
            Self::Pmpaddr(n) => 0x3B0 + n as u16,
        }
    }

    /// Returns the `pmpcfgN` register holding the octet for entry `index`.
    #[must_use]
    pub const fn pmpcfg_for_entry(index: u8) -> Self {
        Self::Pmpcfg(index / 4)
    }
}

impl fmt::Display for Csr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mstatus => f.write_str("mstatus"),
            Self::Mcause => f.write_str("mcause"),
            Self::Mtval => f.write_str("mtval"),
            Self::Mepc => f.write_str("mepc"),
            Self::Mseccfg => f.write_str("mseccfg"),
            Self::Pmpcfg(n) => write!(f, "pmpcfg{n}"),
            Self::Pmpaddr(n) => write!(f, "pmpaddr{n}"),
        }
    }
}

/// An instruction the harness asks the hart to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Word load from `addr`.
    Load {
        /// Target address.
        addr: u32,
    },
    /// Word store of `value` to `addr`.
    Store {
        /// Target address.
        addr: u32,
        /// Stored value.
        value: u32,
    },
    /// Call into the routine at `target`, fetching its first instruction.
    Call {
        /// Address of the called routine.
        target: u32,
    },
    /// `ecall` with `arg` in `a0`.
    ServiceCall {
        /// Service-call argument.
        arg: u32,
    },
}

/// Result of asking the hart to execute one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecOutcome {
    /// The instruction completed without a trap.
    Retired,
    /// A trap was taken; trap CSRs are latched and the hart runs in machine mode.
    Trapped {
        /// Value written to `mepc` on trap entry.
        epc: u32,
    },
}

/// Register-level access to one hart.
pub trait Hart {
    /// Reads a CSR.
    fn read_csr(&self, csr: Csr) -> u32;

    /// Writes a CSR. Hardware may ignore or mask the write (WARL fields, locks).
    fn write_csr(&mut self, csr: Csr, value: u32);

    /// Sets `mask` bits in a CSR (`csrs`).
    fn set_csr_bits(&mut self, csr: Csr, mask: u32) {
        let value = self.read_csr(csr);
        self.write_csr(csr, value | mask);
    }

    /// Clears `mask` bits in a CSR (`csrc`).
    fn clear_csr_bits(&mut self, csr: Csr, mask: u32) {
        let value = self.read_csr(csr);
        self.write_csr(csr, value & !mask);
    }

    /// Value of `a0` captured at the most recent trap entry.
    fn service_call_arg(&self) -> u32;

    /// Executes one instruction at the current privilege level.
    fn execute(&mut self, instruction: Instruction) -> ExecOutcome;

    /// Performs `mret` and returns the address execution resumes at.
    fn trap_return(&mut self) -> u32;
}
