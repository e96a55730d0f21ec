//! Core crate for the PMP access-control validation harness.

/// Control and status registers, instructions and the hart seam.
pub mod csr;
pub use csr::{Csr, ExecOutcome, Hart, Instruction};

/// Access kinds and trap cause classification.
pub mod fault;
pub use fault::{
    AccessKind, TrapCause, MCAUSE_ECALL_M, MCAUSE_ECALL_S, MCAUSE_ECALL_U, MCAUSE_INSN_ACCESS,
    MCAUSE_INTERRUPT, MCAUSE_LOAD_ACCESS, MCAUSE_STORE_ACCESS,
};

/// PMP region encoding and slot programming.
pub mod pmp;
pub use pmp::{
    AddressRange, PmpError, PmpProgrammer, ProgrammedRegion, RegionConfig, RegionLock,
    RegionPermissions,
};

/// Privilege levels and the service-call gate.
pub mod privilege;
pub use privilege::{
    switch_privilege_level, GateError, PrivilegeLevel, TransitionError, TransitionRequest,
};

/// Expected-fault bookkeeping.
pub mod ledger;
pub use ledger::{Expectation, ExpectationLedger, FaultMatch, LedgerError, LedgerOutcome};

/// Harness address layout.
pub mod config;
pub use config::{HarnessConfig, ProbeLayout, SharedWindow, READ_PROBE_SEED, WRITE_PROBE_VALUE};

/// State shared with the trap path.
pub mod context;
pub use context::{SetupError, TrapContext};

/// Console output.
pub mod console;
pub use console::{format_hex, Console, Transcript};

/// Trap dispatch and instruction delivery.
pub mod dispatch;
pub use dispatch::{deliver, dispatch_trap, FatalTrap, TrapResolution};

/// Case runner.
pub mod runner;
pub use runner::{
    AccessCase, CaseFailure, CaseResult, CaseVerdict, Harness, HarnessError, SuiteReport,
    STANDARD_CASES,
};

/// Software hart for hosted runs.
pub mod sim;
pub use sim::SimHart;

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
