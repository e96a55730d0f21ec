//! Trap dispatcher and the hosted trap-delivery loop.
//!
//! Every trap is classified once, in this order:
//! 1. service call with a recognised argument: apply the requested level to
//!    `mstatus.MPP` and step `mepc` past the `ecall`;
//! 2. access fault while the ledger is armed: record it, then reprogram the
//!    test region with the case's allow configuration so the faulting
//!    instruction succeeds when re-executed;
//! 3. anything else: report and halt.

use thiserror::Error;

use crate::console::Console;
use crate::csr::{Csr, ExecOutcome, Hart, Instruction, INSTRUCTION_BYTES, MSTATUS_MPP_MASK};
use crate::ledger::{FaultMatch, LedgerError};
use crate::privilege::TransitionRequest;
use crate::{AccessKind, PmpError, PrivilegeLevel, TrapCause, TrapContext};

/// Conditions after which the harness state is unknown and the run halts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalTrap {
    /// Trap cause the harness never expects.
    #[error("unexpected trap: mcause={mcause:#010x} mtval={mtval:#010x}")]
    UnexpectedTrap {
        /// Raw `mcause`.
        mcause: u32,
        /// Raw `mtval`.
        mtval: u32,
    },
    /// Service call whose argument is not a transition request.
    #[error("unexpected ecall argument {arg:#010x}")]
    UnknownServiceCall {
        /// Value of `a0`.
        arg: u32,
    },
    /// Protection violation with no expectation armed.
    #[error("unexpected {kind} access fault at {address:#010x}")]
    UnarmedViolation {
        /// Decoded fault kind.
        kind: AccessKind,
        /// Faulting address.
        address: u32,
    },
    /// The ledger was used out of protocol.
    #[error("expectation ledger misuse: {0}")]
    Ledger(#[from] LedgerError),
    /// The trap path could not apply the allow configuration.
    #[error("failed to configure pmp in trap handler: {0}")]
    Reconfigure(#[source] PmpError),
}

/// What a handled trap resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapResolution {
    /// Privilege transition applied; `mret` resumes after the `ecall`.
    Transition(PrivilegeLevel),
    /// Expected fault recorded; `mret` re-executes the faulting instruction.
    ExpectedFault(FaultMatch),
}

/// Handles the trap currently latched in the hart's trap CSRs.
///
/// # Errors
///
/// Returns [`FatalTrap`] for every trap outside the two handled paths. The
/// condition has already been written to `console` when this returns.
pub fn dispatch_trap<H: Hart, C: Console>(
    context: &mut TrapContext,
    hart: &mut H,
    console: &mut C,
) -> Result<TrapResolution, FatalTrap> {
    let mcause = hart.read_csr(Csr::Mcause);
    let mtval = hart.read_csr(Csr::Mtval);
    let cause = TrapCause::from_mcause(mcause);
    log::debug!("trap: {cause:?} mtval={mtval:#010x}");

    let resolution = match cause {
        TrapCause::ServiceCall { .. } => handle_service_call(hart),
        TrapCause::AccessFault(kind) if context.ledger.is_armed() => {
            handle_expected_fault(context, hart, console, kind, mtval)
        }
        TrapCause::AccessFault(kind) => Err(FatalTrap::UnarmedViolation {
            kind,
            address: mtval,
        }),
        TrapCause::Unexpected(mcause) => Err(FatalTrap::UnexpectedTrap { mcause, mtval }),
    };

    if let Err(fatal) = &resolution {
        report_fatal(console, fatal);
        log::error!("halting: {fatal}");
    }
    resolution
}

/// Executes `instruction`, dispatching any trap it raises.
///
/// After each handled trap the hart returns with `mret`. If execution resumes
/// at the trapping address the instruction is issued again; otherwise it has
/// retired. A second violation in one armed period is fatal, so this loop
/// runs at most twice per monitored access.
///
/// # Errors
///
/// Propagates [`FatalTrap`] from the dispatcher.
pub fn deliver<H: Hart, C: Console>(
    context: &mut TrapContext,
    hart: &mut H,
    console: &mut C,
    instruction: Instruction,
) -> Result<(), FatalTrap> {
    loop {
        match hart.execute(instruction) {
            ExecOutcome::Retired => return Ok(()),
            ExecOutcome::Trapped { epc } => {
                dispatch_trap(context, hart, console)?;
                let resume = hart.trap_return();
                if resume != epc {
                    return Ok(());
                }
                log::debug!("re-executing {instruction:?} at {epc:#010x}");
            }
        }
    }
}

fn handle_service_call<H: Hart>(hart: &mut H) -> Result<TrapResolution, FatalTrap> {
    let arg = hart.service_call_arg();
    let request =
        TransitionRequest::from_arg(arg).ok_or(FatalTrap::UnknownServiceCall { arg })?;
    let target = request.target();

    let mstatus = hart.read_csr(Csr::Mstatus);
    hart.write_csr(Csr::Mstatus, (mstatus & !MSTATUS_MPP_MASK) | target.mpp_bits());
    let mepc = hart.read_csr(Csr::Mepc);
    hart.write_csr(Csr::Mepc, mepc.wrapping_add(INSTRUCTION_BYTES));

    log::debug!("service call: returning to {target} mode");
    Ok(TrapResolution::Transition(target))
}

fn handle_expected_fault<H: Hart, C: Console>(
    context: &mut TrapContext,
    hart: &mut H,
    console: &mut C,
    kind: AccessKind,
    mtval: u32,
) -> Result<TrapResolution, FatalTrap> {
    let verdict = context.ledger.record_fault(kind, mtval)?;

    match verdict {
        FaultMatch::Matched => log::debug!("expected {kind} fault at {mtval:#010x}"),
        FaultMatch::KindMismatch { expected, observed } => {
            console.puts("FAIL\nUnexpected MCAUSE\nExpected: ");
            console.puthex(expected.mcause());
            console.puts("\nObserved: ");
            console.puthex(observed.mcause());
            console.puts("\n");
            log::warn!("expected {expected} fault, observed {observed}");
        }
        FaultMatch::AddressMismatch { expected, observed } => {
            console.puts("FAIL\nUnexpected fault address (MTVAL)\nExpected: ");
            console.puthex(expected);
            console.puts("\nObserved: ");
            console.puthex(observed);
            console.puts("\n");
            log::warn!("expected fault at {expected:#010x}, observed {observed:#010x}");
        }
    }

    // Open the word that actually faulted, even on mismatch, so re-execution completes.
    let fault_word = mtval & !(INSTRUCTION_BYTES - 1);
    context
        .pmp
        .configure_na4(hart, context.test_region, context.allow_config, fault_word)
        .map_err(FatalTrap::Reconfigure)?;

    Ok(TrapResolution::ExpectedFault(verdict))
}

fn report_fatal<C: Console>(console: &mut C, fatal: &FatalTrap) {
    match fatal {
        FatalTrap::UnexpectedTrap { mcause, mtval } => {
            console.puts("FAIL\nUnexpected exception!\nMCAUSE: ");
            console.puthex(*mcause);
            console.puts("\nMTVAL: ");
            console.puthex(*mtval);
            console.puts("\n");
        }
        FatalTrap::UnknownServiceCall { arg } => {
            console.puts("FAIL\nUnexpected ecall arg ");
            console.puthex(*arg);
            console.puts("\n");
        }
        FatalTrap::UnarmedViolation { kind, address } => {
            console.puts("FAIL\nUnexpected exception!\nMCAUSE: ");
            console.puthex(kind.mcause());
            console.puts("\nMTVAL: ");
            console.puthex(*address);
            console.puts("\n");
        }
        FatalTrap::Ledger(error) => {
            console.puts("FAIL\n");
            console.puts(&error.to_string());
            console.puts("\n");
        }
        FatalTrap::Reconfigure(error) => {
            console.puts("FAIL\nFailure to configure PMP in trap handler: ");
            console.puts(&error.to_string());
            console.puts("\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{deliver, dispatch_trap, FatalTrap, TrapResolution};
    use crate::console::Transcript;
    use crate::csr::{Csr, Hart, Instruction, MSTATUS_MPP_MASK};
    use crate::ledger::{FaultMatch, LedgerError};
    use crate::pmp::{PmpProgrammer, RegionConfig, RegionLock, RegionPermissions, CFG_R, CFG_W};
    use crate::sim::SimHart;
    use crate::{
        AccessKind, HarnessConfig, PrivilegeLevel, TrapContext, MCAUSE_ECALL_M, MCAUSE_ECALL_S,
        MCAUSE_STORE_ACCESS,
    };

    const WRITE_DENIED_M: RegionConfig =
        RegionConfig::new(RegionLock::Unlocked, RegionPermissions::ReadWrite);
    const WRITE_ALLOWED_M: RegionConfig =
        RegionConfig::new(RegionLock::Locked, RegionPermissions::ReadWrite);

    fn prepared() -> (HarnessConfig, SimHart, TrapContext, Transcript) {
        let config = HarnessConfig::default();
        let mut hart = SimHart::new(&config);
        let mut context = TrapContext::new(&config);
        context.prepare(&mut hart, &config).expect("default layout");
        (config, hart, context, Transcript::default())
    }

    #[test]
    fn service_call_sets_mpp_and_steps_mepc() {
        let (_, mut hart, mut context, mut console) = prepared();
        hart.latch_trap(MCAUSE_ECALL_M, 0, 0x0010_0000, 0);

        let resolution = dispatch_trap(&mut context, &mut hart, &mut console);

        assert_eq!(resolution, Ok(TrapResolution::Transition(PrivilegeLevel::User)));
        assert_eq!(hart.read_csr(Csr::Mstatus) & MSTATUS_MPP_MASK, 0);
        assert_eq!(hart.read_csr(Csr::Mepc), 0x0010_0004);
        assert!(!context.ledger.is_armed());
    }

    #[test]
    fn unknown_service_call_argument_is_fatal() {
        let (_, mut hart, mut context, mut console) = prepared();
        hart.latch_trap(MCAUSE_ECALL_M, 0, 0x0010_0000, 7);

        assert_eq!(
            dispatch_trap(&mut context, &mut hart, &mut console),
            Err(FatalTrap::UnknownServiceCall { arg: 7 })
        );
        assert_eq!(console.as_str(), "FAIL\nUnexpected ecall arg 00000007\n");
    }

    #[test]
    fn supervisor_ecall_is_fatal() {
        let (_, mut hart, mut context, mut console) = prepared();
        hart.latch_trap(MCAUSE_ECALL_S, 0, 0x0010_0000, 0);

        assert_eq!(
            dispatch_trap(&mut context, &mut hart, &mut console),
            Err(FatalTrap::UnexpectedTrap {
                mcause: MCAUSE_ECALL_S,
                mtval: 0
            })
        );
        assert!(console.as_str().starts_with("FAIL\nUnexpected exception!\n"));
    }

    #[test]
    fn violation_while_disarmed_is_fatal() {
        let (config, mut hart, mut context, mut console) = prepared();
        let addr = config.probes.write_word;
        hart.latch_trap(MCAUSE_STORE_ACCESS, addr, 0x0010_0000, 0);

        assert_eq!(
            dispatch_trap(&mut context, &mut hart, &mut console),
            Err(FatalTrap::UnarmedViolation {
                kind: AccessKind::Write,
                address: addr
            })
        );
    }

    #[test]
    fn expected_fault_reprograms_test_region_with_allow_config() {
        let (config, mut hart, mut context, mut console) = prepared();
        let addr = config.probes.write_word;
        context.allow_config = WRITE_ALLOWED_M;
        context.ledger.arm(AccessKind::Write, addr).expect("arm");
        hart.latch_trap(MCAUSE_STORE_ACCESS, addr, 0x0010_0000, 0);

        let resolution = dispatch_trap(&mut context, &mut hart, &mut console);

        assert_eq!(
            resolution,
            Ok(TrapResolution::ExpectedFault(FaultMatch::Matched))
        );
        let region = PmpProgrammer::region(&hart, 0).expect("slot 0");
        assert!(region.locked);
        assert_eq!(region.cfg & (CFG_R | CFG_W), CFG_R | CFG_W);
        assert_eq!(region.range.map(|range| range.start), Some(addr));
        assert!(context.ledger.is_armed());
        assert!(console.as_str().is_empty());
    }

    #[test]
    fn denied_store_is_retried_once_and_then_retires() {
        let (config, mut hart, mut context, mut console) = prepared();
        let addr = config.probes.write_word;
        context
            .pmp
            .configure_na4(&mut hart, 0, WRITE_DENIED_M, addr)
            .expect("disallow");
        context.allow_config = WRITE_ALLOWED_M;
        context.ledger.arm(AccessKind::Write, addr).expect("arm");

        deliver(
            &mut context,
            &mut hart,
            &mut console,
            Instruction::Store {
                addr,
                value: 0xDEAD_BEEF,
            },
        )
        .expect("store completes");

        assert_eq!(hart.access_faults_taken(), 1);
        assert_eq!(hart.read_word(addr), 0xDEAD_BEEF);
        let outcome = context.ledger.disarm_and_collect().expect("collect");
        assert!(outcome.fault_observed);
        assert!(!outcome.mismatch);
    }

    #[test]
    fn second_violation_in_one_period_halts() {
        let (config, mut hart, mut context, mut console) = prepared();
        let addr = config.probes.write_word;
        context.allow_config = WRITE_DENIED_M;
        context
            .pmp
            .configure_na4(&mut hart, 0, WRITE_DENIED_M, addr)
            .expect("disallow");
        context.ledger.arm(AccessKind::Write, addr).expect("arm");

        let result = deliver(
            &mut context,
            &mut hart,
            &mut console,
            Instruction::Store { addr, value: 1 },
        );

        assert_eq!(
            result,
            Err(FatalTrap::Ledger(LedgerError::AlreadyObserved))
        );
        assert_eq!(hart.access_faults_taken(), 2);
    }
}
