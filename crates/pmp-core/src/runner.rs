//! Case runner and the fixed six-case access-control sequence.
//!
//! ## Case protocol
//!
//! 1. Program the test region over the probe with the disallow configuration.
//! 2. Arm the ledger with the probe's fault kind and address.
//! 3. Optionally drop to user mode, perform the access, and return to machine mode.
//! 4. Collect the ledger: the case passes only if exactly the armed fault was seen.
//!
//! Configuration and gate errors fail the case and the run continues. Fatal
//! trap conditions end the run.

use thiserror::Error;

use crate::config::WRITE_PROBE_VALUE;
use crate::console::Console;
use crate::csr::{Hart, Instruction};
use crate::dispatch::{deliver, FatalTrap};
use crate::ledger::Expectation;
use crate::pmp::{RegionConfig, RegionLock, RegionPermissions};
use crate::privilege::{switch_privilege_level, GateError, TransitionError};
use crate::{AccessKind, HarnessConfig, PmpError, PrivilegeLevel, SetupError, TrapContext};

/// Machine may read; user may not.
pub const READ_ALLOW_M: RegionConfig =
    RegionConfig::new(RegionLock::Locked, RegionPermissions::ReadOnly);
/// Machine may read and write; user may not.
pub const WRITE_ALLOW_M: RegionConfig =
    RegionConfig::new(RegionLock::Locked, RegionPermissions::ReadWrite);
/// Machine may execute; user may not.
pub const INSN_ALLOW_M: RegionConfig =
    RegionConfig::new(RegionLock::Locked, RegionPermissions::ExecuteOnly);
/// User may read; machine may not.
pub const READ_ALLOW_U: RegionConfig =
    RegionConfig::new(RegionLock::Unlocked, RegionPermissions::ReadOnly);
/// User may read and write; machine may not.
pub const WRITE_ALLOW_U: RegionConfig =
    RegionConfig::new(RegionLock::Unlocked, RegionPermissions::ReadWrite);
/// User may execute; machine may not.
pub const INSN_ALLOW_U: RegionConfig =
    RegionConfig::new(RegionLock::Unlocked, RegionPermissions::ExecuteOnly);

/// One access-control case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessCase {
    /// Access performed against the matching probe.
    pub access: AccessKind,
    /// Configuration that must make the access fault.
    pub disallow: RegionConfig,
    /// Configuration the trap path applies so the access can complete.
    pub allow: RegionConfig,
    /// Name printed before the verdict.
    pub name: &'static str,
    /// Perform the access from user mode.
    pub user_mode: bool,
}

/// The fixed sequence: machine-mode read/write/execute, then the same from
/// user mode with the allow and disallow configurations swapped.
pub const STANDARD_CASES: [AccessCase; 6] = [
    AccessCase {
        access: AccessKind::Read,
        disallow: READ_ALLOW_U,
        allow: READ_ALLOW_M,
        name: "M read",
        user_mode: false,
    },
    AccessCase {
        access: AccessKind::Write,
        disallow: WRITE_ALLOW_U,
        allow: WRITE_ALLOW_M,
        name: "M write",
        user_mode: false,
    },
    AccessCase {
        access: AccessKind::InstructionFetch,
        disallow: INSN_ALLOW_U,
        allow: INSN_ALLOW_M,
        name: "M insn",
        user_mode: false,
    },
    AccessCase {
        access: AccessKind::Read,
        disallow: READ_ALLOW_M,
        allow: READ_ALLOW_U,
        name: "U read",
        user_mode: true,
    },
    AccessCase {
        access: AccessKind::Write,
        disallow: WRITE_ALLOW_M,
        allow: WRITE_ALLOW_U,
        name: "U write",
        user_mode: true,
    },
    AccessCase {
        access: AccessKind::InstructionFetch,
        disallow: INSN_ALLOW_M,
        allow: INSN_ALLOW_U,
        name: "U insn",
        user_mode: true,
    },
];

/// Why a case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CaseFailure {
    /// The disallow configuration could not be programmed.
    #[error("failure to configure pmp: {0}")]
    Configuration(#[source] PmpError),
    /// The privilege gate refused the transition.
    #[error("privilege transition failed: {0}")]
    Transition(#[source] GateError),
    /// The access completed without faulting.
    #[error("no exception seen when disallowed")]
    NoFaultObserved,
    /// A fault was seen but its kind or address was wrong.
    #[error("fault did not match the expectation")]
    Mismatch,
}

/// Verdict of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseVerdict {
    /// The disallowed access trapped exactly as expected.
    Success,
    /// The case failed.
    Fail(CaseFailure),
}

impl CaseVerdict {
    /// Returns `true` for [`CaseVerdict::Success`].
    #[must_use]
    pub const fn passed(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of running one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    /// Case name.
    pub name: String,
    /// Case verdict.
    pub verdict: CaseVerdict,
}

/// Results of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SuiteReport {
    /// Per-case results in execution order.
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    /// Number of failed cases.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.cases
            .iter()
            .filter(|case| !case.verdict.passed())
            .count()
    }

    /// Returns `true` when every case passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures() == 0
    }
}

/// Reasons a run stops before producing a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// Shared windows could not be established.
    #[error(transparent)]
    Setup(#[from] SetupError),
    /// The trap path halted.
    #[error(transparent)]
    Fatal(#[from] FatalTrap),
    /// The final return to machine mode was refused.
    #[error(transparent)]
    Transition(GateError),
}

impl From<TransitionError> for HarnessError {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::Gate(gate) => Self::Transition(gate),
            TransitionError::Fatal(fatal) => Self::Fatal(fatal),
        }
    }
}

/// Owns the hart, the console and the trap context for one run.
#[derive(Debug)]
pub struct Harness<H, C> {
    hart: H,
    console: C,
    context: TrapContext,
    config: HarnessConfig,
}

impl<H: Hart, C: Console> Harness<H, C> {
    /// Creates a harness. Nothing is written to the hart until a run starts.
    pub fn new(hart: H, console: C, config: HarnessConfig) -> Self {
        let context = TrapContext::new(&config);
        Self {
            hart,
            console,
            context,
            config,
        }
    }

    /// The hart under test.
    pub const fn hart(&self) -> &H {
        &self.hart
    }

    /// The console.
    pub const fn console(&self) -> &C {
        &self.console
    }

    /// The trap context.
    pub const fn context(&self) -> &TrapContext {
        &self.context
    }

    /// Consumes the harness, returning the hart and console.
    pub fn into_parts(self) -> (H, C) {
        (self.hart, self.console)
    }

    /// Enters rule locking bypass and lockdown, then programs the shared windows.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] after printing which window failed.
    pub fn prepare(&mut self) -> Result<(), SetupError> {
        self.context
            .prepare(&mut self.hart, &self.config)
            .inspect_err(|error| {
                self.console.puts("FAIL\nCould not configure shared ");
                self.console.puts(error.window);
                self.console.puts(" region\n");
                log::error!("{error}: {}", error.source);
            })
    }

    /// Prepares the hart, runs [`STANDARD_CASES`] and prints the aggregate verdict.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError`] when setup fails or the trap path halts.
    pub fn run_suite(&mut self) -> Result<SuiteReport, HarnessError> {
        self.prepare()?;

        let mut report = SuiteReport::default();
        for case in &STANDARD_CASES {
            report.cases.push(self.run_case(case)?);
        }

        switch_privilege_level(
            &mut self.context,
            &mut self.hart,
            &mut self.console,
            PrivilegeLevel::Machine,
        )?;

        let failures = report.failures();
        if failures == 0 {
            self.console.puts("PASS\n");
            log::info!("all {} cases passed", report.cases.len());
        } else {
            self.console.puthex(u32::try_from(failures).unwrap_or(u32::MAX));
            self.console.puts(" failures seen\n");
            log::warn!("{failures} of {} cases failed", report.cases.len());
        }
        Ok(report)
    }

    /// Runs one case and prints its verdict.
    ///
    /// # Errors
    ///
    /// Returns [`FatalTrap`] when the trap path halts.
    pub fn run_case(&mut self, case: &AccessCase) -> Result<CaseResult, FatalTrap> {
        let probe = self.config.probes.address_for(case.access);
        self.context.allow_config = case.allow;

        self.console.puts(case.name);
        self.console.puts("...");

        let configured = self.context.pmp.configure_na4(
            &mut self.hart,
            self.context.test_region,
            case.disallow,
            probe,
        );
        let verdict = match configured {
            Ok(range) => {
                let expectation = Expectation {
                    kind: case.access,
                    address: range.start,
                };
                self.monitored_access(case.access, probe, expectation, case.user_mode)?
            }
            Err(error) => CaseVerdict::Fail(CaseFailure::Configuration(error)),
        };

        Ok(self.finish(case.name, verdict))
    }

    /// Arms `expectation`, performs `access` against `target`, and scores the outcome.
    ///
    /// The test region must already hold the disallow configuration. Nothing
    /// is printed on success; failures found after the access print their own
    /// diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`FatalTrap`] when the trap path halts or the ledger is already armed.
    pub fn monitored_access(
        &mut self,
        access: AccessKind,
        target: u32,
        expectation: Expectation,
        user_mode: bool,
    ) -> Result<CaseVerdict, FatalTrap> {
        self.context
            .ledger
            .arm(expectation.kind, expectation.address)?;

        if user_mode {
            if let Some(verdict) = self.switch_or_abort(PrivilegeLevel::User)? {
                return Ok(verdict);
            }
        }

        let instruction = match access {
            AccessKind::Read => Instruction::Load { addr: target },
            AccessKind::Write => Instruction::Store {
                addr: target,
                value: WRITE_PROBE_VALUE,
            },
            AccessKind::InstructionFetch => Instruction::Call { target },
        };
        deliver(
            &mut self.context,
            &mut self.hart,
            &mut self.console,
            instruction,
        )?;

        if user_mode {
            if let Some(verdict) = self.switch_or_abort(PrivilegeLevel::Machine)? {
                return Ok(verdict);
            }
        }

        let outcome = self.context.ledger.disarm_and_collect()?;
        if !outcome.fault_observed {
            return Ok(CaseVerdict::Fail(CaseFailure::NoFaultObserved));
        }
        if outcome.mismatch {
            return Ok(CaseVerdict::Fail(CaseFailure::Mismatch));
        }
        Ok(CaseVerdict::Success)
    }

    fn switch_or_abort(
        &mut self,
        level: PrivilegeLevel,
    ) -> Result<Option<CaseVerdict>, FatalTrap> {
        match switch_privilege_level(
            &mut self.context,
            &mut self.hart,
            &mut self.console,
            level,
        ) {
            Ok(()) => Ok(None),
            Err(TransitionError::Gate(error)) => {
                self.context.ledger.disarm_and_collect()?;
                Ok(Some(CaseVerdict::Fail(CaseFailure::Transition(error))))
            }
            Err(TransitionError::Fatal(fatal)) => Err(fatal),
        }
    }

    fn finish(&mut self, name: &str, verdict: CaseVerdict) -> CaseResult {
        match verdict {
            CaseVerdict::Success => {
                self.console.puts("SUCCESS\n");
                log::info!("{name}: success");
            }
            // The trap path already printed the expected and observed values.
            CaseVerdict::Fail(CaseFailure::Mismatch) => {
                log::warn!("{name}: fault did not match the expectation");
            }
            CaseVerdict::Fail(failure) => {
                self.console.puts("FAIL\n");
                self.console.puts(&capitalize(&failure.to_string()));
                self.console.puts("\n");
                log::warn!("{name}: {failure}");
            }
        }

        CaseResult {
            name: name.to_owned(),
            verdict,
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        capitalize, CaseFailure, CaseVerdict, Harness, SuiteReport, STANDARD_CASES,
        WRITE_ALLOW_M, WRITE_ALLOW_U,
    };
    use crate::config::WRITE_PROBE_VALUE;
    use crate::console::{Console, Transcript};
    use crate::ledger::Expectation;
    use crate::AccessKind;
    use crate::pmp::{RegionConfig, RegionLock, RegionPermissions};
    use crate::sim::SimHart;
    use crate::{HarnessConfig, PmpError, PrivilegeLevel};

    fn harness() -> Harness<SimHart, Transcript> {
        let config = HarnessConfig::default();
        Harness::new(SimHart::new(&config), Transcript::default(), config)
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(4)]
    #[case(5)]
    fn each_standard_case_passes_with_exactly_one_fault(#[case] index: usize) {
        let mut harness = harness();
        harness.prepare().expect("shared windows");
        let case = STANDARD_CASES[index];

        let result = harness.run_case(&case).expect("no fatal trap");

        assert_eq!(result.verdict, CaseVerdict::Success);
        assert_eq!(harness.hart().access_faults_taken(), 1);
        assert_eq!(harness.hart().privilege(), PrivilegeLevel::Machine);
        assert!(!harness.context().ledger.is_armed());
        assert_eq!(
            harness.console().as_str(),
            format!("{}...SUCCESS\n", case.name)
        );
    }

    #[test]
    fn allowed_access_is_reported_as_missing_fault() {
        let mut harness = harness();
        harness.prepare().expect("shared windows");
        let mut case = STANDARD_CASES[0];
        case.disallow = case.allow;

        let result = harness.run_case(&case).expect("no fatal trap");

        assert_eq!(
            result.verdict,
            CaseVerdict::Fail(CaseFailure::NoFaultObserved)
        );
        assert_eq!(
            harness.console().as_str(),
            "M read...FAIL\nNo exception seen when disallowed\n"
        );
        assert!(!harness.context().ledger.is_armed());
    }

    #[test]
    fn configuration_error_fails_case_without_arming() {
        let config = HarnessConfig {
            test_region: 16,
            ..HarnessConfig::default()
        };
        let mut harness = Harness::new(SimHart::new(&config), Transcript::default(), config);
        harness.prepare().expect("shared windows");

        let result = harness.run_case(&STANDARD_CASES[1]).expect("no fatal trap");

        assert_eq!(
            result.verdict,
            CaseVerdict::Fail(CaseFailure::Configuration(PmpError::InvalidIndex {
                index: 16
            }))
        );
        assert!(!harness.context().ledger.is_armed());
        assert_eq!(harness.hart().traps_taken(), 0);
    }

    #[test]
    fn fault_one_word_from_the_armed_address_fails_the_case() {
        let mut harness = harness();
        harness.prepare().expect("shared windows");
        let probe = harness.config.probes.write_word;
        let test_region = harness.context.test_region;
        harness.context.allow_config = WRITE_ALLOW_M;
        harness
            .context
            .pmp
            .configure_na4(&mut harness.hart, test_region, WRITE_ALLOW_U, probe)
            .expect("test region");
        harness.console.puts("M write...");

        let verdict = harness
            .monitored_access(
                AccessKind::Write,
                probe,
                Expectation {
                    kind: AccessKind::Write,
                    address: probe + 4,
                },
                false,
            )
            .expect("mismatch is not fatal");
        let report = SuiteReport {
            cases: vec![harness.finish("M write", verdict)],
        };

        assert_eq!(verdict, CaseVerdict::Fail(CaseFailure::Mismatch));
        assert_eq!(report.failures(), 1);
        assert!(!report.all_passed());
        assert_eq!(
            harness.console().as_str(),
            "M write...FAIL\nUnexpected fault address (MTVAL)\n\
             Expected: 00200008\nObserved: 00200004\n"
        );
        assert_eq!(harness.hart().read_word(probe), WRITE_PROBE_VALUE);
        assert_eq!(harness.hart().access_faults_taken(), 1);
        assert!(!harness.context().ledger.is_armed());
    }

    #[test]
    fn suite_prints_pass_after_six_successes() {
        let mut harness = harness();

        let report = harness.run_suite().expect("clean run");

        assert!(report.all_passed());
        assert_eq!(report.cases.len(), 6);
        assert_eq!(harness.hart().access_faults_taken(), 6);
        assert!(harness.console().as_str().ends_with("U insn...SUCCESS\nPASS\n"));
    }

    #[test]
    fn shared_permissions_keep_their_lock_encoding() {
        let shared = RegionConfig::new(RegionLock::Locked, RegionPermissions::SharedReadWrite);
        assert!(shared.permissions.is_shared());
        assert_eq!(
            shared.octet_bits(),
            RegionConfig::new(RegionLock::Unlocked, RegionPermissions::SharedReadWrite)
                .octet_bits()
        );
    }

    #[test]
    fn capitalize_upcases_first_letter_only() {
        assert_eq!(capitalize("no exception seen"), "No exception seen");
        assert_eq!(capitalize(""), "");
    }
}
