//! Expectation ledger shared between the case runner and the trap path.
//!
//! The runner arms the ledger before a monitored access and collects it
//! afterwards; while armed, only the trap dispatcher records observations.
//! At most one expectation is outstanding at a time.

use thiserror::Error;

use crate::AccessKind;

/// The fault a monitored access is expected to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Expectation {
    /// Expected fault kind.
    pub kind: AccessKind,
    /// Expected faulting address (`mtval`).
    pub address: u32,
}

/// Flags collected when an armed period ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LedgerOutcome {
    /// A protection violation was delivered while armed.
    pub fault_observed: bool,
    /// The observed kind or address differed from the expectation.
    pub mismatch: bool,
}

/// Comparison of an observed violation against the armed expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultMatch {
    /// Kind and address both matched.
    Matched,
    /// The fault kind differed.
    KindMismatch {
        /// Armed kind.
        expected: AccessKind,
        /// Kind decoded from `mcause`.
        observed: AccessKind,
    },
    /// The kind matched but the faulting address differed.
    AddressMismatch {
        /// Armed address.
        expected: u32,
        /// Address reported in `mtval`.
        observed: u32,
    },
}

impl FaultMatch {
    /// Returns `true` for [`FaultMatch::Matched`].
    #[must_use]
    pub const fn is_match(self) -> bool {
        matches!(self, Self::Matched)
    }
}

/// Ledger protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LedgerError {
    /// `arm` called while an expectation is outstanding.
    #[error("expectation ledger is already armed")]
    AlreadyArmed,
    /// Collect or record called with no expectation outstanding.
    #[error("expectation ledger is not armed")]
    NotArmed,
    /// A second violation arrived during the same armed period.
    #[error("a fault was already observed for the armed expectation")]
    AlreadyObserved,
}

/// Process-wide expectation state, owned by the harness context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpectationLedger {
    expected: Option<Expectation>,
    fault_observed: bool,
    mismatch: bool,
}

impl ExpectationLedger {
    /// Creates a disarmed ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            expected: None,
            fault_observed: false,
            mismatch: false,
        }
    }

    /// Returns `true` while an expectation is outstanding.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.expected.is_some()
    }

    /// Returns the outstanding expectation, if any.
    #[must_use]
    pub const fn expectation(&self) -> Option<Expectation> {
        self.expected
    }

    /// Arms the ledger and clears the outcome flags.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AlreadyArmed`] if an expectation is outstanding.
    pub fn arm(&mut self, kind: AccessKind, address: u32) -> Result<(), LedgerError> {
        if self.is_armed() {
            return Err(LedgerError::AlreadyArmed);
        }

        self.expected = Some(Expectation { kind, address });
        self.fault_observed = false;
        self.mismatch = false;
        Ok(())
    }

    /// Ends the armed period and returns what the trap path observed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotArmed`] if nothing is outstanding.
    pub fn disarm_and_collect(&mut self) -> Result<LedgerOutcome, LedgerError> {
        if self.expected.take().is_none() {
            return Err(LedgerError::NotArmed);
        }

        Ok(LedgerOutcome {
            fault_observed: self.fault_observed,
            mismatch: self.mismatch,
        })
    }

    /// Records a violation delivered by the trap path. The ledger stays armed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotArmed`] when nothing is outstanding and
    /// [`LedgerError::AlreadyObserved`] for a second violation in one period.
    pub fn record_fault(
        &mut self,
        kind: AccessKind,
        address: u32,
    ) -> Result<FaultMatch, LedgerError> {
        let expected = self.expected.ok_or(LedgerError::NotArmed)?;
        if self.fault_observed {
            return Err(LedgerError::AlreadyObserved);
        }

        let verdict = if kind != expected.kind {
            FaultMatch::KindMismatch {
                expected: expected.kind,
                observed: kind,
            }
        } else if address != expected.address {
            FaultMatch::AddressMismatch {
                expected: expected.address,
                observed: address,
            }
        } else {
            FaultMatch::Matched
        };

        self.fault_observed = true;
        self.mismatch = !verdict.is_match();
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::{Expectation, ExpectationLedger, FaultMatch, LedgerError, LedgerOutcome};
    use crate::AccessKind;

    #[test]
    fn starts_disarmed() {
        let mut ledger = ExpectationLedger::new();
        assert!(!ledger.is_armed());
        assert_eq!(ledger.disarm_and_collect(), Err(LedgerError::NotArmed));
    }

    #[test]
    fn second_arm_fails_fast() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Read, 0x0020_0000).expect("first arm");
        assert_eq!(
            ledger.arm(AccessKind::Write, 0x0020_0004),
            Err(LedgerError::AlreadyArmed)
        );
        assert_eq!(
            ledger.expectation(),
            Some(Expectation {
                kind: AccessKind::Read,
                address: 0x0020_0000
            })
        );
    }

    #[test]
    fn collect_without_fault_reports_nothing_observed() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Read, 0x0020_0000).expect("arm");
        assert_eq!(ledger.disarm_and_collect(), Ok(LedgerOutcome::default()));
        assert!(!ledger.is_armed());
    }

    #[test]
    fn matching_fault_is_observed_without_mismatch() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Write, 0x0020_0004).expect("arm");
        assert_eq!(
            ledger.record_fault(AccessKind::Write, 0x0020_0004),
            Ok(FaultMatch::Matched)
        );
        assert!(ledger.is_armed());
        assert_eq!(
            ledger.disarm_and_collect(),
            Ok(LedgerOutcome {
                fault_observed: true,
                mismatch: false
            })
        );
    }

    #[test]
    fn kind_is_compared_before_address() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Write, 0x0020_0004).expect("arm");
        assert_eq!(
            ledger.record_fault(AccessKind::Read, 0x0020_0000),
            Ok(FaultMatch::KindMismatch {
                expected: AccessKind::Write,
                observed: AccessKind::Read
            })
        );
        assert_eq!(
            ledger.disarm_and_collect(),
            Ok(LedgerOutcome {
                fault_observed: true,
                mismatch: true
            })
        );
    }

    #[test]
    fn address_mismatch_is_recorded() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Write, 0x0020_0008).expect("arm");
        assert_eq!(
            ledger.record_fault(AccessKind::Write, 0x0020_0004),
            Ok(FaultMatch::AddressMismatch {
                expected: 0x0020_0008,
                observed: 0x0020_0004
            })
        );
    }

    #[test]
    fn one_observation_per_armed_period() {
        let mut ledger = ExpectationLedger::new();
        assert_eq!(
            ledger.record_fault(AccessKind::Read, 0),
            Err(LedgerError::NotArmed)
        );

        ledger.arm(AccessKind::Read, 0).expect("arm");
        ledger.record_fault(AccessKind::Read, 0).expect("first fault");
        assert_eq!(
            ledger.record_fault(AccessKind::Read, 0),
            Err(LedgerError::AlreadyObserved)
        );
    }

    #[test]
    fn rearming_clears_previous_flags() {
        let mut ledger = ExpectationLedger::new();
        ledger.arm(AccessKind::Read, 0).expect("arm");
        ledger.record_fault(AccessKind::Write, 4).expect("fault");
        ledger.disarm_and_collect().expect("collect");

        ledger.arm(AccessKind::Read, 0).expect("re-arm");
        assert_eq!(ledger.disarm_and_collect(), Ok(LedgerOutcome::default()));
    }
}
