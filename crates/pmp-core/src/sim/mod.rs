//! Software model of an RV32 hart with an Smepmp-capable protection unit.
//!
//! Used for hosted runs of the harness and by the test suites. It models only
//! what the harness observes: PMP rule matching and permissions (with and
//! without machine mode lockdown), lock enforcement on PMP writes, trap entry
//! and `mret`.

use std::collections::HashMap;

use crate::csr::{
    Csr, ExecOutcome, Hart, Instruction, INSTRUCTION_BYTES, MSECCFG_MML, MSECCFG_MMWP,
    MSECCFG_RLB, MSTATUS_MPP_MASK, PMP_CFG_REGISTER_COUNT, PMP_ENTRY_COUNT,
};
use crate::pmp::{cfg_octet, decode_region, with_cfg_octet, CFG_L, CFG_RWX_MASK, CFG_W, CFG_X};
use crate::{
    AccessKind, HarnessConfig, PrivilegeLevel, MCAUSE_ECALL_M, MCAUSE_ECALL_S, MCAUSE_ECALL_U,
    READ_PROBE_SEED,
};

/// Software hart.
#[derive(Debug, Clone)]
pub struct SimHart {
    privilege: PrivilegeLevel,
    pc: u32,
    a0: u32,
    mstatus: u32,
    mcause: u32,
    mtval: u32,
    mepc: u32,
    mseccfg: u32,
    pmpcfg: [u32; PMP_CFG_REGISTER_COUNT],
    pmpaddr: [u32; PMP_ENTRY_COUNT],
    memory: HashMap<u32, u32>,
    last_load: Option<u32>,
    traps_taken: usize,
    access_faults_taken: usize,
}

impl SimHart {
    /// Creates a hart in machine mode with all PMP entries off.
    ///
    /// The harness code is taken to live at the base of the shared code
    /// window, and the read probe word holds [`READ_PROBE_SEED`].
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        let mut memory = HashMap::new();
        memory.insert(config.probes.read_word, READ_PROBE_SEED);

        Self {
            privilege: PrivilegeLevel::Machine,
            pc: config.shared_code.base,
            a0: 0,
            mstatus: 0,
            mcause: 0,
            mtval: 0,
            mepc: 0,
            mseccfg: 0,
            pmpcfg: [0; PMP_CFG_REGISTER_COUNT],
            pmpaddr: [0; PMP_ENTRY_COUNT],
            memory,
            last_load: None,
            traps_taken: 0,
            access_faults_taken: 0,
        }
    }

    /// Current privilege level.
    #[must_use]
    pub const fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    /// Number of traps taken, service calls included.
    #[must_use]
    pub const fn traps_taken(&self) -> usize {
        self.traps_taken
    }

    /// Number of access-fault traps taken.
    #[must_use]
    pub const fn access_faults_taken(&self) -> usize {
        self.access_faults_taken
    }

    /// Reads a memory word; unwritten words read as zero.
    #[must_use]
    pub fn read_word(&self, addr: u32) -> u32 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    /// Value returned by the most recent retired load.
    #[must_use]
    pub const fn last_load(&self) -> Option<u32> {
        self.last_load
    }

    /// Latches trap state as if a trap with `mcause` had just been taken at `epc`.
    pub fn latch_trap(&mut self, mcause: u32, mtval: u32, epc: u32, a0: u32) {
        self.a0 = a0;
        self.enter_trap(mcause, mtval, epc);
    }

    /// Returns `true` when the current rules let `privilege` perform `kind` at `addr`.
    #[must_use]
    pub fn permits(&self, addr: u32, kind: AccessKind, privilege: PrivilegeLevel) -> bool {
        let mml = self.mseccfg & MSECCFG_MML != 0;
        let machine = privilege == PrivilegeLevel::Machine;

        match self.matching_rule(addr) {
            Some(octet) if mml => lockdown_permits(octet, kind, machine),
            Some(octet) => {
                let enforced = !machine || octet & CFG_L != 0;
                !enforced || rwx_permits(octet, kind)
            }
            None if machine => {
                self.mseccfg & MSECCFG_MMWP == 0 && !(mml && kind == AccessKind::InstructionFetch)
            }
            None => false,
        }
    }

    fn matching_rule(&self, addr: u32) -> Option<u8> {
        (0..PMP_ENTRY_COUNT as u8).find_map(|index| {
            let octet = self.octet(index);
            decode_region(octet, self.pmpaddr[usize::from(index)])
                .filter(|range| range.contains(addr))
                .map(|_| octet)
        })
    }

    fn octet(&self, index: u8) -> u8 {
        cfg_octet(self.pmpcfg[usize::from(index / 4)], index)
    }

    fn rule_locking_bypass(&self) -> bool {
        self.mseccfg & MSECCFG_RLB != 0
    }

    fn any_rule_locked(&self) -> bool {
        (0..PMP_ENTRY_COUNT as u8).any(|index| self.octet(index) & CFG_L != 0)
    }

    fn enter_trap(&mut self, mcause: u32, mtval: u32, epc: u32) {
        self.mcause = mcause;
        self.mtval = mtval;
        self.mepc = epc;
        self.mstatus = (self.mstatus & !MSTATUS_MPP_MASK) | self.privilege.mpp_bits();
        self.privilege = PrivilegeLevel::Machine;
        self.traps_taken += 1;
    }

    fn access_fault(&mut self, kind: AccessKind, addr: u32, epc: u32) -> ExecOutcome {
        log::trace!("sim: {kind} fault at {addr:#010x} in {} mode", self.privilege);
        self.access_faults_taken += 1;
        self.enter_trap(kind.mcause(), addr, epc);
        ExecOutcome::Trapped { epc }
    }

    fn write_pmpcfg(&mut self, register: u8, value: u32) {
        let mut next = self.pmpcfg[usize::from(register)];
        for lane in 0..4u8 {
            let index = register * 4 + lane;
            let current = self.octet(index);
            let requested = cfg_octet(value, index);

            if !self.rule_locking_bypass() {
                if current & CFG_L != 0 {
                    continue;
                }
                if self.mseccfg & MSECCFG_MML != 0 && adds_machine_executable(requested) {
                    continue;
                }
            }
            next = with_cfg_octet(next, index, requested);
        }
        self.pmpcfg[usize::from(register)] = next;
    }

    fn write_mseccfg(&mut self, value: u32) {
        let mut next = value & (MSECCFG_MML | MSECCFG_MMWP | MSECCFG_RLB);
        // MML and MMWP are sticky; RLB cannot be set once a rule is locked without it.
        next |= self.mseccfg & (MSECCFG_MML | MSECCFG_MMWP);
        if !self.rule_locking_bypass() && self.any_rule_locked() {
            next &= !MSECCFG_RLB;
        }
        self.mseccfg = next;
    }
}

impl Hart for SimHart {
    fn read_csr(&self, csr: Csr) -> u32 {
        match csr {
            Csr::Mstatus => self.mstatus,
            Csr::Mcause => self.mcause,
            Csr::Mtval => self.mtval,
            Csr::Mepc => self.mepc,
            Csr::Mseccfg => self.mseccfg,
            Csr::Pmpcfg(n) => self
                .pmpcfg
                .get(usize::from(n))
                .copied()
                .unwrap_or_default(),
            Csr::Pmpaddr(n) => self
                .pmpaddr
                .get(usize::from(n))
                .copied()
                .unwrap_or_default(),
        }
    }

    fn write_csr(&mut self, csr: Csr, value: u32) {
        log::trace!("sim: {csr} <- {value:#010x}");
        match csr {
            Csr::Mstatus => self.mstatus = value,
            Csr::Mcause => self.mcause = value,
            Csr::Mtval => self.mtval = value,
            Csr::Mepc => self.mepc = value & !(INSTRUCTION_BYTES - 1),
            Csr::Mseccfg => self.write_mseccfg(value),
            Csr::Pmpcfg(n) if usize::from(n) < PMP_CFG_REGISTER_COUNT => {
                self.write_pmpcfg(n, value);
            }
            Csr::Pmpaddr(n) if usize::from(n) < PMP_ENTRY_COUNT => {
                if self.rule_locking_bypass() || self.octet(n) & CFG_L == 0 {
                    self.pmpaddr[usize::from(n)] = value;
                }
            }
            Csr::Pmpcfg(_) | Csr::Pmpaddr(_) => {}
        }
    }

    fn service_call_arg(&self) -> u32 {
        self.a0
    }

    fn execute(&mut self, instruction: Instruction) -> ExecOutcome {
        let pc = self.pc;
        if !self.permits(pc, AccessKind::InstructionFetch, self.privilege) {
            return self.access_fault(AccessKind::InstructionFetch, pc, pc);
        }

        match instruction {
            Instruction::Load { addr } => {
                if !self.permits(addr, AccessKind::Read, self.privilege) {
                    return self.access_fault(AccessKind::Read, addr, pc);
                }
                self.last_load = Some(self.read_word(addr));
            }
            Instruction::Store { addr, value } => {
                if !self.permits(addr, AccessKind::Write, self.privilege) {
                    return self.access_fault(AccessKind::Write, addr, pc);
                }
                self.memory.insert(addr, value);
            }
            Instruction::Call { target } => {
                if !self.permits(target, AccessKind::InstructionFetch, self.privilege) {
                    return self.access_fault(AccessKind::InstructionFetch, target, target);
                }
            }
            Instruction::ServiceCall { arg } => {
                self.a0 = arg;
                let mcause = match self.privilege {
                    PrivilegeLevel::User => MCAUSE_ECALL_U,
                    PrivilegeLevel::Supervisor => MCAUSE_ECALL_S,
                    PrivilegeLevel::Machine => MCAUSE_ECALL_M,
                };
                self.enter_trap(mcause, 0, pc);
                return ExecOutcome::Trapped { epc: pc };
            }
        }

        ExecOutcome::Retired
    }

    fn trap_return(&mut self) -> u32 {
        let mpp = (self.mstatus & MSTATUS_MPP_MASK) >> MSTATUS_MPP_MASK.trailing_zeros();
        self.privilege = PrivilegeLevel::from_mpp(mpp).unwrap_or(PrivilegeLevel::User);
        self.mstatus &= !MSTATUS_MPP_MASK;
        // The harness text is a single call site, so `pc` itself never advances.
        self.mepc
    }
}

const fn rwx_permits(octet: u8, kind: AccessKind) -> bool {
    let bit = match kind {
        AccessKind::Read => 1,
        AccessKind::Write => 2,
        AccessKind::InstructionFetch => 4,
    };
    octet & bit != 0
}

/// Smepmp rule table with `mseccfg.MML` set.
const fn lockdown_permits(octet: u8, kind: AccessKind, machine: bool) -> bool {
    let locked = octet & CFG_L != 0;
    match (locked, octet & CFG_RWX_MASK) {
        // Shared data: machine read-write, user read-only.
        (false, 0b010) => match kind {
            AccessKind::Read => true,
            AccessKind::Write => machine,
            AccessKind::InstructionFetch => false,
        },
        // Shared data: read-write for both.
        (false, 0b110) => !matches!(kind, AccessKind::InstructionFetch),
        // Shared code: execute-only for both.
        (true, 0b010) => matches!(kind, AccessKind::InstructionFetch),
        // Shared code: user execute, machine read-execute.
        (true, 0b110) => match kind {
            AccessKind::InstructionFetch => true,
            AccessKind::Read => machine,
            AccessKind::Write => false,
        },
        // Shared read-only for both.
        (true, 0b111) => matches!(kind, AccessKind::Read),
        (true, _) => machine && rwx_permits(octet, kind),
        (false, _) => !machine && rwx_permits(octet, kind),
    }
}

/// Executable machine-only or locked shared-code rules cannot be added under
/// lockdown without rule locking bypass.
const fn adds_machine_executable(octet: u8) -> bool {
    let rwx = octet & CFG_RWX_MASK;
    octet & CFG_L != 0 && ((rwx & CFG_X != 0 && rwx != CFG_RWX_MASK) || rwx == CFG_W)
}
