use crate::csr::{Csr, Hart, MSECCFG_MML, MSECCFG_RLB, PMP_ENTRY_COUNT};
use crate::pmp::encoding::{
    cfg_octet, decode_region, encode_na4, encode_napot, with_cfg_octet, AddressMode,
    AddressRange, EncodedRegion, RegionConfig, CFG_A_MASK, CFG_L,
};
use crate::PmpError;

/// Decoded view of one PMP slot as currently programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgrammedRegion {
    /// Raw configuration octet.
    pub cfg: u8,
    /// Address-matching mode.
    pub mode: AddressMode,
    /// Whether the lock bit is set.
    pub locked: bool,
    /// Covered range, when the mode describes one on its own.
    pub range: Option<AddressRange>,
}

/// Programs PMP slots, refusing to rewrite locked slots unless relocking is allowed.
///
/// The relock capability is held here rather than inferred from `mseccfg`:
/// it is granted only through [`PmpProgrammer::enable_rule_locking_bypass`],
/// and only when the hart accepted `mseccfg.RLB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PmpProgrammer {
    allow_relock: bool,
}

impl PmpProgrammer {
    /// Creates a programmer without relock capability.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allow_relock: false,
        }
    }

    /// Returns `true` once rule locking bypass has been entered.
    #[must_use]
    pub const fn allows_relock(&self) -> bool {
        self.allow_relock
    }

    /// Sets `mseccfg.RLB` and grants the relock capability if the bit stuck.
    ///
    /// The hart refuses RLB once a rule has been locked without it; the
    /// capability then stays off and this returns `false`.
    #[must_use]
    pub fn enable_rule_locking_bypass<H: Hart>(&mut self, hart: &mut H) -> bool {
        hart.set_csr_bits(Csr::Mseccfg, MSECCFG_RLB);
        self.allow_relock = hart.read_csr(Csr::Mseccfg) & MSECCFG_RLB != 0;

        if self.allow_relock {
            log::debug!("rule locking bypass enabled");
        } else {
            log::warn!("hart refused rule locking bypass");
        }
        self.allow_relock
    }

    /// Sets `mseccfg.MML`. Sticky until reset.
    pub fn enable_machine_mode_lockdown<H: Hart>(hart: &mut H) {
        hart.set_csr_bits(Csr::Mseccfg, MSECCFG_MML);
        log::debug!("machine mode lockdown enabled");
    }

    /// Programs slot `index` as a four-byte region at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`PmpError::InvalidIndex`], [`PmpError::UnalignedAddress`] or
    /// [`PmpError::RegionLocked`]. See [`PmpProgrammer::configure_napot`] for
    /// the state of the slot after a refused write.
    pub fn configure_na4<H: Hart>(
        &self,
        hart: &mut H,
        index: u8,
        config: RegionConfig,
        addr: u32,
    ) -> Result<AddressRange, PmpError> {
        check_index(index)?;
        let region = encode_na4(config, addr)?;
        self.write_slot(hart, index, region)
    }

    /// Programs slot `index` as the NAPOT region `[base, base + size)`.
    ///
    /// # Errors
    ///
    /// Returns [`PmpError::InvalidIndex`], [`PmpError::InvalidSize`] or
    /// [`PmpError::RegionLocked`]. Index and encoding errors leave the slot
    /// untouched. `RegionLocked` is also returned when the hart ignored the
    /// write, in which case the slot may be left disabled.
    pub fn configure_napot<H: Hart>(
        &self,
        hart: &mut H,
        index: u8,
        config: RegionConfig,
        base: u32,
        size: u32,
    ) -> Result<AddressRange, PmpError> {
        check_index(index)?;
        let region = encode_napot(config, base, size)?;
        self.write_slot(hart, index, region)
    }

    /// Reads back and decodes slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PmpError::InvalidIndex`] for slots outside the implemented entries.
    pub fn region<H: Hart>(hart: &H, index: u8) -> Result<ProgrammedRegion, PmpError> {
        check_index(index)?;
        let cfg = cfg_octet(hart.read_csr(Csr::pmpcfg_for_entry(index)), index);
        let addr = hart.read_csr(Csr::Pmpaddr(index));

        Ok(ProgrammedRegion {
            cfg,
            mode: AddressMode::from_octet(cfg),
            locked: cfg & CFG_L != 0,
            range: decode_region(cfg, addr),
        })
    }

    fn write_slot<H: Hart>(
        &self,
        hart: &mut H,
        index: u8,
        region: EncodedRegion,
    ) -> Result<AddressRange, PmpError> {
        let cfg_csr = Csr::pmpcfg_for_entry(index);
        let current = hart.read_csr(cfg_csr);
        let octet = cfg_octet(current, index);

        if octet & CFG_L != 0 && !self.allow_relock {
            log::warn!("refusing to rewrite locked pmp region {index}");
            return Err(PmpError::RegionLocked { index });
        }

        // Turn the slot off while its address changes so no half-written rule matches.
        let disabled = with_cfg_octet(current, index, octet & !CFG_A_MASK);
        hart.write_csr(cfg_csr, disabled);
        hart.write_csr(Csr::Pmpaddr(index), region.addr);
        let programmed = with_cfg_octet(hart.read_csr(cfg_csr), index, region.cfg);
        hart.write_csr(cfg_csr, programmed);

        let applied = cfg_octet(hart.read_csr(cfg_csr), index) == region.cfg
            && hart.read_csr(Csr::Pmpaddr(index)) == region.addr;
        if !applied {
            log::warn!("hart ignored the write to pmp region {index}");
            return Err(PmpError::RegionLocked { index });
        }

        log::debug!(
            "pmp region {index}: cfg={:#04x} addr={:#010x} covers [{:#010x}, {:#x})",
            region.cfg,
            region.addr,
            region.range.start,
            region.range.end()
        );
        Ok(region.range)
    }
}

const fn check_index(index: u8) -> Result<(), PmpError> {
    if (index as usize) < PMP_ENTRY_COUNT {
        Ok(())
    } else {
        Err(PmpError::InvalidIndex { index })
    }
}
