use guestmem_core::{AccessKind, Ea, GuestMemory, MemoryError, Protection, Ra};

use crate::{
    Fault, FaultCause, Hypervisor, PageTableEntry, PartitionTableEntry, ProcessTableEntry,
    RadixError, RcTracking, RcUpdate, Registers, TranslatorConfig,
    protection::{ProtectionContext, Scope, check_protection},
    pte::page_mask,
    rc::set_reference_change,
    walk::{MIN_DIRECTORY_SIZE, WalkError, walk_tree, walk_with},
};

/// Effective address bits translated by process-scoped trees.
pub const EADDR_MASK: u64 = 0x3fff_ffff_ffff_ffff;

/// Effective address bits kept by real mode accesses.
pub const REAL_MODE_MASK: u64 = 0x0fff_ffff_ffff_ffff;

/// Page size reported for real mode accesses and debug probes.
pub const BASE_PAGE_SHIFT: u64 = 12;

/// The partition and process an effective address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpace {
    /// Logical partition ID.
    pub lpid: u64,

    /// Process ID.
    pub pid: u64,
}

/// Resolves the address space selected by the quadrant of `ea`.
///
/// Returns `None` for quadrants the accessor may not use.
pub fn qualify(registers: &Registers, ea: Ea) -> Option<AddressSpace> {
    let (lpid, pid) = match (registers.msr.hypervisor(), ea.quadrant()) {
        (true, 0) => (0, registers.pidr),
        (true, 1) => (registers.lpidr, registers.pidr),
        (true, 2) => (registers.lpidr, 0),
        (true, _) => (0, 0),

        // Guest application and guest operating system.
        (false, 0) => (registers.lpidr, registers.pidr),
        (false, 3) => (registers.lpidr, 0),
        (false, _) => return None,
    };

    Some(AddressSpace { lpid, pid })
}

/// The result of a successful translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    ra: Ra,
    protection: Protection,
    page_size: u64,
}

impl Translation {
    fn real_mode(ea: Ea) -> Self {
        Self {
            ra: Ra(ea.0 & REAL_MODE_MASK),
            protection: Protection::RWX,
            page_size: BASE_PAGE_SHIFT,
        }
    }

    /// Returns the real address.
    pub fn ra(&self) -> Ra {
        self.ra
    }

    /// Returns the protection of the page, narrowed across both stages.
    pub fn protection(&self) -> Protection {
        self.protection
    }

    /// Returns the page size as a number of address bits.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Returns the mask of the offset bits within the page.
    pub fn page_mask(&self) -> u64 {
        page_mask(self.page_size)
    }

    /// Returns the page size in bytes.
    pub fn page_bytes(&self) -> u64 {
        self.page_mask() + 1
    }
}

/// Whether a walk may update reference/change bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Translate,
    Probe,
}

/// Leaf produced by a single stage.
#[derive(Debug, Clone, Copy)]
struct Stage {
    ra: Ra,
    protection: Protection,
    page_size: u64,
}

/// Failure of one attempt at a stage, before it is turned into a fault of
/// the right kind.
#[derive(Debug)]
enum StageError {
    Fault(FaultCause),
    Radix(RadixError),
}

impl From<FaultCause> for StageError {
    fn from(value: FaultCause) -> Self {
        Self::Fault(value)
    }
}

impl From<RadixError> for StageError {
    fn from(value: RadixError) -> Self {
        Self::Radix(value)
    }
}

impl From<MemoryError> for StageError {
    fn from(value: MemoryError) -> Self {
        Self::Radix(RadixError::Memory(value))
    }
}

impl From<WalkError> for StageError {
    fn from(value: WalkError) -> Self {
        match value {
            WalkError::Fault(cause) => Self::Fault(cause),
            WalkError::Memory(err) => Self::from(err),
        }
    }
}

/// Two-stage radix MMU translator.
///
/// Translates effective addresses to real addresses by walking the process-
/// and partition-scoped radix trees held in guest memory. The translator
/// carries no state between calls; the register state of the accessing CPU
/// is supplied with every call.
///
/// # Examples
///
/// ```no_run
/// # use guestmem_core::{AccessKind, Ea, FlatMemory};
/// # use guestmem_radix::{RadixTranslator, Registers, Hypervisor};
/// let memory = FlatMemory::new(0x100_0000);
/// let translator = RadixTranslator::new(&memory, Hypervisor::Native);
///
/// let registers = Registers::default();
/// match translator.translate(&registers, Ea(0x1000), AccessKind::Read) {
///     Ok(translation) => println!("{} -> {}", Ea(0x1000), translation.ra()),
///     Err(err) => println!("{err}"),
/// }
/// ```
#[derive(Debug)]
pub struct RadixTranslator<Memory>
where
    Memory: GuestMemory,
{
    memory: Memory,
    hypervisor: Hypervisor,
    config: TranslatorConfig,
}

impl<Memory> RadixTranslator<Memory>
where
    Memory: GuestMemory,
{
    /// Creates a new translator with the default configuration.
    pub fn new(memory: Memory, hypervisor: Hypervisor) -> Self {
        Self::with_config(memory, hypervisor, TranslatorConfig::default())
    }

    /// Creates a new translator.
    pub fn with_config(memory: Memory, hypervisor: Hypervisor, config: TranslatorConfig) -> Self {
        Self {
            memory,
            hypervisor,
            config,
        }
    }

    /// Returns the guest memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Returns the hypervisor the translated partitions run under.
    pub fn hypervisor(&self) -> Hypervisor {
        self.hypervisor
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translates `ea` for an access of the given kind.
    ///
    /// This is the entry point of a TLB fill. Relocation is taken from
    /// MSR[IR] for instruction fetches and MSR[DR] otherwise. Hypervisor
    /// real mode accesses are identity mapped with the top four address
    /// bits ignored.
    pub fn translate(
        &self,
        registers: &Registers,
        ea: Ea,
        access: AccessKind,
    ) -> Result<Translation, RadixError> {
        let relocation = match access {
            AccessKind::Execute => registers.msr.instruction_relocate(),
            _ => registers.msr.data_relocate(),
        };

        if !relocation && self.real_mode(registers) {
            return Ok(Translation::real_mode(ea));
        }

        if !registers.lpcr.use_process_table() {
            tracing::warn!(
                lpcr = format_args!("{:#018x}", registers.lpcr.0),
                "LPCR[UPRT] not set in radix mode"
            );
        }

        let space = qualify(registers, ea).ok_or_else(|| Fault::segment(ea, access))?;
        self.xlate(registers, ea, access, space.lpid, space.pid, relocation)
    }

    /// Translates `ea` in the address space of partition `lpid` and process
    /// `pid`.
    ///
    /// With `relocation` the address goes through process-scoped
    /// translation first. Partition-scoped translation follows unless the
    /// accessor is the hypervisor of partition 0. The page size of the
    /// result is the smallest of both stages and the protection is their
    /// intersection.
    pub fn xlate(
        &self,
        registers: &Registers,
        ea: Ea,
        access: AccessKind,
        lpid: u64,
        pid: u64,
        relocation: bool,
    ) -> Result<Translation, RadixError> {
        self.xlate_with(registers, ea, access, lpid, pid, relocation, Mode::Translate)
    }

    /// Returns the page-aligned real address `ea` maps to for a data read.
    ///
    /// Never faults and never updates reference/change bits.
    pub fn get_phys_page_debug(&self, registers: &Registers, ea: Ea) -> Option<Ra> {
        if !registers.msr.data_relocate() && self.real_mode(registers) {
            return Some(Translation::real_mode(ea).ra.align_down(BASE_PAGE_SHIFT));
        }

        let space = qualify(registers, ea)?;
        let relocation = registers.msr.data_relocate();

        match self.xlate_with(
            registers,
            ea,
            AccessKind::Read,
            space.lpid,
            space.pid,
            relocation,
            Mode::Probe,
        ) {
            Ok(translation) => Some(translation.ra.align_down(BASE_PAGE_SHIFT)),
            Err(err) => {
                tracing::debug!(%ea, %err, "debug probe failed");
                None
            }
        }
    }

    /// Reads the partition table entry of `lpid` from the table described
    /// by PTCR.
    ///
    /// Returns `None` if the partition lies beyond the end of the table.
    pub fn partition_table_entry(
        &self,
        registers: &Registers,
        lpid: u64,
    ) -> Result<Option<PartitionTableEntry>, MemoryError> {
        let offset = match lpid.checked_mul(PartitionTableEntry::SIZE) {
            Some(offset) if offset < registers.ptcr.size() => offset,
            _ => return Ok(None),
        };

        let address = registers.ptcr.base() + offset;
        Ok(Some(PartitionTableEntry::new(
            self.memory.read_u64(address)?,
            self.memory.read_u64(address + 8)?,
        )))
    }

    fn real_mode(&self, registers: &Registers) -> bool {
        registers.msr.hypervisor() || (self.hypervisor.is_virtual() && registers.lpidr == 0)
    }

    #[allow(clippy::too_many_arguments)]
    fn xlate_with(
        &self,
        registers: &Registers,
        ea: Ea,
        access: AccessKind,
        lpid: u64,
        pid: u64,
        relocation: bool,
        mode: Mode,
    ) -> Result<Translation, RadixError> {
        let pate = match self.hypervisor {
            Hypervisor::Virtual(pate) if lpid == 0 => pate,
            _ => {
                let pate = self
                    .partition_table_entry(registers, lpid)?
                    .ok_or_else(|| Fault::storage(ea, access, FaultCause::NoPte))?;

                if !validate_pate(registers, lpid, &pate) {
                    tracing::debug!(lpid, ?pate, "invalid partition table entry");
                    return Err(Fault::storage(ea, access, FaultCause::BadConfig).into());
                }

                pate
            }
        };

        let mut protection = Protection::RWX;
        let mut page_size = None;

        let guest_ra = if relocation {
            let stage = self.process_scoped(registers, ea, access, lpid, pid, &pate, mode)?;
            protection &= stage.protection;
            page_size = Some(stage.page_size);
            stage.ra
        }
        else {
            Ra(ea.0 & EADDR_MASK)
        };

        let ra = if lpid != 0 || (!self.hypervisor.is_virtual() && !registers.msr.hypervisor()) {
            let stage =
                self.partition_scoped(registers, ea, access, guest_ra, &pate, false, mode)?;
            protection &= stage.protection;
            page_size = Some(page_size.map_or(stage.page_size, |size: u64| size.min(stage.page_size)));
            stage.ra
        }
        else {
            guest_ra
        };

        Ok(Translation {
            ra,
            protection,
            page_size: page_size.unwrap_or(BASE_PAGE_SHIFT),
        })
    }

    /// Translates the guest real address `guest_ra` through the partition-
    /// scoped tree of `pate`.
    ///
    /// Faults are delivered to the hypervisor. `table_walk` marks a
    /// translation of a guest table address rather than of the accessed
    /// data itself.
    #[allow(clippy::too_many_arguments)]
    fn partition_scoped(
        &self,
        registers: &Registers,
        ea: Ea,
        access: AccessKind,
        guest_ra: Ra,
        pate: &PartitionTableEntry,
        table_walk: bool,
        mode: Mode,
    ) -> Result<Stage, RadixError> {
        let root = pate.partition_root();
        let context = ProtectionContext::from(registers);

        self.with_retries(
            ea,
            || {
                let walk =
                    walk_tree(&self.memory, guest_ra.0, root.base, root.size, root.address_bits)?;

                let protection = self.resolve_leaf(
                    walk.pte(),
                    walk.pte_address(),
                    access,
                    Scope::Partition,
                    &context,
                    mode,
                )?;

                Ok(protection.map(|protection| Stage {
                    ra: walk.ra(),
                    protection,
                    page_size: walk.page_size(),
                }))
            },
            |cause| Fault::host_storage(ea, access, guest_ra, cause, table_walk),
        )
    }

    /// Translates `ea` through the process-scoped tree of process `pid`.
    ///
    /// Unless the accessor is in hypervisor state, or partition 0 runs
    /// under a virtual hypervisor, the process table entry and every
    /// directory are themselves guest real addresses which go through
    /// partition-scoped translation.
    #[allow(clippy::too_many_arguments)]
    fn process_scoped(
        &self,
        registers: &Registers,
        ea: Ea,
        access: AccessKind,
        lpid: u64,
        pid: u64,
        pate: &PartitionTableEntry,
        mode: Mode,
    ) -> Result<Stage, RadixError> {
        let offset = match pid.checked_mul(ProcessTableEntry::SIZE) {
            Some(offset) if offset < pate.process_table_size() => offset,
            _ => return Err(Fault::storage(ea, access, FaultCause::NoPte).into()),
        };

        let direct = registers.msr.hypervisor() || (self.hypervisor.is_virtual() && lpid == 0);

        // Table addresses are guest real addresses, read with a plain load
        // once translated.
        let fetch = |address: Ra| -> Result<(Ra, PageTableEntry), StageError> {
            let address = if direct {
                address
            }
            else {
                self.partition_scoped(registers, ea, AccessKind::Read, address, pate, true, mode)?
                    .ra
            };

            Ok((address, PageTableEntry(self.memory.read_u64(address)?)))
        };

        let prtbe_address = pate.process_table_base() + offset;
        let prtbe = match fetch(prtbe_address) {
            Ok((_, dw0)) => ProcessTableEntry::new(dw0.0, 0),
            Err(StageError::Radix(err)) => return Err(err),
            Err(StageError::Fault(cause)) => {
                return Err(Fault::storage(ea, access, cause).into());
            }
        };

        let root = prtbe.process_root();
        let context = ProtectionContext::from(registers);
        let address = ea.0 & EADDR_MASK;

        self.with_retries(
            ea,
            || {
                let walk = walk_with(address, root.base, root.size, root.address_bits, &fetch)?;

                let protection = self.resolve_leaf(
                    walk.pte(),
                    walk.pte_address(),
                    access,
                    Scope::Process,
                    &context,
                    mode,
                )?;

                Ok(protection.map(|protection| Stage {
                    ra: walk.ra(),
                    protection,
                    page_size: walk.page_size(),
                }))
            },
            |cause| Fault::storage(ea, access, cause),
        )
    }

    /// Checks the protection of a leaf and brings its reference/change bits
    /// up to date.
    ///
    /// Returns `None` when the walk has to be restarted.
    fn resolve_leaf(
        &self,
        pte: PageTableEntry,
        pte_address: Ra,
        access: AccessKind,
        scope: Scope,
        context: &ProtectionContext,
        mode: Mode,
    ) -> Result<Option<Protection>, StageError> {
        let rc_tracking = match mode {
            Mode::Translate => self.config.rc_tracking,
            Mode::Probe => RcTracking::Hardware,
        };

        let mut protection = match check_protection(pte, access, scope, context, rc_tracking) {
            Ok(protection) => protection,
            Err(FaultCause::AtomicRc) => {
                tracing::debug!(%pte_address, ?access, "recovering from atomic RC fault");
                set_reference_change(
                    &self.memory,
                    self.config.concurrency,
                    pte,
                    access,
                    pte_address,
                )?;
                return Ok(None);
            }
            Err(cause) => return Err(cause.into()),
        };

        let pte = match (mode, rc_tracking) {
            (Mode::Translate, RcTracking::Hardware) => {
                match set_reference_change(
                    &self.memory,
                    self.config.concurrency,
                    pte,
                    access,
                    pte_address,
                )? {
                    RcUpdate::Unchanged(pte) | RcUpdate::Updated(pte) => pte,
                    RcUpdate::Raced => return Ok(None),
                }
            }
            _ => pte,
        };

        // Without the change bit the page is read only.
        if !pte.change() {
            protection.remove(Protection::W);
        }

        Ok(Some(protection))
    }

    /// Runs `attempt` until it produces a leaf, at most `retry_limit + 1`
    /// times.
    fn with_retries<T>(
        &self,
        ea: Ea,
        mut attempt: impl FnMut() -> Result<Option<T>, StageError>,
        fault: impl Fn(FaultCause) -> Fault,
    ) -> Result<T, RadixError> {
        let attempts = self.config.retry_limit.saturating_add(1);

        for index in 0..attempts {
            match attempt() {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => tracing::debug!(%ea, attempt = index, "restarting translation"),
                Err(StageError::Fault(cause)) => return Err(fault(cause).into()),
                Err(StageError::Radix(err)) => return Err(err),
            }
        }

        tracing::warn!(%ea, attempts, "translation retry limit reached");
        Err(RadixError::RetryLimit { ea, attempts })
    }
}

/// Checks that a partition table entry read from the partition table can
/// be used for translation.
fn validate_pate(registers: &Registers, lpid: u64, pate: &PartitionTableEntry) -> bool {
    if !pate.host_radix() {
        return false;
    }

    // Partition 0 belongs to the hypervisor.
    if lpid == 0 && !registers.msr.hypervisor() {
        return false;
    }

    pate.partition_root().size >= MIN_DIRECTORY_SIZE
}
