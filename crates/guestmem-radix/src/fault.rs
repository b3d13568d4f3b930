use guestmem_core::{AccessKind, Ea, Ra};

/// The interrupt a fault should be delivered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Instruction Segment Interrupt.
    InstructionSegment,

    /// Data Segment Interrupt.
    DataSegment,

    /// Instruction Storage Interrupt.
    InstructionStorage,

    /// Data Storage Interrupt.
    DataStorage,

    /// Hypervisor Instruction Storage Interrupt.
    HostInstructionStorage,

    /// Hypervisor Data Storage Interrupt.
    HostDataStorage,
}

impl FaultKind {
    /// Checks if the fault is a segment fault.
    pub fn is_segment(self) -> bool {
        matches!(self, Self::InstructionSegment | Self::DataSegment)
    }

    /// Checks if the fault is delivered to the hypervisor.
    pub fn is_host(self) -> bool {
        matches!(self, Self::HostInstructionStorage | Self::HostDataStorage)
    }
}

/// The reason a storage fault was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCause {
    /// No valid translation was found.
    NoPte,

    /// The translation structures are malformed.
    BadConfig,

    /// The access is not permitted by the page protection.
    Protection,

    /// Reference or change bit needs updating and hardware updates are
    /// not available.
    AtomicRc,

    /// Instruction fetch from guarded (non-idempotent I/O) storage.
    Guarded,
}

impl FaultCause {
    /// Returns the architected DSISR/SRR1 bit of the cause.
    pub fn bits(self) -> u32 {
        match self {
            Self::NoPte => Fault::DSISR_NOPTE,
            Self::BadConfig => Fault::DSISR_R_BADCONFIG,
            Self::Protection => Fault::DSISR_PROTFAULT,
            Self::AtomicRc => Fault::DSISR_ATOMIC_RC,
            Self::Guarded => Fault::SRR1_NOEXEC_GUARD,
        }
    }
}

/// A translation fault to be injected into the guest.
///
/// The translator never transfers control itself. The caller decides how
/// to deliver the fault, using [`kind`] to pick the interrupt and
/// [`cause_bits`] to fill the status register.
///
/// [`kind`]: Self::kind
/// [`cause_bits`]: Self::cause_bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fault {
    /// The interrupt to deliver.
    pub kind: FaultKind,

    /// The effective address being translated.
    pub ea: Ea,

    /// The access that faulted.
    pub access: AccessKind,

    /// Why the fault was raised. `None` for segment faults.
    pub cause: Option<FaultCause>,

    /// The guest real address whose partition-scoped translation failed.
    pub guest_ra: Option<Ra>,

    /// Set when the fault happened while translating the address of a
    /// guest process table or process-scoped directory entry.
    pub table_walk: bool,
}

impl Fault {
    /// No PTE found.
    pub const DSISR_NOPTE: u32 = 0x4000_0000;
    /// Protection fault.
    pub const DSISR_PROTFAULT: u32 = 0x0800_0000;
    /// Access was a store.
    pub const DSISR_ISSTORE: u32 = 0x0200_0000;
    /// Fault while translating a process table or guest directory address.
    pub const DSISR_PRTABLE_FAULT: u32 = 0x0002_0000;
    /// Malformed radix configuration.
    pub const DSISR_R_BADCONFIG: u32 = 0x0008_0000;
    /// Reference/change update required.
    pub const DSISR_ATOMIC_RC: u32 = 0x0004_0000;
    /// Instruction fetch from guarded storage.
    pub const SRR1_NOEXEC_GUARD: u32 = 0x1000_0000;

    /// Creates a segment fault for an illegal effective address quadrant.
    pub fn segment(ea: Ea, access: AccessKind) -> Self {
        let kind = match access {
            AccessKind::Execute => FaultKind::InstructionSegment,
            _ => FaultKind::DataSegment,
        };

        Self {
            kind,
            ea,
            access,
            cause: None,
            guest_ra: None,
            table_walk: false,
        }
    }

    /// Creates a storage fault raised by process-scoped translation.
    pub fn storage(ea: Ea, access: AccessKind, cause: FaultCause) -> Self {
        let kind = match access {
            AccessKind::Execute => FaultKind::InstructionStorage,
            _ => FaultKind::DataStorage,
        };

        Self {
            kind,
            ea,
            access,
            cause: Some(cause),
            guest_ra: None,
            table_walk: false,
        }
    }

    /// Creates a host storage fault raised by partition-scoped translation
    /// of `guest_ra`.
    pub fn host_storage(
        ea: Ea,
        access: AccessKind,
        guest_ra: Ra,
        cause: FaultCause,
        table_walk: bool,
    ) -> Self {
        let kind = match access {
            AccessKind::Execute => FaultKind::HostInstructionStorage,
            _ => FaultKind::HostDataStorage,
        };

        Self {
            kind,
            ea,
            access,
            cause: Some(cause),
            guest_ra: Some(guest_ra),
            table_walk,
        }
    }

    /// Returns the status register value for the fault.
    ///
    /// Data storage faults carry the store indicator for write accesses.
    /// Segment faults have no status bits.
    pub fn cause_bits(&self) -> u32 {
        if self.kind.is_segment() {
            return 0;
        }

        let mut bits = self.cause.map_or(0, FaultCause::bits);

        if self.table_walk {
            bits |= Self::DSISR_PRTABLE_FAULT;
        }

        if self.access.is_store() {
            bits |= Self::DSISR_ISSTORE;
        }

        bits
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?} at {} ({:?}", self.kind, self.ea, self.access)?;

        if let Some(cause) = self.cause {
            write!(f, ", {cause:?}")?;
        }

        if let Some(guest_ra) = self.guest_ra {
            write!(f, ", guest real address {guest_ra}")?;
        }

        write!(f, ", cause bits {:#010x})", self.cause_bits())
    }
}
