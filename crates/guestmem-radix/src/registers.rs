use guestmem_core::{Protection, Ra};

/// Machine State Register.
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct Msr(pub u64);

impl Msr {
    /// Hypervisor state.
    pub const HV: u64 = 1 << 60;
    /// Problem (unprivileged) state.
    pub const PR: u64 = 1 << 14;
    /// Instruction relocation.
    pub const IR: u64 = 1 << 5;
    /// Data relocation.
    pub const DR: u64 = 1 << 4;

    /// Checks if the processor is in hypervisor state.
    pub fn hypervisor(self) -> bool {
        self.0 & Self::HV != 0
    }

    /// Checks if the processor is in problem state.
    pub fn problem_state(self) -> bool {
        self.0 & Self::PR != 0
    }

    /// Checks if instruction fetches are translated.
    pub fn instruction_relocate(self) -> bool {
        self.0 & Self::IR != 0
    }

    /// Checks if data accesses are translated.
    pub fn data_relocate(self) -> bool {
        self.0 & Self::DR != 0
    }
}

impl std::fmt::Debug for Msr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Msr")
            .field("hypervisor", &self.hypervisor())
            .field("problem_state", &self.problem_state())
            .field("instruction_relocate", &self.instruction_relocate())
            .field("data_relocate", &self.data_relocate())
            .finish()
    }
}

impl From<u64> for Msr {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Logical Partitioning Control Register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Lpcr(pub u64);

impl Lpcr {
    /// Use process table.
    pub const UPRT: u64 = 1 << 22;

    /// Checks if the process table is in use.
    pub fn use_process_table(self) -> bool {
        self.0 & Self::UPRT != 0
    }
}

/// Partition Table Control Register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Ptcr(pub u64);

impl Ptcr {
    /// Partition table base.
    pub const PATB: u64 = 0x0fff_ffff_ffff_f000;
    /// Partition table size.
    pub const PATS: u64 = 0x0000_0000_0000_001f;

    /// Returns the base address of the partition table.
    pub fn base(self) -> Ra {
        Ra(self.0 & Self::PATB)
    }

    /// Returns the size of the partition table in bytes.
    pub fn size(self) -> u64 {
        1u64 << ((self.0 & Self::PATS) + 12)
    }
}

/// The register state consulted by a translation.
///
/// A snapshot of the accessing CPU, supplied with every call. The translator
/// keeps no register state of its own.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Machine State Register.
    pub msr: Msr,

    /// Logical Partition ID Register.
    pub lpidr: u64,

    /// Process ID Register.
    pub pidr: u64,

    /// Authority Mask Register.
    pub amr: u64,

    /// Instruction Authority Mask Register.
    pub iamr: u64,

    /// Logical Partitioning Control Register.
    pub lpcr: Lpcr,

    /// Partition Table Control Register.
    pub ptcr: Ptcr,
}

impl Registers {
    /// Returns the permissions left by the authority mask registers.
    ///
    /// Only key 0 (the two most significant bits) is considered.
    pub fn authority_mask(&self) -> Protection {
        let amr = self.amr >> 62;
        let iamr = self.iamr >> 62;

        let mut protection = Protection::empty();
        if amr & 0x2 == 0 {
            protection |= Protection::W;
        }
        if amr & 0x1 == 0 {
            protection |= Protection::R;
        }
        if iamr & 0x1 == 0 {
            protection |= Protection::X;
        }

        protection
    }
}
