use guestmem_core::{
    Ra,
    bits::{getfield, setfield},
};

/// Root directory base mask shared by partition and process table entries.
const RPDB: u64 = 0x0fff_ffff_ffff_ff00;

/// Root directory size mask shared by partition and process table entries.
const RPDS: u64 = 0x0000_0000_0000_001f;

/// The root of a radix tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadixRoot {
    /// Base address of the root directory.
    pub base: Ra,

    /// Number of address bits indexed by the root directory.
    pub size: u64,

    /// Total number of address bits translated by the tree (RTS).
    pub address_bits: u64,
}

impl RadixRoot {
    fn from_doubleword(dw: u64) -> Self {
        Self {
            base: Ra(dw & RPDB),
            size: dw & RPDS,
            address_bits: radix_tree_size(dw),
        }
    }

    /// Encodes the root in the layout of the first doubleword of a
    /// partition or process table entry.
    ///
    /// `address_bits` must be in the range `31..=62`.
    pub fn to_doubleword(self) -> u64 {
        let rts = self.address_bits.saturating_sub(31);

        setfield(0x6000_0000_0000_0000, 0, rts >> 3)
            | setfield(0x0000_0000_0000_00e0, 0, rts & 0x7)
            | (self.base.0 & RPDB)
            | (self.size & RPDS)
    }
}

/// Decodes the split radix tree size field of a table entry.
///
/// The field is stored as RTS1 (bits 1:2) and RTS2 (bits 56:58), and encodes
/// the tree size minus 31.
pub fn radix_tree_size(dw: u64) -> u64 {
    (((dw >> 58) & 0x18) | ((dw >> 5) & 0x7)) + 31
}

/// A partition table entry.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTableEntry {
    /// First doubleword: host radix flag and partition-scoped tree root.
    pub dw0: u64,

    /// Second doubleword: process table base and size.
    pub dw1: u64,
}

impl PartitionTableEntry {
    /// Host radix flag.
    pub const HR: u64 = 0x8000_0000_0000_0000;
    /// Process table base.
    pub const PRTB: u64 = 0x0fff_ffff_ffff_f000;
    /// Process table size.
    pub const PRTS: u64 = 0x0000_0000_0000_001f;

    /// Size of a partition table entry in bytes.
    pub const SIZE: u64 = 16;

    /// Creates a new partition table entry.
    pub const fn new(dw0: u64, dw1: u64) -> Self {
        Self { dw0, dw1 }
    }

    /// Checks if the partition uses radix translation.
    pub fn host_radix(&self) -> bool {
        self.dw0 & Self::HR != 0
    }

    /// Returns the root of the partition-scoped radix tree.
    pub fn partition_root(&self) -> RadixRoot {
        RadixRoot::from_doubleword(self.dw0)
    }

    /// Returns the base address of the process table.
    pub fn process_table_base(&self) -> Ra {
        Ra(self.dw1 & Self::PRTB)
    }

    /// Returns the size of the process table in bytes.
    pub fn process_table_size(&self) -> u64 {
        1u64 << (getfield(Self::PRTS, self.dw1) + 12)
    }
}

/// A process table entry.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTableEntry {
    /// First doubleword: process-scoped tree root.
    pub dw0: u64,

    /// Second doubleword: reserved.
    pub dw1: u64,
}

impl ProcessTableEntry {
    /// Size of a process table entry in bytes.
    pub const SIZE: u64 = 16;

    /// Creates a new process table entry.
    pub const fn new(dw0: u64, dw1: u64) -> Self {
        Self { dw0, dw1 }
    }

    /// Returns the root of the process-scoped radix tree.
    pub fn process_root(&self) -> RadixRoot {
        RadixRoot::from_doubleword(self.dw0)
    }
}
