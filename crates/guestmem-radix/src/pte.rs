use guestmem_core::{Protection, Ra, bits::getfield};

/// Page attribute encodings (PTE bits 58:59).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAttribute {
    /// Normal memory.
    Normal,

    /// Strong access ordering.
    StrongAccessOrdering,

    /// Non-idempotent I/O. Treated as guarded storage.
    NonIdempotentIo,

    /// Tolerant I/O.
    TolerantIo,
}

/// A radix page directory or page table entry.
///
/// The same 64-bit format is used for every level of the tree. Directory
/// entries (leaf bit clear) carry the base and size of the next level, leaf
/// entries carry the real page number, access authority and the
/// reference/change bits.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry(pub u64);

impl PageTableEntry {
    /// Valid bit.
    pub const VALID: u64 = 0x8000_0000_0000_0000;
    /// Leaf bit.
    pub const LEAF: u64 = 0x4000_0000_0000_0000;
    /// Real page number.
    pub const RPN: u64 = 0x01ff_ffff_ffff_f000;
    /// Reference bit.
    pub const R: u64 = 0x0000_0000_0000_0100;
    /// Change bit.
    pub const C: u64 = 0x0000_0000_0000_0080;
    /// Page attribute field.
    pub const ATT: u64 = 0x0000_0000_0000_0030;
    /// Encoded access authority: privileged only.
    pub const EAA_PRIV: u64 = 0x0000_0000_0000_0008;
    /// Encoded access authority: read.
    pub const EAA_R: u64 = 0x0000_0000_0000_0004;
    /// Encoded access authority: read/write.
    pub const EAA_RW: u64 = 0x0000_0000_0000_0002;
    /// Encoded access authority: execute.
    pub const EAA_X: u64 = 0x0000_0000_0000_0001;
    /// Next level base (directory entries).
    pub const NLB: u64 = 0x0fff_ffff_ffff_ff00;
    /// Next level size (directory entries).
    pub const NLS: u64 = 0x0000_0000_0000_001f;

    /// Checks if the entry is valid.
    pub fn valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Checks if the entry is a leaf.
    pub fn leaf(self) -> bool {
        self.0 & Self::LEAF != 0
    }

    /// Returns the real page number field, in place (not shifted).
    pub fn rpn(self) -> u64 {
        self.0 & Self::RPN
    }

    /// Checks if the reference bit is set.
    pub fn reference(self) -> bool {
        self.0 & Self::R != 0
    }

    /// Checks if the change bit is set.
    pub fn change(self) -> bool {
        self.0 & Self::C != 0
    }

    /// Returns the page attribute.
    pub fn attribute(self) -> PageAttribute {
        match getfield(Self::ATT, self.0) {
            0 => PageAttribute::Normal,
            1 => PageAttribute::StrongAccessOrdering,
            2 => PageAttribute::NonIdempotentIo,
            _ => PageAttribute::TolerantIo,
        }
    }

    /// Checks if the page is accessible in privileged state only.
    pub fn privileged(self) -> bool {
        self.0 & Self::EAA_PRIV != 0
    }

    /// Decodes the encoded access authority into a protection set.
    ///
    /// The privileged bit is not taken into account.
    pub fn authority(self) -> Protection {
        let mut protection = Protection::empty();

        if self.0 & Self::EAA_R != 0 {
            protection |= Protection::R;
        }
        if self.0 & Self::EAA_RW != 0 {
            protection |= Protection::RW;
        }
        if self.0 & Self::EAA_X != 0 {
            protection |= Protection::X;
        }

        protection
    }

    /// Returns the base address of the next level directory.
    pub fn next_level_base(self) -> Ra {
        Ra(self.0 & Self::NLB)
    }

    /// Returns the number of address bits indexed by the next level
    /// directory.
    pub fn next_level_size(self) -> u64 {
        self.0 & Self::NLS
    }

    /// Forms the real address mapped by a leaf entry for a page of
    /// `1 << page_size` bytes.
    ///
    /// The high bits come from the real page number, the page offset from
    /// the translated `address`.
    pub fn real_address(self, address: u64, page_size: u64) -> Ra {
        let mask = page_mask(page_size);
        Ra((self.rpn() & !mask) | (address & mask))
    }

    /// Returns the entry with the reference bit, and the change bit when
    /// `store` is set, turned on.
    pub fn with_reference_change(self, store: bool) -> Self {
        let mut value = self.0 | Self::R;
        if store {
            value |= Self::C;
        }

        Self(value)
    }
}

/// Returns the mask of the offset bits within a page of `1 << page_size`
/// bytes.
pub(crate) fn page_mask(page_size: u64) -> u64 {
    match page_size {
        64.. => u64::MAX,
        bits => (1u64 << bits) - 1,
    }
}

impl std::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.valid() && !self.leaf() {
            return f
                .debug_struct("PageDirectoryEntry")
                .field("next_level_base", &self.next_level_base())
                .field("next_level_size", &self.next_level_size())
                .finish();
        }

        f.debug_struct("PageTableEntry")
            .field("valid", &self.valid())
            .field("leaf", &self.leaf())
            .field("rpn", &format_args!("{:#x}", self.rpn()))
            .field("reference", &self.reference())
            .field("change", &self.change())
            .field("attribute", &self.attribute())
            .field("privileged", &self.privileged())
            .field("authority", &format_args!("{}", self.authority()))
            .finish()
    }
}

impl From<u64> for PageTableEntry {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PageTableEntry> for u64 {
    fn from(value: PageTableEntry) -> Self {
        value.0
    }
}
