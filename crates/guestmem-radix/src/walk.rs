use guestmem_core::{GuestMemory, MemoryError, Ra};
use smallvec::SmallVec;

use crate::{FaultCause, PageTableEntry};

/// Smallest number of address bits a directory may index.
pub const MIN_DIRECTORY_SIZE: u64 = 5;

/// A single entry fetched during a radix tree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// The entry as read from memory.
    pub entry: PageTableEntry,

    /// The real address the entry was read from.
    pub entry_address: Ra,

    /// The number of address bits indexed by the directory holding the
    /// entry.
    pub directory_size: u64,
}

/// Collection of translation entries, one per tree level.
pub type TranslationEntries = SmallVec<[TranslationEntry; 5]>;

/// The result of a successful radix tree walk.
#[derive(Debug, Clone)]
pub struct Walk {
    pub(crate) entries: TranslationEntries,
    pub(crate) pte: PageTableEntry,
    pub(crate) pte_address: Ra,
    pub(crate) ra: Ra,
    pub(crate) page_size: u64,
}

impl Walk {
    /// Returns the entries fetched during the walk, root first.
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Consumes the walk and returns the fetched entries.
    pub fn into_entries(self) -> TranslationEntries {
        self.entries
    }

    /// Returns the leaf entry.
    pub fn pte(&self) -> PageTableEntry {
        self.pte
    }

    /// Returns the real address of the leaf entry.
    pub fn pte_address(&self) -> Ra {
        self.pte_address
    }

    /// Returns the translated real address.
    pub fn ra(&self) -> Ra {
        self.ra
    }

    /// Returns the size of the mapped page, as a number of address bits.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// An error that stops a radix tree walk.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkError {
    /// The tree does not translate the address.
    #[error("Radix walk failed: {0:?}")]
    Fault(FaultCause),

    /// A directory could not be read.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<FaultCause> for WalkError {
    fn from(value: FaultCause) -> Self {
        Self::Fault(value)
    }
}

/// Position of a walk within the tree.
///
/// `remaining` is the page size budget: the number of low address bits not
/// yet consumed by a directory index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cursor {
    pub pte_address: Ra,
    pub directory_size: u64,
    pub remaining: u64,
}

impl Cursor {
    pub fn new(address: u64, base: Ra, size: u64, remaining: u64) -> Result<Self, FaultCause> {
        check_directory_size(size, remaining)?;

        Ok(Self {
            pte_address: base + directory_index(address, size, remaining) * 8,
            directory_size: size,
            remaining,
        })
    }

    /// Consumes the entry fetched at the current position.
    ///
    /// Returns the entry if it is a leaf, otherwise moves to the next level.
    pub fn advance(
        &mut self,
        address: u64,
        entry: PageTableEntry,
    ) -> Result<Option<PageTableEntry>, FaultCause> {
        if !entry.valid() {
            return Err(FaultCause::NoPte);
        }

        self.remaining -= self.directory_size;

        if entry.leaf() {
            return Ok(Some(entry));
        }

        let size = entry.next_level_size();
        check_directory_size(size, self.remaining)?;

        self.pte_address =
            entry.next_level_base() + directory_index(address, size, self.remaining) * 8;
        self.directory_size = size;

        Ok(None)
    }
}

fn check_directory_size(size: u64, remaining: u64) -> Result<(), FaultCause> {
    // A directory must map at least 2^5 entries, and cannot index more bits
    // than are left to translate.
    if size < MIN_DIRECTORY_SIZE || size > remaining {
        return Err(FaultCause::BadConfig);
    }

    Ok(())
}

fn directory_index(address: u64, size: u64, remaining: u64) -> u64 {
    (address >> (remaining - size)) & ((1u64 << size) - 1)
}

/// Walks a radix tree rooted at `base` to translate `address`.
///
/// `size` is the number of address bits indexed by the root directory and
/// `address_bits` the total number of bits translated by the tree. Each
/// directory consumes its size from the budget; the remaining bits at the
/// leaf are the page size.
///
/// Directory entries are read straight from `memory`, i.e. the tree is
/// assumed to live in the address space `memory` represents.
///
/// # Errors
///
/// - [`FaultCause::NoPte`] if an invalid entry is found on the way.
/// - [`FaultCause::BadConfig`] if a directory indexes fewer than 5 bits, or
///   more bits than are left to translate.
pub fn walk_tree<Memory>(
    memory: &Memory,
    address: u64,
    base: Ra,
    size: u64,
    address_bits: u64,
) -> Result<Walk, WalkError>
where
    Memory: GuestMemory + ?Sized,
{
    walk_with(address, base, size, address_bits, |entry_address| {
        let entry = PageTableEntry(memory.read_u64(entry_address)?);
        Ok::<_, WalkError>((entry_address, entry))
    })
}

/// Walks a radix tree, fetching each entry through `fetch`.
///
/// `fetch` receives the address of the entry in the tree's own address
/// space and returns the real address it was read from together with its
/// value.
pub(crate) fn walk_with<E>(
    address: u64,
    base: Ra,
    size: u64,
    address_bits: u64,
    mut fetch: impl FnMut(Ra) -> Result<(Ra, PageTableEntry), E>,
) -> Result<Walk, E>
where
    E: From<FaultCause>,
{
    let mut cursor = Cursor::new(address, base, size, address_bits)?;
    let mut entries = TranslationEntries::new();

    loop {
        let directory_size = cursor.directory_size;
        let (entry_address, entry) = fetch(cursor.pte_address)?;

        tracing::trace!(
            level = entries.len(),
            %entry_address,
            entry = format_args!("{:#018x}", entry.0),
            "radix walk"
        );

        entries.push(TranslationEntry {
            entry,
            entry_address,
            directory_size,
        });

        if let Some(pte) = cursor.advance(address, entry)? {
            return Ok(Walk {
                entries,
                pte,
                pte_address: entry_address,
                ra: pte.real_address(address, cursor.remaining),
                page_size: cursor.remaining,
            });
        }
    }
}
