//! Helpers for building radix trees in flat memory.

use std::sync::atomic::{AtomicUsize, Ordering};

use guestmem_core::{FlatMemory, GuestMemory, MemoryError, Ra};

use crate::{PageTableEntry, RadixRoot};

/// Leaf flags of a readable, writable and executable page that was already
/// referenced and changed.
pub const RWX_LEAF: u64 = PageTableEntry::EAA_RW
    | PageTableEntry::EAA_X
    | PageTableEntry::R
    | PageTableEntry::C;

/// Allocates directories in flat memory and fills them in.
///
/// Directories are allocated from a bump pointer in the address space the
/// tree lives in. `offset` is added to every address before memory is
/// touched, so a builder can lay out a guest tree at guest real addresses
/// backed by host memory at `guest + offset`.
pub struct TreeBuilder<'a> {
    memory: &'a FlatMemory,
    next: u64,
    offset: u64,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(memory: &'a FlatMemory, next: u64) -> Self {
        Self::with_offset(memory, next, 0)
    }

    pub fn with_offset(memory: &'a FlatMemory, next: u64, offset: u64) -> Self {
        Self {
            memory,
            next,
            offset,
        }
    }

    /// Returns the next free address.
    pub fn next(&self) -> u64 {
        self.next
    }

    /// Allocates `bytes` zeroed bytes aligned to their own size.
    pub fn alloc(&mut self, bytes: u64) -> Ra {
        let align = bytes.next_power_of_two().max(0x100);
        let base = self.next.next_multiple_of(align);
        self.next = base + bytes;
        Ra(base)
    }

    /// Allocates a root directory indexing `size` bits of a tree
    /// translating `address_bits` bits.
    pub fn root(&mut self, size: u64, address_bits: u64) -> RadixRoot {
        RadixRoot {
            base: self.alloc(8 << size),
            size,
            address_bits,
        }
    }

    pub fn read(&self, address: Ra) -> u64 {
        self.memory.read_u64(address + self.offset).unwrap()
    }

    pub fn write(&self, address: Ra, value: u64) {
        self.memory.write_u64(address + self.offset, value).unwrap();
    }

    /// Maps `address` to `ra` through directories of the given sizes below
    /// the root, creating missing directories.
    ///
    /// Returns the address of the leaf entry, in the tree's address space.
    pub fn map(
        &mut self,
        root: RadixRoot,
        address: u64,
        levels: &[u64],
        ra: u64,
        leaf: u64,
    ) -> Ra {
        let mut remaining = root.address_bits;
        let mut directory = root.base;
        let mut size = root.size;

        for &next_size in levels {
            remaining -= size;
            let index = (address >> remaining) & ((1 << size) - 1);
            let entry_address = directory + index * 8;

            let mut entry = PageTableEntry(self.read(entry_address));
            if !entry.valid() {
                let base = self.alloc(8 << next_size);
                entry = PageTableEntry(PageTableEntry::VALID | base.0 | next_size);
                self.write(entry_address, entry.0);
            }

            assert!(!entry.leaf(), "{address:#x} is already mapped");
            assert_eq!(entry.next_level_size(), next_size);

            directory = entry.next_level_base();
            size = next_size;
        }

        remaining -= size;
        let index = (address >> remaining) & ((1 << size) - 1);
        let entry_address = directory + index * 8;

        self.write(
            entry_address,
            PageTableEntry::VALID | PageTableEntry::LEAF | (ra & PageTableEntry::RPN) | leaf,
        );

        entry_address
    }
}

/// Memory wrapper counting accesses.
pub struct CountingMemory<M> {
    inner: M,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl<M> CountingMemory<M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of stores and compare-and-swap operations.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }
}

impl<M> GuestMemory for CountingMemory<M>
where
    M: GuestMemory,
{
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read_u64(ra)
    }

    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.write_u64(ra, value)
    }

    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.inner.cas_u64(ra, current, new)
    }
}

/// Memory wrapper whose compare-and-swap operations lose against a
/// simulated third party a given number of times.
pub struct RacingMemory<M> {
    inner: M,
    races: AtomicUsize,
    attempts: AtomicUsize,
}

impl<M> RacingMemory<M> {
    pub fn new(inner: M, races: usize) -> Self {
        Self {
            inner,
            races: AtomicUsize::new(races),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of compare-and-swap operations made.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl<M> GuestMemory for RacingMemory<M>
where
    M: GuestMemory,
{
    fn read_u64(&self, ra: Ra) -> Result<u64, MemoryError> {
        self.inner.read_u64(ra)
    }

    fn write_u64(&self, ra: Ra, value: u64) -> Result<(), MemoryError> {
        self.inner.write_u64(ra, value)
    }

    fn cas_u64(&self, ra: Ra, current: u64, new: u64) -> Result<u64, MemoryError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let lost = self
            .races
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |races| {
                races.checked_sub(1)
            })
            .is_ok();

        if lost {
            // Neither the expected nor the new value.
            return Ok(!(current | new));
        }

        self.inner.cas_u64(ra, current, new)
    }
}
