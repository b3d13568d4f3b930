//! Radix tree MMU translation.
//!
//! Translates effective addresses of a virtualized guest to real addresses
//! by walking up to two nested radix trees: the process-scoped tree maps
//! guest effective addresses to guest real addresses, the partition-scoped
//! tree maps guest real addresses to host real addresses.
//!
//! Trees are read live from guest memory through [`GuestMemory`] on every
//! translation. The only writes made are updates of the reference and
//! change bits of leaf entries.
//!
//! [`GuestMemory`]: guestmem_core::GuestMemory

mod config;
mod error;
mod fault;
mod protection;
mod pte;
mod rc;
mod registers;
mod table;
mod translator;
mod walk;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod translator_tests;

pub use self::{
    config::{ConcurrencyModel, Hypervisor, RcTracking, TranslatorConfig},
    error::RadixError,
    fault::{Fault, FaultCause, FaultKind},
    protection::{ProtectionContext, Scope, check_protection},
    pte::{PageAttribute, PageTableEntry},
    rc::{RcUpdate, set_reference_change},
    registers::{Lpcr, Msr, Ptcr, Registers},
    table::{PartitionTableEntry, ProcessTableEntry, RadixRoot, radix_tree_size},
    translator::{
        AddressSpace, BASE_PAGE_SHIFT, EADDR_MASK, REAL_MODE_MASK, RadixTranslator, Translation,
        qualify,
    },
    walk::{
        MIN_DIRECTORY_SIZE, TranslationEntries, TranslationEntry, Walk, WalkError, walk_tree,
    },
};
