use guestmem_core::{AccessKind, GuestMemory, MemoryError, Ra};

use crate::{ConcurrencyModel, PageTableEntry};

/// Outcome of a reference/change bit update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcUpdate {
    /// The entry already had the required bits. Nothing was written.
    Unchanged(PageTableEntry),

    /// The entry was written back with the required bits set.
    Updated(PageTableEntry),

    /// The entry was modified concurrently. The walk that produced it must
    /// be restarted.
    Raced,
}

impl RcUpdate {
    /// Returns the entry as it now stands in memory, unless the update
    /// raced.
    pub fn pte(self) -> Option<PageTableEntry> {
        match self {
            Self::Unchanged(pte) | Self::Updated(pte) => Some(pte),
            Self::Raced => None,
        }
    }
}

/// Sets the reference bit, and the change bit for stores, of the leaf entry
/// `pte` read from `pte_address`.
///
/// With [`ConcurrencyModel::MultiWriter`] the entry is replaced with a
/// compare-and-swap. Finding the new value already in place counts as
/// success; finding any other value is a race.
pub fn set_reference_change<Memory>(
    memory: &Memory,
    concurrency: ConcurrencyModel,
    pte: PageTableEntry,
    access: AccessKind,
    pte_address: Ra,
) -> Result<RcUpdate, MemoryError>
where
    Memory: GuestMemory + ?Sized,
{
    let updated = pte.with_reference_change(access.is_store());
    if updated == pte {
        return Ok(RcUpdate::Unchanged(pte));
    }

    match concurrency {
        ConcurrencyModel::SingleWriter => {
            memory.write_u64(pte_address, updated.0)?;
        }
        ConcurrencyModel::MultiWriter => {
            let previous = memory.cas_u64(pte_address, pte.0, updated.0)?;
            if previous != pte.0 && previous != updated.0 {
                tracing::debug!(
                    %pte_address,
                    expected = format_args!("{:#018x}", pte.0),
                    found = format_args!("{previous:#018x}"),
                    "reference/change update raced"
                );
                return Ok(RcUpdate::Raced);
            }
        }
    }

    Ok(RcUpdate::Updated(updated))
}
