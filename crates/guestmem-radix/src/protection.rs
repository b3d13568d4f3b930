use guestmem_core::{AccessKind, Protection};

use crate::{FaultCause, PageAttribute, PageTableEntry, RcTracking, Registers};

/// The translation stage a leaf entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Guest effective address to guest real address.
    Process,

    /// Guest real address to host real address.
    Partition,
}

/// Accessor state consulted by [`check_protection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionContext {
    /// The access is made in problem (unprivileged) state.
    pub problem_state: bool,

    /// Permissions left by the authority mask registers.
    pub authority_mask: Protection,
}

impl From<&Registers> for ProtectionContext {
    fn from(value: &Registers) -> Self {
        Self {
            problem_state: value.msr.problem_state(),
            authority_mask: value.authority_mask(),
        }
    }
}

/// Checks that `access` is permitted by the leaf entry `pte`.
///
/// Returns the protection granted by the entry. Instruction fetches from
/// non-idempotent I/O pages are refused as guarded storage. With software
/// reference/change tracking, an access that would need the R or C bit set
/// is refused with [`FaultCause::AtomicRc`].
pub fn check_protection(
    pte: PageTableEntry,
    access: AccessKind,
    scope: Scope,
    context: &ProtectionContext,
    rc_tracking: RcTracking,
) -> Result<Protection, FaultCause> {
    if access.is_fetch() && pte.attribute() == PageAttribute::NonIdempotentIo {
        return Err(FaultCause::Guarded);
    }

    let protection = match scope {
        Scope::Process if pte.privileged() && context.problem_state => Protection::empty(),
        Scope::Process if !pte.privileged() && !context.problem_state => {
            pte.authority() & context.authority_mask
        }
        _ => pte.authority(),
    };

    if !protection.allows(access) {
        return Err(FaultCause::Protection);
    }

    if rc_tracking == RcTracking::Software
        && (!pte.reference() || (access.is_store() && !pte.change()))
    {
        return Err(FaultCause::AtomicRc);
    }

    Ok(protection)
}
