//! Guest memory translation and dirty-tracking verification.
//!
//! This crate re-exports the workspace members:
//!
//! - [`radix`]: the two-stage radix MMU walker used to resolve effective
//!   addresses into real addresses on behalf of a CPU emulation loop.
//! - [`dirty`]: the dirty-bitmap generator and verifier used to validate
//!   dirty page logging against two memory snapshots.
//!
//! The core types ([`Ea`], [`Ra`], [`GuestMemory`], ...) are available at
//! the crate root.

pub use guestmem_core::*;

/// Radix tree address translation.
#[cfg(feature = "radix")]
pub mod radix {
    pub use guestmem_radix::*;
}

/// Dirty bitmap generation and verification.
#[cfg(feature = "dirty")]
pub mod dirty {
    pub use guestmem_dirty::*;
}
