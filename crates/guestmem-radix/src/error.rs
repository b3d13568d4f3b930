use guestmem_core::{Ea, MemoryError};

use crate::Fault;

/// An error that can occur during radix translation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadixError {
    /// The translation faulted and the fault should be delivered to the
    /// guest.
    #[error("Translation fault: {0}")]
    Fault(Fault),

    /// Guest memory could not be accessed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The translation was restarted too many times.
    #[error("Translation of {ea} restarted {attempts} times")]
    RetryLimit {
        /// The effective address being translated.
        ea: Ea,

        /// The number of attempts made.
        attempts: usize,
    },
}

impl RadixError {
    /// Returns the fault, if the error is a translation fault.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<Fault> for RadixError {
    fn from(value: Fault) -> Self {
        Self::Fault(value)
    }
}
