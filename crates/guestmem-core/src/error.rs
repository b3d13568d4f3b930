use crate::Ra;

/// An error that can occur when accessing guest memory.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The address lies outside of the guest memory.
    #[error("Address {0} is out of bounds")]
    OutOfBounds(Ra),

    /// The address is not aligned to the access size.
    #[error("Address {0} is not naturally aligned")]
    Unaligned(Ra),
}
