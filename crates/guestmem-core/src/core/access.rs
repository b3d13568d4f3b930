use serde::{Deserialize, Serialize};

/// The kind of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    /// Data load.
    Read,

    /// Data store.
    Write,

    /// Instruction fetch.
    Execute,
}

impl AccessKind {
    /// Returns the protection required to perform this access.
    pub fn required(self) -> Protection {
        match self {
            Self::Read => Protection::R,
            Self::Write => Protection::W,
            Self::Execute => Protection::X,
        }
    }

    /// Checks if the access is an instruction fetch.
    pub fn is_fetch(self) -> bool {
        matches!(self, Self::Execute)
    }

    /// Checks if the access is a store.
    pub fn is_store(self) -> bool {
        matches!(self, Self::Write)
    }
}

bitflags::bitflags! {
    /// Page protection flags.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Protection: u8 {
        /// Read permission.
        const R = 0b00000001;

        /// Write permission.
        const W = 0b00000010;

        /// Execute permission.
        const X = 0b00000100;

        /// Combined Read and Write permissions.
        const RW = Self::R.bits() | Self::W.bits();

        /// Combined Read and Execute permissions.
        const RX = Self::R.bits() | Self::X.bits();

        /// Full access: Read, Write, and Execute permissions.
        const RWX = Self::R.bits() | Self::W.bits() | Self::X.bits();
    }
}

impl Protection {
    /// Checks if the protection allows the given access.
    pub fn allows(self, access: AccessKind) -> bool {
        self.contains(access.required())
    }
}

impl std::fmt::Display for Protection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let r = if self.contains(Self::R) { 'r' } else { '-' };
        let w = if self.contains(Self::W) { 'w' } else { '-' };
        let x = if self.contains(Self::X) { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}
