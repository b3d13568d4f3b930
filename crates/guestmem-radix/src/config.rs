use serde::{Deserialize, Serialize};

use crate::PartitionTableEntry;

/// How reference/change bit updates are written back to guest memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyModel {
    /// A single translator accesses guest memory. Updates are plain stores.
    SingleWriter,

    /// Several translators may race on the same entries. Updates are
    /// compare-and-swap operations.
    #[default]
    MultiWriter,
}

/// Who is responsible for setting reference/change bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RcTracking {
    /// The translator sets the bits as part of every translation.
    #[default]
    Hardware,

    /// An access needing a bit update is refused with an atomic RC fault,
    /// which the translator recovers from by updating the entry and
    /// restarting the walk.
    Software,
}

/// Translator configuration, fixed for the lifetime of a translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// How reference/change updates are written.
    pub concurrency: ConcurrencyModel,

    /// Whether reference/change bits are set by the walk itself.
    pub rc_tracking: RcTracking,

    /// Maximum number of restarts of a single translation stage.
    pub retry_limit: usize,
}

impl TranslatorConfig {
    /// Default number of restarts of a single translation stage.
    pub const DEFAULT_RETRY_LIMIT: usize = 16;
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyModel::default(),
            rc_tracking: RcTracking::default(),
            retry_limit: Self::DEFAULT_RETRY_LIMIT,
        }
    }
}

/// The hypervisor the translated partition runs under.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Hypervisor {
    /// The partition table is owned by software running in hypervisor
    /// state on the same machine.
    #[default]
    Native,

    /// Partition 0 is run by a virtual hypervisor, which supplies its
    /// partition table entry directly.
    Virtual(PartitionTableEntry),
}

impl Hypervisor {
    /// Checks if partition 0 is run by a virtual hypervisor.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }
}
