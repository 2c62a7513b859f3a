//! Durability mode for file-backed stores.
//!
//! Defines when object-log appends and named-state writes reach the disk.

use serde::{Deserialize, Serialize};

/// Durability mode for store writes.
///
/// Controls when data is fsynced to disk and the trade-off between
/// performance and durability.
///
/// # Mode Comparison
///
/// | Mode | Object log | Named state | Use Case |
/// |------|------------|-------------|----------|
/// | None | never synced | renamed, not synced | Tests, caches |
/// | Batched | synced every N appends and before every named-state write | renamed after sync | Production (balanced) |
/// | Strict | synced after every append | renamed after sync | Audit data |
///
/// In every mode the named-state write is an atomic rename, so a reader
/// never sees a half-written master ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurabilityMode {
    /// No fsync at all - data may be lost on crash.
    None,

    /// fsync after every object append.
    Strict,

    /// fsync every `batch_size` appends, and always before a named-state
    /// write so the committed master never points at unsynced objects.
    Batched {
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode ever calls fsync.
    pub fn requires_sync(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }

    /// Check if this mode fsyncs after every append.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }

    /// Whether `pending` unsynced appends should be flushed now.
    pub fn should_sync(&self, pending: usize) -> bool {
        if self.requires_immediate_fsync() {
            return pending > 0;
        }
        match self {
            DurabilityMode::Batched { batch_size } => pending >= (*batch_size).max(1),
            _ => false,
        }
    }

    /// Human-readable description of the mode.
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::None => "No durability (fastest, data lost on crash)",
            DurabilityMode::Strict => "Sync fsync (safest, slowest)",
            DurabilityMode::Batched { .. } => "Batched fsync (balanced speed/safety)",
        }
    }

    /// Create a batched mode with recommended defaults.
    ///
    /// Returns `Batched { batch_size: 1000 }`.
    pub fn buffered_default() -> Self {
        DurabilityMode::Batched { batch_size: 1000 }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::buffered_default()
    }
}
