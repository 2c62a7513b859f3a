//! Persistent counters: history sequence numbers and domain ids

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::Result;
use tessera_storage::{from_msgpack, to_msgpack, Storage};

/// Named-state slot holding the counters
pub(crate) const SEQUENCES_SLOT: &str = "sequences";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct SequenceTable {
    next_history: u64,
    next_domain: u64,
}

/// Monotonic counters shared by every transaction of a database
///
/// Values handed out by uncommitted transactions are simply skipped; the
/// counters only ever move forward.
#[derive(Debug)]
pub(crate) struct Sequences {
    next_history: AtomicU64,
    next_domain: AtomicU64,
}

impl Sequences {
    /// Load the counters (starting at 1 for a fresh store)
    pub(crate) fn load(storage: &dyn Storage) -> Result<Self> {
        let table = match storage.get_named_state(SEQUENCES_SLOT)? {
            Some(bytes) => from_msgpack::<SequenceTable>(&bytes)?,
            None => SequenceTable::default(),
        };
        Ok(Self {
            next_history: AtomicU64::new(table.next_history.max(1)),
            next_domain: AtomicU64::new(table.next_domain.max(1)),
        })
    }

    pub(crate) fn next_history(&self) -> u64 {
        self.next_history.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn next_domain(&self) -> u64 {
        self.next_domain.fetch_add(1, Ordering::AcqRel)
    }

    /// Write the current counters to their named slot
    pub(crate) fn persist(&self, storage: &dyn Storage) -> Result<()> {
        let table = SequenceTable {
            next_history: self.next_history.load(Ordering::Acquire),
            next_domain: self.next_domain.load(Ordering::Acquire),
        };
        storage.set_named_state(SEQUENCES_SLOT, &to_msgpack(&table)?)
    }
}
