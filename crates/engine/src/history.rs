//! Append-only write history
//!
//! Every successful write of a transaction appends one [`HistoryEntry`] to
//! the transaction's history tree under a fresh sequence number. The merge
//! replays these entries to detect conflicts, and the read-only `$history`
//! domain exposes them.

use serde::{Deserialize, Serialize};
use tessera_core::{codec, BitSequence, Error, Key, Result, Stored, Value};
use tessera_index::PersistentTree;
use tessera_storage::{Storage, StorageExt};

/// Name of the reserved, read-only history domain
pub const HISTORY_DOMAIN: &str = "$history";

/// Kind of write recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    /// Key did not exist before
    Insert,
    /// Existing key got a new value
    Update,
    /// Existing key was removed
    Delete,
}

impl HistoryKind {
    /// Lower-case name used in `$history` values
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Insert => "insert",
            HistoryKind::Update => "update",
            HistoryKind::Delete => "delete",
        }
    }
}

/// One recorded write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HistoryEntry {
    pub(crate) kind: HistoryKind,
    pub(crate) domain_id: u64,
    pub(crate) key: Key,
    /// Value the writer observed before the write
    pub(crate) old: Option<Stored>,
    /// Value written (`None` for deletes)
    pub(crate) new: Option<Stored>,
}

impl HistoryEntry {
    pub(crate) fn new(domain_id: u64, key: Key, old: Option<Stored>, new: Option<Stored>) -> Self {
        let kind = match (&old, &new) {
            (None, _) => HistoryKind::Insert,
            (Some(_), Some(_)) => HistoryKind::Update,
            (Some(_), None) => HistoryKind::Delete,
        };
        Self {
            kind,
            domain_id,
            key,
            old,
            new,
        }
    }
}

/// History tree key of a sequence number
pub(crate) fn sequence_key(seq: u64) -> Result<BitSequence> {
    codec::encode(&Key::from(seq))
}

/// Save `entry` and link it under `seq`
///
/// A sequence number that is already present means two writers were handed
/// the same number: the history can no longer be trusted.
pub(crate) fn append(
    history: &mut PersistentTree,
    seq: u64,
    entry: Stored,
) -> Result<()> {
    let key = sequence_key(seq)?;
    if history.get(&key)?.is_some() {
        return Err(Error::Corrupted(format!("history sequence {} reused", seq)));
    }
    history.set(key, entry)?;
    Ok(())
}

/// Save an entry object and return its slot
pub(crate) fn save_entry(storage: &dyn Storage, entry: &HistoryEntry) -> Result<Stored> {
    Ok(Stored::Ref(storage.save_record(entry)?))
}

/// Load the entry a history slot points to
pub(crate) fn load_entry(storage: &dyn Storage, slot: &Stored) -> Result<HistoryEntry> {
    match slot {
        Stored::Ref(id) => storage.load_record(*id),
        Stored::Inline(value) => Err(Error::Corrupted(format!(
            "history slot holds inline value {:?}",
            value
        ))),
    }
}

/// Public view of an entry: `{kind, domain, key, old, new}`
pub(crate) fn render(entry: &HistoryEntry, domain: Option<String>, old: Option<Value>, new: Option<Value>) -> Value {
    Value::object([
        ("kind", Value::from(entry.kind.as_str())),
        ("domain", domain.map(Value::from).unwrap_or(Value::Null)),
        ("key", Value::from(&entry.key)),
        ("old", old.unwrap_or(Value::Null)),
        ("new", new.unwrap_or(Value::Null)),
    ])
}
