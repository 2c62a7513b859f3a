//! Master index layout
//!
//! The master index is an ordinary [`PersistentTree`] whose keys are small
//! arrays:
//!
//! | Key | Value |
//! |-----|-------|
//! | `["root", name]` | root ref of the domain, or null when it is empty |
//! | `["id", name]` | numeric domain id |
//! | `["name", id]` | domain name (reverse lookup) |
//! | `["history"]` | root ref of the history tree |
//!
//! The ref of the committed master tree lives in the named-state slot
//! [`MASTER_SLOT`]; replacing that slot is the commit point.

use tessera_core::{codec, BitSequence, Error, Key, ObjectRef, Result, Stored, Value};
use tessera_index::PersistentTree;
use tessera_storage::{from_msgpack, to_msgpack, Storage};

/// Named-state slot holding the current master ref
pub(crate) const MASTER_SLOT: &str = "master";

fn master_key(parts: Vec<Key>) -> Result<BitSequence> {
    codec::encode(&Key::Array(parts))
}

fn root_key(name: &str) -> Result<BitSequence> {
    master_key(vec![Key::from("root"), Key::from(name)])
}

fn id_key(name: &str) -> Result<BitSequence> {
    master_key(vec![Key::from("id"), Key::from(name)])
}

fn name_key(id: u64) -> Result<BitSequence> {
    master_key(vec![Key::from("name"), Key::from(id)])
}

fn history_key() -> Result<BitSequence> {
    master_key(vec![Key::from("history")])
}

fn as_root(stored: Stored) -> Result<Option<ObjectRef>> {
    match stored {
        Stored::Ref(id) => Ok(Some(id)),
        Stored::Inline(value) if value.is_null() => Ok(None),
        other => Err(Error::Corrupted(format!(
            "master root entry holds {:?}",
            other
        ))),
    }
}

fn as_root_stored(root: Option<ObjectRef>) -> Stored {
    match root {
        Some(id) => Stored::Ref(id),
        None => Stored::Inline(Value::Null),
    }
}

/// Root entry of a domain: `None` when the domain is unknown, `Some(None)`
/// when it exists but is empty
pub(crate) fn domain_root(master: &PersistentTree, name: &str) -> Result<Option<Option<ObjectRef>>> {
    master.get(&root_key(name)?)?.map(as_root).transpose()
}

/// Numeric id of a domain
pub(crate) fn domain_id(master: &PersistentTree, name: &str) -> Result<Option<u64>> {
    let stored = match master.get(&id_key(name)?)? {
        Some(stored) => stored,
        None => return Ok(None),
    };
    let id = match &stored {
        Stored::Inline(value) => value.as_number().filter(|n| *n >= 0.0 && n.fract() == 0.0),
        Stored::Ref(_) => None,
    };
    id.map(|n| Some(n as u64))
        .ok_or_else(|| Error::Corrupted(format!("domain id of {:?} is {:?}", name, stored)))
}

/// Name of a domain by id
pub(crate) fn domain_name(master: &PersistentTree, id: u64) -> Result<Option<String>> {
    let stored = match master.get(&name_key(id)?)? {
        Some(stored) => stored,
        None => return Ok(None),
    };
    match &stored {
        Stored::Inline(value) => match value.as_str() {
            Some(name) => Ok(Some(name.to_string())),
            None => Err(Error::Corrupted(format!("name of domain {} is {:?}", id, value))),
        },
        Stored::Ref(_) => Err(Error::Corrupted(format!(
            "name of domain {} is stored out of line",
            id
        ))),
    }
}

/// Root ref of the history tree
pub(crate) fn history_root(master: &PersistentTree) -> Result<Option<ObjectRef>> {
    master.get(&history_key()?)?.map(as_root).transpose().map(Option::flatten)
}

pub(crate) fn set_domain_root(master: &mut PersistentTree, name: &str, root: Option<ObjectRef>) -> Result<()> {
    master.set(root_key(name)?, as_root_stored(root))?;
    Ok(())
}

/// Record the id of a newly created domain in both directions
pub(crate) fn register_domain(master: &mut PersistentTree, name: &str, id: u64) -> Result<()> {
    master.set(id_key(name)?, Stored::Inline(Value::from(id)))?;
    master.set(name_key(id)?, Stored::Inline(Value::from(name)))?;
    Ok(())
}

pub(crate) fn set_history_root(master: &mut PersistentTree, root: Option<ObjectRef>) -> Result<()> {
    master.set(history_key()?, as_root_stored(root))?;
    Ok(())
}

/// Read the committed master ref
pub(crate) fn load_master_ref(storage: &dyn Storage) -> Result<Option<ObjectRef>> {
    match storage.get_named_state(MASTER_SLOT)? {
        Some(bytes) => from_msgpack(&bytes),
        None => Ok(None),
    }
}

/// Replace the committed master ref
pub(crate) fn store_master_ref(storage: &dyn Storage, root: Option<ObjectRef>) -> Result<()> {
    storage.set_named_state(MASTER_SLOT, &to_msgpack(&root)?)
}
