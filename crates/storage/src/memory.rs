//! Ephemeral in-memory store
//!
//! Objects live in a sharded `DashMap`; ids come from an atomic counter.
//! Nothing survives the process. Durability is best-effort by definition.

use crate::Storage;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Error, ObjectRef, Result};

/// In-memory storage backend
#[derive(Debug)]
pub struct MemoryStore {
    objects: DashMap<ObjectRef, Arc<[u8]>>,
    named: RwLock<FxHashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            named: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of objects saved so far
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStore {
    fn get_object(&self, id: ObjectRef) -> Result<Vec<u8>> {
        self.objects
            .get(&id)
            .map(|entry| entry.value().to_vec())
            .ok_or_else(|| Error::Storage(format!("object {} not found", id)))
    }

    fn save_object(&self, bytes: &[u8]) -> Result<ObjectRef> {
        let id = ObjectRef::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.objects.insert(id, Arc::from(bytes));
        Ok(id)
    }

    fn get_named_state(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.named.read().get(name).cloned())
    }

    fn set_named_state(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.named.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}
