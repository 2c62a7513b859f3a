//! Storage layer for TesseraDB
//!
//! This crate provides the object store every other layer persists into:
//! - [`Storage`]: the backend trait (immutable objects + named state slots)
//! - [`MemoryStore`]: ephemeral backend on a sharded map
//! - [`FileStore`]: append-only object log with atomic named-state files
//! - [`DurabilityMode`]: when file-backed writes reach the disk
//! - MessagePack helpers for typed records ([`StorageExt`])
//!
//! Objects are write-once. A backend hands out an [`ObjectRef`] per saved
//! object and never reuses it. Named state is the only mutable surface; the
//! engine uses it for the single "master" slot that makes a commit visible.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durability;
pub mod file;
pub mod format;
pub mod memory;

pub use durability::DurabilityMode;
pub use file::FileStore;
pub use format::{from_msgpack, to_msgpack};
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{ObjectRef, Result};

/// Object storage backend
///
/// Implementations must be safe to call from several threads at once.
/// Objects are immutable once saved; `set_named_state` must replace a slot
/// atomically (readers see the old or the new bytes, never a mix).
pub trait Storage: Send + Sync {
    /// Load the bytes of a saved object
    fn get_object(&self, id: ObjectRef) -> Result<Vec<u8>>;

    /// Save a new object and return its id
    fn save_object(&self, bytes: &[u8]) -> Result<ObjectRef>;

    /// Read a named state slot
    fn get_named_state(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace a named state slot
    fn set_named_state(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Push buffered writes to stable storage
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Typed record helpers over any [`Storage`]
pub trait StorageExt: Storage {
    /// Serialize `record` and save it as a new object
    fn save_record<T: Serialize + ?Sized>(&self, record: &T) -> Result<ObjectRef> {
        let bytes = to_msgpack(record)?;
        self.save_object(&bytes)
    }

    /// Load and deserialize an object
    fn load_record<T: DeserializeOwned>(&self, id: ObjectRef) -> Result<T> {
        let bytes = self.get_object(id)?;
        from_msgpack(&bytes)
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}
