//! Database handle and state shared by its transactions
//!
//! The only state mutated by more than one transaction is the master ref.
//! Every read-decide-swap of it runs as a job on the database's master
//! [`SerialQueue`], which makes a commit atomic with respect to every
//! other commit without holding a lock across storage calls.

use crate::config::{DatabaseBuilder, DatabaseConfig};
use crate::master;
use crate::sequence::Sequences;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tessera_concurrency::SerialQueue;
use tessera_core::{ObjectRef, Result, Stored, Value};
use tessera_index::PersistentTree;
use tessera_storage::{DurabilityMode, FileStore, MemoryStore, Storage, StorageExt};
use tracing::{error, info, warn};

#[derive(Debug)]
struct MasterSlot {
    current: Option<ObjectRef>,
    /// Last swap failed; the stored slot may differ from `current`
    suspect: bool,
}

/// State shared by a database and all of its transactions
pub(crate) struct Shared {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) config: DatabaseConfig,
    pub(crate) sequences: Sequences,
    /// Serializes master lookups and merges
    pub(crate) queue: SerialQueue,
    master: Mutex<MasterSlot>,
}

impl Shared {
    /// Master ref new transactions start from
    pub(crate) fn snapshot_ref(&self) -> Option<ObjectRef> {
        self.master.lock().current
    }

    /// Master ref to merge against
    ///
    /// After a failed swap the slot is re-read from storage first.
    pub(crate) fn current_master(&self) -> Result<Option<ObjectRef>> {
        let mut slot = self.master.lock();
        if slot.suspect {
            let stored = master::load_master_ref(self.storage.as_ref())?;
            warn!(
                cached = ?slot.current,
                stored = ?stored,
                "Re-read suspect master ref"
            );
            slot.current = stored;
            slot.suspect = false;
        }
        Ok(slot.current)
    }

    /// Publish a new master ref: the commit point
    pub(crate) fn swap_master(&self, root: Option<ObjectRef>) -> Result<()> {
        let mut slot = self.master.lock();
        match master::store_master_ref(self.storage.as_ref(), root) {
            Ok(()) => {
                slot.current = root;
                slot.suspect = false;
                Ok(())
            }
            Err(e) => {
                slot.suspect = true;
                error!(error = %e, master = ?root, "Master swap failed; master ref is suspect");
                Err(e)
            }
        }
    }

    pub(crate) fn open_tree(&self, root: Option<ObjectRef>) -> Result<PersistentTree> {
        PersistentTree::open(Arc::clone(&self.storage), root)
    }

    /// Slot for a value: inline when small, saved out of line otherwise
    pub(crate) fn store_value(&self, value: Value) -> Result<Stored> {
        if Stored::fits_inline(&value, self.config.inline_string_limit) {
            Ok(Stored::Inline(value))
        } else {
            Ok(Stored::Ref(self.storage.save_record(&value)?))
        }
    }

    /// Resolve a slot to its value
    pub(crate) fn load_value(&self, slot: &Stored) -> Result<Value> {
        match slot {
            Stored::Inline(value) => Ok(value.clone()),
            Stored::Ref(id) => self.storage.load_record(*id),
        }
    }
}

/// An open database
///
/// Cheap to clone; clones share the same storage and master state.
///
/// # Example
///
/// ```ignore
/// use tessera_engine::{Database, Key};
///
/// let db = Database::ephemeral()?;
/// let txn = db.begin();
/// txn.set("users", Key::from(1), "alice").await?;
/// txn.commit().await?;
/// ```
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Open a database with an explicit configuration
    ///
    /// With no path the database lives in memory; otherwise a
    /// [`FileStore`] is opened (or created) in the directory.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let storage: Arc<dyn Storage> = match &config.path {
            Some(path) => Arc::new(FileStore::open(path, config.durability)?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_storage(storage, config)
    }

    /// Open a database on a caller-supplied backend
    ///
    /// `config.path` and `config.durability` are ignored; the backend
    /// decides both.
    pub fn with_storage(storage: Arc<dyn Storage>, config: DatabaseConfig) -> Result<Self> {
        let current = master::load_master_ref(storage.as_ref())?;
        let sequences = Sequences::load(storage.as_ref())?;

        info!(
            path = ?config.path,
            master = ?current,
            "Opened database"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                storage,
                config,
                sequences,
                queue: SerialQueue::new(),
                master: Mutex::new(MasterSlot {
                    current,
                    suspect: false,
                }),
            }),
        })
    }

    /// In-memory database with default settings
    pub fn ephemeral() -> Result<Self> {
        Self::open(DatabaseConfig::default())
    }

    /// Create a builder for database configuration
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Start a transaction at the current committed state
    pub fn begin(&self) -> Transaction {
        Transaction::new(Arc::clone(&self.shared))
    }

    /// Ref of the committed master index (`None` before the first commit)
    pub fn master_ref(&self) -> Option<ObjectRef> {
        self.shared.snapshot_ref()
    }

    /// Push buffered storage writes to disk
    pub fn flush(&self) -> Result<()> {
        self.shared.storage.flush()
    }

    /// Configuration the database was opened with
    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Whether the database keeps nothing on disk
    pub fn is_ephemeral(&self) -> bool {
        self.shared.config.is_ephemeral()
    }

    /// Store directory, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.shared.config.path.as_deref()
    }

    /// Durability mode of the store
    pub fn durability_mode(&self) -> DurabilityMode {
        self.shared.config.durability
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.config.path)
            .field("master", &self.shared.snapshot_ref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionState;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tessera_core::{Error, Key};

    struct FailingSwap {
        inner: MemoryStore,
        fail: AtomicBool,
    }

    impl Storage for FailingSwap {
        fn get_object(&self, id: ObjectRef) -> Result<Vec<u8>> {
            self.inner.get_object(id)
        }

        fn save_object(&self, bytes: &[u8]) -> Result<ObjectRef> {
            self.inner.save_object(bytes)
        }

        fn get_named_state(&self, name: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get_named_state(name)
        }

        fn set_named_state(&self, name: &str, bytes: &[u8]) -> Result<()> {
            if name == master::MASTER_SLOT && self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("swap failed".to_string()));
            }
            self.inner.set_named_state(name, bytes)
        }
    }

    #[test]
    fn test_ephemeral_database_starts_empty() {
        let db = Database::ephemeral().unwrap();
        assert!(db.is_ephemeral());
        assert_eq!(db.master_ref(), None);
        assert!(db.path().is_none());
        db.flush().unwrap();
    }

    #[test]
    fn test_failed_swap_marks_master_suspect() {
        let storage = Arc::new(FailingSwap {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let db = Database::with_storage(storage.clone(), DatabaseConfig::default()).unwrap();
        let shared = &db.shared;

        shared.swap_master(Some(ObjectRef::new(1))).unwrap();
        storage.fail.store(true, Ordering::SeqCst);
        assert!(shared.swap_master(Some(ObjectRef::new(2))).is_err());

        // The stored slot still holds the last good ref.
        storage.fail.store(false, Ordering::SeqCst);
        assert_eq!(shared.current_master().unwrap(), Some(ObjectRef::new(1)));
    }

    #[tokio::test]
    async fn test_failed_swap_fails_transaction() {
        let storage = Arc::new(FailingSwap {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
        });
        let db = Database::with_storage(storage.clone(), DatabaseConfig::default()).unwrap();
        let txn = db.begin();
        txn.set("users", Key::from(1), "alice").await.unwrap();

        storage.fail.store(true, Ordering::SeqCst);
        let err = txn.commit().await.unwrap_err();
        assert!(
            matches!(err, Error::TransactionFailed(_)),
            "swap failure is fatal, got {:?}",
            err
        );
        assert!(!err.is_retryable());
        assert!(matches!(txn.state(), TransactionState::Failed(_)));

        storage.fail.store(false, Ordering::SeqCst);
        let err = txn.get("users", &Key::from(1)).await.unwrap_err();
        assert!(matches!(err, Error::TransactionFailed(_)), "failed txn stays failed");
        assert!(matches!(
            txn.commit().await.unwrap_err(),
            Error::TransactionFailed(_)
        ));

        let fresh = db.begin();
        fresh.set("users", Key::from(2), "bob").await.unwrap();
        fresh.commit().await.unwrap();
        assert_eq!(
            db.begin().get("users", &Key::from(2)).await.unwrap(),
            Some(Value::from("bob"))
        );
    }

    #[tokio::test]
    async fn test_master_ref_reloaded_on_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let committed = {
            let db = Database::builder().path(dir.path()).strict().open().unwrap();
            let txn = db.begin();
            txn.set("users", Key::from(1), "alice").await.unwrap();
            txn.commit().await.unwrap();
            db.master_ref()
        };
        assert!(committed.is_some());

        let db = Database::builder().path(dir.path()).open().unwrap();
        assert_eq!(db.master_ref(), committed, "reopen starts at the last commit");
        assert_eq!(db.path(), Some(dir.path()));
    }

    #[test]
    fn test_values_stored_by_size() {
        let db = Database::builder().inline_string_limit(4).open().unwrap();
        let shared = &db.shared;

        let short = shared.store_value(Value::from("abc")).unwrap();
        assert!(short.object_ref().is_none());
        let long = shared.store_value(Value::from("abcdefgh")).unwrap();
        assert!(long.object_ref().is_some());
        assert_eq!(shared.load_value(&long).unwrap(), Value::from("abcdefgh"));
    }
}
