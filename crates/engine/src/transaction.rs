//! Transactions
//!
//! A transaction reads and writes a private copy-on-write view of the
//! database taken at [`Database::begin`](crate::Database::begin). Every
//! operation runs as a job on the transaction's own [`SerialQueue`], so
//! calls issued concurrently on one transaction still execute in order.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ─▶ (get / set / del / find)* ─▶ commit()
//!                                        ├─ ok        ─▶ Open (rebased)
//!                                        ├─ conflict  ─▶ Open (unchanged)
//!                                        ├─ corrupted ─▶ Failed
//!                                        └─ swap err  ─▶ Failed
//! ```
//!
//! Storage errors before the master swap leave the transaction open and
//! the call can be repeated. Once the swap itself fails the stored master
//! may already hold this transaction's writes, so the transaction fails.
//!
//! After a successful commit the transaction rebases onto the master it
//! just published and can keep going. A conflict leaves its writes in place
//! so the caller can inspect them; retrying means starting a new
//! transaction (or calling [`Transaction::rollback`]) and writing again.

use crate::cursor::Cursor;
use crate::database::Shared;
use crate::domain::{validate_domain_name, DomainHandle, DomainState, DomainTree};
use crate::history::{self, HistoryEntry, HISTORY_DOMAIN};
use crate::master;
use crate::merge;
use crate::query::{Plan, Query};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tessera_concurrency::SerialQueue;
use tessera_core::{codec, BitSequence, Error, Key, ObjectRef, Result, Stored, Value};
use tessera_index::PersistentTree;
use tracing::{debug, info};
use uuid::Uuid;

/// Observable transaction state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting reads and writes
    Open,
    /// A commit is running
    Committing,
    /// A fatal error occurred; every further call fails
    Failed(String),
}

pub(crate) struct TxnState {
    pub(crate) id: Uuid,
    pub(crate) status: TransactionState,
    pub(crate) original_master: Option<ObjectRef>,
    /// Master tree at `original_master`, opened on first use
    snapshot: Option<PersistentTree>,
    pub(crate) domains: BTreeMap<String, DomainHandle>,
    /// History tree based on the snapshot's history, opened on first use
    pub(crate) history: Option<PersistentTree>,
    /// First sequence number written by this transaction
    pub(crate) history_from: Option<u64>,
}

impl TxnState {
    fn new(original_master: Option<ObjectRef>) -> Self {
        Self {
            id: Uuid::now_v7(),
            status: TransactionState::Open,
            original_master,
            snapshot: None,
            domains: BTreeMap::new(),
            history: None,
            history_from: None,
        }
    }

    /// Drop every private change and restart at `master`
    fn rebase(&mut self, master: Option<ObjectRef>) {
        *self = Self::new(master);
    }

    pub(crate) fn snapshot(&mut self, shared: &Shared) -> Result<&PersistentTree> {
        let tree = match self.snapshot.take() {
            Some(tree) => tree,
            None => shared.open_tree(self.original_master)?,
        };
        Ok(self.snapshot.insert(tree))
    }

    pub(crate) fn history(&mut self, shared: &Shared) -> Result<&mut PersistentTree> {
        let tree = match self.history.take() {
            Some(tree) => tree,
            None => {
                let root = master::history_root(self.snapshot(shared)?)?;
                shared.open_tree(root)?
            }
        };
        Ok(self.history.insert(tree))
    }
}

pub(crate) struct TxnInner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) state: Mutex<TxnState>,
}

impl TxnInner {
    fn ensure_open(&self) -> Result<()> {
        match &self.state.lock().status {
            TransactionState::Open => Ok(()),
            TransactionState::Committing => Err(Error::TransactionFailed(
                "operation issued while committing".to_string(),
            )),
            TransactionState::Failed(reason) => Err(Error::TransactionFailed(reason.clone())),
        }
    }

    /// Mark the transaction failed and pass the error on
    fn poison(&self, e: Error) -> Error {
        self.state.lock().status = TransactionState::Failed(e.to_string());
        e
    }

    /// Handle for `name`, scheduling its root lookup on first use
    fn domain_handle(self: &Arc<Self>, name: &str) -> DomainHandle {
        let mut state = self.state.lock();
        if let Some(handle) = state.domains.get(name) {
            return handle.clone();
        }
        let handle = DomainHandle::pending();
        state.domains.insert(name.to_string(), handle.clone());
        drop(state);

        let txn = Arc::clone(self);
        let name = name.to_string();
        let resolving = handle.clone();
        self.shared.queue.add(async move {
            let result = txn.resolve_domain(&name);
            if let Err(e) = &result {
                if !e.is_corrupted() {
                    // Forget the handle so the next call looks the domain up again.
                    let mut state = txn.state.lock();
                    if state.domains.get(&name).is_some_and(|h| h.same(&resolving)) {
                        state.domains.remove(&name);
                    }
                    debug!(txn_id = %state.id, domain = %name, error = %e, "Domain lookup failed");
                }
            }
            resolving.resolve(result);
        });
        handle
    }

    /// Look up a domain in the snapshot master and open its tree
    fn resolve_domain(&self, name: &str) -> Result<DomainTree> {
        let (txn_id, root, id) = {
            let mut state = self.state.lock();
            let txn_id = state.id;
            let snapshot = state.snapshot(&self.shared)?;
            (
                txn_id,
                master::domain_root(snapshot, name)?,
                master::domain_id(snapshot, name)?,
            )
        };
        let (id, is_new) = match id {
            Some(id) => (id, false),
            None => (self.shared.sequences.next_domain(), true),
        };
        let baseline = root.flatten();
        let tree = self.shared.open_tree(baseline)?;
        debug!(txn_id = %txn_id, domain = name, domain_id = id, is_new, "Resolved domain");
        Ok(DomainTree {
            name: name.to_string(),
            id,
            baseline,
            is_new,
            tree,
        })
    }

    /// Append one entry to the private history
    fn record(&self, entry: HistoryEntry) -> Result<()> {
        let slot = history::save_entry(self.shared.storage.as_ref(), &entry)?;
        let seq = self.shared.sequences.next_history();
        let mut state = self.state.lock();
        state.history_from.get_or_insert(seq);
        history::append(state.history(&self.shared)?, seq, slot)
    }

    /// Name of a domain by id, as seen by this transaction
    fn domain_name(&self, id: u64) -> Result<Option<String>> {
        let mut state = self.state.lock();
        for (name, handle) in &state.domains {
            if let DomainState::Ready(domain) = &*handle.state().lock() {
                if domain.id == id {
                    return Ok(Some(name.clone()));
                }
            }
        }
        master::domain_name(state.snapshot(&self.shared)?, id)
    }

    /// Public `$history` value of a history slot
    fn render_history(&self, slot: &Stored) -> Result<Value> {
        let entry = history::load_entry(self.shared.storage.as_ref(), slot)?;
        let domain = self.domain_name(entry.domain_id)?;
        let old = entry.old.as_ref().map(|s| self.shared.load_value(s)).transpose()?;
        let new = entry.new.as_ref().map(|s| self.shared.load_value(s)).transpose()?;
        Ok(history::render(&entry, domain, old, new))
    }
}

/// Result of one cursor step
pub(crate) struct Step {
    pub(crate) item: Option<(Key, Value)>,
    pub(crate) position: Option<BitSequence>,
    pub(crate) skip: usize,
}

/// A transaction over a [`Database`](crate::Database)
///
/// Cloning yields another handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
    queue: SerialQueue,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let state = TxnState::new(shared.snapshot_ref());
        debug!(txn_id = %state.id, master = ?state.original_master, "Began transaction");
        Self {
            inner: Arc::new(TxnInner {
                shared,
                state: Mutex::new(state),
            }),
            queue: SerialQueue::new(),
        }
    }

    /// Time-ordered id; renewed after every successful commit
    pub fn id(&self) -> Uuid {
        self.inner.state.lock().id
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.inner.state.lock().status.clone()
    }

    /// Master ref this transaction reads from
    pub fn base_ref(&self) -> Option<ObjectRef> {
        self.inner.state.lock().original_master
    }

    /// Run `job` on the transaction queue
    async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.run(job).await?
    }

    /// Read a key (`$history` included)
    pub async fn get(&self, domain: &str, key: &Key) -> Result<Option<Value>> {
        validate_domain_name(domain, false)?;
        let bits = codec::encode(key)?;
        let inner = Arc::clone(&self.inner);
        let domain = domain.to_string();
        self.exec(async move {
            inner.ensure_open()?;
            if domain == HISTORY_DOMAIN {
                let slot = {
                    let mut state = inner.state.lock();
                    state.history(&inner.shared)?.get(&bits)?
                };
                return slot.map(|s| inner.render_history(&s)).transpose();
            }
            let handle = inner.domain_handle(&domain);
            let slot = handle.run(move |d| d.tree.get(&bits)).await?;
            slot.map(|s| inner.shared.load_value(&s)).transpose()
        })
        .await
    }

    /// Insert or replace a key
    ///
    /// Writing the value a key already holds is a no-op and adds no history.
    pub async fn set(&self, domain: &str, key: Key, value: impl Into<Value>) -> Result<()> {
        validate_domain_name(domain, true)?;
        let bits = codec::encode(&key)?;
        let value = value.into();
        let inner = Arc::clone(&self.inner);
        let domain = domain.to_string();
        self.exec(async move {
            inner.ensure_open()?;
            let stored = inner.shared.store_value(value)?;
            let handle = inner.domain_handle(&domain);
            let written = stored.clone();
            let (domain_id, old) = handle
                .run(move |d| {
                    let old = d.tree.set(bits, written)?;
                    Ok((d.id, old))
                })
                .await
                .map_err(|e| if e.is_corrupted() { inner.poison(e) } else { e })?;
            if old.as_ref().is_some_and(|old| old.same_version(&stored)) {
                return Ok(());
            }
            inner
                .record(HistoryEntry::new(domain_id, key, old, Some(stored)))
                .map_err(|e| inner.poison(e))
        })
        .await
    }

    /// Remove a key; removing an absent key does nothing
    pub async fn del(&self, domain: &str, key: &Key) -> Result<()> {
        validate_domain_name(domain, true)?;
        let bits = codec::encode(key)?;
        let key = key.clone();
        let inner = Arc::clone(&self.inner);
        let domain = domain.to_string();
        self.exec(async move {
            inner.ensure_open()?;
            let handle = inner.domain_handle(&domain);
            let (domain_id, old) = handle
                .run(move |d| Ok((d.id, d.tree.del(&bits)?)))
                .await
                .map_err(|e| if e.is_corrupted() { inner.poison(e) } else { e })?;
            match old {
                Some(old) => inner
                    .record(HistoryEntry::new(domain_id, key, Some(old), None))
                    .map_err(|e| inner.poison(e)),
                None => Ok(()),
            }
        })
        .await
    }

    /// Open a cursor over the keys matching `query`
    pub fn cursor(&self, domain: &str, query: Query) -> Result<Cursor> {
        validate_domain_name(domain, false)?;
        let plan = query.plan()?;
        Ok(Cursor::new(self.clone(), domain.to_string(), plan))
    }

    /// Collect every entry matching `query`
    pub async fn find(&self, domain: &str, query: Query) -> Result<Vec<(Key, Value)>> {
        self.cursor(domain, query)?.collect().await
    }

    /// One cursor step: the next entry after `position`
    pub(crate) async fn step(
        &self,
        domain: &str,
        plan: &Plan,
        mut position: Option<BitSequence>,
        mut skip: usize,
    ) -> Result<Step> {
        let inner = Arc::clone(&self.inner);
        let domain = domain.to_string();
        let plan = plan.clone();
        self.exec(async move {
            inner.ensure_open()?;
            if domain == HISTORY_DOMAIN {
                let found = {
                    let mut state = inner.state.lock();
                    let tree = state.history(&inner.shared)?;
                    plan.advance(tree, &mut position, &mut skip)?
                };
                let item = match found {
                    Some((bits, slot)) => Some((codec::decode(&bits)?, inner.render_history(&slot)?)),
                    None => None,
                };
                return Ok(Step { item, position, skip });
            }

            let handle = inner.domain_handle(&domain);
            let (found, position, skip) = handle
                .run(move |d| {
                    let found = plan.advance(&d.tree, &mut position, &mut skip)?;
                    Ok((found, position, skip))
                })
                .await?;
            let item = match found {
                Some((bits, slot)) => Some((codec::decode(&bits)?, inner.shared.load_value(&slot)?)),
                None => None,
            };
            Ok(Step { item, position, skip })
        })
        .await
    }

    /// Publish this transaction's writes
    ///
    /// On success the transaction is rebased onto the new master and gets a
    /// fresh id. A conflict is reported as [`Error::Conflict`] with every
    /// conflicting key and leaves the transaction open and unchanged. A
    /// failed master swap fails the transaction for good.
    pub async fn commit(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.exec(async move {
            inner.ensure_open()?;
            let txn_id = {
                let mut state = inner.state.lock();
                state.status = TransactionState::Committing;
                state.id
            };

            let merging = Arc::clone(&inner);
            let outcome = inner
                .shared
                .queue
                .run(async move { merge::commit(&merging) })
                .await
                .and_then(|r| r);

            let mut state = inner.state.lock();
            match outcome {
                Ok(master) => {
                    info!(txn_id = %txn_id, master = ?master, "Transaction committed");
                    state.rebase(master);
                    Ok(())
                }
                Err(e) => {
                    state.status = if e.is_retryable() || e.is_validation() {
                        TransactionState::Open
                    } else {
                        TransactionState::Failed(e.to_string())
                    };
                    Err(e)
                }
            }
        })
        .await
    }

    /// Discard every private write and restart at the latest committed state
    pub async fn rollback(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.exec(async move {
            let master = inner.shared.snapshot_ref();
            let mut state = inner.state.lock();
            debug!(txn_id = %state.id, "Rolled back transaction");
            state.rebase(master);
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Transaction")
            .field("id", &state.id)
            .field("status", &state.status)
            .field("base", &state.original_master)
            .field("domains", &state.domains.keys().collect::<Vec<_>>())
            .finish()
    }
}
