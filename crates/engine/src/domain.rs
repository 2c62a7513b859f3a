//! Per-transaction domain handles
//!
//! A handle is created the first time a transaction touches a domain. Its
//! root has to be looked up in the master index first, so the handle starts
//! as [`DomainState::Pending`] behind a frozen [`SerialQueue`]: operations
//! queue up immediately and start, in order, once the lookup job thaws the
//! queue.
//!
//! ```text
//! Pending ──lookup ok─────────▶ Ready(DomainTree)
//!    ├─────lookup corrupted──▶ Failed(reason)
//!    └─────lookup err────────▶ Unavailable(err)
//! ```
//!
//! An unavailable handle hands its error to the operation waiting on it and
//! is dropped by the transaction, so the next call starts a fresh lookup.

use crate::history::HISTORY_DOMAIN;
use parking_lot::Mutex;
use std::sync::Arc;
use tessera_concurrency::SerialQueue;
use tessera_core::{Error, ObjectRef, Result};
use tessera_index::PersistentTree;

/// A domain's private tree inside one transaction
pub(crate) struct DomainTree {
    pub(crate) name: String,
    /// Numeric id (freshly allocated when the domain is new)
    pub(crate) id: u64,
    /// Root the transaction started from
    pub(crate) baseline: Option<ObjectRef>,
    /// Domain did not exist in the snapshot
    pub(crate) is_new: bool,
    pub(crate) tree: PersistentTree,
}

pub(crate) enum DomainState {
    Pending,
    Ready(DomainTree),
    /// Lookup found damaged data
    Failed(String),
    /// Lookup hit a storage error; taken by the first waiting operation
    Unavailable(Option<Error>),
}

/// Lazily resolved domain
#[derive(Clone)]
pub(crate) struct DomainHandle {
    queue: SerialQueue,
    state: Arc<Mutex<DomainState>>,
}

impl DomainHandle {
    pub(crate) fn pending() -> Self {
        Self {
            queue: SerialQueue::frozen(),
            state: Arc::new(Mutex::new(DomainState::Pending)),
        }
    }

    /// Install the lookup result and release queued operations
    pub(crate) fn resolve(&self, result: Result<DomainTree>) {
        *self.state.lock() = match result {
            Ok(tree) => DomainState::Ready(tree),
            Err(e) if e.is_corrupted() => DomainState::Failed(e.to_string()),
            Err(e) => DomainState::Unavailable(Some(e)),
        };
        self.queue.thaw();
    }

    pub(crate) fn state(&self) -> &Arc<Mutex<DomainState>> {
        &self.state
    }

    /// Both handles refer to the same lookup
    pub(crate) fn same(&self, other: &DomainHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Run `op` on the tree once the handle is resolved
    pub(crate) async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut DomainTree) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.queue
            .run(async move {
                let mut guard = state.lock();
                match &mut *guard {
                    DomainState::Ready(domain) => op(domain),
                    DomainState::Failed(reason) => Err(Error::TransactionFailed(reason.clone())),
                    DomainState::Unavailable(error) => Err(error.take().unwrap_or_else(|| {
                        Error::Storage("domain lookup failed; retry the operation".to_string())
                    })),
                    DomainState::Pending => Err(Error::Corrupted(
                        "domain used before its root was resolved".to_string(),
                    )),
                }
            })
            .await?
    }
}

/// Check a domain name
///
/// Names must be non-empty and may not start with `$`; the reserved
/// `$history` domain is accepted for reads only.
pub fn validate_domain_name(name: &str, write: bool) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidDomain("domain name is empty".to_string()));
    }
    if name == HISTORY_DOMAIN {
        if write {
            return Err(Error::InvalidDomain(format!("{} is read-only", HISTORY_DOMAIN)));
        }
        return Ok(());
    }
    if name.starts_with('$') {
        return Err(Error::InvalidDomain(format!(
            "domain names starting with '$' are reserved: {:?}",
            name
        )));
    }
    Ok(())
}
