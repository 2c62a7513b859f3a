//! Commit: merging a transaction into the committed master
//!
//! Runs as a single job on the database's master queue, so no other commit
//! can change the master between the read and the swap.
//!
//! Two paths:
//!
//! - **Fast-forward**: nothing was committed since the transaction began.
//!   Its domain trees and history are written as they are.
//! - **Replay**: the master moved. Domains nobody else touched are still
//!   carried over as they are; every other domain is rebuilt by replaying
//!   the transaction's history entries on top of the committed tree. An
//!   entry whose recorded old value no longer matches the committed one is a
//!   conflict, and any conflict aborts the whole commit.
//!
//! A key reports at most one conflict per commit: once an entry for a key
//! conflicts, the transaction's later entries for that key are skipped.
//!
//! In both paths the new master is published by committing it, persisting
//! the sequence counters, and swapping the master ref. A failed swap is
//! reported as [`Error::TransactionFailed`]: the stored master may already
//! hold the new root, so the commit cannot be retried.

use crate::database::Shared;
use crate::domain::{DomainState, DomainTree};
use crate::history::{self, HistoryEntry, HistoryKind};
use crate::master;
use crate::transaction::TxnInner;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tessera_core::{codec, BitSequence, Conflict, Error, ObjectRef, Result, Stored, Value};
use tessera_index::{PersistentTree, Scan};
use tracing::{debug, info, warn};

/// How one modified domain reaches the new master
enum Merge {
    /// Committed root is still the one the transaction started from
    Forward,
    /// Rebuilt from the committed tree
    Replay {
        target: PersistentTree,
        /// Id the domain has in the new master
        final_id: u64,
        /// Current master already knows the domain
        registered: bool,
    },
}

/// Merge `txn` into the current master and publish the result
///
/// Returns the new master ref. On a conflict nothing is published and the
/// transaction's private state is left untouched.
pub(crate) fn commit(txn: &TxnInner) -> Result<Option<ObjectRef>> {
    let shared = txn.shared.as_ref();
    let release = shared.config.release_node_cache;
    let mut guard = txn.state.lock();
    let state = &mut *guard;
    let txn_id = state.id;

    let cells: Vec<(String, Arc<Mutex<DomainState>>)> = state
        .domains
        .iter()
        .map(|(name, handle)| (name.clone(), Arc::clone(handle.state())))
        .collect();
    let mut locked: Vec<_> = cells.iter().map(|(name, cell)| (name, cell.lock())).collect();
    let mut domains: Vec<&mut DomainTree> = Vec::new();
    for (name, cell) in locked.iter_mut() {
        match &mut **cell {
            DomainState::Ready(domain) => {
                if domain.tree.modified() {
                    domains.push(domain);
                }
            }
            DomainState::Failed(reason) => {
                return Err(Error::TransactionFailed(format!(
                    "domain {:?} could not be opened: {}",
                    name, reason
                )))
            }
            DomainState::Unavailable(_) => continue,
            DomainState::Pending => {
                return Err(Error::Corrupted(format!(
                    "domain {:?} still unresolved at commit",
                    name
                )))
            }
        }
    }

    let current = shared.current_master()?;
    let history_from = state.history_from;
    if domains.is_empty() && history_from.is_none() {
        debug!(txn_id = %txn_id, "Nothing to commit");
        return Ok(current);
    }

    if state.original_master == current {
        let mut master = shared.open_tree(current)?;
        for domain in domains.iter_mut() {
            write_domain(&mut master, domain, release)?;
        }
        if let (Some(history), Some(_)) = (state.history.as_mut(), history_from) {
            let root = history.commit(release)?;
            master::set_history_root(&mut master, root)?;
        }
        debug!(
            txn_id = %txn_id,
            domains = domains.len(),
            "Fast-forward commit"
        );
        return publish(shared, master, release);
    }

    let mut master = shared.open_tree(current)?;
    let mut merges = Vec::with_capacity(domains.len());
    for domain in &domains {
        let committed = master::domain_root(&master, &domain.name)?;
        let forward = match committed {
            Some(root) => !domain.is_new && root == domain.baseline,
            None => domain.is_new,
        };
        merges.push(if forward {
            Merge::Forward
        } else {
            let known = master::domain_id(&master, &domain.name)?;
            Merge::Replay {
                target: shared.open_tree(committed.flatten())?,
                final_id: known.unwrap_or(domain.id),
                registered: known.is_some(),
            }
        });
    }

    let by_id: FxHashMap<u64, usize> = domains
        .iter()
        .enumerate()
        .map(|(idx, domain)| (domain.id, idx))
        .collect();
    let own = match (state.history.as_ref(), history_from) {
        (Some(history), Some(from)) => own_entries(history, from)?,
        _ => Vec::new(),
    };

    let storage = shared.storage.as_ref();
    let mut reconciled = shared.open_tree(master::history_root(&master)?)?;
    let mut conflicts = Vec::new();
    let mut conflicted: FxHashSet<(usize, BitSequence)> = FxHashSet::default();
    let mut replayed = 0usize;

    for slot in own {
        let entry = history::load_entry(storage, &slot)?;
        let idx = *by_id.get(&entry.domain_id).ok_or_else(|| {
            Error::Corrupted(format!(
                "history entry for domain {} not written by this transaction",
                entry.domain_id
            ))
        })?;
        let (target, final_id) = match &mut merges[idx] {
            Merge::Forward => {
                rerecord(shared, &mut reconciled, slot)?;
                continue;
            }
            Merge::Replay { target, final_id, .. } => (target, *final_id),
        };

        let bits = codec::encode(&entry.key)?;
        if conflicted.contains(&(idx, bits.clone())) {
            continue;
        }
        let actual = target.get(&bits)?;
        let clean = match entry.kind {
            HistoryKind::Insert => actual.is_none(),
            HistoryKind::Update | HistoryKind::Delete => match (&actual, &entry.old) {
                (Some(actual), Some(old)) => actual.same_version(old),
                (None, None) => true,
                _ => false,
            },
        };
        if !clean {
            conflicts.push(Conflict {
                domain: domains[idx].name.clone(),
                key: entry.key.clone(),
                original: resolve(shared, entry.old.as_ref())?,
                actual: resolve(shared, actual.as_ref())?,
            });
            conflicted.insert((idx, bits));
            continue;
        }

        match &entry.new {
            Some(new) => {
                target.set(bits, new.clone())?;
            }
            None => {
                target.del(&bits)?;
            }
        }
        replayed += 1;
        let slot = if final_id == entry.domain_id {
            slot
        } else {
            history::save_entry(
                storage,
                &HistoryEntry {
                    domain_id: final_id,
                    ..entry
                },
            )?
        };
        rerecord(shared, &mut reconciled, slot)?;
    }

    if !conflicts.is_empty() {
        for conflict in &conflicts {
            warn!(txn_id = %txn_id, conflict = %conflict, "Write conflict");
        }
        return Err(Error::Conflict(conflicts));
    }

    for (domain, merge) in domains.iter_mut().zip(merges) {
        match merge {
            Merge::Forward => write_domain(&mut master, domain, release)?,
            Merge::Replay {
                mut target,
                final_id,
                registered,
            } => {
                let root = target.commit(release)?;
                master::set_domain_root(&mut master, &domain.name, root)?;
                if !registered {
                    master::register_domain(&mut master, &domain.name, final_id)?;
                }
            }
        }
    }
    let root = reconciled.commit(release)?;
    master::set_history_root(&mut master, root)?;

    info!(
        txn_id = %txn_id,
        domains = domains.len(),
        replayed,
        "Merged transaction onto newer master"
    );
    publish(shared, master, release)
}

/// Commit a domain tree as-is and point the master at it
fn write_domain(master: &mut PersistentTree, domain: &mut DomainTree, release: bool) -> Result<()> {
    let root = domain.tree.commit(release)?;
    master::set_domain_root(master, &domain.name, root)?;
    if domain.is_new {
        master::register_domain(master, &domain.name, domain.id)?;
    }
    Ok(())
}

/// History slots written by the transaction, in write order
fn own_entries(history: &PersistentTree, from: u64) -> Result<Vec<Stored>> {
    let start = history::sequence_key(from)?;
    let mut slots = Vec::new();
    history.scan_forward(Some(&start), |_, slot| {
        slots.push(slot.clone());
        Ok(Scan::Continue)
    })?;
    Ok(slots)
}

/// Append under a fresh sequence number so the entry sorts after
/// everything committed before it
fn rerecord(shared: &Shared, history: &mut PersistentTree, slot: Stored) -> Result<()> {
    history::append(history, shared.sequences.next_history(), slot)
}

fn resolve(shared: &Shared, slot: Option<&Stored>) -> Result<Option<Value>> {
    slot.map(|s| shared.load_value(s)).transpose()
}

fn publish(shared: &Shared, mut master: PersistentTree, release: bool) -> Result<Option<ObjectRef>> {
    let root = master.commit(release)?;
    shared.sequences.persist(shared.storage.as_ref())?;
    shared
        .swap_master(root)
        .map_err(|e| Error::TransactionFailed(format!("master swap failed: {}", e)))?;
    Ok(root)
}
