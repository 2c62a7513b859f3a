//! Resumable query cursors
//!
//! A cursor remembers the encoded key it returned last. Each call to
//! [`Cursor::next`] is a separate transaction job that seeks past that key
//! in the domain's current private tree, so writes made by the same
//! transaction between two calls are visible to the rest of the scan.

use crate::query::Plan;
use crate::transaction::Transaction;
use tessera_core::{BitSequence, Key, Result, Value};

/// Incremental scan over one domain
pub struct Cursor {
    txn: Transaction,
    domain: String,
    plan: Plan,
    position: Option<BitSequence>,
    skip: usize,
    returned: usize,
    done: bool,
}

impl Cursor {
    pub(crate) fn new(txn: Transaction, domain: String, plan: Plan) -> Self {
        let skip = plan.skip;
        Self {
            txn,
            domain,
            plan,
            position: None,
            skip,
            returned: 0,
            done: false,
        }
    }

    /// Domain being scanned
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Entries returned so far
    pub fn returned(&self) -> usize {
        self.returned
    }

    /// Whether the scan has ended
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next matching entry, or `None` once the range or limit is exhausted
    pub async fn next(&mut self) -> Result<Option<(Key, Value)>> {
        if self.is_done() {
            return Ok(None);
        }
        let returned = self.returned();
        if self.plan.limit.is_some_and(|limit| returned >= limit) {
            self.done = true;
            return Ok(None);
        }

        let step = self
            .txn
            .step(&self.domain, &self.plan, self.position.clone(), self.skip)
            .await?;
        self.position = step.position;
        self.skip = step.skip;
        match step.item {
            Some(item) => {
                self.returned += 1;
                Ok(Some(item))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }

    /// Drain the remaining entries
    pub async fn collect(mut self) -> Result<Vec<(Key, Value)>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("domain", &self.domain)
            .field("returned", &self.returned())
            .field("done", &self.is_done())
            .finish()
    }
}
