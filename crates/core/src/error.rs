//! Error types for Tessera
//!
//! One error enum is shared by every layer. Variants fall into four
//! families that callers handle differently:
//!
//! | Family | Variants | Caller action |
//! |--------|----------|---------------|
//! | Validation | `InvalidKey`, `InvalidQuery`, `InvalidDomain`, `InvalidConfig` | Fix the request; nothing changed |
//! | Conflict | `Conflict` | Re-read and retry the transaction |
//! | Corruption | `Corrupted`, `TransactionFailed` | Discard the transaction or tree handle |
//! | Storage | `Storage`, `Io`, `Serialization` | Retry if raised before the commit point |

use crate::key::Key;
use crate::value::Value;
use thiserror::Error;

/// A write-write conflict detected while replaying a transaction
///
/// `original` is the value the transaction observed when it wrote the key;
/// `actual` is the committed value it found at commit time. Both are fully
/// resolved (never an object reference). `None` means the key was absent.
///
/// A commit reports at most one conflict per (domain, key): the first of the
/// transaction's writes to that key that fails to replay. Its later writes
/// to the same key are not checked again.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Domain (index) name the key belongs to
    pub domain: String,
    /// Conflicting key
    pub key: Key,
    /// Value observed by the transaction
    pub original: Option<Value>,
    /// Value currently committed
    pub actual: Option<Value>,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}]: expected {:?}, found {:?}",
            self.domain, self.key, self.original, self.actual
        )
    }
}

/// All Tessera errors
#[derive(Debug, Error)]
pub enum Error {
    /// Key cannot be encoded (unsupported type, embedded NUL, bad id length)
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Query parameter is unknown or malformed
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Domain name is empty, reserved, or read-only
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// Database configuration could not be parsed or is inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Commit failed because concurrent commits changed keys this
    /// transaction had written
    #[error("commit conflict on {} key(s)", .0.len())]
    Conflict(Vec<Conflict>),

    /// An internal invariant was violated (history key reuse, bad codec tag,
    /// unbalanced tree). The affected handle must be discarded.
    #[error("corrupted state: {0}")]
    Corrupted(String),

    /// Error reported by a storage backend
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error from a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The transaction hit a fatal error earlier and can no longer be used
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// The serial queue driving an operation went away before the job ran
    #[error("serial queue closed before the job completed")]
    QueueClosed,
}

/// Result type for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a validation failure (no state was changed)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(_)
                | Error::InvalidQuery(_)
                | Error::InvalidDomain(_)
                | Error::InvalidConfig(_)
        )
    }

    /// Check if this is a commit conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Check if this error indicates corrupted state
    pub fn is_corrupted(&self) -> bool {
        matches!(self, Error::Corrupted(_))
    }

    /// Check if this error is retryable
    ///
    /// Conflicts succeed on retry with fresh data; storage errors are
    /// retryable as long as they happened before the master swap.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Storage(_) | Error::Io(_))
    }

    /// Conflict records carried by a `Conflict` error
    pub fn conflicts(&self) -> Option<&[Conflict]> {
        match self {
            Error::Conflict(list) => Some(list),
            _ => None,
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
