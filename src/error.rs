//! Error taxonomy for the data-access layer.
//!
//! Errors are logged where they occur and then returned unchanged; no layer
//! translates one kind into another on the way up.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by repositories, the unit of work and the correlation tracker.
#[derive(Debug, Error)]
pub enum DataError {
    /// A required input was missing, nil or blank.
    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },

    /// A single-result query matched more than one row.
    #[error("expected at most one {entity}, found {count}")]
    MultipleResults { entity: &'static str, count: usize },

    /// The persistence backend failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The caller cancelled the operation before it took effect.
    #[error("operation cancelled")]
    Cancelled,

    /// The unit of work owning the persistence context has been released.
    #[error("persistence context has been released")]
    Released,
}

impl DataError {
    pub(crate) fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    /// Short, stable name of the error kind for log fields and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Argument { .. } => "Argument",
            Self::MultipleResults { .. } => "MultipleResults",
            Self::Persistence(_) => "Persistence",
            Self::Cancelled => "Cancelled",
            Self::Released => "Released",
        }
    }
}

/// Failures reported by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// An insert collided with an existing row.
    #[error("{kind} {id} already exists")]
    Conflict { kind: String, id: Uuid },

    /// An update or delete targeted a row that does not exist.
    #[error("{kind} {id} does not exist")]
    Missing { kind: String, id: Uuid },

    /// Entity (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage engine reported an error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A blocking storage task panicked or was aborted.
    #[error("storage task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// A stored row could not be decoded.
    #[error("corrupt {kind} row: {reason}")]
    Corrupt { kind: String, reason: String },
}

impl From<rusqlite::Error> for DataError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Persistence(PersistenceError::Storage(err))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(PersistenceError::Serialization(err))
    }
}

/// Result type for data-access operations.
pub type DataResult<T> = Result<T, DataError>;

/// Misuse of the logging scope stack.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingError {
    /// A scope was released while inner scopes opened after it were still live.
    #[error("log scope at depth {depth} released before {open_inner} inner scope(s)")]
    ScopeOutOfOrder { depth: usize, open_inner: usize },
}
