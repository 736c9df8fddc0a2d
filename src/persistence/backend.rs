//! Storage boundary.
//!
//! Entities cross this boundary as JSON documents keyed by `(kind, id)`. The
//! soft-delete flag travels alongside the document so backends can filter
//! without decoding it.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::DataResult;

/// One stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: Uuid,
    pub is_deleted: bool,
    pub document: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A stamped change ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedChange {
    pub kind: &'static str,
    pub id: Uuid,
    pub is_deleted: bool,
    pub action: ChangeKind,
    /// `None` for deletes.
    pub document: Option<Value>,
}

/// A durable store for entity documents.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rows of `kind` ordered by id. Soft-deleted rows are skipped unless
    /// `include_deleted`.
    async fn fetch(
        &self,
        kind: &'static str,
        include_deleted: bool,
        cancel: &CancellationToken,
    ) -> DataResult<Vec<StoredRecord>>;

    /// Apply every change or none. Returns the number of rows affected.
    async fn commit(&self, changes: Vec<StagedChange>, cancel: &CancellationToken) -> DataResult<usize>;
}
