//! In-process backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DataError, DataResult, PersistenceError};
use crate::persistence::backend::{ChangeKind, PersistenceBackend, StagedChange, StoredRecord};

#[derive(Debug, Clone)]
struct Row {
    is_deleted: bool,
    document: Value,
}

/// Rows held in a `BTreeMap` behind one lock. A commit validates the whole
/// batch before touching the map, so it applies fully or not at all.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<BTreeMap<(String, Uuid), Row>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(
        &self,
        kind: &'static str,
        include_deleted: bool,
        cancel: &CancellationToken,
    ) -> DataResult<Vec<StoredRecord>> {
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let rows = self.rows.lock();
        Ok(rows
            .iter()
            .filter(|((row_kind, _), row)| row_kind == kind && (include_deleted || !row.is_deleted))
            .map(|((_, id), row)| StoredRecord {
                id: *id,
                is_deleted: row.is_deleted,
                document: row.document.clone(),
            })
            .collect())
    }

    async fn commit(&self, changes: Vec<StagedChange>, cancel: &CancellationToken) -> DataResult<usize> {
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let mut rows = self.rows.lock();

        for change in &changes {
            let exists = rows.contains_key(&(change.kind.to_string(), change.id));
            match (change.action, exists) {
                (ChangeKind::Insert, true) => {
                    return Err(PersistenceError::Conflict {
                        kind: change.kind.to_string(),
                        id: change.id,
                    }
                    .into())
                }
                (ChangeKind::Update | ChangeKind::Delete, false) => {
                    return Err(PersistenceError::Missing {
                        kind: change.kind.to_string(),
                        id: change.id,
                    }
                    .into())
                }
                _ => {}
            }
            if change.action != ChangeKind::Delete && change.document.is_none() {
                return Err(PersistenceError::Corrupt {
                    kind: change.kind.to_string(),
                    reason: format!("{:?} of {} without a document", change.action, change.id),
                }
                .into());
            }
        }

        let affected = changes.len();
        for change in changes {
            let key = (change.kind.to_string(), change.id);
            match change.document {
                Some(document) if change.action != ChangeKind::Delete => {
                    rows.insert(
                        key,
                        Row {
                            is_deleted: change.is_deleted,
                            document,
                        },
                    );
                }
                _ => {
                    rows.remove(&key);
                }
            }
        }
        Ok(affected)
    }
}
