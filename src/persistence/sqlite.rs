//! SQLite backend.
//!
//! One `entities` table holds every kind. Each call runs on the blocking pool
//! and a commit is a single transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use tokio::task;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DataError, DataResult, PersistenceError};
use crate::persistence::backend::{ChangeKind, PersistenceBackend, StagedChange, StoredRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind        TEXT    NOT NULL,
    id          TEXT    NOT NULL,
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    document    TEXT    NOT NULL,
    PRIMARY KEY (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_entities_live ON entities (kind, is_deleted);
";

/// `rusqlite`-backed store sharing one connection.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>) -> DataResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> DataResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> DataResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl PersistenceBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
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
        let conn = Arc::clone(&self.conn);

        task::spawn_blocking(move || -> DataResult<Vec<StoredRecord>> {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, is_deleted, document FROM entities
                 WHERE kind = ?1 AND (?2 OR is_deleted = 0)
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![kind, include_deleted], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, is_deleted, document) = row?;
                let id = Uuid::parse_str(&id).map_err(|err| PersistenceError::Corrupt {
                    kind: kind.to_string(),
                    reason: format!("bad id `{id}`: {err}"),
                })?;
                records.push(StoredRecord {
                    id,
                    is_deleted,
                    document: serde_json::from_str(&document)?,
                });
            }
            Ok(records)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn commit(&self, changes: Vec<StagedChange>, cancel: &CancellationToken) -> DataResult<usize> {
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }
        let conn = Arc::clone(&self.conn);
        let cancel = cancel.clone();

        task::spawn_blocking(move || -> DataResult<usize> {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            let mut affected = 0;

            for change in &changes {
                affected += apply_change(&tx, change)?;
            }

            // Dropping the transaction rolls it back.
            if cancel.is_cancelled() {
                return Err(DataError::Cancelled);
            }
            tx.commit()?;
            Ok(affected)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn apply_change(tx: &rusqlite::Transaction<'_>, change: &StagedChange) -> DataResult<usize> {
    let id = change.id.to_string();
    let document = match (&change.document, change.action) {
        (_, ChangeKind::Delete) => None,
        (Some(document), _) => Some(serde_json::to_string(document)?),
        (None, action) => {
            return Err(PersistenceError::Corrupt {
                kind: change.kind.to_string(),
                reason: format!("{action:?} of {id} without a document"),
            }
            .into())
        }
    };

    let rows = match change.action {
        ChangeKind::Insert => tx
            .execute(
                "INSERT INTO entities (kind, id, is_deleted, document) VALUES (?1, ?2, ?3, ?4)",
                params![change.kind, id, change.is_deleted, document],
            )
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
                    DataError::from(PersistenceError::Conflict {
                        kind: change.kind.to_string(),
                        id: change.id,
                    })
                }
                other => other.into(),
            })?,
        ChangeKind::Update => tx.execute(
            "UPDATE entities SET is_deleted = ?3, document = ?4 WHERE kind = ?1 AND id = ?2",
            params![change.kind, id, change.is_deleted, document],
        )?,
        ChangeKind::Delete => tx.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
            params![change.kind, id],
        )?,
    };

    if rows == 0 {
        return Err(PersistenceError::Missing {
            kind: change.kind.to_string(),
            id: change.id,
        }
        .into());
    }
    Ok(rows)
}

fn map_join_error(err: task::JoinError) -> DataError {
    PersistenceError::TaskJoin(err).into()
}
