//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! Repository<T>
//!     → PersistenceContext::track (merge into pending entries)
//!     → UnitOfWork::save_changes
//!     → PersistenceContext::save_changes (stamp with UserContext + one instant)
//!     → PersistenceBackend::commit (memory or sqlite, all-or-nothing)
//! ```
//!
//! # Design Decisions
//! - Entities are stored as JSON documents keyed by (kind, id)
//! - Reads go straight to the backend; pending changes are not visible until committed
//! - Backends are chosen by configuration at startup

pub mod backend;
pub mod context;
pub mod entity;
pub mod memory;
pub mod sqlite;
pub mod user;

use std::sync::Arc;

pub use backend::{ChangeKind, PersistenceBackend, StagedChange, StoredRecord};
pub use context::{EntryState, PersistenceContext};
pub use entity::{AuditFields, Entity};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use user::{AmbientUser, AnonymousUser, FixedUser, UserContext};

use crate::config::{BackendKind, DatabaseConfig};
use crate::error::DataResult;

/// Open the backend named by `config`.
pub fn open_backend(config: &DatabaseConfig) -> DataResult<Arc<dyn PersistenceBackend>> {
    let backend: Arc<dyn PersistenceBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.path)?),
    };
    tracing::info!(backend = backend.name(), "persistence backend ready");
    Ok(backend)
}
