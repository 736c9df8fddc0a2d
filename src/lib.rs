//! Audited data-access layer for web APIs.
//!
//! Generic repositories with soft-delete filtering, a unit of work that stamps
//! audit fields on commit, and request-scoped correlation threaded through
//! structured logging.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod persistence;
pub mod repository;

pub use config::AppConfig;
pub use error::{DataError, DataResult, PersistenceError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use persistence::{AuditFields, Entity};
pub use repository::{DeleteOutcome, Query, Repository, UnitOfWork};
