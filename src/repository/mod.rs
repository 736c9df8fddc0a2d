//! Repository and unit-of-work layer.
//!
//! # Data Flow
//! ```text
//! AppState::unit_of_work()
//!     → UnitOfWork::repository::<T>()   (shares one PersistenceContext)
//!     → Repository<T> reads / stages changes
//!     → UnitOfWork::save_changes        (one atomic commit, timed as SaveChanges)
//!     → drop / release                  (context released exactly once)
//! ```

pub mod generic;
pub mod query;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod fixtures;

pub use generic::{DeleteOutcome, Repository};
pub use query::Query;
pub use unit_of_work::UnitOfWork;
