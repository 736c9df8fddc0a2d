//! Unit of work: one persistence context, one commit.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::DataResult;
use crate::observability::performance::elapsed_ms;
use crate::observability::{
    metrics, LoggerFactory, PerformanceTracker, Properties, RequestContext, StructuredLogger,
};
use crate::persistence::{Entity, PersistenceBackend, PersistenceContext, UserContext};
use crate::repository::generic::Repository;

/// Owns the persistence context shared by the repositories it hands out.
///
/// Dropping the unit of work releases the context; repositories obtained from
/// it then fail with [`DataError::Released`](crate::DataError::Released).
pub struct UnitOfWork {
    context: Arc<PersistenceContext>,
    loggers: LoggerFactory,
    logger: StructuredLogger,
    performance: PerformanceTracker,
}

impl UnitOfWork {
    pub fn new(backend: Arc<dyn PersistenceBackend>, user: Arc<dyn UserContext>, loggers: &LoggerFactory) -> Self {
        let logger = loggers.create("unit_of_work");
        Self {
            context: Arc::new(PersistenceContext::new(backend, user)),
            loggers: loggers.clone(),
            performance: PerformanceTracker::new(logger.clone()),
            logger,
        }
    }

    /// A repository over `T` sharing this unit's context.
    pub fn repository<T: Entity>(&self) -> Repository<T> {
        Repository::new(Arc::clone(&self.context), &self.loggers)
    }

    pub fn pending_count(&self) -> usize {
        self.context.pending_count()
    }

    /// Commit every staged change atomically and return the affected count.
    pub async fn save_changes(&self, cancel: &CancellationToken) -> DataResult<usize> {
        RequestContext::ensure(self.commit(cancel)).await
    }

    async fn commit(&self, cancel: &CancellationToken) -> DataResult<usize> {
        let timer = self.performance.track_operation("SaveChanges", Properties::new());

        match self.context.save_changes(cancel).await {
            Ok(0) => {
                timer.finish();
                self.logger.debug("No changes to save", &[]);
                Ok(0)
            }
            Ok(saved) => {
                let elapsed = timer.finish();
                self.logger.info(
                    "Saved {RecordCount} records in {ElapsedMilliseconds}ms ({RecordsPerSecond} records/sec)",
                    &[
                        json!(saved),
                        json!(elapsed_ms(elapsed)),
                        json!(records_per_second(saved, elapsed.as_secs_f64())),
                    ],
                );
                metrics::record_records_saved(saved);
                Ok(saved)
            }
            Err(err) => {
                drop(timer);
                self.logger
                    .log_repository_exception("SaveChanges", "UnitOfWork", None, &err);
                Err(err)
            }
        }
    }

    /// Discard pending changes and release the context. Later calls do nothing.
    pub fn release(&self) {
        if self.context.release() {
            self.logger.debug(
                "Released persistence context on {Backend}",
                &[json!(self.context.backend_name())],
            );
        }
    }

    pub fn is_released(&self) -> bool {
        self.context.is_released()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        self.release();
    }
}

fn records_per_second(records: usize, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return records as f64;
    }
    (records as f64 / seconds * 100.0).round() / 100.0
}
