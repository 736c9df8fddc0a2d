//! Generic repository over one entity kind.
//!
//! # Responsibilities
//! - Read committed rows with the soft-delete filter applied
//! - Stage inserts, updates and deletes in the shared persistence context
//! - Log every operation, and log then return every failure
//!
//! # Design Decisions
//! - Writes only stage; nothing is persisted until `UnitOfWork::save_changes`
//! - Reads are timed through the performance tracker
//! - "Not found" and "already deleted" are outcomes, not errors

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::observability::{LoggerFactory, PerformanceTracker, RequestContext, StructuredLogger};
use crate::persistence::{Entity, EntryState, PersistenceContext};
use crate::properties;
use crate::repository::query::Query;

/// What a delete request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Physical removal staged.
    Removed,
    /// Flag flipped and update staged.
    SoftDeleted,
    /// Soft delete of a row that was already soft-deleted; nothing staged.
    AlreadyDeleted,
    /// No row matched the predicate; nothing staged.
    NotFound,
}

/// Typed CRUD and query access to entities of kind `T`.
pub struct Repository<T: Entity> {
    context: Arc<PersistenceContext>,
    logger: StructuredLogger,
    performance: PerformanceTracker,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            logger: self.logger.clone(),
            performance: self.performance.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(context: Arc<PersistenceContext>, loggers: &LoggerFactory) -> Self {
        let logger = loggers.create(format!("repository.{}", T::KIND));
        Self {
            context,
            performance: PerformanceTracker::new(logger.clone()),
            logger,
            _entity: PhantomData,
        }
    }

    /// The single entity matching `predicate`, if any.
    pub async fn get<P>(&self, predicate: P, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Option<T>>
    where
        P: Fn(&T) -> bool + Send,
    {
        self.instrumented("Get", None, self.find(predicate, include_deleted, cancel))
            .await
    }

    pub async fn get_by_id(&self, id: Uuid, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Option<T>> {
        self.instrumented("GetById", Some(id), async {
            if id.is_nil() {
                return Err(DataError::argument("id", "must not be nil"));
            }
            self.find(move |entity: &T| entity.id() == id, include_deleted, cancel)
                .await
        })
        .await
    }

    /// Apply `transform` to the filtered base set.
    pub async fn query<F>(&self, transform: F, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Vec<T>>
    where
        F: FnOnce(Query<T>) -> Query<T> + Send,
    {
        self.instrumented("Query", None, async {
            let rows = self.load("Query", include_deleted, cancel).await?;
            let result = transform(Query::new(rows)).into_vec();
            self.logger.debug(
                "Query on {EntityType} returned {RecordCount} rows",
                &[json!(T::KIND), json!(result.len())],
            );
            Ok(result)
        })
        .await
    }

    pub async fn get_all(&self, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Vec<T>> {
        self.instrumented("GetAll", None, async {
            let rows = self.load("GetAll", include_deleted, cancel).await?;
            self.logger.debug(
                "Retrieved {RecordCount} {EntityType} rows",
                &[json!(rows.len()), json!(T::KIND)],
            );
            Ok(rows)
        })
        .await
    }

    /// Stage a new entity.
    pub fn insert(&self, entity: T) -> DataResult<T> {
        let id = entity.id();
        self.instrumented_sync("Insert", Some(id), || {
            self.context.track(entity.clone(), EntryState::Added)?;
            self.logger.debug(
                "Staged insert of {EntityType} {EntityId}",
                &[json!(T::KIND), json!(id)],
            );
            Ok(entity)
        })
    }

    /// Stage several new entities. Nothing is staged if any has a nil id.
    pub fn insert_many(&self, entities: Vec<T>) -> DataResult<Vec<T>> {
        self.instrumented_sync("InsertMany", None, || {
            if entities.is_empty() {
                self.logger
                    .warn("Bulk insert of {EntityType} called with no entities", &[json!(T::KIND)]);
                return Ok(entities);
            }
            if let Some(position) = entities.iter().position(|entity| entity.id().is_nil()) {
                return Err(DataError::argument(
                    "entities",
                    format!("entity at index {position} has a nil id"),
                ));
            }

            for entity in &entities {
                self.context.track(entity.clone(), EntryState::Added)?;
            }
            self.logger.info(
                "Staged insert of {RecordCount} {EntityType} rows",
                &[json!(entities.len()), json!(T::KIND)],
            );
            Ok(entities)
        })
    }

    /// Stage a hard or soft delete of `entity`.
    ///
    /// A successful soft delete also flips the flag on the caller's copy.
    pub fn delete(&self, entity: &mut T, soft: bool) -> DataResult<DeleteOutcome> {
        let id = entity.id();
        self.instrumented_sync("Delete", Some(id), || self.stage_delete(entity, soft))
    }

    /// Resolve one entity with `predicate` and delete it.
    ///
    /// Hard deletes also consider soft-deleted rows so they can be purged.
    pub async fn delete_where<P>(&self, predicate: P, soft: bool, cancel: &CancellationToken) -> DataResult<DeleteOutcome>
    where
        P: Fn(&T) -> bool + Send,
    {
        self.instrumented("DeleteWhere", None, async {
            self.logger.debug(
                "Deleting {EntityType} by predicate (soft: {Soft})",
                &[json!(T::KIND), json!(soft)],
            );
            match self.find(predicate, !soft, cancel).await? {
                Some(mut entity) => self.stage_delete(&mut entity, soft),
                None => {
                    self.logger
                        .warn("No {EntityType} matched the delete predicate", &[json!(T::KIND)]);
                    Ok(DeleteOutcome::NotFound)
                }
            }
        })
        .await
    }

    /// Stage a full-entity update.
    pub fn update(&self, entity: T) -> DataResult<()> {
        let id = entity.id();
        self.instrumented_sync("Update", Some(id), || {
            self.context.track(entity, EntryState::Modified)?;
            self.logger.debug(
                "Staged update of {EntityType} {EntityId}",
                &[json!(T::KIND), json!(id)],
            );
            Ok(())
        })
    }

    fn stage_delete(&self, entity: &mut T, soft: bool) -> DataResult<DeleteOutcome> {
        let id = entity.id();
        if id.is_nil() {
            return Err(DataError::argument("entity", "must have a non-nil id"));
        }

        if !soft {
            self.context.track(entity.clone(), EntryState::Deleted)?;
            self.logger.info(
                "Staged hard delete of {EntityType} {EntityId}",
                &[json!(T::KIND), json!(id)],
            );
            return Ok(DeleteOutcome::Removed);
        }

        if entity.is_deleted() {
            self.logger.warn(
                "{EntityType} {EntityId} is already deleted",
                &[json!(T::KIND), json!(id)],
            );
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        let mut flipped = entity.clone();
        flipped.audit_mut().mark_deleted();
        self.context.track(flipped.clone(), EntryState::Modified)?;
        *entity = flipped;
        self.logger.info(
            "Staged soft delete of {EntityType} {EntityId}",
            &[json!(T::KIND), json!(id)],
        );
        Ok(DeleteOutcome::SoftDeleted)
    }

    async fn find<P>(&self, predicate: P, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Option<T>>
    where
        P: Fn(&T) -> bool + Send,
    {
        let rows = self.load("Get", include_deleted, cancel).await?;
        let mut matches: Vec<T> = rows.into_iter().filter(|entity| predicate(entity)).collect();

        if matches.len() > 1 {
            return Err(DataError::MultipleResults {
                entity: T::KIND,
                count: matches.len(),
            });
        }

        let found = matches.pop();
        match &found {
            Some(entity) => self.logger.debug(
                "Retrieved {EntityType} {EntityId}",
                &[json!(T::KIND), json!(entity.id())],
            ),
            None => self
                .logger
                .warn("No {EntityType} matched the query", &[json!(T::KIND)]),
        }
        Ok(found)
    }

    /// Committed rows with the soft-delete filter applied.
    async fn load(&self, operation: &str, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Vec<T>> {
        let mut timer = self.performance.track_operation(
            format!("{}.{}", T::KIND, operation),
            properties! {
                "EntityType" => T::KIND,
                "IncludeDeleted" => include_deleted,
            },
        );

        let rows = self.context.fetch::<T>(include_deleted, cancel).await?;
        let rows: Vec<T> = if include_deleted {
            rows
        } else {
            rows.into_iter().filter(|entity| !entity.is_deleted()).collect()
        };

        timer.add_property("RecordCount", rows.len());
        Ok(rows)
    }

    /// Log a failed async operation as a repository exception and return it.
    ///
    /// Detached callers get one request context for the whole operation.
    async fn instrumented<R, F>(&self, operation: &'static str, entity_id: Option<Uuid>, work: F) -> DataResult<R>
    where
        F: Future<Output = DataResult<R>>,
    {
        RequestContext::ensure(async { work.await.map_err(|err| self.report(operation, entity_id, err)) }).await
    }

    fn instrumented_sync<R>(
        &self,
        operation: &'static str,
        entity_id: Option<Uuid>,
        work: impl FnOnce() -> DataResult<R>,
    ) -> DataResult<R> {
        RequestContext::ensure_sync(|| work().map_err(|err| self.report(operation, entity_id, err)))
    }

    fn report(&self, operation: &str, entity_id: Option<Uuid>, err: DataError) -> DataError {
        self.logger
            .log_repository_exception(operation, T::KIND, entity_id, &err);
        err
    }
}
