//! Change tracking and audit stamping.
//!
//! # Responsibilities
//! - Hold the pending change set of one unit of work
//! - Merge repeated requests for the same entity into one entry
//! - Stamp audit fields with one actor and one instant per commit
//! - Hand the stamped batch to the backend and restore it on failure

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::persistence::backend::{ChangeKind, PersistenceBackend, StagedChange};
use crate::persistence::entity::{AuditFields, Entity};
use crate::persistence::user::UserContext;

/// Tracking state of a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    /// Combine an existing entry's state with a new request.
    ///
    /// `None` means the entry cancels out and is dropped.
    fn merge(current: Option<EntryState>, requested: EntryState) -> Option<EntryState> {
        use EntryState::*;
        match (current, requested) {
            (None, requested) => Some(requested),
            (Some(Added), Deleted) => None,
            (Some(Added), _) => Some(Added),
            (Some(Modified), requested) => Some(requested),
            (Some(Deleted), Deleted) => Some(Deleted),
            (Some(Deleted), _) => Some(Modified),
        }
    }

    fn action(self) -> ChangeKind {
        match self {
            EntryState::Added => ChangeKind::Insert,
            EntryState::Modified => ChangeKind::Update,
            EntryState::Deleted => ChangeKind::Delete,
        }
    }
}

/// Type-erased view of a tracked entity.
trait TrackedEntity: Send + Sync {
    fn kind(&self) -> &'static str;
    fn audit(&self) -> &AuditFields;
    fn audit_mut(&mut self) -> &mut AuditFields;
    fn to_document(&self) -> serde_json::Result<Value>;
    fn clone_box(&self) -> Box<dyn TrackedEntity>;
}

impl<T: Entity> TrackedEntity for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn audit(&self) -> &AuditFields {
        Entity::audit(self)
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        Entity::audit_mut(self)
    }

    fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn clone_box(&self) -> Box<dyn TrackedEntity> {
        Box::new(self.clone())
    }
}

struct Entry {
    state: EntryState,
    entity: Box<dyn TrackedEntity>,
}

type EntryKey = (&'static str, Uuid);

impl Entry {
    fn key(&self) -> EntryKey {
        (self.entity.kind(), self.entity.audit().id())
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            entity: self.entity.clone_box(),
        }
    }
}

/// Pending entries in first-tracked order, indexed by key.
///
/// Removed entries leave an empty slot behind so the index stays valid.
#[derive(Default)]
struct ChangeSet {
    slots: Vec<Option<Entry>>,
    index: HashMap<EntryKey, usize>,
}

impl ChangeSet {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn state(&self, key: &EntryKey) -> Option<EntryState> {
        let slot = *self.index.get(key)?;
        self.slots.get(slot)?.as_ref().map(|entry| entry.state)
    }

    /// Replace the entry in place, or append it.
    fn upsert(&mut self, entry: Entry) {
        let key = entry.key();
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot] = Some(entry),
            None => {
                self.index.insert(key, self.slots.len());
                self.slots.push(Some(entry));
            }
        }
    }

    fn remove(&mut self, key: &EntryKey) {
        if let Some(slot) = self.index.remove(key) {
            self.slots[slot] = None;
        }
    }

    fn take(&mut self) -> Vec<Entry> {
        self.index.clear();
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
    }
}

#[derive(Default)]
struct Tracker {
    entries: ChangeSet,
    released: bool,
}

/// The session a unit of work and its repositories share.
pub struct PersistenceContext {
    backend: Arc<dyn PersistenceBackend>,
    user: Arc<dyn UserContext>,
    tracker: Mutex<Tracker>,
}

impl PersistenceContext {
    pub fn new(backend: Arc<dyn PersistenceBackend>, user: Arc<dyn UserContext>) -> Self {
        Self {
            backend,
            user,
            tracker: Mutex::new(Tracker::default()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Stage `entity` under `requested`, merging with any pending entry.
    pub fn track<T: Entity>(&self, entity: T, requested: EntryState) -> DataResult<()> {
        if entity.id().is_nil() {
            return Err(DataError::argument("entity", format!("{} has a nil id", T::KIND)));
        }

        let mut tracker = self.tracker.lock();
        if tracker.released {
            return Err(DataError::Released);
        }

        let key = (T::KIND, entity.id());
        match EntryState::merge(tracker.entries.state(&key), requested) {
            Some(state) => tracker.entries.upsert(Entry {
                state,
                entity: Box::new(entity),
            }),
            None => tracker.entries.remove(&key),
        }
        Ok(())
    }

    /// State of the pending entry for `(T, id)`, if any.
    pub fn entry_state<T: Entity>(&self, id: Uuid) -> Option<EntryState> {
        self.tracker.lock().entries.state(&(T::KIND, id))
    }

    pub fn pending_count(&self) -> usize {
        self.tracker.lock().entries.len()
    }

    /// Committed rows of `T`, decoded.
    pub async fn fetch<T: Entity>(&self, include_deleted: bool, cancel: &CancellationToken) -> DataResult<Vec<T>> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let records = self.backend.fetch(T::KIND, include_deleted, cancel).await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record.document).map_err(DataError::from))
            .collect()
    }

    /// Stamp and commit every pending entry. Returns the affected row count.
    ///
    /// On failure the pending entries are restored unstamped so the caller
    /// can retry or release.
    pub async fn save_changes(&self, cancel: &CancellationToken) -> DataResult<usize> {
        let pending = {
            let mut tracker = self.tracker.lock();
            if tracker.released {
                return Err(DataError::Released);
            }
            if cancel.is_cancelled() {
                return Err(DataError::Cancelled);
            }
            tracker.entries.take()
        };

        if pending.is_empty() {
            return Ok(0);
        }

        let originals = pending.clone();
        let changes = match self.stamp(pending) {
            Ok(changes) => changes,
            Err(err) => {
                self.restore(originals);
                return Err(err);
            }
        };

        match self.backend.commit(changes, cancel).await {
            Ok(affected) => Ok(affected),
            Err(err) => {
                self.restore(originals);
                Err(err)
            }
        }
    }

    fn stamp(&self, entries: Vec<Entry>) -> DataResult<Vec<StagedChange>> {
        let now = Utc::now();
        let user = self.user.current_user_id();

        entries
            .into_iter()
            .map(|mut entry| -> DataResult<StagedChange> {
                match entry.state {
                    EntryState::Added => entry.entity.audit_mut().stamp_created(user, now),
                    EntryState::Modified => entry.entity.audit_mut().stamp_modified(user, now),
                    EntryState::Deleted => {}
                }

                let document = match entry.state {
                    EntryState::Deleted => None,
                    _ => Some(entry.entity.to_document()?),
                };
                let audit = entry.entity.audit();
                Ok(StagedChange {
                    kind: entry.entity.kind(),
                    id: audit.id(),
                    is_deleted: audit.is_deleted(),
                    action: entry.state.action(),
                    document,
                })
            })
            .collect()
    }

    /// Put failed entries back ahead of anything tracked since.
    fn restore(&self, originals: Vec<Entry>) {
        let mut tracker = self.tracker.lock();
        if tracker.released {
            return;
        }
        let newer = tracker.entries.take();
        for entry in originals {
            tracker.entries.upsert(entry);
        }
        for entry in newer {
            tracker.entries.upsert(entry);
        }
    }

    /// Discard pending changes and refuse further work. Returns `false` when
    /// already released.
    pub fn release(&self) -> bool {
        let mut tracker = self.tracker.lock();
        if tracker.released {
            return false;
        }
        tracker.released = true;
        tracker.entries.clear();
        true
    }

    pub fn is_released(&self) -> bool {
        self.tracker.lock().released
    }

    pub(crate) fn ensure_open(&self) -> DataResult<()> {
        if self.is_released() {
            Err(DataError::Released)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryBackend;
    use crate::persistence::user::FixedUser;
    use crate::repository::fixtures::Note;

    fn note(body: &str) -> Note {
        Note::new(body)
    }

    fn context(user: Uuid) -> (PersistenceContext, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (
            PersistenceContext::new(backend.clone(), Arc::new(FixedUser(user))),
            backend,
        )
    }

    #[test]
    fn test_merge_table() {
        use EntryState::*;
        assert_eq!(EntryState::merge(None, Modified), Some(Modified));
        assert_eq!(EntryState::merge(Some(Added), Modified), Some(Added));
        assert_eq!(EntryState::merge(Some(Added), Deleted), None);
        assert_eq!(EntryState::merge(Some(Modified), Added), Some(Added));
        assert_eq!(EntryState::merge(Some(Modified), Deleted), Some(Deleted));
        assert_eq!(EntryState::merge(Some(Deleted), Added), Some(Modified));
        assert_eq!(EntryState::merge(Some(Deleted), Deleted), Some(Deleted));
    }

    #[test]
    fn test_insert_then_hard_delete_cancels_out() {
        let (ctx, _) = context(Uuid::nil());
        let n = note("a");
        ctx.track(n.clone(), EntryState::Added).unwrap();
        ctx.track(n.clone(), EntryState::Deleted).unwrap();
        assert_eq!(ctx.pending_count(), 0);
        assert_eq!(ctx.entry_state::<Note>(n.audit.id()), None);
    }

    #[test]
    fn test_nil_id_is_rejected() {
        let (ctx, _) = context(Uuid::nil());
        assert!(matches!(
            ctx.track(Note::with_id(Uuid::nil()), EntryState::Added),
            Err(DataError::Argument { .. })
        ));
    }

    #[tokio::test]
    async fn test_added_entries_get_one_stamp() {
        let user = Uuid::new_v4();
        let (ctx, _) = context(user);
        let cancel = CancellationToken::new();

        ctx.track(note("a"), EntryState::Added).unwrap();
        ctx.track(note("b"), EntryState::Added).unwrap();
        assert_eq!(ctx.save_changes(&cancel).await.unwrap(), 2);
        assert_eq!(ctx.pending_count(), 0);

        let stored: Vec<Note> = ctx.fetch(false, &cancel).await.unwrap();
        assert_eq!(stored.len(), 2);
        for n in &stored {
            assert_eq!(n.audit.created_by(), user);
            assert_eq!(n.audit.updated_by(), user);
            assert_eq!(n.audit.created_time(), n.audit.updated_time());
        }
        assert_eq!(stored[0].audit.created_time(), stored[1].audit.created_time());
    }

    #[tokio::test]
    async fn test_modified_entries_keep_creation_stamp() {
        let creator = Uuid::new_v4();
        let backend = Arc::new(MemoryBackend::new());
        let cancel = CancellationToken::new();

        let first = PersistenceContext::new(backend.clone(), Arc::new(FixedUser(creator)));
        let n = note("draft");
        first.track(n.clone(), EntryState::Added).unwrap();
        first.save_changes(&cancel).await.unwrap();
        let created: Vec<Note> = first.fetch(false, &cancel).await.unwrap();

        let editor = Uuid::new_v4();
        let second = PersistenceContext::new(backend, Arc::new(FixedUser(editor)));
        let mut edited = created[0].clone();
        edited.body = "final".into();
        second.track(edited, EntryState::Modified).unwrap();
        second.save_changes(&cancel).await.unwrap();

        let stored: Vec<Note> = second.fetch(false, &cancel).await.unwrap();
        assert_eq!(stored[0].body, "final");
        assert_eq!(stored[0].audit.created_by(), creator);
        assert_eq!(stored[0].audit.created_time(), created[0].audit.created_time());
        assert_eq!(stored[0].audit.updated_by(), editor);
        assert!(stored[0].audit.updated_time() >= stored[0].audit.created_time());
    }

    #[tokio::test]
    async fn test_failed_commit_restores_pending() {
        let (ctx, backend) = context(Uuid::nil());
        let cancel = CancellationToken::new();

        ctx.track(note("ghost"), EntryState::Modified).unwrap();
        assert!(ctx.save_changes(&cancel).await.is_err());
        assert_eq!(ctx.pending_count(), 1);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_save_keeps_pending() {
        let (ctx, _) = context(Uuid::nil());
        let cancel = CancellationToken::new();
        ctx.track(note("a"), EntryState::Added).unwrap();
        cancel.cancel();

        assert!(matches!(ctx.save_changes(&cancel).await, Err(DataError::Cancelled)));
        assert_eq!(ctx.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_final() {
        let (ctx, _) = context(Uuid::nil());
        ctx.track(note("a"), EntryState::Added).unwrap();

        assert!(ctx.release());
        assert!(!ctx.release());
        assert_eq!(ctx.pending_count(), 0);
        assert!(matches!(
            ctx.track(note("b"), EntryState::Added),
            Err(DataError::Released)
        ));
        assert!(matches!(
            ctx.save_changes(&CancellationToken::new()).await,
            Err(DataError::Released)
        ));
    }

    #[test]
    fn test_merged_entries_keep_their_place() {
        let (ctx, _) = context(Uuid::nil());
        let notes: Vec<Note> = (1..=3).map(|i| Note::with_id(Uuid::from_u128(i))).collect();
        for n in &notes {
            ctx.track(n.clone(), EntryState::Added).unwrap();
        }

        // Update in place, then cancel out the middle entry and add it back.
        let mut edited = notes[0].clone();
        edited.body = "edited".into();
        ctx.track(edited, EntryState::Modified).unwrap();
        ctx.track(notes[1].clone(), EntryState::Deleted).unwrap();
        assert_eq!(ctx.pending_count(), 2);
        ctx.track(notes[1].clone(), EntryState::Added).unwrap();

        let pending = ctx.tracker.lock().entries.take();
        let order: Vec<u128> = pending.iter().map(|e| e.key().1.as_u128()).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert_eq!(pending[0].state, EntryState::Added);
        assert_eq!(pending[0].entity.to_document().unwrap()["body"], "edited");
    }

    #[tokio::test]
    async fn test_large_batch_is_tracked_and_committed_in_order() {
        let (ctx, backend) = context(Uuid::nil());
        let count = 20_000u128;
        for i in 1..=count {
            ctx.track(Note::with_id(Uuid::from_u128(i)), EntryState::Added).unwrap();
        }
        // Re-tracking every entry hits the index rather than rescanning.
        for i in 1..=count {
            ctx.track(Note::with_id(Uuid::from_u128(i)), EntryState::Modified).unwrap();
        }
        assert_eq!(ctx.pending_count(), count as usize);
        assert_eq!(ctx.entry_state::<Note>(Uuid::from_u128(count)), Some(EntryState::Added));

        let saved = ctx.save_changes(&CancellationToken::new()).await.unwrap();
        assert_eq!(saved, count as usize);
        assert_eq!(backend.len(), count as usize);
    }

    #[tokio::test]
    async fn test_restore_keeps_changes_tracked_during_commit() {
        let (ctx, _) = context(Uuid::nil());
        let ghost = Note::with_id(Uuid::from_u128(1));
        ctx.track(ghost.clone(), EntryState::Modified).unwrap();

        let originals = ctx.tracker.lock().entries.take();
        ctx.track(Note::with_id(Uuid::from_u128(2)), EntryState::Added).unwrap();
        ctx.track(ghost, EntryState::Deleted).unwrap();
        ctx.restore(originals);

        assert_eq!(ctx.pending_count(), 2);
        assert_eq!(ctx.entry_state::<Note>(Uuid::from_u128(1)), Some(EntryState::Deleted));
        assert_eq!(ctx.entry_state::<Note>(Uuid::from_u128(2)), Some(EntryState::Added));
    }
}
