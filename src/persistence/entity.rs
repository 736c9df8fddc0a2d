//! Entity contract and audit fields.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity, soft-delete flag and audit stamps shared by every entity.
///
/// The stamps are written by the persistence context at commit time and are
/// read-only to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    id: Uuid,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    created_by: Uuid,
    #[serde(default)]
    created_time: DateTime<Utc>,
    #[serde(default)]
    updated_by: Uuid,
    #[serde(default)]
    updated_time: DateTime<Utc>,
}

impl AuditFields {
    /// Fresh fields with a time-ordered v7 identifier.
    pub fn new() -> Self {
        Self::with_id(Uuid::now_v7())
    }

    /// Fields for a caller-chosen identifier. A nil id is rejected on write.
    pub fn with_id(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            is_deleted: false,
            created_by: Uuid::nil(),
            created_time: now,
            updated_by: Uuid::nil(),
            updated_time: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn updated_by(&self) -> Uuid {
        self.updated_by
    }

    pub fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    pub(crate) fn stamp_created(&mut self, user: Uuid, now: DateTime<Utc>) {
        self.created_by = user;
        self.created_time = now;
        self.updated_by = user;
        self.updated_time = now;
    }

    /// `updated_time` never moves backwards, even under clock skew.
    pub(crate) fn stamp_modified(&mut self, user: Uuid, now: DateTime<Utc>) {
        self.updated_by = user;
        self.updated_time = now.max(self.updated_time).max(self.created_time);
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Default for AuditFields {
    fn default() -> Self {
        Self::new()
    }
}

/// A persistable record kind.
///
/// Implementors embed an [`AuditFields`] and expose it; everything else about
/// the record is plain serde data.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Note {
///     #[serde(flatten)]
///     audit: AuditFields,
///     body: String,
/// }
///
/// impl Entity for Note {
///     const KIND: &'static str = "note";
///     fn audit(&self) -> &AuditFields { &self.audit }
///     fn audit_mut(&mut self) -> &mut AuditFields { &mut self.audit }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage name of this kind.
    const KIND: &'static str;

    fn audit(&self) -> &AuditFields;

    fn audit_mut(&mut self) -> &mut AuditFields;

    fn id(&self) -> Uuid {
        self.audit().id()
    }

    fn is_deleted(&self) -> bool {
        self.audit().is_deleted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_ids_are_v7() {
        let a = AuditFields::new();
        let b = AuditFields::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().get_version_num(), 7);
        assert!(!a.is_deleted());
    }

    #[test]
    fn test_stamp_created_sets_all_four() {
        let mut audit = AuditFields::new();
        let user = Uuid::new_v4();
        let now = Utc::now() + Duration::seconds(5);
        audit.stamp_created(user, now);

        assert_eq!(audit.created_by(), user);
        assert_eq!(audit.updated_by(), user);
        assert_eq!(audit.created_time(), now);
        assert_eq!(audit.updated_time(), now);
    }

    #[test]
    fn test_stamp_modified_never_moves_backwards() {
        let mut audit = AuditFields::new();
        let creator = Uuid::new_v4();
        let created = Utc::now();
        audit.stamp_created(creator, created);

        let editor = Uuid::new_v4();
        audit.stamp_modified(editor, created - Duration::minutes(10));

        assert_eq!(audit.created_by(), creator);
        assert_eq!(audit.updated_by(), editor);
        assert_eq!(audit.updated_time(), created);
    }

    #[test]
    fn test_missing_timestamps_deserialize() {
        let id = Uuid::now_v7();
        let audit: AuditFields = serde_json::from_value(serde_json::json!({ "id": id })).unwrap();
        assert_eq!(audit.id(), id);
        assert!(!audit.is_deleted());
        assert_eq!(audit.created_by(), Uuid::nil());
    }
}
