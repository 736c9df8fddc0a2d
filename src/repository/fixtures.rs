use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persistence::{AuditFields, Entity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Note {
    #[serde(flatten)]
    pub audit: AuditFields,
    pub body: String,
}

impl Note {
    pub fn new(body: &str) -> Self {
        Self {
            audit: AuditFields::new(),
            body: body.to_string(),
        }
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            audit: AuditFields::with_id(id),
            body: String::new(),
        }
    }
}

impl Entity for Note {
    const KIND: &'static str = "note";

    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}
