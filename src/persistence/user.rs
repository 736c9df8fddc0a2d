//! Caller identity used for audit stamps.

use uuid::Uuid;

use crate::observability::context::with_current;

/// Resolves who is making the current change.
///
/// Unauthenticated callers resolve to the nil UUID; resolution never fails.
pub trait UserContext: Send + Sync {
    fn current_user_id(&self) -> Uuid;
}

/// Always anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl UserContext for AnonymousUser {
    fn current_user_id(&self) -> Uuid {
        Uuid::nil()
    }
}

/// A fixed identity, for jobs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedUser(pub Uuid);

impl UserContext for FixedUser {
    fn current_user_id(&self) -> Uuid {
        self.0
    }
}

/// The caller stored on the active request context by the HTTP layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientUser;

impl UserContext for AmbientUser {
    fn current_user_id(&self) -> Uuid {
        with_current(|ctx| ctx.caller_id()).unwrap_or_else(Uuid::nil)
    }
}
