//! Correlation id tracking.
//!
//! The id lives in the ambient [`RequestContext`](super::RequestContext), so
//! every log event of one request carries the same token.

use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::observability::context::with_current;

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Length of generated correlation ids.
pub const CORRELATION_ID_LEN: usize = 8;

/// Accessors for the ambient correlation id.
pub struct CorrelationTracker;

impl CorrelationTracker {
    /// The current id. The first read in a context generates and stores one.
    pub fn correlation_id() -> String {
        with_current(|ctx| ctx.correlation_id_or_insert_with(new_short_id))
    }

    /// The current id without generating one.
    pub fn peek() -> Option<String> {
        with_current(|ctx| ctx.correlation_id())
    }

    /// Replace the current id. Blank input is rejected.
    pub fn set_correlation_id(correlation_id: &str) -> DataResult<()> {
        let trimmed = correlation_id.trim();
        if trimmed.is_empty() {
            return Err(DataError::argument("correlation_id", "must not be blank"));
        }
        with_current(|ctx| ctx.set_correlation_id(trimmed.to_string()));
        Ok(())
    }

    /// Generate a fresh id, store it as current and return it.
    pub fn generate_correlation_id() -> String {
        let id = new_short_id();
        with_current(|ctx| ctx.set_correlation_id(id.clone()));
        id
    }
}

/// A short random hex token. Unique with high probability, not a secret.
pub fn new_short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(CORRELATION_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RequestContext;

    #[test]
    fn test_first_read_generates_and_stores() {
        RequestContext::new().run_sync(|| {
            assert_eq!(CorrelationTracker::peek(), None);
            let first = CorrelationTracker::correlation_id();
            assert_eq!(first.len(), CORRELATION_ID_LEN);
            assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(CorrelationTracker::correlation_id(), first);
        });
    }

    #[test]
    fn test_set_rejects_blank() {
        RequestContext::new().run_sync(|| {
            let err = CorrelationTracker::set_correlation_id("   ").unwrap_err();
            assert!(matches!(err, DataError::Argument { name: "correlation_id", .. }));
            assert_eq!(CorrelationTracker::peek(), None);

            CorrelationTracker::set_correlation_id("abc123").unwrap();
            assert_eq!(CorrelationTracker::correlation_id(), "abc123");
        });
    }

    #[test]
    fn test_generate_replaces_current() {
        RequestContext::with_correlation_id("old").run_sync(|| {
            let generated = CorrelationTracker::generate_correlation_id();
            assert_ne!(generated, "old");
            assert_eq!(CorrelationTracker::correlation_id(), generated);
        });
    }

    #[test]
    fn test_short_ids_differ() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| new_short_id()).collect();
        assert!(ids.len() > 990);
    }
}
