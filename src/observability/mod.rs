//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request Logging Middleware
//!     → context.rs (task-local RequestContext: correlation id, caller id, scopes)
//!     → correlation.rs (read / set / generate correlation id)
//!
//! Repository / Unit of Work / Middleware
//!     → logger.rs (StructuredLogger: template + args + ambient scope)
//!     → performance.rs (OperationTracker: start/complete events)
//!     → sinks (TracingSink → tracing-subscriber, MemorySink → tests)
//!     → metrics.rs (Prometheus counters and histograms)
//! ```
//!
//! # Design Decisions
//! - Ambient state lives in a `tokio::task_local!`, never in a process global
//! - Message templates keep named placeholders; arguments become fields
//! - Scopes are guards; out-of-order release is rejected, not honoured

pub mod context;
pub mod correlation;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod performance;
pub mod template;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

pub use context::RequestContext;
pub use correlation::CorrelationTracker;
pub use logger::{LogScope, LoggerFactory, StructuredLogger};
pub use logging::{LogEvent, LogLevel, LogSink, MemorySink, TracingSink};
pub use performance::{OperationTracker, PerformanceTracker};

/// Ordered key/value properties attached to scopes and events.
pub type Properties = BTreeMap<String, Value>;

/// Convert any serializable value into a property value.
///
/// Values that fail to serialize become `null`.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Build a [`Properties`] map from `key => value` pairs.
///
/// ```
/// use audited_store::properties;
///
/// let props = properties! { "OperationName" => "SaveChanges", "Count" => 3 };
/// assert_eq!(props.len(), 2);
/// ```
#[macro_export]
macro_rules! properties {
    () => {
        $crate::observability::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::observability::Properties::new();
        $(
            map.insert(
                ::std::string::String::from($key),
                $crate::observability::to_value(&$value),
            );
        )+
        map
    }};
}
