//! Structured logger with ambient scopes.

use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::Environment;
use crate::error::{DataError, LoggingError};
use crate::observability::context::with_current;
use crate::observability::correlation::{new_short_id, CorrelationTracker};
use crate::observability::logging::{LogEvent, LogLevel, LogSink, TracingSink};
use crate::observability::template::MessageTemplate;
use crate::observability::Properties;

/// Creates category-named loggers that share sinks and a minimum level.
#[derive(Clone)]
pub struct LoggerFactory {
    sinks: Arc<Vec<Arc<dyn LogSink>>>,
    minimum_level: LogLevel,
}

impl LoggerFactory {
    /// Factory writing to the `tracing` subscriber.
    pub fn new(minimum_level: LogLevel) -> Self {
        Self::with_sinks(vec![Arc::new(TracingSink)], minimum_level)
    }

    pub fn for_environment(environment: Environment) -> Self {
        Self::new(LogLevel::minimum_for(environment))
    }

    pub fn with_sinks(sinks: Vec<Arc<dyn LogSink>>, minimum_level: LogLevel) -> Self {
        Self {
            sinks: Arc::new(sinks),
            minimum_level,
        }
    }

    /// Add a sink; loggers created afterwards see it.
    pub fn add_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        Arc::make_mut(&mut self.sinks).push(sink);
        self
    }

    pub fn minimum_level(&self) -> LogLevel {
        self.minimum_level
    }

    pub fn create(&self, category: impl Into<String>) -> StructuredLogger {
        StructuredLogger {
            category: category.into().into(),
            sinks: self.sinks.clone(),
            minimum_level: self.minimum_level,
        }
    }
}

impl Default for LoggerFactory {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

/// Leveled, templated logger enriched with the ambient scope and correlation id.
#[derive(Clone)]
pub struct StructuredLogger {
    category: Arc<str>,
    sinks: Arc<Vec<Arc<dyn LogSink>>>,
    minimum_level: LogLevel,
}

impl StructuredLogger {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level >= self.minimum_level && !self.sinks.is_empty()
    }

    pub fn debug(&self, template: &str, args: &[Value]) {
        self.log(LogLevel::Debug, None, template, args);
    }

    pub fn info(&self, template: &str, args: &[Value]) {
        self.log(LogLevel::Info, None, template, args);
    }

    pub fn warn(&self, template: &str, args: &[Value]) {
        self.log(LogLevel::Warn, None, template, args);
    }

    pub fn error(&self, template: &str, args: &[Value]) {
        self.log(LogLevel::Error, None, template, args);
    }

    /// Error-level event with the failure attached.
    pub fn error_with<E: Display + ?Sized>(&self, error: &E, template: &str, args: &[Value]) {
        self.log(LogLevel::Error, Some(error.to_string()), template, args);
    }

    /// Emit one event to every sink.
    pub fn log(&self, level: LogLevel, error: Option<String>, template: &str, args: &[Value]) {
        if !self.is_enabled(level) {
            return;
        }

        let parsed = MessageTemplate::parse(template);
        let fields = parsed.bind(args);
        let event = LogEvent {
            timestamp: Utc::now(),
            level,
            category: self.category.to_string(),
            template: template.to_string(),
            message: parsed.render(&fields),
            fields,
            scope: with_current(|ctx| ctx.scope_properties()),
            correlation_id: CorrelationTracker::correlation_id(),
            error,
        };

        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }

    /// Push `properties` onto the ambient scope until the guard is released.
    pub fn begin_scope(&self, properties: Properties) -> LogScope {
        LogScope::begin(properties)
    }

    /// Push `{OperationName, OperationId, CorrelationId}`.
    pub fn begin_operation_scope(&self, operation_name: &str, operation_id: Option<&str>) -> LogScope {
        let operation_id = operation_id.map_or_else(new_short_id, str::to_string);
        LogScope::begin(crate::properties! {
            "OperationName" => operation_name,
            "OperationId" => operation_id,
            "CorrelationId" => CorrelationTracker::correlation_id(),
        })
    }

    /// The repository-exception event: operation, entity kind and id.
    pub fn log_repository_exception(
        &self,
        operation: &str,
        entity_type: &str,
        entity_id: Option<Uuid>,
        error: &DataError,
    ) {
        self.error_with(
            error,
            "Repository operation {Operation} failed for {EntityType} {EntityId}: {ErrorKind}",
            &[
                json!(operation),
                json!(entity_type),
                entity_id.map_or(Value::Null, |id| json!(id)),
                json!(error.kind()),
            ],
        );
    }
}

/// Guard for one pushed scope. Scopes must be released innermost first.
#[must_use = "dropping a LogScope releases it immediately"]
#[derive(Debug)]
pub struct LogScope {
    id: u64,
    open: bool,
}

impl LogScope {
    fn begin(properties: Properties) -> Self {
        let id = with_current(|ctx| ctx.push_scope(properties));
        Self { id, open: true }
    }

    /// Release explicitly, surfacing out-of-order misuse.
    ///
    /// A rejected release leaves the properties visible until every inner scope
    /// has been released.
    pub fn close(mut self) -> Result<(), LoggingError> {
        self.open = false;
        with_current(|ctx| ctx.release_scope(self.id))
    }
}

impl Drop for LogScope {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = with_current(|ctx| ctx.release_scope(self.id)) {
            tracing::warn!(error = %err, "log scope released out of order");
        }
    }
}

/// Current depth of the ambient scope stack, including rejected frames.
pub fn scope_depth() -> usize {
    with_current(|ctx| ctx.scope_depth())
}
