//! Log events, sinks and console subscriber setup.
//!
//! # Responsibilities
//! - Define the structured [`LogEvent`] every logger call produces
//! - Deliver events to pluggable [`LogSink`]s
//! - Initialize the `tracing` subscriber for the configured environment
//!
//! # Design Decisions
//! - `tracing` is the console/JSON backbone; [`TracingSink`] forwards to it
//! - Development: human-readable output with targets, `debug` by default
//! - Production: JSON output, `info` by default
//! - `RUST_LOG` always wins over configuration

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Environment, ObservabilityConfig};
use crate::observability::Properties;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Minimum level for an environment: verbose in development.
    pub fn minimum_for(environment: Environment) -> Self {
        match environment {
            Environment::Development => LogLevel::Debug,
            Environment::Production => LogLevel::Info,
        }
    }
}

/// One structured log event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Logger category, usually the emitting component.
    pub category: String,
    /// The message template, verbatim.
    pub template: String,
    /// The template rendered with its fields.
    pub message: String,
    /// Placeholder values bound from the call's arguments.
    pub fields: Properties,
    /// Ambient scope properties at the time of the call.
    pub scope: Properties,
    pub correlation_id: String,
    /// Attached error, rendered.
    pub error: Option<String>,
}

impl LogEvent {
    /// Look up a property, preferring call fields over scope properties.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| self.scope.get(key))
    }
}

/// Destination for log events.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &LogEvent);
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

macro_rules! forward_event {
    ($level:ident, $event:expr, $fields:expr, $scope:expr) => {
        tracing::$level!(
            correlation_id = %$event.correlation_id,
            category = %$event.category,
            template = %$event.template,
            fields = %$fields,
            scope = %$scope,
            error = $event.error.as_deref(),
            "{}",
            $event.message
        )
    };
}

impl LogSink for TracingSink {
    fn emit(&self, event: &LogEvent) {
        let fields = Value::Object(event.fields.clone().into_iter().collect());
        let scope = Value::Object(event.scope.clone().into_iter().collect());
        match event.level {
            LogLevel::Debug => forward_event!(debug, event, fields, scope),
            LogLevel::Info => forward_event!(info, event, fields, scope),
            LogLevel::Warn => forward_event!(warn, event, fields, scope),
            LogLevel::Error => forward_event!(error, event, fields, scope),
        }
    }
}

/// Keeps events in memory. Used by tests and diagnostics endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every captured event.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Captured events whose template matches exactly.
    pub fn with_template(&self, template: &str) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.template == template)
            .cloned()
            .collect()
    }

    /// Captured events at `level`.
    pub fn at_level(&self, level: LogLevel) -> Vec<LogEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Install the global `tracing` subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match &config.log_level {
        Some(directives) => EnvFilter::new(directives),
        None => {
            let level = config.environment.default_log_level();
            EnvFilter::new(format!("audited_store={level},tower_http={level}"))
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.environment {
        Environment::Development => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        Environment::Production => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false),
            )
            .try_init(),
    }
}
