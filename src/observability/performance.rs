//! Operation timing.
//!
//! [`PerformanceTracker::track_operation`] starts a timer and returns an
//! [`OperationTracker`]; finishing or dropping it logs exactly one completion
//! event. Callers that time work themselves use the `log_operation_*` methods.

use std::time::{Duration, Instant};

use serde_json::json;

use crate::observability::logger::StructuredLogger;
use crate::observability::{metrics, to_value, Properties, RequestContext};

/// Emits operation start/complete/success/failure events.
#[derive(Clone)]
pub struct PerformanceTracker {
    logger: StructuredLogger,
}

impl PerformanceTracker {
    pub fn new(logger: StructuredLogger) -> Self {
        Self { logger }
    }

    /// Start timing `name`.
    pub fn track_operation(&self, name: impl Into<String>, properties: Properties) -> OperationTracker {
        let name = name.into();
        self.logger
            .debug("Operation {OperationName} started", &[json!(name)]);
        OperationTracker {
            logger: self.logger.clone(),
            name,
            properties,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn log_operation_duration(&self, name: &str, duration: Duration, properties: Properties) {
        let properties = timing_properties(name, duration, properties);
        in_scope(&self.logger, properties, |logger| {
            logger.info(
                "Operation {OperationName} took {ElapsedMilliseconds}ms",
                &[json!(name), json!(elapsed_ms(duration))],
            )
        });
        metrics::record_operation(name, "completed", duration);
    }

    pub fn log_operation_success(&self, name: &str, duration: Duration, mut properties: Properties) {
        properties.insert("Status".into(), json!("Success"));
        let properties = timing_properties(name, duration, properties);
        in_scope(&self.logger, properties, |logger| {
            logger.info(
                "Operation {OperationName} succeeded in {ElapsedMilliseconds}ms",
                &[json!(name), json!(elapsed_ms(duration))],
            )
        });
        metrics::record_operation(name, "success", duration);
    }

    pub fn log_operation_failure<E>(
        &self,
        name: &str,
        duration: Duration,
        error: &E,
        mut properties: Properties,
    ) where
        E: std::error::Error + ?Sized,
    {
        properties.insert("Status".into(), json!("Failed"));
        properties.insert("ExceptionType".into(), json!(short_type_name::<E>()));
        let properties = timing_properties(name, duration, properties);
        in_scope(&self.logger, properties, |logger| {
            logger.error_with(
                error,
                "Operation {OperationName} failed after {ElapsedMilliseconds}ms",
                &[json!(name), json!(elapsed_ms(duration))],
            )
        });
        metrics::record_operation(name, "failed", duration);
    }
}

/// A running operation timer.
pub struct OperationTracker {
    logger: StructuredLogger,
    name: String,
    properties: Properties,
    started: Instant,
    finished: bool,
}

impl OperationTracker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Attach a property to the completion event.
    pub fn add_property(&mut self, key: &str, value: impl serde::Serialize) {
        self.properties.insert(key.to_string(), to_value(&value));
    }

    /// Stop the timer and log completion.
    pub fn finish(mut self) -> Duration {
        self.complete()
    }

    fn complete(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if self.finished {
            return elapsed;
        }
        self.finished = true;

        let properties = timing_properties(&self.name, elapsed, std::mem::take(&mut self.properties));
        in_scope(&self.logger, properties, |logger| {
            logger.info(
                "Operation {OperationName} completed in {ElapsedMilliseconds}ms",
                &[json!(self.name), json!(elapsed_ms(elapsed))],
            )
        });
        metrics::record_operation(&self.name, "completed", elapsed);
        elapsed
    }
}

impl Drop for OperationTracker {
    fn drop(&mut self) {
        self.complete();
    }
}

/// Emit inside a scope carrying `properties`, installing a context if needed.
fn in_scope(logger: &StructuredLogger, properties: Properties, emit: impl FnOnce(&StructuredLogger)) {
    RequestContext::ensure_sync(|| {
        let _scope = logger.begin_scope(properties);
        emit(logger);
    });
}

/// Elapsed time in milliseconds, rounded to two decimals.
pub fn elapsed_ms(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100_000.0).round() / 100.0
}

fn timing_properties(name: &str, duration: Duration, mut properties: Properties) -> Properties {
    properties.insert("OperationName".into(), json!(name));
    properties.insert("ElapsedMilliseconds".into(), json!(elapsed_ms(duration)));
    properties.insert(
        "ElapsedMillisecondsRounded".into(),
        json!(duration.as_millis() as u64),
    );
    properties
}

fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::DataError;
    use crate::observability::logging::{LogLevel, MemorySink};
    use crate::observability::{LoggerFactory, RequestContext};
    use crate::properties;

    fn tracker() -> (PerformanceTracker, MemorySink) {
        let sink = MemorySink::new();
        let factory = LoggerFactory::with_sinks(vec![Arc::new(sink.clone())], LogLevel::Debug);
        (PerformanceTracker::new(factory.create("perf")), sink)
    }

    #[test]
    fn test_track_operation_logs_exactly_one_completion() {
        let (perf, sink) = tracker();
        RequestContext::new().run_sync(|| {
            let op = perf.track_operation("X", properties! { "Batch" => 7 });
            drop(op);
        });

        let completions = sink.with_template("Operation {OperationName} completed in {ElapsedMilliseconds}ms");
        assert_eq!(completions.len(), 1);
        let event = &completions[0];
        assert_eq!(event.fields["OperationName"], "X");
        assert!(event.fields["ElapsedMilliseconds"].as_f64().unwrap() >= 0.0);
        assert_eq!(event.scope["Batch"], 7);
        assert!(event.scope.contains_key("ElapsedMillisecondsRounded"));

        assert_eq!(sink.with_template("Operation {OperationName} started").len(), 1);
    }

    #[test]
    fn test_finish_then_drop_does_not_double_log() {
        let (perf, sink) = tracker();
        let op = perf.track_operation("Y", Properties::new());
        let elapsed = op.finish();
        assert!(elapsed >= Duration::ZERO);
        assert_eq!(
            sink.with_template("Operation {OperationName} completed in {ElapsedMilliseconds}ms").len(),
            1
        );
    }

    #[test]
    fn test_completion_scope_is_released() {
        let (perf, _sink) = tracker();
        RequestContext::new().run_sync(|| {
            perf.track_operation("Z", Properties::new()).finish();
            assert_eq!(crate::observability::logger::scope_depth(), 0);
        });
    }

    #[test]
    fn test_success_and_failure_tags() {
        let (perf, sink) = tracker();
        perf.log_operation_success("Import", Duration::from_millis(12), Properties::new());
        perf.log_operation_failure(
            "Import",
            Duration::from_millis(3),
            &DataError::Cancelled,
            properties! { "Source" => "csv" },
        );

        let events = sink.events();
        assert_eq!(events[0].scope["Status"], "Success");
        assert_eq!(events[0].level, LogLevel::Info);

        assert_eq!(events[1].level, LogLevel::Error);
        assert_eq!(events[1].scope["Status"], "Failed");
        assert_eq!(events[1].scope["ExceptionType"], "DataError");
        assert_eq!(events[1].scope["Source"], "csv");
        assert_eq!(events[1].error.as_deref(), Some("operation cancelled"));
    }

    #[test]
    fn test_elapsed_ms_rounds_to_two_decimals() {
        assert_eq!(elapsed_ms(Duration::from_micros(1234)), 1.23);
        assert_eq!(elapsed_ms(Duration::from_micros(2500)), 2.5);
    }
}
