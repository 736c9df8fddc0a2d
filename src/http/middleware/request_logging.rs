//! Per-request correlation, timing and logging.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → correlation id (X-Correlation-ID or generated)
//!     → RequestContext installed for the rest of the call chain
//!     → timer "{method} {path}" + RequestProcessing scope
//!     → inner service
//!     → completion event + X-Correlation-ID echoed on the response
//!       or failure event, error returned unchanged
//! ```

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{HeaderValue, Request, Response};
use serde_json::json;
use tower::{Layer, Service};

use crate::http::request::{caller_id, inbound_correlation_id, remote_address, user_agent};
use crate::observability::correlation::{new_short_id, CORRELATION_ID_HEADER};
use crate::observability::performance::elapsed_ms;
use crate::observability::{metrics, LoggerFactory, PerformanceTracker, RequestContext, StructuredLogger};
use crate::properties;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Wraps a service with [`RequestLogging`].
#[derive(Clone)]
pub struct RequestLoggingLayer {
    logger: StructuredLogger,
}

impl RequestLoggingLayer {
    pub fn new(loggers: &LoggerFactory) -> Self {
        Self {
            logger: loggers.create("http.request"),
        }
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogging {
            inner,
            performance: PerformanceTracker::new(self.logger.clone()),
            logger: self.logger.clone(),
        }
    }
}

/// Middleware service. Never turns an inner error into a response.
#[derive(Clone)]
pub struct RequestLogging<S> {
    inner: S,
    logger: StructuredLogger,
    performance: PerformanceTracker,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogging<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The readied service handles this call; the clone waits for the next.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        let correlation_id = inbound_correlation_id(&request).unwrap_or_else(new_short_id);
        let mut context = RequestContext::with_correlation_id(correlation_id.clone());
        if let Some(caller) = caller_id(&request) {
            context = context.with_caller_id(caller);
        }

        let handler = Handler {
            logger: self.logger.clone(),
            performance: self.performance.clone(),
            correlation_id,
        };
        Box::pin(context.run(handler.handle(inner, request)))
    }
}

struct Handler {
    logger: StructuredLogger,
    performance: PerformanceTracker,
    correlation_id: String,
}

impl Handler {
    async fn handle<S, ReqBody, ResBody>(self, mut inner: S, request: Request<ReqBody>) -> Result<Response<ResBody>, S::Error>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Display,
    {
        let method = request.method().to_string();
        let path = request.uri().path().to_string();
        let remote = remote_address(&request);
        let agent = user_agent(&request);

        let mut timed = properties! { "Method" => method, "Path" => path };
        if let Some(caller) = caller_id(&request) {
            timed.insert("UserId".into(), json!(caller));
        }
        let timer = self
            .performance
            .track_operation(format!("{method} {path}"), timed);
        let scope = self
            .logger
            .begin_operation_scope("RequestProcessing", Some(&self.correlation_id));

        self.logger.info(
            "HTTP {Method} {Path} started from {RemoteIpAddress}",
            &[json!(method), json!(path), json!(remote)],
        );

        let result = inner.call(request).await;
        let elapsed = timer.elapsed();

        let outcome = match result {
            Ok(mut response) => {
                let status = response.status().as_u16();
                self.logger.info(
                    "HTTP {Method} {Path} responded {StatusCode} in {ElapsedMilliseconds}ms",
                    &[json!(method), json!(path), json!(status), json!(elapsed_ms(elapsed))],
                );
                if let Ok(value) = HeaderValue::from_str(&self.correlation_id) {
                    response.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }
                metrics::record_request(&method, status, elapsed);
                Ok(response)
            }
            Err(err) => {
                let failure = self.logger.begin_scope(properties! {
                    "Path" => path,
                    "StatusCode" => 500,
                    "ElapsedMilliseconds" => elapsed_ms(elapsed),
                    "RemoteIpAddress" => remote,
                    "UserAgent" => agent,
                });
                self.logger.error_with(
                    &err,
                    "HTTP {Method} {Path} failed after {ElapsedMilliseconds}ms",
                    &[json!(method), json!(path), json!(elapsed_ms(elapsed))],
                );
                drop(failure);
                metrics::record_request(&method, 500, elapsed);
                Err(err)
            }
        };

        drop(scope);
        timer.finish();
        outcome
    }
}
