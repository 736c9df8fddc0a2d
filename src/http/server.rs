//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router and its handlers
//! - Wire up middleware (request logging, timeout, body limit)
//! - Hand each request its own unit of work through `AppState`
//! - Bind to a listener and shut down gracefully

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::AppConfig;
use crate::http::middleware::RequestLoggingLayer;
use crate::lifecycle::Shutdown;
use crate::observability::{CorrelationTracker, LoggerFactory};
use crate::persistence::{AmbientUser, PersistenceBackend, UserContext};
use crate::repository::UnitOfWork;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn PersistenceBackend>,
    user: Arc<dyn UserContext>,
    loggers: LoggerFactory,
}

impl AppState {
    /// State resolving the caller from the request context.
    pub fn new(backend: Arc<dyn PersistenceBackend>, loggers: LoggerFactory) -> Self {
        Self::with_user(backend, Arc::new(AmbientUser), loggers)
    }

    pub fn with_user(backend: Arc<dyn PersistenceBackend>, user: Arc<dyn UserContext>, loggers: LoggerFactory) -> Self {
        Self {
            backend,
            user,
            loggers,
        }
    }

    /// A fresh unit of work for the current request.
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(&self.backend), Arc::clone(&self.user), &self.loggers)
    }

    pub fn loggers(&self) -> &LoggerFactory {
        &self.loggers
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

/// HTTP server hosting the data-access layer.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server with the built-in routes.
    pub fn new(config: &AppConfig, state: AppState) -> Self {
        Self::with_routes(config, state, Router::new())
    }

    /// Create a server that also serves `routes`.
    pub fn with_routes(config: &AppConfig, state: AppState, routes: Router<AppState>) -> Self {
        let router = Self::build_router(config, state, routes);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &AppConfig, state: AppState, routes: Router<AppState>) -> Router {
        let logging = RequestLoggingLayer::new(state.loggers());
        routes
            .route("/health", get(health))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(logging)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let signal = shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    backend: &'static str,
    correlation_id: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        backend: state.backend_name(),
        correlation_id: CorrelationTracker::correlation_id(),
    })
}
