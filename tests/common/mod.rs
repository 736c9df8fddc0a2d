//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use audited_store::config::AppConfig;
use audited_store::http::{AppState, HttpServer};
use audited_store::lifecycle::Shutdown;
use audited_store::observability::{LogLevel, LoggerFactory, MemorySink};
use audited_store::{AuditFields, Entity};

/// Test entity.
#[allow(dead_code)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(flatten)]
    pub audit: AuditFields,
    pub title: String,
    #[serde(default)]
    pub done: bool,
}

impl Task {
    pub fn new(title: &str) -> Self {
        Self {
            audit: AuditFields::new(),
            title: title.to_string(),
            done: false,
        }
    }
}

impl Entity for Task {
    const KIND: &'static str = "task";

    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

/// Logger factory writing every level into a capturing sink.
pub fn capture_logs() -> (LoggerFactory, MemorySink) {
    let sink = MemorySink::new();
    let loggers = LoggerFactory::with_sinks(vec![Arc::new(sink.clone())], LogLevel::Debug);
    (loggers, sink)
}

/// Start a server on an ephemeral port. Trigger the returned shutdown to stop it.
#[allow(dead_code)]
pub async fn start_server(state: AppState, routes: Router<AppState>) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::with_routes(&AppConfig::default(), state, routes);
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &server_shutdown).await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}
