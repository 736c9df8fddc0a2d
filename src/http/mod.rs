//! HTTP hosting subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ConnectInfo)
//!     → middleware/request_logging.rs (correlation id, request scope, timing)
//!     → request.rs (caller id, remote address, headers)
//!     → handler (AppState::unit_of_work per request)
//!     → response with X-Correlation-ID
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::{RequestLogging, RequestLoggingLayer};
pub use request::CallerId;
pub use server::{AppState, HttpServer};
