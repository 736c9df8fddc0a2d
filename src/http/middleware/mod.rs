//! Tower middleware.

pub mod request_logging;

pub use request_logging::{RequestLogging, RequestLoggingLayer};
