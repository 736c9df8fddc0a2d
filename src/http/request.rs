//! Request inspection helpers.
//!
//! # Responsibilities
//! - Read the inbound correlation id header
//! - Resolve the client address behind proxies
//! - Carry the authenticated caller as a request extension

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, Request};
use uuid::Uuid;

use crate::observability::correlation::CORRELATION_ID_HEADER;

/// Header carrying the client chain when behind a proxy.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Authenticated caller, inserted by an upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

/// Non-blank `X-Correlation-ID` value, trimmed.
pub fn inbound_correlation_id<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// First `X-Forwarded-For` entry, else the peer address, else `"unknown"`.
pub fn remote_address<B>(request: &Request<B>) -> String {
    let forwarded = request
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(address) = forwarded {
        return address.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn user_agent<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn caller_id<B>(request: &Request<B>) -> Option<Uuid> {
    request.extensions().get::<CallerId>().map(|caller| caller.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> axum::http::request::Builder {
        Request::builder().uri("/notes")
    }

    #[test]
    fn test_forwarded_for_wins_over_peer() {
        let mut req = request()
            .header(X_FORWARDED_FOR, " 203.0.113.7 , 10.0.0.1")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("127.0.0.1:9000".parse::<SocketAddr>().unwrap()));
        assert_eq!(remote_address(&req), "203.0.113.7");
    }

    #[test]
    fn test_peer_then_unknown() {
        let mut req = request().body(()).unwrap();
        assert_eq!(remote_address(&req), "unknown");

        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.1:443".parse::<SocketAddr>().unwrap()));
        assert_eq!(remote_address(&req), "192.0.2.1");
    }

    #[test]
    fn test_blank_correlation_header_is_ignored() {
        let req = request().header(CORRELATION_ID_HEADER, "   ").body(()).unwrap();
        assert_eq!(inbound_correlation_id(&req), None);

        let req = request().header("X-Correlation-ID", " abc ").body(()).unwrap();
        assert_eq!(inbound_correlation_id(&req).as_deref(), Some("abc"));
    }
}
