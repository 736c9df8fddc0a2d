//! Request logging middleware behaviour.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tower::{service_fn, ServiceBuilder, ServiceExt};
use uuid::Uuid;

use audited_store::http::{CallerId, RequestLoggingLayer};
use audited_store::observability::{CorrelationTracker, LogLevel};
use audited_store::persistence::{AmbientUser, UserContext};

mod common;
use common::capture_logs;

const STARTED: &str = "HTTP {Method} {Path} started from {RemoteIpAddress}";
const RESPONDED: &str = "HTTP {Method} {Path} responded {StatusCode} in {ElapsedMilliseconds}ms";
const FAILED: &str = "HTTP {Method} {Path} failed after {ElapsedMilliseconds}ms";

async fn echo_correlation(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    Ok(Response::new(Body::from(CorrelationTracker::correlation_id())))
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_inbound_correlation_id_round_trips() {
    let (loggers, sink) = capture_logs();
    let service = ServiceBuilder::new()
        .layer(RequestLoggingLayer::new(&loggers))
        .service(service_fn(echo_correlation));

    let response = service
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header("X-Correlation-ID", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-correlation-id"], "abc-123");
    assert_eq!(body_text(response).await, "abc-123");

    let events = sink.events();
    assert!(events.iter().all(|e| e.correlation_id == "abc-123"));

    let started = &sink.with_template(STARTED)[0];
    assert_eq!(started.fields["Method"], "GET");
    assert_eq!(started.fields["Path"], "/tasks");
    assert_eq!(started.fields["RemoteIpAddress"], "unknown");
    assert_eq!(started.scope["OperationName"], "RequestProcessing");
    assert_eq!(started.scope["OperationId"], "abc-123");

    let responded = &sink.with_template(RESPONDED)[0];
    assert_eq!(responded.fields["StatusCode"], 200);

    let completed = sink.with_template("Operation {OperationName} completed in {ElapsedMilliseconds}ms");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].fields["OperationName"], "GET /tasks");
}

#[tokio::test]
async fn test_missing_header_generates_short_id() {
    let (loggers, _sink) = capture_logs();
    let service = ServiceBuilder::new()
        .layer(RequestLoggingLayer::new(&loggers))
        .service(service_fn(echo_correlation));

    let response = service
        .oneshot(
            Request::builder()
                .uri("/")
                .header("X-Correlation-ID", "  ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let header = response.headers()["x-correlation-id"]
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(header.len(), 8);
    assert!(header.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(body_text(response).await, header);
}

#[tokio::test]
async fn test_inner_error_is_logged_and_propagated() {
    let (loggers, sink) = capture_logs();
    let service = ServiceBuilder::new()
        .layer(RequestLoggingLayer::new(&loggers))
        .service(service_fn(|_req: Request<Body>| async {
            Err::<Response<Body>, String>("database unavailable".to_string())
        }));

    let err = service
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks")
                .header("x-forwarded-for", "198.51.100.4, 10.0.0.2")
                .header("user-agent", "integration-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, "database unavailable");

    let failed = sink.with_template(FAILED);
    assert_eq!(failed.len(), 1);
    let event = &failed[0];
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.error.as_deref(), Some("database unavailable"));
    assert_eq!(event.scope["Path"], "/tasks");
    assert_eq!(event.scope["StatusCode"], 500);
    assert_eq!(event.scope["RemoteIpAddress"], "198.51.100.4");
    assert_eq!(event.scope["UserAgent"], "integration-test");
    assert!(event.scope["ElapsedMilliseconds"].as_f64().unwrap() >= 0.0);

    assert!(sink.with_template(RESPONDED).is_empty());
}

#[tokio::test]
async fn test_caller_id_reaches_handler_and_timer() {
    let (loggers, sink) = capture_logs();
    let caller = Uuid::new_v4();

    let service = ServiceBuilder::new()
        .map_request(move |mut req: Request<Body>| {
            req.extensions_mut().insert(CallerId(caller));
            req
        })
        .layer(RequestLoggingLayer::new(&loggers))
        .service(service_fn(|_req: Request<Body>| async {
            let user = AmbientUser.current_user_id();
            Ok::<_, Infallible>(Response::new(Body::from(user.to_string())))
        }));

    let response = service
        .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, caller.to_string());

    let completed = sink.with_template("Operation {OperationName} completed in {ElapsedMilliseconds}ms");
    assert_eq!(completed[0].scope["UserId"], caller.to_string());
}

#[tokio::test]
async fn test_concurrent_requests_keep_their_own_ids() {
    let (loggers, _sink) = capture_logs();
    let service = ServiceBuilder::new()
        .layer(RequestLoggingLayer::new(&loggers))
        .service(service_fn(|_req: Request<Body>| async {
            tokio::task::yield_now().await;
            echo_correlation(_req).await
        }));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let id = format!("req-{i}");
                let response = service
                    .oneshot(
                        Request::builder()
                            .uri("/")
                            .header("x-correlation-id", id.as_str())
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                (id, body_text(response).await)
            })
        })
        .collect();

    for handle in handles {
        let (sent, seen) = handle.await.unwrap();
        assert_eq!(sent, seen);
    }
}
