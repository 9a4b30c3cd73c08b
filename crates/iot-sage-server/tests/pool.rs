//! Worker pool admission and error mapping.

use std::time::Duration;

use axum::http::StatusCode;

use iot_sage_server::pipeline::WorkerPool;
use iot_sage_server::types::{
    error_codes, ErrorBody, PoolError, QueryError, QueryRequest, StoreError, MAX_QUERY_CHARS,
};

#[tokio::test]
async fn test_two_workers_one_queue_slot_five_requests() {
    let pool = WorkerPool::new(2, 1);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    let queued = pool.try_admit().unwrap();
    let fourth = pool.try_admit();
    let fifth = pool.try_admit();

    assert!(matches!(fourth, Err(PoolError::CapacityExceeded { running: 2, queued: 1 })));
    assert!(matches!(fifth, Err(PoolError::CapacityExceeded { .. })));

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.running, 2);
    assert_eq!(snapshot.queued, 1);
    assert_eq!(snapshot.rejected, 2);

    // The queued request runs as soon as a worker frees up.
    let waiter = tokio::spawn(queued.wait());
    drop(first);
    let third = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let snapshot = pool.snapshot();
    assert_eq!(snapshot.running, 2);
    assert_eq!(snapshot.queued, 0);
    assert_eq!(snapshot.completed, 1);

    drop(second);
    drop(third);
    assert_eq!(pool.snapshot().running, 0);
    assert_eq!(pool.snapshot().completed, 3);
}

#[tokio::test]
async fn test_dropped_ticket_frees_queue_slot() {
    let pool = WorkerPool::new(1, 1);
    let _running = pool.acquire().await.unwrap();

    let ticket = pool.try_admit().unwrap();
    assert!(pool.try_admit().is_err());

    drop(ticket);
    assert_eq!(pool.snapshot().queued, 0);
    assert!(pool.try_admit().is_ok());
}

#[tokio::test]
async fn test_zero_queue_rejects_while_busy() {
    let pool = WorkerPool::new(1, 0);

    let slot = pool.acquire().await.unwrap();
    assert!(pool.try_admit().is_err());

    drop(slot);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn test_unbounded_queue_depth_does_not_overflow() {
    let pool = WorkerPool::new(2, usize::MAX);

    let _slot = pool.acquire().await.unwrap();
    let ticket = pool.try_admit().unwrap();
    assert_eq!(pool.snapshot().queued, 1);
    drop(ticket);
}

#[test]
fn test_error_codes_and_statuses() {
    let cases = [
        (
            QueryError::InvalidRequest("empty".into()),
            error_codes::INVALID_REQUEST,
            StatusCode::BAD_REQUEST,
            false,
        ),
        (
            QueryError::CapacityExceeded,
            error_codes::CAPACITY_EXCEEDED,
            StatusCode::TOO_MANY_REQUESTS,
            true,
        ),
        (
            QueryError::RetrievalUnavailable("down".into()),
            error_codes::RETRIEVAL_UNAVAILABLE,
            StatusCode::SERVICE_UNAVAILABLE,
            true,
        ),
        (
            QueryError::RequestTimeout(Duration::from_secs(60)),
            error_codes::REQUEST_TIMEOUT,
            StatusCode::GATEWAY_TIMEOUT,
            true,
        ),
        (
            QueryError::Internal("bug".into()),
            error_codes::INTERNAL,
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
        ),
    ];

    for (err, code, status, retryable) in cases {
        assert_eq!(err.code(), code);
        assert_eq!(err.status(), status);
        assert_eq!(err.retryable(), retryable, "{err}");

        let body = ErrorBody::from(&err);
        assert_eq!(body.error.code, code);
        assert_eq!(body.error.message, err.to_string());
    }
}

#[test]
fn test_lower_layer_errors_map_to_query_errors() {
    let capacity: QueryError = PoolError::CapacityExceeded { running: 2, queued: 1 }.into();
    assert!(matches!(capacity, QueryError::CapacityExceeded));

    let closed: QueryError = PoolError::Closed.into();
    assert!(matches!(closed, QueryError::Internal(_)));

    let store: QueryError = StoreError::Timeout(Duration::from_secs(5)).into();
    assert!(matches!(store, QueryError::RetrievalUnavailable(_)));
}

#[test]
fn test_request_validation() {
    assert!(QueryRequest::new("kitchen temperature").validate().is_ok());
    assert!(QueryRequest::new("").validate().is_err());
    assert!(QueryRequest::new("\n\t ").validate().is_err());
    assert!(QueryRequest::new("x".repeat(MAX_QUERY_CHARS)).validate().is_ok());
    assert!(QueryRequest::new("x".repeat(MAX_QUERY_CHARS + 1)).validate().is_err());

    let request = QueryRequest {
        temperature: Some(f32::NAN),
        ..QueryRequest::new("kitchen temperature")
    };
    assert!(request.validate().is_err());
}

#[test]
fn test_request_body_defaults() {
    let request: QueryRequest = serde_json::from_str(r#"{"query":"is it humid?"}"#).unwrap();
    assert_eq!(request.query, "is it humid?");
    assert_eq!(request.max_tokens, None);
    assert_eq!(request.temperature, None);
}
