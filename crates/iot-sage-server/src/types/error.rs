//! Error types and wire error codes for the query server.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;

/// Stable error codes carried in `{"error": {"code": ...}}` bodies.
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const CAPACITY_EXCEEDED: &str = "capacity_exceeded";
    pub const RETRIEVAL_UNAVAILABLE: &str = "retrieval_unavailable";
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    pub const INTERNAL: &str = "internal";
}

/// Failures talking to a metrics store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Metrics store unreachable: {0}")]
    Unreachable(String),

    #[error("Metrics store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Metrics store returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of a model backend. Never surfaced to callers; the engine
/// falls back to the mock responder instead.
#[derive(thiserror::Error, Debug)]
pub enum InferenceError {
    #[error("Model backend disabled")]
    Disabled,

    #[error("Inference did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Model returned an empty completion")]
    EmptyOutput,

    #[error("Failed to launch model server: {0}")]
    Launch(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Admission failures of the worker pool.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Capacity exceeded: {running} running, {queued} queued")]
    CapacityExceeded { running: usize, queued: usize },

    #[error("Worker pool closed")]
    Closed,
}

/// Startup misconfiguration. Fatal to process start.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Mock mode is disabled but no model path was given (set MODEL_PATH or --model-path)")]
    MissingModelPath,

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model file {path} is {size} bytes, expected at least {min} bytes")]
    ModelTooSmall { path: PathBuf, size: u64, min: u64 },

    #[error("Worker count must be at least 1")]
    ZeroWorkers,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Pipeline(#[from] iot_sage::SageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level errors returned to HTTP and CLI callers.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server is at capacity, retry shortly")]
    CapacityExceeded,

    #[error("Metrics store unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Request did not complete within {0:?}")]
    RequestTimeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            QueryError::InvalidRequest(_) => INVALID_REQUEST,
            QueryError::CapacityExceeded => CAPACITY_EXCEEDED,
            QueryError::RetrievalUnavailable(_) => RETRIEVAL_UNAVAILABLE,
            QueryError::RequestTimeout(_) => REQUEST_TIMEOUT,
            QueryError::Internal(_) => INTERNAL,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            QueryError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            QueryError::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::RequestTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            QueryError::CapacityExceeded
                | QueryError::RetrievalUnavailable(_)
                | QueryError::RequestTimeout(_)
        )
    }
}

impl From<PoolError> for QueryError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::CapacityExceeded { .. } => QueryError::CapacityExceeded,
            PoolError::Closed => QueryError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::RetrievalUnavailable(e.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

