//! Outbound response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iot_sage::{QueryResponse, Task};

use super::error::QueryError;
use crate::inference::InferenceSnapshot;
use crate::pipeline::PoolSnapshot;
use crate::store::StoreStats;

/// Body of a successful `POST /query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReply {
    pub answer: String,
    pub task: Task,
    pub latency_ms: u64,
    pub used_mock: bool,
    pub sample_count: usize,
    pub outlier_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub request_id: String,
    pub processed_at: DateTime<Utc>,
}

impl QueryReply {
    pub fn new(response: QueryResponse, request_id: impl Into<String>) -> Self {
        Self {
            answer: response.answer_text,
            task: response.task,
            latency_ms: response.latency_ms,
            used_mock: response.used_mock,
            sample_count: response.sample_count,
            outlier_count: response.outlier_count,
            location: response.location,
            metric_type: response.metric_type,
            window_start: response.time_range.start,
            window_end: response.time_range.end,
            request_id: request_id.into(),
            processed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// `{"error": {"code", "message", "retryable"}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

impl From<&QueryError> for ErrorBody {
    fn from(e: &QueryError) -> Self {
        Self {
            error: ErrorDetail {
                code: e.code().to_string(),
                message: e.to_string(),
                retryable: e.retryable(),
            },
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub backend: String,
    pub mock_mode: bool,
    pub store: StoreStats,
    pub pool: PoolSnapshot,
    pub inference: InferenceSnapshot,
}
