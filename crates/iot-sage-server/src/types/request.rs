//! Inbound request bodies.

use serde::{Deserialize, Serialize};

use super::error::QueryError;

/// Longest question accepted, in characters.
pub const MAX_QUERY_CHARS: usize = 2048;

/// Body of `POST /query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.query.trim().is_empty() {
            return Err(QueryError::InvalidRequest("query must not be empty".into()));
        }
        let len = self.query.chars().count();
        if len > MAX_QUERY_CHARS {
            return Err(QueryError::InvalidRequest(format!(
                "query is {len} characters, the limit is {MAX_QUERY_CHARS}"
            )));
        }
        if let Some(t) = self.temperature {
            if !t.is_finite() {
                return Err(QueryError::InvalidRequest("temperature must be a number".into()));
            }
        }
        Ok(())
    }
}
