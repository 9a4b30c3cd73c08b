//! Final answer assembly.

use crate::types::{AnomalyResult, ContextWindow, QueryIntent, QueryResponse, RawAnswer};

/// Attaches source metadata to raw inference output.
#[derive(Debug, Clone, Default)]
pub struct ResponseSynthesizer;

impl ResponseSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Build the response. Latency is filled in by the caller.
    pub fn finalize(
        &self,
        intent: &QueryIntent,
        window: &ContextWindow,
        anomalies: &AnomalyResult,
        raw: &RawAnswer,
    ) -> QueryResponse {
        let answer_text = if window.is_empty() {
            insufficient_data_message(intent)
        } else {
            raw.text.trim().to_string()
        };

        QueryResponse {
            answer_text,
            task: intent.task,
            latency_ms: 0,
            used_mock: raw.used_mock,
            sample_count: window.len(),
            outlier_count: anomalies.outliers.len(),
            location: intent.location.clone(),
            metric_type: intent.metric_type.clone(),
            time_range: window.time_range,
        }
    }
}

pub fn insufficient_data_message(intent: &QueryIntent) -> String {
    format!(
        "Insufficient data for {}/{} in the requested window.",
        intent.location.as_deref().unwrap_or("all locations"),
        intent.metric_type.as_deref().unwrap_or("all metrics")
    )
}
