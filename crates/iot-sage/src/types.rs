//! Core data types for sensor samples, query intents, and pipeline results.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single persisted sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub location: String,
    #[serde(alias = "type")]
    pub metric_type: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(
        device_id: impl Into<String>,
        location: impl Into<String>,
        metric_type: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: None,
            location: location.into(),
            metric_type: metric_type.into(),
            value,
            unit: None,
            timestamp,
        }
    }

    /// Display unit, preferring the well-known unit for the metric type.
    pub fn display_unit(&self) -> &str {
        match unit_for(&self.metric_type) {
            "" => self.unit.as_deref().unwrap_or(""),
            known => known,
        }
    }
}

/// Well-known display unit for a metric type, or `""` if unknown.
pub fn unit_for(metric_type: &str) -> &'static str {
    match metric_type.to_ascii_lowercase().as_str() {
        "temperature" => "°C",
        "humidity" => "%",
        _ => "",
    }
}

/// What the user is asking the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Lookup,
    Trend,
    Compare,
    Anomaly,
    Recommend,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Lookup => "lookup",
            Task::Trend => "trend",
            Task::Compare => "compare",
            Task::Anomaly => "anomaly",
            Task::Recommend => "recommend",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, swapping the bounds if they arrive reversed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// The range of length `length` that ends at `end`.
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        let start = end
            .checked_sub_signed(length)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// The range of equal length immediately preceding this one.
    pub fn preceding(&self) -> Self {
        Self::ending_at(self.start, self.length())
    }
}

/// Structured interpretation of a free-text question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub task: Task,
    pub location: Option<String>,
    pub metric_type: Option<String>,
    pub time_range: TimeRange,
    pub raw_text: String,
}

/// Compact statistics over a window. All values are zero when `count == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Value of the oldest reading.
    pub first: f64,
    /// Value of the most recent reading.
    pub latest: f64,
    pub latest_at: Option<DateTime<Utc>>,
}

impl WindowSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            first: 0.0,
            latest: 0.0,
            latest_at: None,
        }
    }

    /// Summarize samples that are already in ascending timestamp order.
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Self::empty();
        };

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0f64;
        for s in samples {
            min = min.min(s.value);
            max = max.max(s.value);
            sum += s.value;
        }

        Self {
            count: samples.len(),
            min,
            max,
            mean: sum / samples.len() as f64,
            first: first.value,
            latest: last.value,
            latest_at: Some(last.timestamp),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Per-metric statistics, present when a window mixes metric types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBreakdown {
    pub metric_type: String,
    pub summary: WindowSummary,
}

/// Bounded, time-ordered set of samples used as grounding evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    /// Ascending by timestamp, never longer than the configured cap.
    pub samples: Vec<MetricSample>,
    pub summary: WindowSummary,
    /// Empty unless the samples span more than one metric type.
    pub breakdown: Vec<MetricBreakdown>,
    pub time_range: TimeRange,
    /// True when the location filter was dropped to find any data.
    pub location_relaxed: bool,
}

/// A sample that deviates from the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub sample: MetricSample,
    /// Signed deviation in units of baseline standard deviation.
    pub deviation_sigma: f64,
}

/// Where the anomaly baseline came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Period of equal length immediately preceding the query window.
    Preceding,
    /// First half of the query window; only the second half is tested.
    Split,
    /// Not enough data for any baseline.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub baseline_count: usize,
    pub source: BaselineSource,
    pub threshold_sigma: f64,
    /// Metric type the detection ran on.
    pub metric_type: Option<String>,
    /// Ascending by timestamp.
    pub outliers: Vec<Outlier>,
}

impl AnomalyResult {
    pub fn none(threshold_sigma: f64) -> Self {
        Self {
            baseline_mean: 0.0,
            baseline_stddev: 0.0,
            baseline_count: 0,
            source: BaselineSource::None,
            threshold_sigma,
            metric_type: None,
            outliers: Vec::new(),
        }
    }

    pub fn has_outliers(&self) -> bool {
        !self.outliers.is_empty()
    }

    /// Largest absolute deviation among outliers, in sigma.
    pub fn max_severity(&self) -> f64 {
        self.outliers
            .iter()
            .map(|o| o.deviation_sigma.abs())
            .fold(0.0, f64::max)
    }

    /// The outlier with the largest absolute deviation (earliest wins ties).
    pub fn strongest(&self) -> Option<&Outlier> {
        self.outliers.iter().fold(None, |best: Option<&Outlier>, o| match best {
            Some(b) if b.deviation_sigma.abs() >= o.deviation_sigma.abs() => Some(b),
            _ => Some(o),
        })
    }
}

/// Structured grounding copied into the prompt for model-free answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptFacts {
    pub task: Task,
    pub location: Option<String>,
    pub metric_type: Option<String>,
    pub location_relaxed: bool,
    pub summary: WindowSummary,
    pub breakdown: Vec<MetricBreakdown>,
    /// Metric the summary describes when the window holds a single metric type.
    pub window_metric: Option<String>,
    pub outlier_count: usize,
    pub strongest_outlier: Option<Outlier>,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub threshold_sigma: f64,
}

/// A fully assembled, budget-checked prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub system_instruction: String,
    pub context_block: String,
    pub anomaly_block: Option<String>,
    /// The user's question, verbatim.
    pub question: String,
    pub token_budget: usize,
    pub estimated_tokens: usize,
    pub samples_included: usize,
    pub samples_dropped: usize,
    /// Set when even the minimal prompt exceeds the budget.
    pub over_budget: bool,
    pub facts: PromptFacts,
}

impl PromptSpec {
    /// Serialize the prompt into the text sent to the model.
    pub fn render(&self) -> String {
        render_sections(
            &self.system_instruction,
            &self.context_block,
            self.anomaly_block.as_deref(),
            &self.question,
        )
    }
}

pub(crate) fn render_sections(
    system_instruction: &str,
    context_block: &str,
    anomaly_block: Option<&str>,
    question: &str,
) -> String {
    let mut out = String::with_capacity(
        system_instruction.len() + context_block.len() + question.len() + 128,
    );
    out.push_str("SYSTEM:\n");
    out.push_str(system_instruction);
    out.push_str("\n\nCONTEXT:\n");
    out.push_str(context_block);
    if let Some(anomalies) = anomaly_block {
        out.push_str("\n\nANOMALIES:\n");
        out.push_str(anomalies);
    }
    out.push_str("\n\nUSER QUERY:\n");
    out.push_str(question);
    out.push_str("\n\nANSWER:\n");
    out
}

/// Raw text produced by the inference stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnswer {
    pub text: String,
    pub used_mock: bool,
}

/// Final answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub task: Task,
    pub latency_ms: u64,
    pub used_mock: bool,
    pub sample_count: usize,
    pub outlier_count: usize,
    pub location: Option<String>,
    pub metric_type: Option<String>,
    pub time_range: TimeRange,
}

impl QueryResponse {
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Errors that can occur in the core pipeline.
#[derive(thiserror::Error, Debug)]
pub enum SageError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// Convenience result type.
pub type SageResult<T> = Result<T, SageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn test_time_range_swaps_reversed_bounds() {
        let r = TimeRange::new(at(10), at(0));
        assert_eq!(r.start, at(0));
        assert_eq!(r.end, at(10));
    }

    #[test]
    fn test_preceding_range_has_equal_length() {
        let r = TimeRange::new(at(0), at(60));
        let p = r.preceding();
        assert_eq!(p.end, r.start);
        assert_eq!(p.length(), r.length());
    }

    #[test]
    fn test_summary_of_samples() {
        let samples: Vec<_> = [20.0, 24.0, 22.0]
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample::new("d1", "Kitchen", "temperature", *v, at(i as i64)))
            .collect();
        let s = WindowSummary::from_samples(&samples);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 20.0);
        assert_eq!(s.max, 24.0);
        assert!((s.mean - 22.0).abs() < 1e-9);
        assert_eq!(s.first, 20.0);
        assert_eq!(s.latest, 22.0);
        assert_eq!(s.latest_at, Some(at(2)));
    }

    #[test]
    fn test_summary_empty() {
        let s = WindowSummary::from_samples(&[]);
        assert!(s.is_empty());
        assert_eq!(s.latest_at, None);
    }

    #[test]
    fn test_sample_accepts_type_alias() {
        let json = r#"{"device_id":"device_003","device_name":"Kitchen Sensor","location":"Kitchen",
            "type":"humidity","value":61.5,"unit":"%","timestamp":"2024-03-01T12:00:00Z"}"#;
        let s: MetricSample = serde_json::from_str(json).unwrap();
        assert_eq!(s.metric_type, "humidity");
        assert_eq!(s.device_name.as_deref(), Some("Kitchen Sensor"));
        assert_eq!(s.display_unit(), "%");
    }

    #[test]
    fn test_strongest_outlier() {
        let mut result = AnomalyResult::none(2.5);
        for (i, dev) in [3.0, -7.5, 5.0].iter().enumerate() {
            result.outliers.push(Outlier {
                sample: MetricSample::new("d1", "Kitchen", "temperature", 0.0, at(i as i64)),
                deviation_sigma: *dev,
            });
        }
        assert_eq!(result.strongest().unwrap().deviation_sigma, -7.5);
        assert_eq!(result.max_severity(), 7.5);
    }
}
