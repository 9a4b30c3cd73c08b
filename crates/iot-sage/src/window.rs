//! Context window construction: time filtering, ordering, and capping.

use crate::types::{ContextWindow, MetricBreakdown, MetricSample, TimeRange, WindowSummary};

impl ContextWindow {
    /// Build a window from raw store results.
    ///
    /// Samples outside `time_range` are discarded, the rest sorted ascending by
    /// timestamp, and only the `max_samples` most recent are kept.
    pub fn build(mut samples: Vec<MetricSample>, time_range: TimeRange, max_samples: usize) -> Self {
        let fetched = samples.len();
        samples.retain(|s| time_range.contains(s.timestamp));
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if samples.len() > max_samples {
            let excess = samples.len() - max_samples;
            samples.drain(..excess);
        }

        if samples.len() != fetched {
            tracing::debug!(
                fetched,
                kept = samples.len(),
                max_samples,
                "Trimmed context window"
            );
        }

        let summary = WindowSummary::from_samples(&samples);
        let breakdown = breakdown_by_metric(&samples);

        Self {
            samples,
            summary,
            breakdown,
            time_range,
            location_relaxed: false,
        }
    }

    pub fn empty(time_range: TimeRange) -> Self {
        Self::build(Vec::new(), time_range, 1)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    /// The `n` most recent samples, oldest first.
    pub fn recent(&self, n: usize) -> &[MetricSample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }

    /// Metric type shared by every sample, if there is exactly one.
    pub fn single_metric(&self) -> Option<&str> {
        let first = self.samples.first()?;
        self.samples
            .iter()
            .all(|s| s.metric_type.eq_ignore_ascii_case(&first.metric_type))
            .then_some(first.metric_type.as_str())
    }
}

/// Per-metric summaries in order of first appearance; empty for single-metric windows.
fn breakdown_by_metric(samples: &[MetricSample]) -> Vec<MetricBreakdown> {
    let mut metrics: Vec<&str> = Vec::new();
    for s in samples {
        if !metrics.iter().any(|m| m.eq_ignore_ascii_case(&s.metric_type)) {
            metrics.push(&s.metric_type);
        }
    }
    if metrics.len() < 2 {
        return Vec::new();
    }

    metrics
        .into_iter()
        .map(|metric| {
            let subset: Vec<MetricSample> = samples
                .iter()
                .filter(|s| s.metric_type.eq_ignore_ascii_case(metric))
                .cloned()
                .collect();
            MetricBreakdown {
                metric_type: metric.to_string(),
                summary: WindowSummary::from_samples(&subset),
            }
        })
        .collect()
}
