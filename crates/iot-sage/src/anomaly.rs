//! Baseline statistics and sigma-threshold outlier detection.

use crate::config::PipelineConfig;
use crate::types::{AnomalyResult, BaselineSource, ContextWindow, MetricSample, Outlier};

/// Mean and population standard deviation of a baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl BaselineStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            stddev: variance.sqrt(),
            count: values.len(),
        })
    }
}

/// Flags samples whose distance from the baseline mean exceeds `k` sigma.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    threshold_sigma: f64,
    min_baseline_samples: usize,
}

impl AnomalyDetector {
    pub fn new(threshold_sigma: f64, min_baseline_samples: usize) -> Self {
        Self {
            threshold_sigma,
            min_baseline_samples: min_baseline_samples.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.sigma_threshold, config.min_baseline_samples)
    }

    pub fn threshold_sigma(&self) -> f64 {
        self.threshold_sigma
    }

    /// Detect outliers in `window`.
    ///
    /// Uses `baseline` (the preceding period) when it holds enough readings;
    /// otherwise the first half of the window becomes the baseline and only
    /// the second half is tested. Windows mixing metric types are analysed on
    /// the metric of the most recent sample.
    pub fn detect(&self, window: &ContextWindow, baseline: Option<&[MetricSample]>) -> AnomalyResult {
        let Some(focus) = window.latest().map(|s| s.metric_type.clone()) else {
            return AnomalyResult::none(self.threshold_sigma);
        };

        let candidates: Vec<&MetricSample> = window
            .samples
            .iter()
            .filter(|s| s.metric_type.eq_ignore_ascii_case(&focus))
            .collect();

        let preceding: Vec<f64> = baseline
            .unwrap_or_default()
            .iter()
            .filter(|s| s.metric_type.eq_ignore_ascii_case(&focus))
            .map(|s| s.value)
            .collect();

        let (source, base_values, tested) = if preceding.len() >= self.min_baseline_samples {
            (BaselineSource::Preceding, preceding, candidates)
        } else {
            let half = candidates.len() / 2;
            if half < self.min_baseline_samples {
                tracing::debug!(
                    samples = candidates.len(),
                    "Not enough data for an anomaly baseline"
                );
                let mut result = AnomalyResult::none(self.threshold_sigma);
                result.metric_type = Some(focus);
                return result;
            }
            tracing::debug!(
                baseline = half,
                "No preceding baseline, splitting the query window"
            );
            let base = candidates[..half].iter().map(|s| s.value).collect();
            (BaselineSource::Split, base, candidates[half..].to_vec())
        };

        let Some(stats) = BaselineStats::from_values(&base_values) else {
            return AnomalyResult::none(self.threshold_sigma);
        };

        // Flat baseline: nothing can be measured in sigma.
        let outliers = if stats.stddev > 0.0 {
            let limit = self.threshold_sigma * stats.stddev;
            tested
                .into_iter()
                .filter(|s| (s.value - stats.mean).abs() > limit)
                .map(|s| Outlier {
                    sample: s.clone(),
                    deviation_sigma: (s.value - stats.mean) / stats.stddev,
                })
                .collect()
        } else {
            Vec::new()
        };

        if !outliers.is_empty() {
            tracing::debug!(
                count = outliers.len(),
                mean = stats.mean,
                stddev = stats.stddev,
                "Detected outliers"
            );
        }

        AnomalyResult {
            baseline_mean: stats.mean,
            baseline_stddev: stats.stddev,
            baseline_count: stats.count,
            source,
            threshold_sigma: self.threshold_sigma,
            metric_type: Some(focus),
            outliers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeRange;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn temps(start_min: i64, values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                MetricSample::new("device_001", "Living Room", "temperature", *v, at(start_min + 5 * i as i64))
            })
            .collect()
    }

    fn window(values: &[f64]) -> ContextWindow {
        ContextWindow::build(temps(0, values), TimeRange::new(at(0), at(60)), 500)
    }

    #[test]
    fn test_spike_against_preceding_baseline() {
        // Baseline mean 21.5, population stddev 1.0.
        let baseline = temps(-60, &[20.5, 22.5, 20.5, 22.5, 20.5, 22.5]);
        let w = window(&[20.0, 21.0, 22.0, 55.0, 23.0]);

        let result = AnomalyDetector::new(2.5, 2).detect(&w, Some(baseline.as_slice()));

        assert_eq!(result.source, BaselineSource::Preceding);
        assert!((result.baseline_mean - 21.5).abs() < 1e-9);
        assert!((result.baseline_stddev - 1.0).abs() < 1e-9);
        assert_eq!(result.outliers.len(), 1);
        assert_eq!(result.outliers[0].sample.value, 55.0);
        assert!((result.outliers[0].deviation_sigma - 33.5).abs() < 1e-9);
    }

    #[test]
    fn test_flat_baseline_reports_nothing() {
        let baseline = temps(-60, &[21.0, 21.0, 21.0]);
        let w = window(&[21.0, 40.0, 21.0]);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, Some(baseline.as_slice()));
        assert_eq!(result.baseline_stddev, 0.0);
        assert!(result.outliers.is_empty());
    }

    #[test]
    fn test_split_fallback_tests_second_half() {
        let w = window(&[20.0, 22.0, 20.0, 22.0, 21.0, 35.0, 21.5, 20.5]);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, None);
        assert_eq!(result.source, BaselineSource::Split);
        assert_eq!(result.baseline_count, 4);
        assert_eq!(result.outliers.len(), 1);
        assert_eq!(result.outliers[0].sample.value, 35.0);
        assert!(result.outliers[0].deviation_sigma > 0.0);
    }

    #[test]
    fn test_empty_baseline_falls_back_to_split() {
        let w = window(&[20.0, 22.0, 20.0, 22.0, 21.0, 35.0]);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, Some(&[][..]));
        assert_eq!(result.source, BaselineSource::Split);
    }

    #[test]
    fn test_too_little_data() {
        let w = window(&[20.0, 90.0]);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, None);
        assert_eq!(result.source, BaselineSource::None);
        assert!(result.outliers.is_empty());
    }

    #[test]
    fn test_empty_window() {
        let w = ContextWindow::empty(TimeRange::new(at(0), at(60)));
        let result = AnomalyDetector::new(2.5, 2).detect(&w, None);
        assert!(result.outliers.is_empty());
        assert_eq!(result.metric_type, None);
    }

    #[test]
    fn test_outliers_in_timestamp_order_and_signed() {
        let baseline = temps(-60, &[20.5, 22.5, 20.5, 22.5]);
        let w = window(&[10.0, 21.0, 40.0]);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, Some(baseline.as_slice()));
        let devs: Vec<f64> = result.outliers.iter().map(|o| o.deviation_sigma).collect();
        assert_eq!(devs.len(), 2);
        assert!(devs[0] < 0.0 && devs[1] > 0.0);
        assert!(result.outliers[0].sample.timestamp < result.outliers[1].sample.timestamp);
    }

    #[test]
    fn test_mixed_window_uses_latest_metric() {
        let mut samples = temps(0, &[20.0, 21.0, 20.0, 21.0]);
        samples.push(MetricSample::new("device_001", "Living Room", "humidity", 50.0, at(1)));
        let w = ContextWindow::build(samples, TimeRange::new(at(0), at(60)), 500);
        let result = AnomalyDetector::new(2.5, 2).detect(&w, None);
        assert_eq!(result.metric_type.as_deref(), Some("temperature"));
    }
}
