//! Resolves an intent into a bounded context window.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use iot_sage::{ContextWindow, MetricSample, QueryIntent, TimeRange};

use crate::store::{MetricsStore, SampleFilter};
use crate::types::StoreError;

pub struct ContextRetriever {
    store: Arc<dyn MetricsStore>,
    max_samples: usize,
    store_timeout: Duration,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn MetricsStore>, max_samples: usize, store_timeout: Duration) -> Self {
        Self {
            store,
            max_samples,
            store_timeout,
        }
    }

    /// Fetch the window for `intent`.
    ///
    /// An empty result with a location filter is retried once without the
    /// location. Empty windows are not errors; only an unreachable or slow
    /// store is.
    pub async fn retrieve(&self, intent: &QueryIntent) -> Result<ContextWindow, StoreError> {
        let filter = SampleFilter::new(intent.location.clone(), intent.metric_type.clone());
        let samples = self.find(&filter, &intent.time_range).await?;

        if !samples.is_empty() || filter.location.is_none() {
            return Ok(ContextWindow::build(samples, intent.time_range, self.max_samples));
        }

        warn!(
            location = ?filter.location,
            metric_type = ?filter.metric_type,
            "No samples for location, retrying without it"
        );
        let relaxed = self.find(&filter.without_location(), &intent.time_range).await?;
        let mut window = ContextWindow::build(relaxed, intent.time_range, self.max_samples);
        window.location_relaxed = !window.is_empty();
        Ok(window)
    }

    /// Samples from the period of equal length right before the query window.
    ///
    /// Uses the same filters the window ended up with. Failures are logged and
    /// yield `None`, which sends anomaly detection to its in-window fallback.
    pub async fn baseline(&self, intent: &QueryIntent, window: &ContextWindow) -> Option<Vec<MetricSample>> {
        let mut filter = SampleFilter::new(intent.location.clone(), intent.metric_type.clone());
        if window.location_relaxed {
            filter = filter.without_location();
        }

        let query_start = window.time_range.start;
        let range = window.time_range.preceding();
        match self.find(&filter, &range).await {
            Ok(mut samples) => {
                // The boundary instant belongs to the query window.
                samples.retain(|s| range.contains(s.timestamp) && s.timestamp < query_start);
                debug!(count = samples.len(), "Fetched anomaly baseline");
                Some(samples)
            }
            Err(e) => {
                warn!(error = %e, "Baseline retrieval failed, falling back to in-window split");
                None
            }
        }
    }

    async fn find(&self, filter: &SampleFilter, range: &TimeRange) -> Result<Vec<MetricSample>, StoreError> {
        match tokio::time::timeout(self.store_timeout, self.store.find(filter, range)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        }
    }
}
