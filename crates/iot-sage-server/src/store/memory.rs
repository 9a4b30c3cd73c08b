//! In-process metrics store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use iot_sage::{MetricSample, TimeRange};

use super::{MetricsStore, SampleFilter, StoreStats};
use crate::types::StoreError;

/// Samples held in memory, kept sorted by timestamp.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: RwLock<Vec<MetricSample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(mut samples: Vec<MetricSample>) -> Self {
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self {
            samples: RwLock::new(samples),
        }
    }

    pub async fn insert(&self, sample: MetricSample) {
        let mut samples = self.samples.write().await;
        let pos = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(pos, sample);
    }

    pub async fn extend(&self, batch: Vec<MetricSample>) {
        let mut samples = self.samples.write().await;
        samples.extend(batch);
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(
        &self,
        filter: &SampleFilter,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let samples = self.samples.read().await;
        let start = samples.partition_point(|s| s.timestamp < range.start);
        Ok(samples[start..]
            .iter()
            .take_while(|s| s.timestamp <= range.end)
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let samples = self.samples.read().await;
        Ok(StoreStats::from_samples(samples.iter()))
    }
}
