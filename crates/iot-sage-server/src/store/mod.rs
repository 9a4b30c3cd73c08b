//! Read-only access to persisted sensor readings.

pub mod memory;
pub mod remote;
pub mod simulator;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iot_sage::{MetricSample, TimeRange};

use crate::types::StoreError;

pub use memory::MemoryStore;
pub use remote::RemoteMetricsStore;
pub use simulator::Simulator;

/// Optional equality filters; `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFilter {
    pub location: Option<String>,
    pub metric_type: Option<String>,
    pub device_id: Option<String>,
}

impl SampleFilter {
    pub fn new(location: Option<String>, metric_type: Option<String>) -> Self {
        Self {
            location,
            metric_type,
            device_id: None,
        }
    }

    pub fn without_location(&self) -> Self {
        Self {
            location: None,
            ..self.clone()
        }
    }

    /// Case-insensitive match against one sample.
    pub fn matches(&self, sample: &MetricSample) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f.eq_ignore_ascii_case(value))
        }
        eq(&self.location, &sample.location)
            && eq(&self.metric_type, &sample.metric_type)
            && eq(&self.device_id, &sample.device_id)
    }
}

/// Aggregate store statistics for `/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_samples: usize,
    pub device_count: usize,
    pub location_count: usize,
    pub devices: Vec<String>,
    pub locations: Vec<String>,
    /// Sample count per metric type.
    pub metric_counts: BTreeMap<String, usize>,
    pub first_reading: Option<DateTime<Utc>>,
    pub last_reading: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<MetricSample>,
}

impl StoreStats {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a MetricSample>) -> Self {
        let mut devices = std::collections::BTreeSet::new();
        let mut locations = std::collections::BTreeSet::new();
        let mut stats = StoreStats::default();

        for s in samples {
            stats.total_samples += 1;
            devices.insert(s.device_id.clone());
            locations.insert(s.location.clone());
            *stats.metric_counts.entry(s.metric_type.clone()).or_insert(0) += 1;

            if stats.first_reading.map_or(true, |t| s.timestamp < t) {
                stats.first_reading = Some(s.timestamp);
            }
            if stats.last_reading.map_or(true, |t| s.timestamp >= t) {
                stats.last_reading = Some(s.timestamp);
                stats.latest = Some(s.clone());
            }
        }

        stats.device_count = devices.len();
        stats.location_count = locations.len();
        stats.devices = devices.into_iter().collect();
        stats.locations = locations.into_iter().collect();
        stats
    }
}

/// Query interface over persisted samples.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Short name for logs and `/status`.
    fn name(&self) -> &str;

    /// Samples matching `filter` within `range`, ascending by timestamp.
    async fn find(
        &self,
        filter: &SampleFilter,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
