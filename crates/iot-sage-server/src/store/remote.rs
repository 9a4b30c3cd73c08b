//! Client for the metrics service HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use iot_sage::{MetricSample, TimeRange};

use super::{MetricsStore, SampleFilter, StoreStats};
use crate::types::StoreError;

/// Records requested per page.
const PAGE_SIZE: usize = 500;

/// The service stores and compares timestamps as naive UTC strings.
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<Record>>,
}

#[derive(Debug, Deserialize)]
struct Record {
    device_id: String,
    #[serde(default)]
    device_name: Option<String>,
    location: String,
    #[serde(alias = "metric_type")]
    r#type: String,
    value: f64,
    #[serde(default)]
    unit: Option<String>,
    timestamp: String,
}

impl Record {
    fn into_sample(self) -> Result<MetricSample, StoreError> {
        let timestamp = parse_timestamp(&self.timestamp).ok_or_else(|| {
            StoreError::InvalidResponse(format!("bad timestamp '{}'", self.timestamp))
        })?;
        Ok(MetricSample {
            device_id: self.device_id,
            device_name: self.device_name,
            location: self.location,
            metric_type: self.r#type,
            value: self.value,
            unit: self.unit,
            timestamp,
        })
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reads samples from `GET {base}/metrics`.
pub struct RemoteMetricsStore {
    base_url: String,
    client: Client,
    /// Most records read by one `find` or `stats` call.
    scan_limit: usize,
}

impl RemoteMetricsStore {
    pub fn new(base_url: &str, timeout: Duration, scan_limit: usize) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unreachable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            scan_limit: scan_limit.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_page(
        &self,
        filter: &SampleFilter,
        range: Option<&TimeRange>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("skip", skip.to_string()),
        ];
        if let Some(location) = &filter.location {
            query.push(("location", location.clone()));
        }
        if let Some(metric_type) = &filter.metric_type {
            query.push(("metric_type", metric_type.clone()));
        }
        if let Some(device_id) = &filter.device_id {
            query.push(("device_id", device_id.clone()));
        }
        if let Some(range) = range {
            query.push(("start_time", range.start.format(QUERY_TIME_FORMAT).to_string()));
            query.push(("end_time", range.end.format(QUERY_TIME_FORMAT).to_string()));
        }

        let url = format!("{}/metrics", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Unreachable(format!("GET {url} returned {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        if !envelope.success {
            return Err(StoreError::InvalidResponse(
                envelope.message.unwrap_or_else(|| "request was not successful".into()),
            ));
        }

        envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(Record::into_sample)
            .collect()
    }

    /// Newest-first pages until a short page or the scan limit.
    async fn scan(
        &self,
        filter: &SampleFilter,
        range: Option<&TimeRange>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        let mut samples = Vec::new();
        while samples.len() < self.scan_limit {
            let limit = PAGE_SIZE.min(self.scan_limit - samples.len());
            let page = self.fetch_page(filter, range, samples.len(), limit).await?;
            let short = page.len() < limit;
            samples.extend(page);
            if short {
                break;
            }
        }
        debug!(count = samples.len(), "Fetched samples from metrics service");
        samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(samples)
    }
}

#[async_trait]
impl MetricsStore for RemoteMetricsStore {
    fn name(&self) -> &str {
        "remote"
    }

    async fn find(
        &self,
        filter: &SampleFilter,
        range: &TimeRange,
    ) -> Result<Vec<MetricSample>, StoreError> {
        self.scan(filter, Some(range)).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let samples = self.scan(&SampleFilter::default(), None).await?;
        Ok(StoreStats::from_samples(samples.iter()))
    }
}
