//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use iot_sage::{MetricSample, TimeRange};
use iot_sage_server::config::ServerConfig;
use iot_sage_server::inference::{CompletionParams, InferenceEngine, ModelBackend};
use iot_sage_server::pipeline::QueryOrchestrator;
use iot_sage_server::store::{MemoryStore, MetricsStore, SampleFilter, StoreStats};
use iot_sage_server::types::{InferenceError, StoreError};

// ─────────────────────── time and samples ───────────────────────

/// Fixed "now" used for every intent in these tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Kitchen temperatures every ten minutes, the newest `newest_age` minutes before `anchor`.
fn kitchen_series(anchor: DateTime<Utc>, newest_age: i64, values: &[f64]) -> Vec<MetricSample> {
    let count = values.len() as i64;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let age = newest_age + 10 * (count - 1 - i as i64);
            let ts = anchor - chrono::Duration::minutes(age);
            MetricSample::new("device_003", "Kitchen", "temperature", *v, ts)
        })
        .collect()
}

/// A 55°C spike inside the one-hour window ending at `anchor`, with a calm
/// hour before it.
pub fn kitchen_store_at(anchor: DateTime<Utc>) -> MemoryStore {
    let mut samples = kitchen_series(anchor, 80, &[20.0, 21.0, 22.0, 23.0]);
    samples.extend(kitchen_series(anchor, 10, &[20.0, 21.0, 22.0, 55.0, 23.0]));
    MemoryStore::with_samples(samples)
}

pub fn kitchen_store() -> MemoryStore {
    kitchen_store_at(now())
}

// ─────────────────────── configuration ───────────────────────

/// Mock-mode configuration with an in-memory store.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.model.use_mock = true;
    config
}

pub fn orchestrator(
    config: ServerConfig,
    store: Arc<dyn MetricsStore>,
    engine: InferenceEngine,
) -> QueryOrchestrator {
    QueryOrchestrator::new(Arc::new(config), store, engine).expect("valid test config")
}

pub fn mock_orchestrator(store: Arc<dyn MetricsStore>) -> QueryOrchestrator {
    orchestrator(test_config(), store, InferenceEngine::mock_only())
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ─────────────────────── stores ───────────────────────

/// Store whose reads block until [`GatedStore::open`] is called.
pub struct GatedStore {
    inner: MemoryStore,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl MetricsStore for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    async fn find(&self, filter: &SampleFilter, range: &TimeRange) -> Result<Vec<MetricSample>, StoreError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        self.inner.find(filter, range).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }
}

/// Store that sleeps before every read.
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: MemoryStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl MetricsStore for SlowStore {
    fn name(&self) -> &str {
        "slow"
    }

    async fn find(&self, filter: &SampleFilter, range: &TimeRange) -> Result<Vec<MetricSample>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find(filter, range).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.stats().await
    }
}

/// Store that is always unreachable.
pub struct DownStore;

#[async_trait]
impl MetricsStore for DownStore {
    fn name(&self) -> &str {
        "down"
    }

    async fn find(&self, _: &SampleFilter, _: &TimeRange) -> Result<Vec<MetricSample>, StoreError> {
        Err(StoreError::Unreachable("connection refused".into()))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::Unreachable("connection refused".into()))
    }
}

// ─────────────────────── backends ───────────────────────

/// Backend that answers with fixed text after a delay.
pub struct ScriptedBackend {
    pub reply: String,
    pub delay: Duration,
}

impl ScriptedBackend {
    pub fn new(reply: &str, delay: Duration) -> Self {
        Self {
            reply: reply.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn max_concurrency(&self) -> usize {
        4
    }

    async fn complete(&self, _prompt: &str, _params: &CompletionParams) -> Result<String, InferenceError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

/// Backend whose every call fails.
pub struct BrokenBackend;

#[async_trait]
impl ModelBackend for BrokenBackend {
    fn name(&self) -> &str {
        "broken"
    }

    fn max_concurrency(&self) -> usize {
        1
    }

    async fn complete(&self, _prompt: &str, _params: &CompletionParams) -> Result<String, InferenceError> {
        Err(InferenceError::Backend("model crashed".into()))
    }

    async fn healthy(&self) -> bool {
        false
    }
}
