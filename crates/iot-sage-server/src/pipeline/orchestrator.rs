//! Per-request sequencing of the query pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use iot_sage::{
    AnomalyDetector, IntentParser, PromptBuilder, QueryResponse, ResponseSynthesizer,
};

use super::pool::WorkerPool;
use super::retriever::ContextRetriever;
use crate::config::{ServerConfig, StoreConfig, MAX_TOKENS_LIMIT};
use crate::inference::{InferenceEngine, InferenceParams};
use crate::store::{simulator, MetricsStore, RemoteMetricsStore};
use crate::types::{ConfigError, QueryError, QueryReply, QueryRequest, QueryResult, StatusReport};

/// Pipeline stages in execution order. A retrieval failure jumps straight
/// to `Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Parsed,
    ContextFetched,
    AnomalyChecked,
    PromptBuilt,
    Inferred,
    Finalized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Received => "received",
            Stage::Parsed => "parsed",
            Stage::ContextFetched => "context_fetched",
            Stage::AnomalyChecked => "anomaly_checked",
            Stage::PromptBuilt => "prompt_built",
            Stage::Inferred => "inferred",
            Stage::Finalized => "finalized",
        })
    }
}

pub struct QueryOrchestrator {
    config: Arc<ServerConfig>,
    store: Arc<dyn MetricsStore>,
    parser: IntentParser,
    retriever: ContextRetriever,
    detector: AnomalyDetector,
    builder: PromptBuilder,
    engine: Arc<InferenceEngine>,
    synthesizer: ResponseSynthesizer,
    pool: WorkerPool,
    feed: Option<JoinHandle<()>>,
}

impl QueryOrchestrator {
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<dyn MetricsStore>,
        engine: InferenceEngine,
    ) -> Result<Self, ConfigError> {
        let pipeline = &config.pipeline;
        Ok(Self {
            parser: IntentParser::from_config(pipeline)?,
            retriever: ContextRetriever::new(store.clone(), pipeline.max_samples, config.store_timeout),
            detector: AnomalyDetector::from_config(pipeline),
            builder: PromptBuilder::from_config(pipeline),
            engine: Arc::new(engine),
            synthesizer: ResponseSynthesizer::new(),
            pool: WorkerPool::new(config.workers, config.queue_depth),
            store,
            config,
            feed: None,
        })
    }

    /// Build the store and inference engine described by `config`.
    ///
    /// With `live_feed`, the simulated store keeps receiving readings until
    /// the orchestrator is dropped.
    pub async fn bootstrap(config: ServerConfig, live_feed: bool) -> Result<Self, ConfigError> {
        let config = Arc::new(config);

        let mut feed = None;
        let store: Arc<dyn MetricsStore> = match &config.store {
            StoreConfig::Memory(sim) => {
                let store = Arc::new(simulator::seeded_store(sim));
                if live_feed {
                    feed = Some(tokio::spawn(simulator::run_feed(store.clone(), sim.clone())));
                }
                store
            }
            StoreConfig::Remote {
                url,
                stats_scan_limit,
            } => {
                info!(url = %url, "Using remote metrics service");
                let store = RemoteMetricsStore::new(url, config.store_timeout, *stats_scan_limit)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Arc::new(store)
            }
        };

        let engine = InferenceEngine::from_config(&config.model, config.workers).await;
        info!(
            backend = engine.backend_name(),
            store = store.name(),
            workers = config.workers,
            queue_depth = config.queue_depth,
            "Query pipeline ready"
        );

        let mut orchestrator = Self::new(config, store, engine)?;
        orchestrator.feed = feed;
        Ok(orchestrator)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Answer one question under the pool and the request timeout.
    pub async fn handle(&self, request: QueryRequest) -> QueryResult<QueryReply> {
        self.handle_at(request, Utc::now()).await
    }

    /// Like [`handle`](Self::handle) with an explicit "now" for the intent window.
    pub async fn handle_at(&self, request: QueryRequest, now: DateTime<Utc>) -> QueryResult<QueryReply> {
        let request_id = uuid::Uuid::new_v4().to_string();
        request.validate()?;

        let ticket = self.pool.try_admit().map_err(|e| {
            warn!(request_id = %request_id, error = %e, "Rejected query");
            e
        })?;

        let started = Instant::now();
        let run = async {
            let _slot = ticket.wait().await?;
            self.run_pipeline(&request, now, &request_id).await
        };

        let response = tokio::time::timeout(self.config.request_timeout, run)
            .await
            .map_err(|_| {
                warn!(request_id = %request_id, "Query exceeded the request timeout");
                QueryError::RequestTimeout(self.config.request_timeout)
            })??;

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            request_id = %request_id,
            task = %response.task,
            samples = response.sample_count,
            used_mock = response.used_mock,
            latency_ms,
            "Answered query"
        );
        Ok(QueryReply::new(response.with_latency(latency_ms), request_id))
    }

    async fn run_pipeline(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
        request_id: &str,
    ) -> QueryResult<QueryResponse> {
        trace_stage(request_id, Stage::Received);

        let intent = self.parser.parse_at(&request.query, now);
        trace_stage(request_id, Stage::Parsed);

        let window = match self.retriever.retrieve(&intent).await {
            Ok(window) => window,
            Err(e) => {
                warn!(request_id, error = %e, "Context retrieval failed");
                trace_stage(request_id, Stage::Finalized);
                return Err(e.into());
            }
        };
        trace_stage(request_id, Stage::ContextFetched);

        let baseline = if window.is_empty() {
            None
        } else {
            self.retriever.baseline(&intent, &window).await
        };
        let anomalies = self.detector.detect(&window, baseline.as_deref());
        trace_stage(request_id, Stage::AnomalyChecked);

        let prompt = self
            .builder
            .build(&intent, &window, &anomalies, self.config.pipeline.token_budget);
        trace_stage(request_id, Stage::PromptBuilt);

        // Nothing to ground a model on; the template answer is final.
        let raw = if window.is_empty() {
            self.engine.respond_mock(&prompt)
        } else {
            let params = self.inference_params(request);
            let outcome = self.engine.infer(&prompt, &params).await;
            if let Some(reason) = outcome.fallback {
                debug!(request_id, ?reason, "Answered with mock fallback");
            }
            outcome.answer
        };
        trace_stage(request_id, Stage::Inferred);

        let response = self.synthesizer.finalize(&intent, &window, &anomalies, &raw);
        trace_stage(request_id, Stage::Finalized);
        Ok(response)
    }

    fn inference_params(&self, request: &QueryRequest) -> InferenceParams {
        let pipeline = &self.config.pipeline;
        InferenceParams {
            max_tokens: request
                .max_tokens
                .unwrap_or(pipeline.max_tokens)
                .clamp(1, MAX_TOKENS_LIMIT),
            temperature: request
                .temperature
                .unwrap_or(pipeline.temperature)
                .clamp(0.0, 2.0),
            timeout: self.config.inference_timeout,
        }
    }

    /// Store statistics plus pool and inference counters.
    pub async fn status(&self) -> QueryResult<StatusReport> {
        let stats = tokio::time::timeout(self.config.store_timeout, self.store.stats())
            .await
            .map_err(|_| QueryError::RetrievalUnavailable("store statistics timed out".into()))??;

        Ok(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: self.engine.backend_name().to_string(),
            mock_mode: self.engine.is_mock(),
            store: stats,
            pool: self.pool.snapshot(),
            inference: self.engine.snapshot(),
        })
    }

    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })
    }
}

impl Drop for QueryOrchestrator {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

fn trace_stage(request_id: &str, stage: Stage) {
    debug!(request_id, stage = %stage, "Pipeline stage");
}
