//! Inference with bounded concurrency and deterministic fallback.
//!
//! The engine never returns an error: when the model backend is disabled,
//! slow, failing, or silent, the answer comes from [`MockResponder`] and the
//! outcome records why.

pub mod backend;
pub mod llama;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use iot_sage::{MockResponder, PromptSpec, RawAnswer};

pub use backend::{CompletionParams, ModelBackend};
pub use llama::LlamaServerBackend;

use crate::config::ModelConfig;
use crate::types::InferenceError;

/// Why an answer came from the mock responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Disabled,
    Timeout,
    BackendError,
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub answer: RawAnswer,
    pub fallback: Option<FallbackReason>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Covers waiting for a permit and the call itself.
    pub timeout: Duration,
}

/// Counters exposed on `/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceSnapshot {
    pub backend: String,
    pub permits: usize,
    pub model_answers: u64,
    pub mock_answers: u64,
    pub timeouts: u64,
    pub backend_errors: u64,
    pub empty_outputs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    model: AtomicU64,
    mock: AtomicU64,
    timeouts: AtomicU64,
    backend_errors: AtomicU64,
    empty_outputs: AtomicU64,
}

pub struct InferenceEngine {
    backend: Option<Arc<dyn ModelBackend>>,
    mock: MockResponder,
    permits: Arc<Semaphore>,
    width: usize,
    counters: Counters,
}

impl InferenceEngine {
    /// Engine over `backend`, running at most `min(workers, backend limit)` calls at once.
    pub fn new(backend: Arc<dyn ModelBackend>, workers: usize) -> Self {
        let width = workers.min(backend.max_concurrency()).max(1);
        Self {
            backend: Some(backend),
            mock: MockResponder::new(),
            permits: Arc::new(Semaphore::new(width)),
            width,
            counters: Counters::default(),
        }
    }

    /// Engine that always answers from templates.
    pub fn mock_only() -> Self {
        Self {
            backend: None,
            mock: MockResponder::new(),
            permits: Arc::new(Semaphore::new(1)),
            width: 0,
            counters: Counters::default(),
        }
    }

    /// Select a backend from configuration. Launch failures degrade to mock mode.
    pub async fn from_config(model: &ModelConfig, workers: usize) -> Self {
        if model.use_mock {
            debug!("Mock mode enabled, no model backend");
            return Self::mock_only();
        }

        let backend = match &model.endpoint {
            Some(endpoint) => LlamaServerBackend::attach(endpoint),
            None => LlamaServerBackend::launch(model).await,
        };
        match backend {
            Ok(backend) => Self::new(Arc::new(backend), workers),
            Err(e) => {
                warn!(error = %e, "Model backend unavailable, answering in mock mode");
                Self::mock_only()
            }
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.as_ref().map_or("mock", |b| b.name())
    }

    pub fn is_mock(&self) -> bool {
        self.backend.is_none()
    }

    pub async fn healthy(&self) -> bool {
        match &self.backend {
            Some(backend) => backend.healthy().await,
            None => true,
        }
    }

    pub async fn infer(&self, prompt: &PromptSpec, params: &InferenceParams) -> InferenceOutcome {
        let Some(backend) = &self.backend else {
            return self.fallback(prompt, FallbackReason::Disabled);
        };

        let completion = CompletionParams::new(params.max_tokens, params.temperature);
        let rendered = prompt.render();
        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| InferenceError::Backend("inference permits closed".into()))?;
            backend.complete(&rendered, &completion).await
        };

        let result = match tokio::time::timeout(params.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(params.timeout)),
        };

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.counters.model.fetch_add(1, Ordering::Relaxed);
                InferenceOutcome {
                    answer: RawAnswer {
                        text,
                        used_mock: false,
                    },
                    fallback: None,
                }
            }
            Ok(_) => {
                warn!(backend = backend.name(), "{}", InferenceError::EmptyOutput);
                self.fallback(prompt, FallbackReason::EmptyOutput)
            }
            Err(InferenceError::Timeout(limit)) => {
                warn!(backend = backend.name(), ?limit, "Inference timed out, using mock answer");
                self.fallback(prompt, FallbackReason::Timeout)
            }
            Err(e) => {
                warn!(backend = backend.name(), error = %e, "Inference failed, using mock answer");
                self.fallback(prompt, FallbackReason::BackendError)
            }
        }
    }

    /// Answer from templates without touching the backend.
    pub fn respond_mock(&self, prompt: &PromptSpec) -> RawAnswer {
        RawAnswer {
            text: self.mock.respond(prompt),
            used_mock: true,
        }
    }

    fn fallback(&self, prompt: &PromptSpec, reason: FallbackReason) -> InferenceOutcome {
        let counter = match reason {
            FallbackReason::Disabled => None,
            FallbackReason::Timeout => Some(&self.counters.timeouts),
            FallbackReason::BackendError => Some(&self.counters.backend_errors),
            FallbackReason::EmptyOutput => Some(&self.counters.empty_outputs),
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.mock.fetch_add(1, Ordering::Relaxed);

        InferenceOutcome {
            answer: self.respond_mock(prompt),
            fallback: Some(reason),
        }
    }

    pub fn snapshot(&self) -> InferenceSnapshot {
        InferenceSnapshot {
            backend: self.backend_name().to_string(),
            permits: self.width,
            model_answers: self.counters.model.load(Ordering::Relaxed),
            mock_answers: self.counters.mock.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            empty_outputs: self.counters.empty_outputs.load(Ordering::Relaxed),
        }
    }
}
