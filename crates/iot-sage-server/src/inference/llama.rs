//! llama.cpp `llama-server` backend.
//!
//! Either attaches to a running server or launches one as a child process
//! bound to a free local port. A launched server is killed when the backend
//! is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::backend::{CompletionParams, ModelBackend};
use crate::config::ModelConfig;
use crate::types::InferenceError;

const HEALTH_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    stop: &'a [String],
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

pub struct LlamaServerBackend {
    base_url: String,
    client: Client,
    slots: usize,
    _process: Option<Child>,
}

impl LlamaServerBackend {
    /// Use a server that is already running at `endpoint`.
    pub fn attach(endpoint: &str) -> Result<Self, InferenceError> {
        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_string(),
            client: http_client()?,
            slots: 1,
            _process: None,
        })
    }

    /// Launch `llama-server` for the configured model and wait until it is ready.
    pub async fn launch(config: &ModelConfig) -> Result<Self, InferenceError> {
        let model = config
            .model_path
            .clone()
            .ok_or_else(|| InferenceError::Launch("no model path configured".into()))?;
        let binary = resolve_binary(&config.server_binary)?;
        let port = free_port()?;
        let args = launch_args(config, &model, port);

        info!(binary = %binary.display(), model = %model.display(), port, "Launching llama-server");
        debug!(?args, "llama-server arguments");

        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InferenceError::Launch(format!("{}: {e}", binary.display())))?;

        let backend = Self {
            base_url: format!("http://127.0.0.1:{port}"),
            client: http_client()?,
            slots: 1,
            _process: None,
        };

        let deadline = Instant::now() + config.startup_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(InferenceError::Launch(format!(
                    "llama-server exited during startup ({status})"
                )));
            }
            if backend.healthy().await {
                break;
            }
            if Instant::now() >= deadline {
                return Err(InferenceError::Launch(format!(
                    "llama-server not ready after {:?}",
                    config.startup_timeout
                )));
            }
            tokio::time::sleep(HEALTH_POLL).await;
        }

        info!(url = %backend.base_url, "llama-server ready");
        Ok(Self {
            _process: Some(child),
            ..backend
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelBackend for LlamaServerBackend {
    fn name(&self) -> &str {
        "llama-server"
    }

    fn max_concurrency(&self) -> usize {
        self.slots
    }

    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String, InferenceError> {
        let url = format!("{}/completion", self.base_url);
        let body = CompletionRequest {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            stop: &params.stop,
            cache_prompt: true,
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::Backend(format!("{status}: {detail}")));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Backend(format!("invalid completion response: {e}")))?;
        Ok(completion.content)
    }

    async fn healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(
            self.client.get(&url).timeout(Duration::from_secs(2)).send().await,
            Ok(response) if response.status().is_success()
        )
    }
}

/// Command-line arguments for a launched `llama-server`.
pub fn launch_args(config: &ModelConfig, model: &std::path::Path, port: u16) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        model.display().to_string(),
        "--ctx-size".to_string(),
        config.context_size.to_string(),
        "--threads".to_string(),
        config.threads.to_string(),
        "--parallel".to_string(),
        "1".to_string(),
        "--host".to_string(),
        "127.0.0.1".to_string(),
        "--port".to_string(),
        port.to_string(),
    ];
    if let Some(layers) = config.gpu.gpu_layers() {
        args.push("--n-gpu-layers".to_string());
        args.push(layers.to_string());
    }
    args
}

fn resolve_binary(name: &str) -> Result<PathBuf, InferenceError> {
    which::which(name).map_err(|e| InferenceError::Launch(format!("cannot find '{name}': {e}")))
}

fn free_port() -> Result<u16, InferenceError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn http_client() -> Result<Client, InferenceError> {
    // Per-call deadlines come from the engine.
    Client::builder()
        .build()
        .map_err(|e| InferenceError::Backend(format!("failed to create HTTP client: {e}")))
}
