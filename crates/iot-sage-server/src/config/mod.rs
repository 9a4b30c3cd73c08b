//! Configuration loading and resolution.
//!
//! Every field resolves as: explicit CLI flag, then environment variable,
//! then built-in default. The result is validated once at startup and then
//! shared read-only.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use iot_sage::config::duration_secs;
use iot_sage::PipelineConfig;

use crate::types::ConfigError;

/// Model files smaller than this are treated as placeholders.
pub const MIN_MODEL_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8081";

/// Upper clamp for completion length.
pub const MAX_TOKENS_LIMIT: u32 = 2048;

/// Upper bounds for the worker pool.
pub const MAX_WORKERS: usize = 1024;
pub const MAX_QUEUE_DEPTH: usize = 65_536;

/// Environment lookup, injectable for tests.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// GPU offload policy for the local model runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GpuMode {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "true")]
    On,
    #[serde(rename = "false")]
    Off,
}

impl GpuMode {
    /// Layers to offload, or `None` to let the runtime decide.
    pub fn gpu_layers(&self) -> Option<u32> {
        match self {
            GpuMode::Auto => None,
            GpuMode::On => Some(999),
            GpuMode::Off => Some(0),
        }
    }
}

impl FromStr for GpuMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(GpuMode::Auto),
            "true" | "1" | "yes" | "on" | "gpu" => Ok(GpuMode::On),
            "false" | "0" | "no" | "off" | "cpu" => Ok(GpuMode::Off),
            other => Err(format!("expected auto, true or false, got '{other}'")),
        }
    }
}

impl std::fmt::Display for GpuMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GpuMode::Auto => "auto",
            GpuMode::On => "true",
            GpuMode::Off => "false",
        })
    }
}

/// Local model runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: Option<PathBuf>,
    pub context_size: u32,
    pub threads: u32,
    pub gpu: GpuMode,
    /// Skip the model entirely and answer from templates.
    pub use_mock: bool,
    /// Attach to an already running llama-server instead of launching one.
    pub endpoint: Option<String>,
    /// llama-server executable name or path.
    pub server_binary: String,
    #[serde(with = "duration_secs")]
    pub startup_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            context_size: 2048,
            threads: 4,
            gpu: GpuMode::Auto,
            use_mock: false,
            endpoint: None,
            server_binary: "llama-server".to_string(),
            startup_timeout: Duration::from_secs(120),
        }
    }
}

/// Seed data for the in-memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub seed: u64,
    /// How far back the generated history reaches.
    #[serde(with = "duration_secs")]
    pub history: Duration,
    /// Spacing between readings of one device.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Probability that a temperature reading is replaced by a spike.
    pub spike_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            history: Duration::from_secs(24 * 60 * 60),
            interval: Duration::from_secs(5 * 60),
            spike_rate: 0.005,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-process store seeded by the simulator.
    Memory(SimulatorConfig),
    /// The metrics service HTTP API.
    Remote { url: String, stats_scan_limit: usize },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory(SimulatorConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub pipeline: PipelineConfig,
    pub workers: usize,
    pub queue_depth: usize,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub store_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub inference_timeout: Duration,
    pub store: StoreConfig,
    pub model: ModelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let model = ModelConfig::default();
        let mut pipeline = PipelineConfig::default();
        pipeline.token_budget = default_token_budget(model.context_size, pipeline.max_tokens);
        Self {
            pipeline,
            workers: 2,
            queue_depth: 4,
            request_timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
            inference_timeout: Duration::from_secs(30),
            store: StoreConfig::default(),
            model,
        }
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigOverrides {
    /// Path to the GGUF model file [env: MODEL_PATH].
    #[arg(long, global = true)]
    pub model_path: Option<PathBuf>,

    /// Answer from templates without loading a model [env: USE_MOCK_LLM].
    #[arg(long, global = true)]
    pub mock: bool,

    /// GPU offload: auto, true or false [env: USE_GPU].
    #[arg(long, global = true)]
    pub gpu: Option<GpuMode>,

    /// URL of a running llama-server to attach to.
    #[arg(long, global = true)]
    pub llama_endpoint: Option<String>,

    /// llama-server executable to launch.
    #[arg(long, global = true)]
    pub llama_server: Option<String>,

    /// Model context window in tokens.
    #[arg(long, global = true)]
    pub context_size: Option<u32>,

    /// CPU threads for the model runtime.
    #[arg(long, global = true)]
    pub threads: Option<u32>,

    /// Concurrent pipeline executions.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Requests allowed to wait for a worker.
    #[arg(long, global = true)]
    pub queue_depth: Option<usize>,

    /// Whole-request timeout in seconds.
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,

    /// Metrics store call timeout in seconds.
    #[arg(long, global = true)]
    pub store_timeout: Option<u64>,

    /// Inference timeout in seconds.
    #[arg(long, global = true)]
    pub inference_timeout: Option<u64>,

    /// Maximum samples in a context window.
    #[arg(long, global = true)]
    pub max_samples: Option<usize>,

    /// Outlier threshold in standard deviations.
    #[arg(long, global = true)]
    pub sigma: Option<f64>,

    /// Prompt token budget (default: context size minus max tokens).
    #[arg(long, global = true)]
    pub token_budget: Option<usize>,

    /// Completion length limit.
    #[arg(long, global = true)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Metrics service base URL; uses the simulated in-memory store when unset [env: METRICS_SERVICE_URL].
    #[arg(long, global = true)]
    pub metrics_url: Option<String>,

    /// Simulator seed for the in-memory store.
    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

impl ServerConfig {
    /// Resolve from CLI overrides and the process environment, then validate.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let config = Self::resolve(overrides, &|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve every field without validating.
    pub fn resolve(overrides: &ConfigOverrides, env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = ServerConfig::default();
        let o = overrides;

        let model = ModelConfig {
            model_path: resolve_model_path(o.model_path.as_deref(), env),
            context_size: resolve_parsed(
                o.context_size,
                &["IOT_SAGE_CONTEXT_SIZE"],
                env,
                defaults.model.context_size,
            )?,
            threads: resolve_parsed(o.threads, &["IOT_SAGE_THREADS"], env, defaults.model.threads)?,
            gpu: resolve_parsed(o.gpu, &["USE_GPU", "IOT_SAGE_GPU"], env, defaults.model.gpu)?,
            use_mock: resolve_flag(o.mock, &["USE_MOCK_LLM", "IOT_SAGE_MOCK"], env)?,
            endpoint: resolve_string(o.llama_endpoint.clone(), &["IOT_SAGE_LLAMA_ENDPOINT"], env),
            server_binary: resolve_string(o.llama_server.clone(), &["IOT_SAGE_LLAMA_SERVER"], env)
                .unwrap_or(defaults.model.server_binary),
            startup_timeout: defaults.model.startup_timeout,
        };

        let mut pipeline = defaults.pipeline.clone();
        pipeline.max_samples =
            resolve_parsed(o.max_samples, &["IOT_SAGE_MAX_SAMPLES"], env, pipeline.max_samples)?;
        pipeline.sigma_threshold =
            resolve_parsed(o.sigma, &["IOT_SAGE_SIGMA"], env, pipeline.sigma_threshold)?;
        pipeline.max_tokens = resolve_parsed(
            o.max_tokens,
            &["IOT_SAGE_MAX_TOKENS"],
            env,
            pipeline.max_tokens,
        )?
        .clamp(1, MAX_TOKENS_LIMIT);
        pipeline.temperature = resolve_parsed(
            o.temperature,
            &["IOT_SAGE_TEMPERATURE"],
            env,
            pipeline.temperature,
        )?;
        if pipeline.temperature.is_finite() {
            pipeline.temperature = pipeline.temperature.clamp(0.0, 2.0);
        }
        pipeline.token_budget = resolve_parsed(
            o.token_budget,
            &["IOT_SAGE_TOKEN_BUDGET"],
            env,
            default_token_budget(model.context_size, pipeline.max_tokens),
        )?;

        let store = match resolve_string(
            o.metrics_url.clone(),
            &["METRICS_SERVICE_URL", "IOT_SAGE_METRICS_URL"],
            env,
        ) {
            Some(url) => StoreConfig::Remote {
                url: normalize_metrics_url(&url),
                stats_scan_limit: resolve_parsed(
                    None,
                    &["IOT_SAGE_STATS_SCAN_LIMIT"],
                    env,
                    1000,
                )?,
            },
            None => StoreConfig::Memory(SimulatorConfig {
                seed: resolve_parsed(o.seed, &["IOT_SAGE_SEED"], env, 42)?,
                ..SimulatorConfig::default()
            }),
        };

        Ok(Self {
            pipeline,
            workers: resolve_parsed(o.workers, &["IOT_SAGE_WORKERS"], env, defaults.workers)?,
            queue_depth: resolve_parsed(
                o.queue_depth,
                &["IOT_SAGE_QUEUE_DEPTH"],
                env,
                defaults.queue_depth,
            )?,
            request_timeout: resolve_secs(
                o.request_timeout,
                &["IOT_SAGE_REQUEST_TIMEOUT"],
                env,
                defaults.request_timeout,
            )?,
            store_timeout: resolve_secs(
                o.store_timeout,
                &["IOT_SAGE_STORE_TIMEOUT"],
                env,
                defaults.store_timeout,
            )?,
            inference_timeout: resolve_secs(
                o.inference_timeout,
                &["IOT_SAGE_INFERENCE_TIMEOUT"],
                env,
                defaults.inference_timeout,
            )?,
            store,
            model,
        })
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;

        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.workers > MAX_WORKERS {
            return Err(ConfigError::Invalid(format!("workers must be <= {MAX_WORKERS}")));
        }
        if self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "queue_depth must be <= {MAX_QUEUE_DEPTH}"
            )));
        }
        for (name, value) in [
            ("request_timeout", self.request_timeout),
            ("store_timeout", self.store_timeout),
            ("inference_timeout", self.inference_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be > 0")));
            }
        }
        if self.model.context_size == 0 {
            return Err(ConfigError::Invalid("context_size must be > 0".into()));
        }
        if let StoreConfig::Remote { url, .. } = &self.store {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    name: "METRICS_SERVICE_URL".into(),
                    value: url.clone(),
                });
            }
        }

        if self.model.use_mock || self.model.endpoint.is_some() {
            return Ok(());
        }
        let path = self
            .model
            .model_path
            .as_deref()
            .ok_or(ConfigError::MissingModelPath)?;
        check_model_file(path)
    }
}

/// The model file must exist and be at least [`MIN_MODEL_BYTES`].
pub fn check_model_file(path: &Path) -> Result<(), ConfigError> {
    let meta = std::fs::metadata(path).map_err(|_| ConfigError::ModelNotFound(path.to_path_buf()))?;
    if !meta.is_file() {
        return Err(ConfigError::ModelNotFound(path.to_path_buf()));
    }
    if meta.len() < MIN_MODEL_BYTES {
        return Err(ConfigError::ModelTooSmall {
            path: path.to_path_buf(),
            size: meta.len(),
            min: MIN_MODEL_BYTES,
        });
    }
    Ok(())
}

/// Resolve the model path: explicit flag, then `MODEL_PATH`, then `IOT_SAGE_MODEL_PATH`.
pub fn resolve_model_path(explicit: Option<&Path>, env: EnvLookup<'_>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    env_value(&["MODEL_PATH", "IOT_SAGE_MODEL_PATH"], env).map(|(_, v)| PathBuf::from(v))
}

/// Explicit value, else the first parseable environment variable, else the default.
pub fn resolve_parsed<T: FromStr>(
    explicit: Option<T>,
    names: &[&str],
    env: EnvLookup<'_>,
    default: T,
) -> Result<T, ConfigError> {
    if let Some(v) = explicit {
        return Ok(v);
    }
    match env_value(names, env) {
        Some((name, raw)) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        None => Ok(default),
    }
}

fn resolve_secs(
    explicit: Option<u64>,
    names: &[&str],
    env: EnvLookup<'_>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    resolve_parsed(explicit, names, env, default.as_secs()).map(Duration::from_secs)
}

fn resolve_string(explicit: Option<String>, names: &[&str], env: EnvLookup<'_>) -> Option<String> {
    explicit
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env_value(names, env).map(|(_, v)| v))
}

/// A set flag wins; otherwise the environment decides, defaulting to off.
fn resolve_flag(flag: bool, names: &[&str], env: EnvLookup<'_>) -> Result<bool, ConfigError> {
    if flag {
        return Ok(true);
    }
    match env_value(names, env) {
        Some((name, raw)) => parse_bool(&raw).ok_or(ConfigError::InvalidValue { name, value: raw }),
        None => Ok(false),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_value(names: &[&str], env: EnvLookup<'_>) -> Option<(String, String)> {
    names.iter().find_map(|name| {
        env(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (name.to_string(), v))
    })
}

fn default_token_budget(context_size: u32, max_tokens: u32) -> usize {
    context_size.saturating_sub(max_tokens) as usize
}

/// Accept both the service root and its `/metrics` endpoint.
fn normalize_metrics_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/metrics")
        .unwrap_or(trimmed)
        .to_string()
}
