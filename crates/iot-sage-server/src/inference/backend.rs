//! Model backend capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::InferenceError;

/// Stop sequences that end an answer before the model starts a new section.
pub const DEFAULT_STOP: &[&str] = &["\nUSER QUERY:", "\nSYSTEM:", "\nCONTEXT:"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl CompletionParams {
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            stop: DEFAULT_STOP.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A local language model runtime.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Completions the backend can run at once.
    fn max_concurrency(&self) -> usize;

    /// Complete `prompt`, returning only the generated text.
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String, InferenceError>;

    /// Whether the backend is ready to serve completions.
    async fn healthy(&self) -> bool {
        true
    }
}
