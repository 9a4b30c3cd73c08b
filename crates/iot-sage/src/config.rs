//! Pipeline configuration: thresholds, budgets, and the query vocabulary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{SageError, SageResult};

/// Serde helpers for `Duration` as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// A canonical name and the phrases that refer to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl VocabularyEntry {
    pub fn new(canonical: &str, aliases: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Known locations and metric types the intent parser recognizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub locations: Vec<VocabularyEntry>,
    pub metric_types: Vec<VocabularyEntry>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            locations: vec![
                VocabularyEntry::new("Living Room", &["living room", "lounge"]),
                VocabularyEntry::new("Bedroom", &["bedroom"]),
                VocabularyEntry::new("Kitchen", &["kitchen"]),
                VocabularyEntry::new("Bathroom", &["bathroom"]),
                VocabularyEntry::new("Garden", &["garden", "outdoor", "outdoors", "outside"]),
            ],
            metric_types: vec![
                VocabularyEntry::new("temperature", &["temperature", "temp"]),
                VocabularyEntry::new("humidity", &["humidity", "humid"]),
            ],
        }
    }
}

/// Immutable settings for every pipeline stage, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on samples kept in a context window.
    pub max_samples: usize,
    /// Window used when the question names no duration.
    #[serde(with = "duration_secs")]
    pub default_window: Duration,
    /// Longest duration a question may ask for.
    #[serde(with = "duration_secs")]
    pub max_lookback: Duration,
    /// Outlier threshold in baseline standard deviations.
    pub sigma_threshold: f64,
    /// Outliers at or beyond this many sigma are mentioned for any task.
    pub severity_sigma: f64,
    pub min_baseline_samples: usize,
    /// Raw samples included in the prompt before truncation.
    pub prompt_samples: usize,
    pub token_budget: usize,
    pub chars_per_token: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub vocabulary: Vocabulary,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_samples: 500,
            default_window: Duration::from_secs(60 * 60),
            max_lookback: Duration::from_secs(30 * 24 * 60 * 60),
            sigma_threshold: 2.5,
            severity_sigma: 4.0,
            min_baseline_samples: 2,
            prompt_samples: 10,
            token_budget: 1024,
            chars_per_token: 3,
            max_tokens: 256,
            temperature: 0.7,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject values no stage can work with.
    pub fn validate(&self) -> SageResult<()> {
        if self.max_samples == 0 {
            return Err(SageError::InvalidConfig("max_samples must be > 0".into()));
        }
        if self.default_window.is_zero() {
            return Err(SageError::InvalidConfig("default_window must be > 0".into()));
        }
        if self.max_lookback < self.default_window {
            return Err(SageError::InvalidConfig(
                "max_lookback must be at least default_window".into(),
            ));
        }
        if !(self.sigma_threshold.is_finite() && self.sigma_threshold > 0.0) {
            return Err(SageError::InvalidConfig(format!(
                "sigma_threshold must be a positive number, got {}",
                self.sigma_threshold
            )));
        }
        if !(self.severity_sigma.is_finite() && self.severity_sigma > 0.0) {
            return Err(SageError::InvalidConfig(format!(
                "severity_sigma must be a positive number, got {}",
                self.severity_sigma
            )));
        }
        if self.min_baseline_samples < 2 {
            return Err(SageError::InvalidConfig(
                "min_baseline_samples must be at least 2".into(),
            ));
        }
        if self.token_budget == 0 {
            return Err(SageError::InvalidConfig("token_budget must be > 0".into()));
        }
        if self.chars_per_token == 0 {
            return Err(SageError::InvalidConfig("chars_per_token must be > 0".into()));
        }
        if self.max_tokens == 0 {
            return Err(SageError::InvalidConfig("max_tokens must be > 0".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SageError::InvalidConfig(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}
