//! IoT Sage core query pipeline: intent parsing, context windows, anomaly detection,
//! token-budgeted prompts, and the deterministic mock responder.

pub mod anomaly;
pub mod config;
pub mod intent;
pub mod mock;
pub mod prompt;
pub mod synthesis;
pub mod types;
pub mod window;

pub use anomaly::{AnomalyDetector, BaselineStats};
pub use config::{PipelineConfig, Vocabulary, VocabularyEntry};
pub use intent::IntentParser;
pub use mock::MockResponder;
pub use prompt::{estimate_tokens, format_sample, PromptBuilder};
pub use synthesis::{insufficient_data_message, ResponseSynthesizer};
pub use types::*;
