//! IoT Sage server: answers questions about sensor readings with a local language model.

pub mod config;
pub mod inference;
pub mod pipeline;
pub mod repl;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{ConfigOverrides, ServerConfig};
pub use inference::InferenceEngine;
pub use pipeline::QueryOrchestrator;
pub use store::{MemoryStore, MetricsStore, RemoteMetricsStore};
pub use transport::HttpTransport;
