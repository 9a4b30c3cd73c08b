//! Query pipeline: retrieval, worker pool, and per-request orchestration.

pub mod orchestrator;
pub mod pool;
pub mod retriever;

pub use orchestrator::{QueryOrchestrator, Stage};
pub use pool::{PoolSnapshot, QueueTicket, WorkerPool, WorkerSlot};
pub use retriever::ContextRetriever;
