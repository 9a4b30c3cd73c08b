//! HTTP transport for the query pipeline.

pub mod http;

pub use http::{router, HttpTransport};
