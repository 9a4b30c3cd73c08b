//! HTTP server: `POST /query`, `GET /status`, `GET /health`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::pipeline::QueryOrchestrator;
use crate::types::{ErrorBody, QueryError, QueryReply, QueryRequest, StatusReport};

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), AxumJson(ErrorBody::from(&self))).into_response();
        if matches!(self, QueryError::CapacityExceeded) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Build the application router over a shared orchestrator.
pub fn router(orchestrator: Arc<QueryOrchestrator>) -> Router {
    Router::new()
        .route("/query", post(handle_query))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

pub struct HttpTransport {
    orchestrator: Arc<QueryOrchestrator>,
}

impl HttpTransport {
    pub fn new(orchestrator: Arc<QueryOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Serve until the process is stopped.
    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let app = router(self.orchestrator.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP transport listening on {addr}");
        axum::serve(listener, app).await
    }
}

async fn handle_query(
    State(orchestrator): State<Arc<QueryOrchestrator>>,
    body: Result<AxumJson<QueryRequest>, JsonRejection>,
) -> Result<AxumJson<QueryReply>, QueryError> {
    let AxumJson(request) = body.map_err(|e| QueryError::InvalidRequest(e.body_text()))?;
    orchestrator.handle(request).await.map(AxumJson)
}

async fn handle_status(
    State(orchestrator): State<Arc<QueryOrchestrator>>,
) -> Result<AxumJson<StatusReport>, QueryError> {
    orchestrator.status().await.map(AxumJson)
}

async fn handle_health(State(orchestrator): State<Arc<QueryOrchestrator>>) -> AxumJson<serde_json::Value> {
    AxumJson(orchestrator.health())
}
