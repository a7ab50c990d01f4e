//! HTTP transport: SSE answer stream, direct retrieval and health

use axum::{
    BoxError, Json, Router,
    body::Body,
    error_handling::HandleErrorLayer,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::agent::{ToolAgent, prompt::system_prompt};
use crate::clients::{ChatModel, LanguageModel};
use crate::config::Config;
use crate::error::ChefBoostError;
use crate::retrieval::{RetrievalResult, Retriever, SimilarityRetriever, Strategy};
use crate::stream::{Frame, MultiplexerConfig, StreamMultiplexer};
use crate::tools::ToolRegistry;

/// Shared handles, built once at start-up
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recipes: Arc<Retriever>,
    pub books: Arc<SimilarityRetriever>,
    pub llm: Arc<dyn LanguageModel>,
    pub chat: Arc<dyn ChatModel>,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    #[serde(default)]
    pub strategy: Strategy,
    pub top_k: Option<usize>,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

fn sse_response(frames: BoxStream<'static, Frame>) -> Response {
    let body = Body::from_stream(frames.map(|f| Ok::<_, Infallible>(f.encode())));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// `GET /stream?query=...`: spinner, heartbeats, one answer frame, `[DONE]`.
pub async fn stream_handler(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("stream", %request_id);
    let query = params.query.trim().to_string();

    if query.is_empty() {
        span.in_scope(|| warn!("empty query received"));
        let frames = vec![Frame::error("Empty query"), Frame::Done];
        return sse_response(stream::iter(frames).boxed());
    }
    span.in_scope(|| info!(chars = query.len(), "stream request"));

    let capacity = state.config.stream.channel_capacity;
    let registry = ToolRegistry::for_request(
        state.recipes.clone(),
        state.books.clone(),
        state.llm.clone(),
        &state.config,
    );
    let agent = ToolAgent::new(
        state.chat.clone(),
        registry,
        system_prompt(chrono::Local::now().date_naive()),
        state.config.stream.max_agent_steps,
        state.config.timeouts().llm,
    );

    let cancel = CancellationToken::new();
    let source = agent.spawn(query.clone(), capacity, cancel.child_token());
    let mux = StreamMultiplexer::new(
        source,
        query,
        MultiplexerConfig::from_config(&state.config),
        cancel.clone(),
    );

    let (tx, rx) = mpsc::channel::<Frame>(capacity);
    tokio::spawn(
        async move {
            let outcome = mux.run(tx).await;
            cancel.cancel();
            debug!(?outcome, "multiplexer finished");
        }
        .instrument(span),
    );

    // Dropping the body (client gone) closes `rx`, which the multiplexer observes
    let frames = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|f| (f, rx)) });
    sse_response(frames.boxed())
}

pub struct ApiError(ChefBoostError);

impl From<ChefBoostError> for ApiError {
    fn from(err: ChefBoostError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChefBoostError::InvalidParams { .. } | ChefBoostError::Validation { .. } => {
                StatusCode::BAD_REQUEST
            }
            ChefBoostError::RetrievalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ChefBoostError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(json!({"error": {"code": status.as_u16(), "message": self.0.to_string()}})),
        )
            .into_response()
    }
}

/// `POST /retrieve`: run one strategy and return normalized results.
pub async fn retrieve_handler(
    State(state): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<Vec<RetrievalResult>>, ApiError> {
    let top_k = req.top_k.unwrap_or(state.config.retrieval.top_k);
    let results = state.recipes.retrieve(&req.query, req.strategy, top_k).await?;
    info!(strategy = %req.strategy, results = results.len(), "retrieve request served");
    Ok(Json(results))
}

async fn handle_timeout(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled internal error: {err}"),
        )
    }
}

pub fn router(state: AppState) -> Router {
    let request_timeout = Duration::from_millis(state.config.runtime.http_request_timeout_ms);
    Router::new()
        .route("/health", get(health_handler))
        .route("/stream", get(stream_handler))
        .route(
            "/retrieve",
            post(retrieve_handler).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_timeout))
                    .layer(TimeoutLayer::new(request_timeout)),
            ),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn start_http_server(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.runtime.http_bind;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    info!("Starting HTTP server on {}", bind);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
