//! HTTP gateway for toolchat.
//!
//! Exposes the chatbot endpoint used by the embedded chat page, a health
//! check, and the v1 tool API for listing and calling tools directly.
//!
//! Built on Axum. Every request gets its own conversation; the loop,
//! provider and tool registry are shared read-only behind `Arc`.

pub mod api_v1;
pub mod frontend;

use axum::extract::DefaultBodyLimit;
use axum::extract::rejection::JsonRejection;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use toolchat_agent::ConversationLoop;
use toolchat_config::AppConfig;

/// Request bodies above this size are rejected.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<ConversationLoop>,

    /// Deadline for direct tool calls through `/v1/tools/call`
    pub tool_timeout: Duration,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(agent: Arc<ConversationLoop>, tool_timeout: Duration) -> SharedState {
        Arc::new(Self { agent, tool_timeout })
    }
}

/// Build the full router.
///
/// Layers applied:
/// - permissive CORS, so the chat page can be served from anywhere
/// - request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chatbot", post(chatbot_handler))
        .nest("/v1", api_v1::v1_router())
        .with_state(state)
        .merge(frontend::frontend_router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the provider, the embedding provider and the tool registry once
/// and shares them between all requests.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = toolchat_providers::build_from_config(&config)?;
    let embedder = toolchat_providers::build_embedder_from_config(&config);
    let tools = Arc::new(toolchat_tools::default_registry(&config, embedder)?);
    let agent = Arc::new(ConversationLoop::from_config(provider, tools, &config));
    let state = GatewayState::new(agent, Duration::from_secs(config.agent.tool_timeout_secs));

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize, Deserialize)]
struct ChatbotResponse {
    response: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> HandlerError {
    (status, Json(ErrorResponse { error: message.into() }))
}

async fn chatbot_handler(
    State(state): State<SharedState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<ChatbotResponse>, HandlerError> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return Err(error_response(rejection.status(), rejection.body_text()));
        }
        Err(_) => serde_json::Value::Null,
    };

    let query = body
        .get("query")
        .and_then(serde_json::Value::as_str)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Invalid or missing query parameter"))?;

    info!(query_len = query.len(), "Chatbot query received");

    match state.agent.ask(query).await {
        Ok(response) => Ok(Json(ChatbotResponse { response })),
        Err(e) => {
            error!(error = %e, "Failed to process chatbot query");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process query"))
        }
    }
}
