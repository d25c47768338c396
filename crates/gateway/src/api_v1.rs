//! HTTP API v1: direct access to the tool registry.
//!
//! Endpoints:
//!
//! - `GET  /v1/tools`: List available tools
//! - `POST /v1/tools/call`: Execute one tool and return its text content

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use toolchat_core::error::ToolError;

use crate::SharedState;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router() -> Router<SharedState> {
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route("/tools/call", post(call_tool_handler))
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize, Deserialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct CallToolRequest {
    name: String,
    #[serde(default = "empty_arguments")]
    arguments: serde_json::Value,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

#[derive(Serialize, Deserialize)]
struct CallToolResponse {
    content: Vec<ContentBlock>,
    is_error: bool,
}

impl CallToolResponse {
    fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text".into(),
                text: text.into(),
            }],
            is_error,
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let defs = state.agent.tools().definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}

async fn call_tool_handler(
    State(state): State<SharedState>,
    Json(payload): Json<CallToolRequest>,
) -> (StatusCode, Json<CallToolResponse>) {
    info!(tool = %payload.name, "v1/tools/call request");

    let arguments = match payload.arguments {
        serde_json::Value::Null => empty_arguments(),
        other => other,
    };

    let call = state.agent.tools().execute(&payload.name, arguments);
    let outcome = match tokio::time::timeout(state.tool_timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ToolError::Timeout {
            tool_name: payload.name.clone(),
            timeout_secs: state.tool_timeout.as_secs(),
        }),
    };

    match outcome {
        Ok(result) => (
            StatusCode::OK,
            Json(CallToolResponse::text(result.output, !result.success)),
        ),
        Err(e @ ToolError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(CallToolResponse::text(e.to_string(), true)),
        ),
        Err(e) => {
            warn!(tool = %payload.name, error = %e, "Direct tool call failed");
            (StatusCode::OK, Json(CallToolResponse::text(e.to_string(), true)))
        }
    }
}
