//! Embedded chat page.
//!
//! The page is compiled into the binary using `include_str!`, so the
//! gateway ships as a single executable.

use axum::{Router, response::Html, routing::get};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Build a router that serves the chat page at `/`.
pub fn frontend_router() -> Router {
    Router::new().route("/", get(index_handler))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}
