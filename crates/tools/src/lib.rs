//! Tool implementations for toolchat.
//!
//! Tools give the model access to live data: National Weather Service
//! alerts and forecasts, knowledge base search over OpenSearch, and
//! OData entity queries.

pub mod odata;
pub mod vector_search;
pub mod weather;

use std::sync::Arc;
use toolchat_config::AppConfig;
use toolchat_core::error::ToolError;
use toolchat_core::provider::Provider;
use toolchat_core::tool::ToolRegistry;
use tracing::{info, warn};

pub use odata::ODataTool;
pub use vector_search::VectorSearchTool;
pub use weather::{AlertsTool, ForecastTool, NwsClient};

/// Create the tool registry for a configuration.
///
/// Weather tools are always available. Knowledge base search needs a
/// `[vector_search]` endpoint and an embedding provider; OData needs a
/// `[odata]` base URL and token endpoint.
pub fn default_registry(
    config: &AppConfig,
    embedder: Option<Arc<dyn Provider>>,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();

    let nws = Arc::new(NwsClient::new(&config.weather));
    registry.register(Box::new(AlertsTool::new(nws.clone())))?;
    registry.register(Box::new(ForecastTool::new(nws)))?;

    match (&config.vector_search, embedder) {
        (Some(search), Some(embedder)) if !search.endpoint.is_empty() => {
            registry.register(Box::new(VectorSearchTool::new(search.clone(), embedder)))?;
        }
        (Some(_), None) => {
            warn!("vector_search is configured but no embedding provider is available; skipping");
        }
        _ => {}
    }

    if let Some(odata) = &config.odata {
        if !odata.base_url.is_empty() && !odata.token_endpoint.is_empty() {
            registry.register(Box::new(ODataTool::new(odata.clone())))?;
        } else {
            warn!("odata section needs base_url and token_endpoint; skipping");
        }
    }

    info!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}
