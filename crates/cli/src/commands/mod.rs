pub mod ask;
pub mod config_cmd;
pub mod gateway;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use toolchat_agent::ConversationLoop;
use toolchat_config::AppConfig;
use toolchat_core::tool::ToolRegistry;
use tracing::{debug, info};

/// Load configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_path(path),
        None => AppConfig::load(),
    };
    let config = config.map_err(|e| format!("Failed to load config: {e}"))?;
    debug!(provider = %config.provider, model = %config.model, "Configuration loaded");
    Ok(config)
}

/// Build the tool registry the model will see.
pub fn build_tools(config: &AppConfig) -> Result<ToolRegistry, Box<dyn std::error::Error>> {
    let embedder = toolchat_providers::build_embedder_from_config(config);
    let registry = toolchat_tools::default_registry(config, embedder)?;
    debug!(tools = ?registry.names(), "Tool registry built");
    Ok(registry)
}

/// Build the conversation loop, failing early with setup hints when no
/// credentials are configured.
pub fn build_agent(config: &AppConfig) -> Result<ConversationLoop, Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured for provider \"{}\"!", config.provider);
        eprintln!();
        eprintln!("  Set one of these environment variables (or put them in .env):");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!("    AZURE_OPENAI_API_KEY=... with TOOLCHAT_PROVIDER=azure");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = toolchat_providers::build_from_config(config)?;
    let tools = Arc::new(build_tools(config)?);
    info!(
        provider = %config.provider,
        model = %config.model,
        tools = tools.len(),
        max_rounds = config.agent.max_rounds,
        "Conversation loop ready"
    );
    Ok(ConversationLoop::from_config(provider, tools, config))
}
