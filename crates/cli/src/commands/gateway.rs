//! `toolchat gateway`: Start the HTTP server.

use std::path::Path;

use tracing::info;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() {
        return Err(format!("No API key configured for provider \"{}\"", config.provider).into());
    }

    println!("toolchat gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.provider, config.model);

    toolchat_gateway::start(config).await?;

    info!("Gateway stopped");
    Ok(())
}
