//! `toolchat tools`: List the tools the model can call.

use std::path::Path;

use toolchat_core::tool::ToolRegistry;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let registry = super::build_tools(&config)?;
    print!("{}", render(&registry));
    Ok(())
}

fn render(registry: &ToolRegistry) -> String {
    let mut out = format!("Available tools ({}):\n", registry.len());
    for def in registry.definitions() {
        out.push_str(&format!("  {:<24} {}\n", def.name, def.description));
    }
    out
}
