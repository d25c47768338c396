//! `toolchat config`: Configuration inspection commands.

use std::path::{Path, PathBuf};

use toolchat_config::AppConfig;

const REDACTED: &str = "***";

pub async fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Provider:       {}", config.provider);
    println!("   Model:          {}", config.model);
    println!("   Gateway:        {}:{}", config.gateway.host, config.gateway.port);
    println!("   Max rounds:     {}", config.agent.max_rounds);
    println!("   Vector search:  {}", enabled(config.vector_search.is_some()));
    println!("   OData:          {}", enabled(config.odata.is_some()));

    Ok(())
}

pub async fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", resolve_path(config_path).display());
    Ok(())
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

fn enabled(on: bool) -> &'static str {
    if on { "enabled" } else { "disabled" }
}

/// Problems that do not stop loading but will stop a query.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push(format!(
            "No API key set for provider \"{}\" (OPENAI_API_KEY or AZURE_OPENAI_API_KEY)",
            config.provider
        ));
    }
    if config.provider == "azure" && (config.azure.endpoint.is_none() || config.azure.deployment.is_none()) {
        warnings.push("Azure provider needs azure.endpoint and azure.deployment".into());
    }
    if let Some(search) = &config.vector_search {
        if search.endpoint.is_empty() {
            warnings.push("vector_search has no endpoint; the tool will be skipped".into());
        }
        if !config.azure.has_embeddings() && config.api_key.is_none() {
            warnings.push("vector_search needs an embeddings deployment or an OpenAI key".into());
        }
    }
    if let Some(odata) = &config.odata {
        if odata.base_url.is_empty() || odata.token_endpoint.is_empty() {
            warnings.push("odata needs base_url and token_endpoint; the tool will be skipped".into());
        }
    }

    warnings
}

/// A copy of the configuration that is safe to print.
fn redacted(mut config: AppConfig) -> AppConfig {
    let mask = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    };

    mask(&mut config.api_key);
    mask(&mut config.azure.api_key);
    if let Some(search) = config.vector_search.as_mut() {
        mask(&mut search.password);
    }
    if let Some(odata) = config.odata.as_mut() {
        mask(&mut odata.client_secret);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolchat_config::{ODataConfig, VectorSearchConfig};

    #[test]
    fn default_path_is_config_toml() {
        let path = resolve_path(None);
        assert!(path.ends_with(".toolchat/config.toml"));
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path(Some(Path::new("/etc/toolchat.toml")));
        assert_eq!(path, PathBuf::from("/etc/toolchat.toml"));
    }

    #[test]
    fn secrets_are_masked() {
        let mut config = AppConfig {
            api_key: Some("sk-live-123".into()),
            vector_search: Some(VectorSearchConfig {
                password: Some("hunter2".into()),
                ..VectorSearchConfig::default()
            }),
            odata: Some(ODataConfig {
                client_secret: Some("s3cret".into()),
                ..ODataConfig::default()
            }),
            ..AppConfig::default()
        };
        config.azure.api_key = Some("azure-key".into());

        let printed = toml::to_string_pretty(&redacted(config)).unwrap();
        for secret in ["sk-live-123", "hunter2", "s3cret", "azure-key"] {
            assert!(!printed.contains(secret), "{secret} leaked");
        }
        assert!(printed.contains(REDACTED));
    }

    #[test]
    fn missing_key_is_a_warning() {
        let found = warnings(&AppConfig::default());
        assert_eq!(found.len(), 1);
        assert!(found[0].contains("No API key"));
    }
}
