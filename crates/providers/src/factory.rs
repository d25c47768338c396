//! Provider construction from configuration.

use std::sync::Arc;
use toolchat_config::AppConfig;
use toolchat_core::error::ProviderError;
use toolchat_core::provider::Provider;
use crate::openai_compat::{DEFAULT_AZURE_API_VERSION, OpenAiCompatProvider};

/// Build the chat provider selected by `config.provider`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config.provider.as_str() {
        "azure" => {
            let azure = &config.azure;
            let (Some(endpoint), Some(api_key), Some(deployment)) =
                (&azure.endpoint, &azure.api_key, &azure.deployment)
            else {
                return Err(ProviderError::NotConfigured(
                    "azure provider needs azure.endpoint, azure.api_key and azure.deployment".into(),
                ));
            };
            let api_version = azure
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.into());
            Ok(Arc::new(OpenAiCompatProvider::azure(
                endpoint,
                deployment,
                api_key.clone(),
                api_version,
            )))
        }
        "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                ProviderError::NotConfigured(
                    "No API key. Set OPENAI_API_KEY or api_key in config.toml".into(),
                )
            })?;
            let provider = match &config.api_url {
                Some(url) => OpenAiCompatProvider::new("openai", url.clone(), api_key),
                None => OpenAiCompatProvider::openai(api_key),
            };
            Ok(Arc::new(provider))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "Unknown provider '{other}'"
        ))),
    }
}

/// Build the provider used for query embeddings.
///
/// Prefers an Azure embeddings deployment, then falls back to the OpenAI
/// key. Returns `None` when neither is available.
pub fn build_embedder_from_config(config: &AppConfig) -> Option<Arc<dyn Provider>> {
    let azure = &config.azure;
    if azure.has_embeddings() {
        let endpoint = azure.endpoint.as_deref()?;
        let api_key = azure.api_key.clone()?;
        let deployment = azure
            .embeddings_deployment
            .as_deref()
            .or(azure.deployment.as_deref())?;
        let api_version = azure
            .embeddings_api_version
            .clone()
            .or_else(|| azure.api_version.clone())
            .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.into());
        return Some(Arc::new(OpenAiCompatProvider::azure(
            endpoint,
            deployment,
            api_key,
            api_version,
        )));
    }

    let api_key = config.api_key.clone()?;
    let provider = match &config.api_url {
        Some(url) => OpenAiCompatProvider::new("openai", url.clone(), api_key),
        None => OpenAiCompatProvider::openai(api_key),
    };
    Some(Arc::new(provider))
}
