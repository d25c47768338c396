//! Configuration loading, validation, and management for toolchat.
//!
//! Loads configuration from `~/.toolchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat backend: "openai" or "azure"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override for the OpenAI-compatible base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Chat model
    #[serde(default = "default_model")]
    pub model: String,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; the backend default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Azure OpenAI deployment settings
    #[serde(default)]
    pub azure: AzureConfig,

    /// Conversation loop limits and instructions
    #[serde(default)]
    pub agent: AgentConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// National Weather Service client settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Knowledge base search; the tool is disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_search: Option<VectorSearchConfig>,

    /// OData backend; the tool is disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odata: Option<ODataConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    1000
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("azure", &self.azure)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("weather", &self.weather)
            .field("vector_search", &self.vector_search)
            .field("odata", &self.odata)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Chat deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,

    /// Embeddings deployment name (falls back to `deployment`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings_deployment: Option<String>,

    /// Embeddings API version (falls back to `api_version`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings_api_version: Option<String>,
}

impl AzureConfig {
    /// True when enough is set to reach an embeddings deployment.
    pub fn has_embeddings(&self) -> bool {
        self.endpoint.is_some()
            && self.api_key.is_some()
            && (self.embeddings_deployment.is_some() || self.deployment.is_some())
    }
}

impl std::fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &redact(&self.api_key))
            .field("api_version", &self.api_version)
            .field("deployment", &self.deployment)
            .field("embeddings_deployment", &self.embeddings_deployment)
            .field("embeddings_api_version", &self.embeddings_api_version)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model round-trips per query
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Deadline for a single tool call
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Deadline for one model call plus its tool executions
    #[serde(default = "default_round_timeout_secs")]
    pub round_timeout_secs: u64,

    /// Deadline for answering a whole query
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Instruction messages placed before every user query
    #[serde(default)]
    pub instructions: Vec<String>,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_round_timeout_secs() -> u64 {
    120
}
fn default_query_timeout_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            round_timeout_secs: default_round_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            instructions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    4000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    /// NWS rejects requests without a User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_weather_base_url() -> String {
    "https://api.weather.gov".into()
}
fn default_user_agent() -> String {
    "weather-app/1.0".into()
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: default_weather_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VectorSearchConfig {
    /// OpenSearch node URL
    #[serde(default)]
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Per-tenant index names are `{index_prefix}-{hostname}`
    #[serde(default)]
    pub index_prefix: String,

    /// Tenant hostname used for the index name and the hostname filter
    #[serde(default)]
    pub hostname: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score for a hit to be returned
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Expected embedding dimension
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Embedding model name sent to OpenAI (Azure routes by deployment instead)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_top_k() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.4
}
fn default_dimensions() -> usize {
    3072
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: None,
            password: None,
            index_prefix: String::new(),
            hostname: String::new(),
            top_k: default_top_k(),
            threshold: default_threshold(),
            dimensions: default_dimensions(),
            embedding_model: default_embedding_model(),
        }
    }
}

impl std::fmt::Debug for VectorSearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearchConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("index_prefix", &self.index_prefix)
            .field("hostname", &self.hostname)
            .field("top_k", &self.top_k)
            .field("threshold", &self.threshold)
            .field("dimensions", &self.dimensions)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ODataConfig {
    /// Root URL the entity paths are resolved against
    #[serde(default)]
    pub base_url: String,

    /// OAuth2 token endpoint (client-credentials grant)
    #[serde(default)]
    pub token_endpoint: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub scope: String,

    /// Entity id → path relative to `base_url`
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
}

impl std::fmt::Debug for ODataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ODataConfig")
            .field("base_url", &self.base_url)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("scope", &self.scope)
            .field("entities", &self.entities)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolchat/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_path(&Self::config_dir().join("config.toml"))
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Setting any vector search or OData variable enables that section.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(provider) = var("TOOLCHAT_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = var("TOOLCHAT_MODEL") {
            self.model = model;
        }
        if let Some(port) = var("PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(%port, "Ignoring PORT: not a valid port number"),
            }
        }

        let azure = &mut self.azure;
        for (key, slot) in [
            ("AZURE_OPENAI_ENDPOINT", &mut azure.endpoint),
            ("AZURE_OPENAI_API_KEY", &mut azure.api_key),
            ("AZURE_OPENAI_API_VERSION", &mut azure.api_version),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", &mut azure.deployment),
            ("AZURE_OPENAI_EMBEDDINGS_DEPLOYMENT_NAME", &mut azure.embeddings_deployment),
            ("AZURE_OPENAI_EMBEDDINGS_API_VERSION", &mut azure.embeddings_api_version),
        ] {
            if let Some(value) = var(key) {
                *slot = Some(value);
            }
        }

        let search_env = [
            "OPEN_SEARCH_ENDPOINT",
            "OPEN_SEARCH_USERNAME",
            "OPEN_SEARCH_PASSWORD",
            "VECTOR_INDEX_PREFIX",
            "VECTOR_HOST_NAME",
        ]
        .map(|key| var(key));
        if search_env.iter().any(Option::is_some) {
            let [endpoint, username, password, prefix, hostname] = search_env;
            let search = self.vector_search.get_or_insert_with(VectorSearchConfig::default);
            if let Some(endpoint) = endpoint {
                search.endpoint = endpoint;
            }
            if username.is_some() {
                search.username = username;
            }
            if password.is_some() {
                search.password = password;
            }
            if let Some(prefix) = prefix {
                search.index_prefix = prefix;
            }
            if let Some(hostname) = hostname {
                search.hostname = hostname;
            }
        }

        let odata_env = [
            "ODATA_BASE_URL",
            "ODATA_TOKEN_ENDPOINT",
            "ODATA_CLIENT_ID",
            "ODATA_CLIENT_SECRET",
            "ODATA_TOKEN_SCOPE",
        ]
        .map(|key| var(key));
        if odata_env.iter().any(Option::is_some) {
            let [base_url, token_endpoint, client_id, client_secret, scope] = odata_env;
            let odata = self.odata.get_or_insert_with(ODataConfig::default);
            if let Some(base_url) = base_url {
                odata.base_url = base_url;
            }
            if let Some(token_endpoint) = token_endpoint {
                odata.token_endpoint = token_endpoint;
            }
            if let Some(client_id) = client_id {
                odata.client_id = client_id;
            }
            if client_secret.is_some() {
                odata.client_secret = client_secret;
            }
            if let Some(scope) = scope {
                odata.scope = scope;
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.provider.as_str(), "openai" | "azure") {
            return Err(ConfigError::ValidationError(format!(
                "provider must be \"openai\" or \"azure\", got \"{}\"",
                self.provider
            )));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        if self.agent.tool_timeout_secs == 0
            || self.agent.round_timeout_secs == 0
            || self.agent.query_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than 0".into(),
            ));
        }

        if let Some(search) = &self.vector_search {
            if !(0.0..=1.0).contains(&search.threshold) {
                return Err(ConfigError::ValidationError(
                    "vector_search.threshold must be between 0.0 and 1.0".into(),
                ));
            }
            if search.top_k == 0 {
                return Err(ConfigError::ValidationError(
                    "vector_search.top_k must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }

    /// Check if credentials for the selected chat backend are present.
    pub fn has_api_key(&self) -> bool {
        match self.provider.as_str() {
            "azure" => self.azure.api_key.is_some(),
            _ => self.api_key.is_some(),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            api_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            azure: AzureConfig::default(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            weather: WeatherConfig::default(),
            vector_search: None,
            odata: None,
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
