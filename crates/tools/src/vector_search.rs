//! Knowledge base search over an OpenSearch k-NN index.
//!
//! Each tenant has its own index named `{prefix}-{hostname}`. A query is
//! embedded through the configured embedding provider, matched against the
//! tenant index, filtered by score and truncated to `top_k`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use toolchat_config::VectorSearchConfig;
use toolchat_core::error::ToolError;
use toolchat_core::provider::{EmbeddingRequest, Provider};
use toolchat_core::tool::{Tool, ToolResult, decode_args};
use tracing::{debug, info};

const TOOL_NAME: &str = "search_knowledge_base";

/// Upper bound on candidates requested from the index.
const MAX_CANDIDATES: usize = 100;

/// Build the tenant index name from a prefix and a hostname.
///
/// The hostname is lowercased, every character outside `[a-z0-9]` becomes
/// `-`, leading and trailing dashes are trimmed and runs are collapsed.
pub fn tenant_index(prefix: &str, hostname: &str) -> Result<String, ToolError> {
    if prefix.is_empty() || hostname.is_empty() {
        return Err(failed("Index prefix and hostname are required"));
    }

    let mut sanitized = String::with_capacity(hostname.len());
    for c in hostname.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(c);
    }
    Ok(format!("{prefix}-{}", sanitized.trim_matches('-')))
}

/// Check an embedding before sending it to the index.
pub fn validate_embedding(embedding: &[f32], dimensions: usize) -> Result<(), ToolError> {
    if embedding.len() != dimensions {
        return Err(failed(format!(
            "Invalid embedding dimension: {}",
            embedding.len()
        )));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(failed("Embedding contains invalid values"));
    }
    let magnitude = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !(0.1..=100.0).contains(&magnitude) {
        return Err(failed(format!("Unusual embedding magnitude: {magnitude}")));
    }
    Ok(())
}

/// Number of candidates to request so that score filtering still leaves `k`.
pub fn candidate_count(k: usize) -> usize {
    k.saturating_mul(3).min(MAX_CANDIDATES)
}

/// The k-NN query restricted to one tenant's documents.
pub fn knn_query(hostname: &str, vector: &[f32], k: usize) -> serde_json::Value {
    let candidates = candidate_count(k);
    serde_json::json!({
        "size": candidates,
        "query": {
            "bool": {
                "must": [
                    { "term": { "metadata.hostname": hostname } },
                    { "knn": { "embedding": { "vector": vector, "k": candidates } } }
                ]
            }
        }
    })
}

fn failed(reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: TOOL_NAME.into(),
        reason: reason.into(),
    }
}

/// One document returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: RawSource,
}

#[derive(Debug, Default, Deserialize)]
struct RawSource {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Drop hits below `threshold` and keep at most `k`, preserving rank order.
fn select_hits(raw: Vec<RawHit>, hostname: &str, threshold: f32, k: usize) -> Vec<SearchHit> {
    raw.into_iter()
        .map(|hit| SearchHit {
            id: hit.id,
            score: hit.score.unwrap_or(0.0),
            content: hit.source.content.unwrap_or_default(),
            metadata: hit
                .source
                .metadata
                .unwrap_or_else(|| serde_json::json!({ "hostname": hostname })),
        })
        .filter(|hit| hit.score >= threshold)
        .take(k)
        .collect()
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default, alias = "topK", deserialize_with = "count_from_string_or_number")]
    top_k: Option<usize>,
}

/// Models send `top_k` as either `"5"` or `5`; negatives and fractions are ignored.
fn count_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => Ok(n.as_u64().map(saturate)),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(|n| Some(saturate(n)))
            .map_err(|_| D::Error::custom(format!("top_k must be a number, got \"{s}\""))),
        Some(other) => Err(D::Error::custom(format!("top_k must be a number, got {other}"))),
    }
}

fn saturate(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

pub struct VectorSearchTool {
    config: VectorSearchConfig,
    embedder: Arc<dyn Provider>,
    client: reqwest::Client,
}

impl VectorSearchTool {
    pub fn new(config: VectorSearchConfig, embedder: Arc<dyn Provider>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            embedder,
            client,
        }
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_ref()),
            None => builder,
        }
    }

    async fn index_exists(&self, index: &str) -> Result<bool, ToolError> {
        let url = format!("{}/{index}", self.endpoint());
        let response = self
            .authed(self.client.head(&url))
            .send()
            .await
            .map_err(|e| failed(format!("Index lookup failed: {e}")))?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(failed(format!("Index lookup returned status {status}"))),
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ToolError> {
        let response = self
            .embedder
            .embed(EmbeddingRequest {
                model: self.config.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| failed(format!("Embedding failed: {e}")))?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| failed("Embedding provider returned no vectors"))
    }

    /// Run one search for the configured tenant.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, ToolError> {
        let hostname = self.config.hostname.as_str();
        let index = tenant_index(&self.config.index_prefix, hostname)?;
        info!(%index, k, threshold = self.config.threshold, "Knowledge base search");

        if !self.index_exists(&index).await? {
            return Err(failed(format!("No index found for hostname: {hostname}")));
        }

        let vector = self.embed_query(query).await?;
        validate_embedding(&vector, self.config.dimensions)?;

        let url = format!("{}/{index}/_search", self.endpoint());
        let response = self
            .authed(self.client.post(&url))
            .json(&knn_query(hostname, &vector, k))
            .send()
            .await
            .map_err(|e| failed(format!("Search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("Search returned status {status}: {body}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("Search response did not parse: {e}")))?;
        debug!(candidates = body.hits.hits.len(), "Hits before filtering");

        let hits = select_hits(body.hits.hits, hostname, self.config.threshold, k);
        debug!(kept = hits.len(), "Hits after filtering");
        Ok(hits)
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the organization's knowledge base for documents relevant to the user's question. \
         Returns matching document chunks ranked by similarity."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user query to be used to search in the vector store"
                },
                "top_k": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Optional: number of top results to return (default: 10)"
                },
                "explanation": {
                    "type": "string",
                    "description": "Step-by-step thoughts on whether this question is ambiguous and why"
                }
            },
            "required": ["query", "explanation"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: SearchArgs = decode_args(arguments)?;
        let k = args
            .top_k
            .filter(|&k| k > 0)
            .unwrap_or(self.config.top_k)
            .min(MAX_CANDIDATES);

        let hits = self.search(&args.query, k).await?;
        let data = serde_json::to_value(&hits).map_err(|e| failed(e.to_string()))?;
        let output = serde_json::to_string_pretty(&data).unwrap_or_default();
        Ok(ToolResult::ok(output).with_data(data))
    }
}
