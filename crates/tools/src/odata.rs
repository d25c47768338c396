//! OData query tool.
//!
//! Builds an OData query URL from the model's system query options,
//! authenticates with an OAuth2 client-credentials token and returns the
//! entity records. Upstream failures are reported to the model as a JSON
//! error object rather than failing the call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use toolchat_config::ODataConfig;
use toolchat_core::error::ToolError;
use toolchat_core::tool::{Tool, ToolResult, decode_args};
use tracing::{debug, warn};

/// Refresh tokens this long before the server says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Percent-encode a string the way JavaScript's `encodeURIComponent` does.
///
/// Leaves `A-Z a-z 0-9 - _ . ! ~ * ' ( )` untouched and encodes every other
/// UTF-8 byte as `%XX`.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// True when the path part contains a `..` segment, plain or percent-encoded.
fn escapes_root(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .any(|segment| segment.to_ascii_lowercase().replace("%2e", ".") == "..")
}

/// OData system query options, in the order they are emitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub select: Option<String>,
    #[serde(default)]
    pub orderby: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub top: Option<String>,
    #[serde(default)]
    pub apply: Option<String>,
    #[serde(default)]
    pub expand: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

/// Models send `top` as either `"5"` or `5`.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Append `$select, $orderby, $top, $apply, $expand, $filter` to `endpoint`.
///
/// Empty options are skipped; with no options the endpoint is returned as is.
pub fn build_query_url(endpoint: &str, options: &QueryOptions) -> String {
    let parts: Vec<String> = [
        ("$select", &options.select),
        ("$orderby", &options.orderby),
        ("$top", &options.top),
        ("$apply", &options.apply),
        ("$expand", &options.expand),
        ("$filter", &options.filter),
    ]
    .into_iter()
    .filter_map(|(key, value)| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(|v| format!("{key}={}", encode_component(v)))
    })
    .collect();

    if parts.is_empty() {
        endpoint.to_string()
    } else {
        format!("{endpoint}?{}", parts.join("&"))
    }
}

/// How the caller intends to present the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    #[default]
    FinalAnswer,
    ListOfRecords,
    ExploreSingleRecord,
    InterimStep,
}

#[derive(Debug, Deserialize)]
struct ODataArgs {
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default, alias = "url")]
    entity_path: Option<String>,
    #[serde(flatten)]
    options: QueryOptions,
    #[serde(default)]
    display_type: DisplayType,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// A failed upstream exchange, reported to the model verbatim.
#[derive(Debug, Serialize)]
struct UpstreamFailure {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl UpstreamFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            detail: None,
        }
    }

    /// Pull `error.message` out of a JSON error body, or keep the raw text.
    fn from_response(message: &str, status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .or_else(|| (!body.is_empty()).then(|| body.to_string()));
        Self {
            message: message.into(),
            status: Some(status),
            detail,
        }
    }

    fn into_result(self) -> ToolResult {
        let payload = serde_json::json!({ "error": self });
        ToolResult::failure(payload.to_string()).with_data(payload)
    }
}

pub struct ODataTool {
    config: ODataConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl ODataTool {
    pub fn new(config: ODataConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            client,
            token: Mutex::new(None),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Resolve the entity endpoint from an entity id or a relative path.
    fn resolve_endpoint(
        &self,
        entity_id: Option<&str>,
        entity_path: Option<&str>,
    ) -> Result<String, ToolError> {
        let path = match (entity_id, entity_path) {
            (Some(id), _) => self
                .config
                .entities
                .get(id)
                .map(String::as_str)
                .ok_or_else(|| {
                    let known: Vec<&str> = self.config.entities.keys().map(String::as_str).collect();
                    ToolError::InvalidArguments(format!(
                        "Unknown entity_id '{id}'. Known entities: {}",
                        known.join(", ")
                    ))
                })?,
            (None, Some(path)) => path,
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "Either entity_id or entity_path is required".into(),
                ));
            }
        };

        let base = self.base_url();
        let relative = if path.starts_with("http://") || path.starts_with("https://") {
            path.strip_prefix(base)
                .filter(|rest| !base.is_empty() && (rest.is_empty() || rest.starts_with(['/', '?'])))
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!("entity_path must be relative to {base}"))
                })?
        } else {
            path
        };
        if escapes_root(relative) {
            return Err(ToolError::InvalidArguments(
                "entity_path must not contain '..' segments".into(),
            ));
        }
        if relative.is_empty() || relative.starts_with('?') {
            return Ok(format!("{base}{relative}"));
        }
        Ok(format!("{base}/{}", relative.trim_start_matches('/')))
    }

    /// Return a cached bearer token or fetch a new one.
    async fn bearer_token(&self) -> Result<String, UpstreamFailure> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        debug!(endpoint = %self.config.token_endpoint, "Requesting OData bearer token");
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .basic_auth(&self.config.client_id, self.config.client_secret.as_ref())
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamFailure::new(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamFailure::from_response("Token request rejected", status, &body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamFailure::new(format!("Token response did not parse: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(token.access_token)
    }

    /// GET an OData URL; returns `value` when present, else the whole body.
    async fn fetch(&self, url: &str) -> Result<serde_json::Value, UpstreamFailure> {
        let token = self.bearer_token().await?;
        debug!(url, "OData request");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| UpstreamFailure::new(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let failure = UpstreamFailure::from_response(
                status.canonical_reason().unwrap_or("Request failed"),
                status.as_u16(),
                &body,
            );
            warn!(url, status = status.as_u16(), detail = ?failure.detail, "OData query failed");
            return Err(failure);
        }

        let mut body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamFailure::new(format!("Response did not parse: {e}")))?;

        Ok(match body.get_mut("value") {
            Some(value) => value.take(),
            None => body,
        })
    }
}

#[async_trait]
impl Tool for ODataTool {
    fn name(&self) -> &str {
        "query_odata"
    }

    fn description(&self) -> &str {
        "Query the organization's OData API for entity records. Choose an entity_id from the \
         enum (or a relative entity_path) and narrow the result with OData system query options."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let entity_ids: Vec<&str> = self.config.entities.keys().map(String::as_str).collect();
        let mut entity_id = serde_json::json!({
            "type": "string",
            "description": "Which configured entity set to query"
        });
        if !entity_ids.is_empty() {
            entity_id["enum"] = serde_json::json!(entity_ids);
        }

        serde_json::json!({
            "type": "object",
            "properties": {
                "explanation": {
                    "type": "string",
                    "description": "Why this query answers the user's question"
                },
                "entity_id": entity_id,
                "entity_path": {
                    "type": "string",
                    "description": "Entity set path relative to the OData root, when no entity_id fits"
                },
                "select": { "type": "string", "description": "$select: comma-separated properties" },
                "orderby": { "type": "string", "description": "$orderby: e.g. 'Name desc'" },
                "top": { "type": "string", "description": "$top: maximum number of records" },
                "apply": { "type": "string", "description": "$apply: aggregation transformations" },
                "expand": { "type": "string", "description": "$expand: related entities to include" },
                "filter": { "type": "string", "description": "$filter: e.g. \"Status eq 'Open'\"" },
                "display_type": {
                    "type": "string",
                    "enum": ["final_answer", "list_of_records", "explore_single_record", "interim_step"],
                    "description": "How the result will be presented"
                }
            },
            "required": ["explanation", "display_type"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: ODataArgs = decode_args(arguments)?;
        let endpoint =
            self.resolve_endpoint(args.entity_id.as_deref(), args.entity_path.as_deref())?;
        let url = build_query_url(&endpoint, &args.options);

        match self.fetch(&url).await {
            Ok(records) => {
                let output = serde_json::to_string(&records).unwrap_or_default();
                Ok(ToolResult::ok(output).with_data(serde_json::json!({
                    "display_type": args.display_type,
                    "url": url,
                    "records": records,
                })))
            }
            Err(failure) => Ok(failure.into_result()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ODataConfig {
        ODataConfig {
            base_url: format!("{}/odata", server.uri()),
            token_endpoint: format!("{}/token", server.uri()),
            client_id: "svc".into(),
            client_secret: Some("secret".into()),
            scope: "erp.read".into(),
            entities: BTreeMap::from([("vendors".to_string(), "Vendors".to_string())]),
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            // base64("svc:secret")
            .and(header("authorization", "Basic c3ZjOnNlY3JldA=="))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=erp.read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn encode_component_matches_javascript() {
        assert_eq!(encode_component("Status eq 'Open'"), "Status%20eq%20'Open'");
        assert_eq!(encode_component("a&b=c/d?"), "a%26b%3Dc%2Fd%3F");
        assert_eq!(encode_component("-_.!~*()"), "-_.!~*()");
        assert_eq!(encode_component("é"), "%C3%A9");
    }

    #[test]
    fn query_url_keeps_option_order() {
        let options = QueryOptions {
            filter: Some("Amount gt 100".into()),
            top: Some("5".into()),
            select: Some("Name,Amount".into()),
            ..QueryOptions::default()
        };
        assert_eq!(
            build_query_url("https://erp/odata/Vendors", &options),
            "https://erp/odata/Vendors?$select=Name%2CAmount&$top=5&$filter=Amount%20gt%20100"
        );
        assert_eq!(
            build_query_url("https://erp/odata/Vendors", &QueryOptions::default()),
            "https://erp/odata/Vendors"
        );
    }

    #[test]
    fn numeric_top_is_accepted() {
        let args: ODataArgs = serde_json::from_value(serde_json::json!({
            "entity_id": "vendors",
            "top": 3,
            "display_type": "list_of_records"
        }))
        .unwrap();
        assert_eq!(args.options.top.as_deref(), Some("3"));
        assert_eq!(args.display_type, DisplayType::ListOfRecords);
    }

    #[tokio::test]
    async fn query_returns_value_array() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/odata/Vendors"))
            .and(query_param("$top", "2"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "@odata.context": "ctx",
                "value": [{ "Name": "Acme" }, { "Name": "Globex" }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let tool = ODataTool::new(config(&server));
        let args = serde_json::json!({
            "explanation": "list vendors",
            "entity_id": "vendors",
            "top": "2",
            "display_type": "list_of_records"
        });

        let first = tool.execute(args.clone()).await.unwrap();
        assert!(first.success);
        assert_eq!(first.output, r#"[{"Name":"Acme"},{"Name":"Globex"}]"#);
        assert_eq!(first.data.unwrap()["display_type"], "list_of_records");

        // Second call reuses the cached token.
        let second = tool.execute(args).await.unwrap();
        assert!(second.success);
    }

    #[tokio::test]
    async fn upstream_error_becomes_payload() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/odata/Vendors"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "code": "BadRequest", "message": "Property 'Nme' not found" }
            })))
            .mount(&server)
            .await;

        let tool = ODataTool::new(config(&server));
        let result = tool
            .execute(serde_json::json!({
                "explanation": "x",
                "entity_path": "Vendors",
                "select": "Nme",
                "display_type": "interim_step"
            }))
            .await
            .unwrap();

        assert!(!result.success);
        let payload: serde_json::Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(payload["error"]["status"], 400);
        assert_eq!(payload["error"]["message"], "Bad Request");
        assert_eq!(payload["error"]["detail"], "Property 'Nme' not found");
    }

    #[tokio::test]
    async fn token_failure_becomes_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let tool = ODataTool::new(config(&server));
        let result = tool
            .execute(serde_json::json!({ "entity_id": "vendors", "explanation": "x" }))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Token request rejected"));
        assert!(result.output.contains("invalid_client"));
    }

    #[tokio::test]
    async fn unknown_entity_is_invalid_arguments() {
        let server = MockServer::start().await;
        let tool = ODataTool::new(config(&server));
        let err = tool
            .execute(serde_json::json!({ "entity_id": "payroll", "explanation": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.contains("vendors")));
    }

    #[tokio::test]
    async fn foreign_absolute_url_is_rejected() {
        let server = MockServer::start().await;
        let tool = ODataTool::new(config(&server));
        let err = tool
            .execute(serde_json::json!({ "entity_path": "https://elsewhere.example/odata/X" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn lookalike_host_is_rejected() {
        let server = MockServer::start().await;
        let tool = ODataTool::new(config(&server));
        let lookalike = format!("{}/odata.attacker.io/steal", server.uri());
        let err = tool.resolve_endpoint(None, Some(&lookalike)).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let tool = ODataTool::new(ODataConfig {
            base_url: "https://erp.example.com".into(),
            ..ODataConfig::default()
        });
        for path in [
            "https://erp.example.com.attacker.io/steal",
            "https://erp.example.comevil/x",
            "http://erp.example.com/Vendors",
        ] {
            assert!(tool.resolve_endpoint(None, Some(path)).is_err(), "{path} accepted");
        }
    }

    #[test]
    fn absolute_url_under_base_is_accepted() {
        let tool = ODataTool::new(ODataConfig {
            base_url: "https://erp.example.com/odata/".into(),
            ..ODataConfig::default()
        });
        assert_eq!(
            tool.resolve_endpoint(None, Some("https://erp.example.com/odata/Vendors")).unwrap(),
            "https://erp.example.com/odata/Vendors"
        );
        assert_eq!(
            tool.resolve_endpoint(None, Some("https://erp.example.com/odata")).unwrap(),
            "https://erp.example.com/odata"
        );
        assert_eq!(
            tool.resolve_endpoint(None, Some("/Vendors")).unwrap(),
            "https://erp.example.com/odata/Vendors"
        );
    }

    #[test]
    fn parent_segments_are_rejected() {
        let tool = ODataTool::new(ODataConfig {
            base_url: "https://erp.example.com/odata".into(),
            ..ODataConfig::default()
        });
        for path in [
            "../admin/Users",
            "Vendors/../../admin",
            "%2e%2e/admin",
            "https://erp.example.com/odata/../admin",
        ] {
            let err = tool.resolve_endpoint(None, Some(path)).unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)), "{path} accepted");
        }
        assert!(tool.resolve_endpoint(None, Some("Vendors?$filter=a..b")).is_ok());
    }

    #[test]
    fn schema_without_entities_has_no_enum() {
        let tool = ODataTool::new(ODataConfig::default());
        let schema = tool.parameters_schema();
        assert_eq!(schema["properties"]["entity_id"]["type"], "string");
        assert!(schema["properties"]["entity_id"].get("enum").is_none());
    }

    #[test]
    fn schema_lists_configured_entities() {
        let tool = ODataTool::new(ODataConfig {
            entities: BTreeMap::from([
                ("invoices".to_string(), "Invoices".to_string()),
                ("vendors".to_string(), "Vendors".to_string()),
            ]),
            ..ODataConfig::default()
        });
        let schema = tool.parameters_schema();
        assert_eq!(
            schema["properties"]["entity_id"]["enum"],
            serde_json::json!(["invoices", "vendors"])
        );
    }
}
