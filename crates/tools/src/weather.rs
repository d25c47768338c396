//! Weather tools backed by the National Weather Service API.
//!
//! `get_alerts` lists active alerts for a US state and `get_forecast`
//! resolves a coordinate to its NWS grid point and returns the forecast
//! periods. Upstream failures never raise: they come back as short text the
//! model can relay to the user.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use toolchat_config::WeatherConfig;
use toolchat_core::error::ToolError;
use toolchat_core::tool::{Tool, ToolResult, decode_args};
use tracing::{debug, warn};

/// Minimal NWS HTTP client.
pub struct NwsClient {
    base_url: String,
    user_agent: String,
    client: reqwest::Client,
}

impl NwsClient {
    pub fn new(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a GeoJSON document. Any failure is logged and yields `None`.
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Option<T> {
        debug!(url, "NWS request");
        let response = match self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/geo+json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "NWS request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url, status = response.status().as_u16(), "NWS returned an error status");
            return None;
        }

        match response.json::<T>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url, error = %e, "NWS response did not parse");
                None
            }
        }
    }
}

// --- NWS response shapes (only the fields we read) ---

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    #[serde(default)]
    properties: AlertProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertProperties {
    event: Option<String>,
    area_desc: Option<String>,
    severity: Option<String>,
    status: Option<String>,
    headline: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: Option<PointsProperties>,
}

#[derive(Debug, Deserialize)]
struct PointsProperties {
    forecast: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: Option<ForecastProperties>,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    #[serde(default)]
    periods: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastPeriod {
    name: Option<String>,
    temperature: Option<serde_json::Number>,
    temperature_unit: Option<String>,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    short_forecast: Option<String>,
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("Unknown")
}

fn format_alert(props: &AlertProperties) -> String {
    [
        format!("Event: {}", or_unknown(props.event.as_deref())),
        format!("Area: {}", or_unknown(props.area_desc.as_deref())),
        format!("Severity: {}", or_unknown(props.severity.as_deref())),
        format!("Status: {}", or_unknown(props.status.as_deref())),
        format!(
            "Headline: {}",
            props
                .headline
                .as_deref()
                .filter(|h| !h.is_empty())
                .unwrap_or("No headline")
        ),
        "---".to_string(),
    ]
    .join("\n")
}

fn format_period(period: &ForecastPeriod) -> String {
    let temperature = period
        .temperature
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "Unknown".into());
    let unit = period
        .temperature_unit
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or("F");
    [
        format!("{}:", or_unknown(period.name.as_deref())),
        format!("Temperature: {temperature}°{unit}"),
        format!(
            "Wind: {} {}",
            or_unknown(period.wind_speed.as_deref()),
            period.wind_direction.as_deref().unwrap_or_default()
        ),
        period
            .short_forecast
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or("No forecast available")
            .to_string(),
        "---".to_string(),
    ]
    .join("\n")
}

// --- get_alerts ---

#[derive(Debug, Deserialize)]
struct AlertsArgs {
    state: String,
}

pub struct AlertsTool {
    nws: Arc<NwsClient>,
}

impl AlertsTool {
    pub fn new(nws: Arc<NwsClient>) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl Tool for AlertsTool {
    fn name(&self) -> &str {
        "get_alerts"
    }

    fn description(&self) -> &str {
        "Get weather alerts for a state"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "state": {
                    "type": "string",
                    "description": "Two-letter state code (e.g. CA, NY)"
                }
            },
            "required": ["state"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: AlertsArgs = decode_args(arguments)?;
        let state = args.state.trim().to_uppercase();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ToolError::InvalidArguments(format!(
                "state must be a two-letter code, got '{}'",
                args.state
            )));
        }

        let url = format!("{}/alerts?area={state}", self.nws.base_url());
        let Some(alerts) = self.nws.get::<AlertsResponse>(&url).await else {
            return Ok(ToolResult::failure("Failed to retrieve alerts data"));
        };

        if alerts.features.is_empty() {
            return Ok(ToolResult::ok(format!("No active alerts for {state}")));
        }

        let formatted: Vec<String> = alerts
            .features
            .iter()
            .map(|f| format_alert(&f.properties))
            .collect();
        Ok(ToolResult::ok(format!(
            "Active alerts for {state}:\n\n{}",
            formatted.join("\n")
        ))
        .with_data(serde_json::json!({ "state": state, "count": formatted.len() })))
    }
}

// --- get_forecast ---

#[derive(Debug, Deserialize)]
struct ForecastArgs {
    latitude: f64,
    longitude: f64,
}

pub struct ForecastTool {
    nws: Arc<NwsClient>,
}

impl ForecastTool {
    pub fn new(nws: Arc<NwsClient>) -> Self {
        Self { nws }
    }
}

#[async_trait]
impl Tool for ForecastTool {
    fn name(&self) -> &str {
        "get_forecast"
    }

    fn description(&self) -> &str {
        "Get weather forecast for a location"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "latitude": {
                    "type": "number",
                    "minimum": -90,
                    "maximum": 90,
                    "description": "Latitude of the location"
                },
                "longitude": {
                    "type": "number",
                    "minimum": -180,
                    "maximum": 180,
                    "description": "Longitude of the location"
                }
            },
            "required": ["latitude", "longitude"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let ForecastArgs { latitude, longitude } = decode_args(arguments)?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ToolError::InvalidArguments(format!(
                "latitude must be between -90 and 90, got {latitude}"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ToolError::InvalidArguments(format!(
                "longitude must be between -180 and 180, got {longitude}"
            )));
        }

        let points_url = format!(
            "{}/points/{latitude:.4},{longitude:.4}",
            self.nws.base_url()
        );
        let Some(points) = self.nws.get::<PointsResponse>(&points_url).await else {
            return Ok(ToolResult::failure(format!(
                "Failed to retrieve grid point data for coordinates: {latitude}, {longitude}. \
                 This location may not be supported by the NWS API (only US locations are supported)."
            )));
        };

        let Some(forecast_url) = points.properties.and_then(|p| p.forecast) else {
            return Ok(ToolResult::failure(
                "Failed to get forecast URL from grid point data",
            ));
        };

        let Some(forecast) = self.nws.get::<ForecastResponse>(&forecast_url).await else {
            return Ok(ToolResult::failure("Failed to retrieve forecast data"));
        };

        let periods = forecast.properties.map(|p| p.periods).unwrap_or_default();
        if periods.is_empty() {
            return Ok(ToolResult::failure("No forecast periods available"));
        }

        let formatted: Vec<String> = periods.iter().map(format_period).collect();
        Ok(ToolResult::ok(format!(
            "Forecast for {latitude}, {longitude}:\n\n{}",
            formatted.join("\n")
        )))
    }
}
