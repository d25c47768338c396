//! Shared test helpers for loop tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use toolchat_core::error::{ProviderError, ToolError};
use toolchat_core::message::{Message, MessageToolCall};
use toolchat_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, Usage};
use toolchat_core::tool::{Tool, ToolResult};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue. When
/// `repeat_last` is set the final response is served forever, otherwise
/// running past the script panics.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    requests: Mutex<Vec<ProviderRequest>>,
    repeat_last: bool,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
            delay: None,
        }
    }

    /// A provider that answers every call with the same response.
    pub fn always(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    /// Sleep this long before every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock().unwrap();
        let response = if self.repeat_last && responses.len() == 1 {
            responses.front().cloned()
        } else {
            responses.pop_front()
        };
        match response {
            Some(response) => Ok(response),
            None => panic!("ScriptedProvider: no more responses"),
        }
    }
}

/// A provider whose every call fails.
pub struct FailingProvider;

#[async_trait::async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        })
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a final answer response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        finish_reason: FinishReason::Stop,
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Create a stop response whose content is null.
pub fn make_empty_response() -> ProviderResponse {
    let mut response = make_text_response("");
    response.message.content = None;
    response
}

/// Create a response requesting the given tool calls.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        finish_reason: FinishReason::ToolCalls,
        message: Message::assistant_tool_calls(tool_calls),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// Returns its `text` argument, optionally after a delay.
pub struct EchoTool {
    pub delay: Option<Duration>,
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the input text"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
        Ok(ToolResult::ok(text))
    }
}

/// Always fails.
pub struct BrokenTool;

#[async_trait::async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Fails every time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "backend unavailable".into(),
        })
    }
}

/// Never finishes within any reasonable deadline.
pub struct StuckTool;

#[async_trait::async_trait]
impl Tool for StuckTool {
    fn name(&self) -> &str {
        "stuck"
    }
    fn description(&self) -> &str {
        "Hangs"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ToolResult::ok("finally"))
    }
}
