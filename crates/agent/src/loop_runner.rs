//! The conversation loop implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use toolchat_config::AppConfig;
use toolchat_core::error::{Error, Result, ToolError};
use toolchat_core::message::{Conversation, Message, MessageToolCall};
use toolchat_core::provider::{FinishReason, Provider, ProviderRequest, ToolDefinition};
use toolchat_core::tool::ToolRegistry;
use tracing::{debug, error, info, warn};

/// Drives one conversation between the model and the tool registry.
///
/// The loop itself holds no per-query state, so a single instance can be
/// shared across concurrent requests.
pub struct ConversationLoop {
    /// The chat completion backend
    provider: Arc<dyn Provider>,

    /// Tools offered to the model on every round
    tools: Arc<ToolRegistry>,

    /// The model to request
    model: String,

    /// Max tokens per model response
    max_tokens: Option<u32>,

    /// Sampling temperature
    temperature: Option<f32>,

    /// Instruction messages placed before the user query in `ask`
    instructions: Vec<String>,

    /// Maximum model round-trips per query
    max_rounds: u32,

    tool_timeout: Duration,
    round_timeout: Duration,
    query_timeout: Duration,
}

impl ConversationLoop {
    /// Create a loop with the default limits (10 rounds, 60 s per tool
    /// call, 120 s per round, 300 s per query).
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            instructions: Vec::new(),
            max_rounds: 10,
            tool_timeout: Duration::from_secs(60),
            round_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(300),
        }
    }

    /// Create a loop using the model settings and `[agent]` limits of a configuration.
    pub fn from_config(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        let agent = &config.agent;
        let mut this = Self::new(provider, config.model.clone(), tools)
            .with_max_tokens(config.max_tokens)
            .with_max_rounds(agent.max_rounds)
            .with_tool_timeout(Duration::from_secs(agent.tool_timeout_secs))
            .with_round_timeout(Duration::from_secs(agent.round_timeout_secs))
            .with_query_timeout(Duration::from_secs(agent.query_timeout_secs))
            .with_instructions(agent.instructions.clone());
        this.temperature = config.temperature;
        this
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the instruction lines sent as system messages ahead of each query.
    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// The registry this loop offers to the model.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Build a fresh conversation: the instruction messages, then the query.
    pub fn conversation_for(&self, query: impl Into<String>) -> Conversation {
        Conversation::with_messages(
            self.instructions
                .iter()
                .map(Message::system)
                .chain(std::iter::once(Message::user(query))),
        )
    }

    /// Answer a single query in a new conversation.
    pub async fn ask(&self, query: impl Into<String>) -> Result<String> {
        let mut conversation = self.conversation_for(query);
        self.run(&mut conversation).await
    }

    /// Run the loop until the model produces a final answer.
    ///
    /// The conversation is extended in place: one assistant message per
    /// round, one tool message per requested call, and the final
    /// assistant message. Returns the final content, or `""` when the
    /// model sent none.
    ///
    /// Tool failures of any kind are fed back to the model as JSON error
    /// payloads. Provider failures, the round budget and the round and
    /// query deadlines end the query with an error.
    pub async fn run(&self, conversation: &mut Conversation) -> Result<String> {
        info!(
            conversation_id = %conversation.id,
            messages = conversation.len(),
            tools = self.tools.len(),
            "Processing conversation"
        );
        let conversation_id = conversation.id.clone();

        let outcome = match tokio::time::timeout(self.query_timeout, self.drive(conversation)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout {
                scope: "query",
                secs: self.query_timeout.as_secs(),
            }),
        };

        if let Err(e) = &outcome {
            error!(conversation_id = %conversation_id, error = %e, "Conversation failed");
        }
        outcome
    }

    async fn drive(&self, conversation: &mut Conversation) -> Result<String> {
        let definitions = self.tools.definitions();

        for round in 1..=self.max_rounds {
            debug!(conversation_id = %conversation.id, round, "Conversation round");

            let step = tokio::time::timeout(self.round_timeout, self.round(conversation, &definitions))
                .await
                .map_err(|_| Error::Timeout {
                    scope: "round",
                    secs: self.round_timeout.as_secs(),
                })??;

            if let Some(answer) = step {
                info!(conversation_id = %conversation.id, rounds = round, "Conversation complete");
                return Ok(answer);
            }
        }

        warn!(
            conversation_id = %conversation.id,
            max_rounds = self.max_rounds,
            "Round budget exhausted"
        );
        Err(Error::LoopBudgetExceeded {
            max_rounds: self.max_rounds,
        })
    }

    /// One model call plus the tool executions it asks for.
    ///
    /// Returns `Some(answer)` when the model stopped.
    async fn round(
        &self,
        conversation: &mut Conversation,
        definitions: &[ToolDefinition],
    ) -> Result<Option<String>> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: conversation.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: definitions.to_vec(),
        };

        let response = self.provider.complete(request).await?;
        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Model responded"
            );
        }

        let mut message = response.message;
        if response.finish_reason == FinishReason::Stop || message.tool_calls.is_empty() {
            if !message.tool_calls.is_empty() {
                warn!(
                    dropped = message.tool_calls.len(),
                    "Model stopped with pending tool calls; ignoring them"
                );
                message.tool_calls.clear();
            }
            let answer = message.text().to_string();
            conversation.push(message);
            return Ok(Some(answer));
        }

        let calls = message.tool_calls.clone();
        debug!(tool_count = calls.len(), "Executing tool calls");
        message.content = None;
        conversation.push(message);

        let outputs = join_all(calls.iter().map(|call| self.execute_call(call))).await;
        for (call, output) in calls.iter().zip(outputs) {
            conversation.push(Message::tool_result(&call.id, output));
        }
        Ok(None)
    }

    /// Execute one tool call and return the content for its tool message.
    async fn execute_call(&self, call: &MessageToolCall) -> String {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(self.tool_timeout, self.tools.invoke(call)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.tool_timeout.as_secs(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                debug!(tool = %call.name, success = result.success, duration_ms, "Tool executed");
                result.output
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, duration_ms, "Tool call failed");
                e.to_payload()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use toolchat_core::message::Role;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool { delay: None })).unwrap();
        registry.register(Box::new(BrokenTool)).unwrap();
        registry.register(Box::new(StuckTool)).unwrap();
        Arc::new(registry)
    }

    fn looped(provider: Arc<ScriptedProvider>) -> ConversationLoop {
        ConversationLoop::new(provider, "mock-model", registry())
    }

    fn payload(message: &Message) -> serde_json::Value {
        serde_json::from_str(message.text()).unwrap()
    }

    #[tokio::test]
    async fn stop_on_first_call_returns_content() {
        let provider = Arc::new(ScriptedProvider::new(vec![make_text_response("Hello!")]));
        let agent = looped(provider.clone());

        let mut conv = Conversation::with_messages([Message::user("Hi")]);
        let answer = agent.run(&mut conv).await.unwrap();

        assert_eq!(answer, "Hello!");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn null_content_yields_empty_string() {
        let provider = Arc::new(ScriptedProvider::new(vec![make_empty_response()]));
        let answer = looped(provider).ask("Hi").await.unwrap();
        assert_eq!(answer, "");
    }

    #[tokio::test]
    async fn echo_scenario_produces_four_messages() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("call_1", "echo", json!({"text": "ping"}))]),
            make_text_response("done"),
        ]));
        let agent = looped(provider.clone());

        let mut conv = Conversation::with_messages([Message::user("echo ping")]);
        let answer = agent.run(&mut conv).await.unwrap();

        assert_eq!(answer, "done");
        let roles: Vec<Role> = conv.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);

        let assistant = &conv.messages()[1];
        assert!(assistant.content.is_none());
        assert_eq!(assistant.tool_calls.len(), 1);
        assert_eq!(assistant.tool_calls[0].id, "call_1");

        let tool = &conv.messages()[2];
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.text(), "ping");
        assert!(conv.validate().is_ok());
    }

    #[tokio::test]
    async fn second_request_carries_tool_results_and_definitions() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("call_1", "echo", json!({"text": "ping"}))]),
            make_text_response("done"),
        ]));
        looped(provider.clone()).ask("echo ping").await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].model, "mock-model");
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "broken", "stuck"]);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_messages_follow_request_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(EchoTool {
                delay: Some(Duration::from_millis(500)),
            }))
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![
                make_tool_call("slow", "echo", json!({"text": "first"})),
                make_tool_call("missing", "get_tides", json!({})),
                make_tool_call("bad", "echo", json!({"text": 7})),
            ]),
            make_text_response("ok"),
        ]));
        let agent = ConversationLoop::new(provider, "mock-model", Arc::new(registry));

        let mut conv = Conversation::with_messages([Message::user("go")]);
        agent.run(&mut conv).await.unwrap();

        let ids: Vec<&str> = conv
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["slow", "missing", "bad"]);
        assert_eq!(conv.messages()[2].text(), "first");
        assert_eq!(payload(&conv.messages()[3])["error"]["kind"], "unknown_tool");
        assert_eq!(payload(&conv.messages()[4])["error"]["kind"], "invalid_arguments");
    }

    #[tokio::test(start_paused = true)]
    async fn tool_calls_in_a_round_run_concurrently() {
        let mut registry = ToolRegistry::new();
        registry
            .register(Box::new(EchoTool {
                delay: Some(Duration::from_secs(5)),
            }))
            .unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![
                make_tool_call("a", "echo", json!({"text": "a"})),
                make_tool_call("b", "echo", json!({"text": "b"})),
                make_tool_call("c", "echo", json!({"text": "c"})),
            ]),
            make_text_response("ok"),
        ]));
        let agent = ConversationLoop::new(provider, "mock-model", Arc::new(registry))
            .with_round_timeout(Duration::from_secs(8));

        let started = tokio::time::Instant::now();
        assert_eq!(agent.ask("go").await.unwrap(), "ok");
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn failing_and_succeeding_tools_both_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![
                make_tool_call("call_bad", "broken", json!({})),
                make_tool_call("call_ok", "echo", json!({"text": "fine"})),
            ]),
            make_text_response("recovered"),
        ]));
        let mut conv = Conversation::with_messages([Message::user("try both")]);
        let answer = looped(provider).run(&mut conv).await.unwrap();

        assert_eq!(answer, "recovered");
        let tools: Vec<&Message> = conv.messages().iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tools.len(), 2);
        let error = payload(tools[0]);
        assert_eq!(error["error"]["kind"], "execution_failed");
        assert!(error["error"]["message"].as_str().unwrap().contains("backend unavailable"));
        assert_eq!(tools[1].text(), "fine");
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("call_1", "get_tides", json!({"port": "Boston"}))]),
            make_text_response("I cannot check tides."),
        ]));
        let mut conv = Conversation::with_messages([Message::user("tides?")]);
        let answer = looped(provider).run(&mut conv).await.unwrap();

        assert_eq!(answer, "I cannot check tides.");
        let error = payload(&conv.messages()[2]);
        assert_eq!(error["error"]["kind"], "unknown_tool");
        assert!(error["error"]["message"].as_str().unwrap().contains("get_tides"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_reported_to_the_model() {
        let call = MessageToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: "{not json".into(),
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![call]),
            make_text_response("sorry"),
        ]));
        let mut conv = Conversation::with_messages([Message::user("x")]);
        looped(provider).run(&mut conv).await.unwrap();

        assert_eq!(payload(&conv.messages()[2])["error"]["kind"], "invalid_arguments");
    }

    #[tokio::test]
    async fn empty_tool_call_list_counts_as_stop() {
        let mut degenerate = make_tool_call_response(vec![]);
        degenerate.message.content = None;
        let provider = Arc::new(ScriptedProvider::new(vec![degenerate]));
        let agent = looped(provider.clone());

        let mut conv = Conversation::with_messages([Message::user("hm")]);
        let answer = agent.run(&mut conv).await.unwrap();

        assert_eq!(answer, "");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn stop_with_tool_calls_drops_the_calls() {
        let mut response = make_tool_call_response(vec![make_tool_call("call_1", "echo", json!({"text": "x"}))]);
        response.finish_reason = FinishReason::Stop;
        response.message.content = Some("final".into());
        let provider = Arc::new(ScriptedProvider::new(vec![response]));
        let agent = looped(provider.clone());

        let mut conv = Conversation::with_messages([Message::user("hm")]);
        let answer = agent.run(&mut conv).await.unwrap();

        assert_eq!(answer, "final");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(conv.len(), 2);
        assert!(conv.messages()[1].tool_calls.is_empty());
        assert!(conv.validate().is_ok());
    }

    #[tokio::test]
    async fn round_budget_is_enforced() {
        let provider = Arc::new(ScriptedProvider::always(make_tool_call_response(vec![
            make_tool_call("call_1", "echo", json!({"text": "again"})),
        ])));
        let agent = looped(provider.clone()).with_max_rounds(3);

        let err = agent.ask("loop forever").await.unwrap_err();
        assert!(matches!(err, Error::LoopBudgetExceeded { max_rounds: 3 }));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let agent = ConversationLoop::new(Arc::new(FailingProvider), "mock-model", registry());
        let err = agent.ask("hello").await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_tool_times_out_and_is_recovered() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            make_tool_call_response(vec![make_tool_call("call_1", "stuck", json!({}))]),
            make_text_response("gave up on it"),
        ]));
        let agent = looped(provider).with_tool_timeout(Duration::from_secs(2));

        let mut conv = Conversation::with_messages([Message::user("wait")]);
        let answer = agent.run(&mut conv).await.unwrap();

        assert_eq!(answer, "gave up on it");
        let error = payload(&conv.messages()[2]);
        assert_eq!(error["error"]["kind"], "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_round_hits_round_deadline() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![make_text_response("late")]).with_delay(Duration::from_secs(30)),
        );
        let agent = looped(provider).with_round_timeout(Duration::from_secs(5));

        let err = agent.ask("hurry").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { scope: "round", secs: 5 }));
    }

    #[tokio::test(start_paused = true)]
    async fn long_query_hits_query_deadline() {
        let provider = Arc::new(
            ScriptedProvider::always(make_tool_call_response(vec![make_tool_call(
                "call_1",
                "echo",
                json!({"text": "again"}),
            )]))
            .with_delay(Duration::from_secs(2)),
        );
        let agent = looped(provider)
            .with_max_rounds(100)
            .with_query_timeout(Duration::from_secs(7));

        let err = agent.ask("keep going").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { scope: "query", secs: 7 }));
    }

    #[tokio::test]
    async fn ask_places_instructions_before_query() {
        let provider = Arc::new(ScriptedProvider::new(vec![make_text_response("ok")]));
        let agent = looped(provider.clone())
            .with_instructions(vec!["You are a weather assistant.".into()]);

        agent.ask("Any alerts in CA?").await.unwrap();

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[0].text(), "You are a weather assistant.");
        assert_eq!(sent[1].role, Role::User);
        assert_eq!(sent[1].text(), "Any alerts in CA?");
    }

    #[tokio::test]
    async fn from_config_applies_model_settings() {
        let mut config = AppConfig::default();
        config.model = "gpt-4o".into();
        config.temperature = Some(0.2);
        config.agent.max_rounds = 4;

        let provider = Arc::new(ScriptedProvider::new(vec![make_text_response("ok")]));
        let agent = ConversationLoop::from_config(provider.clone(), registry(), &config);
        agent.ask("hi").await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(agent.max_rounds, 4);
    }
}
