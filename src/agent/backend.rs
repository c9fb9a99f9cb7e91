//! LLM backend over an OpenAI-compatible chat-completions API.
//!
//! The transcript is converted to wire messages per request, with the system
//! turn replaced by a freshly synthesized prompt. Streaming uses SSE and
//! accumulates deltas until the stream finishes; content is forwarded only
//! when the round resolves to a final reply, so tool rounds never leak
//! model text or partial arguments to the caller.

use std::io::{BufRead, BufReader};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::agent::convo::{ToolInvocation, Turn, TurnKind};
use crate::agent::tools::ToolDefinition;
use crate::config::ModelConfig;
use crate::{GuideError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// What the model produced for one round.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// A user-facing reply.
    Final(String),
    /// One or more tool calls to execute before asking the model again.
    ToolCalls(Vec<ToolInvocation>),
}

/// One completion request: the fresh system prompt plus the transcript so
/// far and the tools the model may call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
}

/// A conversational model that can answer or request tool calls.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn>;

    /// Streaming variant. Text chunks are sent on `chunks` only for a round
    /// that resolves to a final reply; a tool-call round must emit nothing.
    /// The default implementation completes non-streaming and emits the
    /// whole reply as one chunk.
    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<ModelTurn> {
        let turn = self.complete(request).await?;
        if let ModelTurn::Final(text) = &turn {
            let _ = chunks.send(text.clone());
        }
        Ok(turn)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Convert transcript turns to wire messages. The seeded system turn is
/// dropped in favor of `system_prompt`, and consecutive tool-call turns are
/// merged into a single assistant message as the wire format requires.
fn wire_messages(system_prompt: &str, history: &[Turn]) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage {
        role: "system",
        content: Some(system_prompt.to_string()),
        tool_calls: None,
        tool_call_id: None,
    }];

    for turn in history {
        match &turn.kind {
            TurnKind::System { .. } => {}
            TurnKind::User { text } => messages.push(WireMessage {
                role: "user",
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            TurnKind::Assistant { text } => messages.push(WireMessage {
                role: "assistant",
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            TurnKind::ToolCall(invocation) => {
                let wire_call = WireToolCall {
                    id: invocation.call_id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: invocation.name.clone(),
                        arguments: invocation.arguments.to_string(),
                    },
                };
                match messages.last_mut() {
                    Some(WireMessage {
                        role: "assistant",
                        content: None,
                        tool_calls: Some(calls),
                        ..
                    }) => calls.push(wire_call),
                    _ => messages.push(WireMessage {
                        role: "assistant",
                        content: None,
                        tool_calls: Some(vec![wire_call]),
                        tool_call_id: None,
                    }),
                }
            }
            TurnKind::ToolResult {
                call_id, body, ..
            } => messages.push(WireMessage {
                role: "tool",
                content: Some(body.clone()),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            }),
        }
    }

    messages
}

fn parse_invocation(call: WireToolCall) -> Result<ToolInvocation> {
    let arguments: serde_json::Value = serde_json::from_str(&call.function.arguments)
        .map_err(|e| {
            GuideError::Backend(format!(
                "model produced unparseable arguments for {}: {}",
                call.function.name, e
            ))
        })?;
    Ok(ToolInvocation {
        call_id: call.id,
        name: call.function.name,
        arguments,
    })
}

/// Accumulates streaming deltas into a complete model turn. Content chunks
/// are buffered rather than forwarded live: whether a round is a final reply
/// is only known once the stream ends.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    content_chunks: Vec<String>,
    tool_calls: Vec<(String, String, String)>,
    done: bool,
}

impl StreamAccumulator {
    /// Feed one SSE line.
    fn feed_line(&mut self, line: &str) -> Result<()> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(());
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(());
        }

        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|e| GuideError::Backend(format!("malformed stream event: {}", e)))?;
        let Some(choice) = event.choices.into_iter().next() else {
            return Ok(());
        };

        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                while self.tool_calls.len() <= delta.index {
                    self.tool_calls
                        .push((String::new(), String::new(), String::new()));
                }
                let slot = &mut self.tool_calls[delta.index];
                if let Some(id) = delta.id {
                    slot.0 = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        slot.1.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.2.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(chunk) = choice.delta.content {
            if !chunk.is_empty() {
                self.content.push_str(&chunk);
                self.content_chunks.push(chunk);
            }
        }

        Ok(())
    }

    fn finish(self) -> Result<ModelTurn> {
        if self.tool_calls.is_empty() {
            return Ok(ModelTurn::Final(self.content));
        }

        let invocations = self
            .tool_calls
            .into_iter()
            .map(|(id, name, arguments)| {
                parse_invocation(WireToolCall {
                    id,
                    kind: "function".to_string(),
                    function: WireFunctionCall { name, arguments },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ModelTurn::ToolCalls(invocations))
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    base_url: Url,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    agent: ureq::Agent,
}

impl OpenAiChatClient {
    #[inline]
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GuideError::Backend(format!("invalid backend URL: {}", e)))?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_key: config.api_key(),
            model: config.model.clone(),
            temperature: config.temperature,
            agent,
        })
    }

    fn completions_url(&self) -> Result<Url> {
        // keep any path prefix on the configured base URL
        let mut url = self.base_url.clone();
        let path = format!("{}/chat/completions", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    fn wire_request(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: WireToolFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        WireRequest {
            model: self.model.clone(),
            messages: wire_messages(&request.system_prompt, &request.history),
            temperature: self.temperature,
            tools,
            stream,
        }
    }

    fn post(&self, url: &Url, body: &str) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        let mut request = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", &format!("Bearer {}", key));
        }
        request.send(body)
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn> {
        let url = self.completions_url()?;
        let body = serde_json::to_string(&self.wire_request(request, false))
            .map_err(|e| GuideError::Backend(format!("failed to serialize request: {}", e)))?;

        debug!(model = %self.model, "Requesting completion");

        let client = self.clone();
        let response_text = tokio::task::spawn_blocking(move || {
            client
                .post(&url, &body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
                .map_err(|e| GuideError::Backend(format!("completion request failed: {}", e)))
        })
        .await
        .map_err(|e| GuideError::Backend(format!("completion task failed: {}", e)))??;

        let response: WireResponse = serde_json::from_str(&response_text)
            .map_err(|e| GuideError::Backend(format!("malformed completion response: {}", e)))?;
        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| GuideError::Backend("completion had no choices".to_string()))?;

        if let Some(calls) = message.tool_calls {
            if !calls.is_empty() {
                let invocations = calls
                    .into_iter()
                    .map(parse_invocation)
                    .collect::<Result<Vec<_>>>()?;
                return Ok(ModelTurn::ToolCalls(invocations));
            }
        }

        Ok(ModelTurn::Final(message.content.unwrap_or_default()))
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<ModelTurn> {
        let url = self.completions_url()?;
        let body = serde_json::to_string(&self.wire_request(request, true))
            .map_err(|e| GuideError::Backend(format!("failed to serialize request: {}", e)))?;

        debug!(model = %self.model, "Requesting streaming completion");

        let client = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut response = client
                .post(&url, &body)
                .map_err(|e| GuideError::Backend(format!("completion request failed: {}", e)))?;

            let reader = BufReader::new(response.body_mut().as_reader());
            let mut accumulator = StreamAccumulator::default();

            for line in reader.lines() {
                let line = line
                    .map_err(|e| GuideError::Backend(format!("stream read failed: {}", e)))?;
                accumulator.feed_line(&line)?;
                if accumulator.done {
                    break;
                }
            }

            // only a final reply streams; a tool-call round keeps any model
            // text out of the caller's channel
            if accumulator.tool_calls.is_empty() {
                for chunk in &accumulator.content_chunks {
                    // receiver may have been dropped on cancellation
                    if chunks.send(chunk.clone()).is_err() {
                        warn!("Stream consumer dropped, discarding remaining chunks");
                        break;
                    }
                }
            }

            accumulator.finish()
        })
        .await
        .map_err(|e| GuideError::Backend(format!("completion task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::agent::convo::Conversation;
    use crate::config::ModelConfig;

    fn history() -> Vec<Turn> {
        let mut convo = Conversation::seeded("seed".to_string(), "hola".to_string());
        convo.push_user("pasta vegana?");
        convo.push_tool_call(ToolInvocation {
            call_id: "c1".to_string(),
            name: "search_dishes".to_string(),
            arguments: serde_json::json!({"query": "pasta", "has_vegan": true}),
        });
        convo.push_tool_call(ToolInvocation {
            call_id: "c2".to_string(),
            name: "search_restaurants".to_string(),
            arguments: serde_json::json!({"query": "italian"}),
        });
        convo.push_tool_result("c1", "search_dishes", "<valid>\n</valid>", false);
        convo.push_tool_result("c2", "search_restaurants", "<valid>\n</valid>", false);
        convo.turns().to_vec()
    }

    #[test]
    fn wire_messages_replace_seeded_system_turn() {
        let messages = wire_messages("fresh prompt", &history());
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content.as_deref(), Some("fresh prompt"));
        assert!(!messages.iter().any(|m| m.content.as_deref() == Some("seed")));
    }

    #[test]
    fn wire_messages_merge_consecutive_tool_calls() {
        let messages = wire_messages("sys", &history());
        // system, welcome, user, merged tool-call message, two tool results
        assert_eq!(messages.len(), 6);
        let call_message = &messages[3];
        assert_eq!(call_message.role, "assistant");
        let calls = call_message.tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "search_dishes");
        assert_eq!(calls[1].function.name, "search_restaurants");

        assert_eq!(messages[4].role, "tool");
        assert_eq!(messages[4].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn accumulator_collects_content_chunks() {
        let mut acc = StreamAccumulator::default();
        let lines = [
            r#"data: {"choices":[{"delta":{"content":"Te "}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"recomiendo Dino."}}]}"#,
            "data: [DONE]",
        ];
        for line in lines {
            acc.feed_line(line).expect("feed");
        }
        assert_eq!(acc.content_chunks, vec!["Te ", "recomiendo Dino."]);
        assert!(acc.done);
        assert_eq!(
            acc.finish().expect("finish"),
            ModelTurn::Final("Te recomiendo Dino.".to_string())
        );
    }

    #[test]
    fn content_alongside_tool_calls_resolves_to_tool_calls() {
        let mut acc = StreamAccumulator::default();
        acc.feed_line(r#"data: {"choices":[{"delta":{"content":"Voy a buscar."}}]}"#)
            .expect("feed");
        acc.feed_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"search_dishes","arguments":"{}"}}]}}]}"#,
        )
        .expect("feed");

        assert!(!acc.tool_calls.is_empty());
        assert!(matches!(
            acc.finish().expect("finish"),
            ModelTurn::ToolCalls(_)
        ));
    }

    #[test]
    fn accumulator_assembles_tool_call_deltas() {
        let mut acc = StreamAccumulator::default();
        let lines = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"search_dishes","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"pasta\"}"}}]}}]}"#,
            "data: [DONE]",
        ];
        for line in lines {
            acc.feed_line(line).expect("feed");
        }

        match acc.finish().expect("finish") {
            ModelTurn::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].call_id, "c1");
                assert_eq!(calls[0].name, "search_dishes");
                assert_eq!(calls[0].arguments, serde_json::json!({"query": "pasta"}));
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn accumulator_ignores_keepalive_and_blank_lines() {
        let mut acc = StreamAccumulator::default();
        acc.feed_line("").expect("feed");
        acc.feed_line(": keepalive").expect("feed");
        acc.feed_line("event: ping").expect("feed");
        assert!(acc.content_chunks.is_empty());
        assert!(acc.tool_calls.is_empty());
        assert!(!acc.done);
    }

    #[test]
    fn accumulator_rejects_malformed_event() {
        let mut acc = StreamAccumulator::default();
        assert!(matches!(
            acc.feed_line("data: {not json}"),
            Err(GuideError::Backend(_))
        ));
    }

    fn client_for(server: &MockServer) -> OpenAiChatClient {
        let config = ModelConfig {
            base_url: server.uri(),
            ..ModelConfig::default()
        };
        OpenAiChatClient::new(&config).expect("client")
    }

    fn empty_request() -> ChatRequest {
        ChatRequest {
            system_prompt: "sys".to_string(),
            history: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn streaming_tool_call_round_emits_no_content() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Voy a buscar opciones.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",",
            "\"function\":{\"name\":\"search_dishes\",\"arguments\":\"{\\\"query\\\":\\\"pasta\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let turn = client
            .complete_streaming(&empty_request(), tx)
            .await
            .expect("stream");

        assert!(matches!(turn, ModelTurn::ToolCalls(calls) if calls.len() == 1));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn streaming_final_round_delivers_content_chunks() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Te \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"recomiendo Dino.\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let turn = client
            .complete_streaming(&empty_request(), tx)
            .await
            .expect("stream");

        assert_eq!(turn, ModelTurn::Final("Te recomiendo Dino.".to_string()));
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["Te ", "recomiendo Dino."]);
    }

    #[test]
    fn unparseable_tool_arguments_are_a_backend_error() {
        let call = WireToolCall {
            id: "c1".to_string(),
            kind: "function".to_string(),
            function: WireFunctionCall {
                name: "search_dishes".to_string(),
                arguments: "{truncated".to_string(),
            },
        };
        assert!(matches!(
            parse_invocation(call),
            Err(GuideError::Backend(_))
        ));
    }
}
