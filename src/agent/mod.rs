//! The conversational agent: transcript, prompt synthesis, tool dispatch.
//!
//! Each user message runs a bounded tool loop: ask the model, execute any
//! tool calls it requests, feed the results back, repeat until it answers in
//! text or the round budget runs out. Tool failures the model can fix (bad
//! arguments, unknown restaurant) become error results instead of aborting
//! the turn.

pub mod backend;
pub mod convo;
pub mod prompt;
pub mod tools;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, LocaleConfig};
use crate::search::RetrievalService;
use crate::{GuideError, Result};

pub use backend::{ChatBackend, ChatRequest, ModelTurn, OpenAiChatClient};
pub use convo::{Conversation, ToolInvocation, Turn, TurnKind};
pub use tools::{ToolDefinition, ToolExecutor};

/// Reply used when the tool loop hits its round budget without a final
/// answer.
const FALLBACK_REPLY: &str = "Lo siento, no he podido completar la b\u{fa}squeda en este \
momento. \u{bf}Puedes reformular tu pregunta o darme un poco m\u{e1}s de detalle?";

/// Marker body paired with tool calls whose execution was cancelled, so the
/// transcript never holds an unanswered invocation.
const ABORTED_RESULT: &str = "aborted: request cancelled before this tool ran";

fn is_recoverable(error: &GuideError) -> bool {
    matches!(
        error,
        GuideError::InvalidToolArguments { .. }
            | GuideError::RestaurantNotFound { .. }
            | GuideError::NotFound { .. }
            | GuideError::InvalidInput(_)
    )
}

pub struct Agent {
    backend: Arc<dyn ChatBackend>,
    executor: ToolExecutor,
    locale: LocaleConfig,
    max_tool_rounds: u32,
    tools: Vec<ToolDefinition>,
    conversation: Conversation,
}

impl Agent {
    /// Build an agent over an indexed retrieval service. The conversation is
    /// seeded with the system turn and the scripted greeting.
    #[inline]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        service: Arc<RetrievalService>,
        config: &Config,
    ) -> Result<Self> {
        let locale = config.locale.clone();
        let tz = locale.tz().map_err(|e| GuideError::Config(e.to_string()))?;
        let conversation = Conversation::seeded(
            prompt::system_prompt(&locale, Utc::now().with_timezone(&tz)),
            prompt::WELCOME.to_string(),
        );

        Ok(Self {
            backend,
            executor: ToolExecutor::new(service, locale.clone()),
            locale,
            max_tool_rounds: config.model.max_tool_rounds,
            tools: tools::tool_definitions(),
            conversation,
        })
    }

    /// The full transcript so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send a user message and wait for the complete reply.
    pub async fn respond(&mut self, message: &str, cancel: &CancellationToken) -> Result<String> {
        self.run(message, None, cancel).await
    }

    /// Send a user message, streaming reply text on `chunks` as it arrives.
    /// The returned string is the complete reply.
    pub async fn respond_streaming(
        &mut self,
        message: &str,
        chunks: mpsc::UnboundedSender<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.run(message, Some(chunks), cancel).await
    }

    async fn run(
        &mut self,
        message: &str,
        chunks: Option<mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if message.trim().is_empty() {
            return Err(GuideError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        self.conversation.push_user(message);

        match self.run_rounds(chunks.as_ref(), cancel).await {
            Ok(reply) => Ok(reply),
            Err(GuideError::ToolLoopExceeded { rounds }) => {
                warn!(rounds, "Tool loop budget exhausted, sending fallback reply");
                self.conversation.push_assistant(FALLBACK_REPLY);
                // streaming callers read the reply off the channel
                if let Some(sender) = &chunks {
                    let _ = sender.send(FALLBACK_REPLY.to_string());
                }
                Ok(FALLBACK_REPLY.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_rounds(
        &mut self,
        chunks: Option<&mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let tz = self
            .locale
            .tz()
            .map_err(|e| GuideError::Config(e.to_string()))?;

        for round in 0..self.max_tool_rounds {
            if cancel.is_cancelled() {
                return Err(GuideError::Cancelled);
            }

            // the system turn is synthesized fresh for every round
            let request = ChatRequest {
                system_prompt: prompt::system_prompt(&self.locale, Utc::now().with_timezone(&tz)),
                history: self.conversation.turns().to_vec(),
                tools: self.tools.clone(),
            };

            let turn = tokio::select! {
                () = cancel.cancelled() => return Err(GuideError::Cancelled),
                turn = self.complete(&request, chunks) => turn?,
            };

            match turn {
                ModelTurn::Final(text) => {
                    self.conversation.push_assistant(text.clone());
                    return Ok(text);
                }
                ModelTurn::ToolCalls(calls) => {
                    debug!(round, calls = calls.len(), "Model requested tool calls");
                    for call in &calls {
                        self.conversation.push_tool_call(call.clone());
                    }
                    self.execute_calls(&calls, cancel).await?;
                }
            }
        }

        Err(GuideError::ToolLoopExceeded {
            rounds: self.max_tool_rounds,
        })
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        chunks: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ModelTurn> {
        match chunks {
            Some(sender) => self.backend.complete_streaming(request, sender.clone()).await,
            None => self.backend.complete(request).await,
        }
    }

    /// Execute each call in order, recording one result per invocation. On
    /// cancellation or a non-recoverable failure the remaining calls get
    /// aborted-result markers before the error propagates.
    async fn execute_calls(
        &mut self,
        calls: &[ToolInvocation],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut failure: Option<GuideError> = None;

        for call in calls {
            if failure.is_some() || cancel.is_cancelled() {
                self.conversation
                    .push_tool_result(&call.call_id, &call.name, ABORTED_RESULT, true);
                continue;
            }

            match self.executor.execute(call).await {
                Ok(body) => {
                    self.conversation
                        .push_tool_result(&call.call_id, &call.name, body, false);
                }
                Err(e) if is_recoverable(&e) => {
                    debug!(tool = %call.name, error = %e, "Tool call failed, reporting to model");
                    self.conversation.push_tool_result(
                        &call.call_id,
                        &call.name,
                        format!("Error: {}", e),
                        true,
                    );
                }
                Err(e) => {
                    self.conversation.push_tool_result(
                        &call.call_id,
                        &call.name,
                        format!("Error: {}", e),
                        true,
                    );
                    failure = Some(e);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(GuideError::Cancelled);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
