use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use mesa_guide::agent::{
    Agent, ChatBackend, ChatRequest, Conversation, ModelTurn, ToolInvocation, TurnKind,
};
use mesa_guide::config::Config;
use mesa_guide::corpus::Corpus;
use mesa_guide::index::{HashingEmbedder, InMemoryIndex};
use mesa_guide::search::RetrievalService;
use mesa_guide::GuideError;

/// Plays back a fixed sequence of model turns and records every request.
struct ScriptedBackend {
    script: Mutex<VecDeque<ModelTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
    cancel_on_call: Option<CancellationToken>,
}

impl ScriptedBackend {
    fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    fn cancelling(turns: Vec<ModelTurn>, token: CancellationToken) -> Self {
        Self {
            cancel_on_call: Some(token),
            ..Self::new(turns)
        }
    }

    async fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> mesa_guide::Result<ModelTurn> {
        self.requests.lock().await.push(request.clone());
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        self.script
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| GuideError::Backend("script exhausted".to_string()))
    }
}

/// Never answers; used to exercise cancellation while awaiting the model.
struct HangingBackend {
    reached: Arc<Notify>,
}

#[async_trait]
impl ChatBackend for HangingBackend {
    async fn complete(&self, _request: &ChatRequest) -> mesa_guide::Result<ModelTurn> {
        self.reached.notify_one();
        std::future::pending().await
    }
}

async fn indexed_service() -> Arc<RetrievalService> {
    let config = Config::load(std::env::temp_dir().join("mesa-guide-nonexistent"))
        .expect("default config");
    let service = Arc::new(RetrievalService::new(
        Arc::new(InMemoryIndex::new()),
        Arc::new(HashingEmbedder::default()),
        config.search,
    ));
    service
        .load_and_index(Corpus::sample())
        .await
        .expect("index sample corpus");
    service
}

async fn agent_with(backend: Arc<dyn ChatBackend>) -> Agent {
    let config = Config::load(std::env::temp_dir().join("mesa-guide-nonexistent"))
        .expect("default config");
    Agent::new(backend, indexed_service().await, &config).expect("agent")
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolInvocation {
    ToolInvocation {
        call_id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Every tool-call turn must be followed, eventually, by exactly one result
/// with the same call id.
fn assert_calls_are_paired(convo: &Conversation) {
    let mut open: Vec<&str> = Vec::new();
    for turn in convo.turns() {
        match &turn.kind {
            TurnKind::ToolCall(invocation) => open.push(&invocation.call_id),
            TurnKind::ToolResult { call_id, .. } => {
                let position = open
                    .iter()
                    .position(|id| id == call_id)
                    .unwrap_or_else(|| panic!("result for unknown call {}", call_id));
                open.remove(position);
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unanswered tool calls: {:?}", open);
}

#[tokio::test]
async fn conversation_is_seeded_with_system_and_welcome() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let agent = agent_with(backend).await;

    let turns = agent.conversation().turns();
    assert!(matches!(&turns[0].kind, TurnKind::System { .. }));
    assert!(matches!(&turns[1].kind, TurnKind::Assistant { text } if text.contains("Hola")));
}

#[tokio::test]
async fn plain_reply_appends_user_and_assistant_turns() {
    let backend = Arc::new(ScriptedBackend::new(vec![ModelTurn::Final(
        "Te recomiendo Dino.".to_string(),
    )]));
    let mut agent = agent_with(Arc::clone(&backend) as Arc<dyn ChatBackend>).await;

    let cancel = CancellationToken::new();
    let reply = agent.respond("algo de pasta?", &cancel).await.expect("respond");
    assert_eq!(reply, "Te recomiendo Dino.");

    let visible = agent.conversation().visible();
    // welcome, user, reply
    assert_eq!(visible.len(), 3);
    assert!(matches!(&visible[1].kind, TurnKind::User { text } if text == "algo de pasta?"));
    assert!(matches!(&visible[2].kind, TurnKind::Assistant { text } if *text == reply));
}

#[tokio::test]
async fn empty_message_is_rejected_without_touching_history() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let mut agent = agent_with(backend).await;
    let before = agent.conversation().len();

    let cancel = CancellationToken::new();
    let result = agent.respond("   ", &cancel).await;
    assert!(matches!(result, Err(GuideError::InvalidInput(_))));
    assert_eq!(agent.conversation().len(), before);
}

#[tokio::test]
async fn tool_round_records_call_and_valid_result() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ModelTurn::ToolCalls(vec![tool_call(
            "c1",
            "search_dishes",
            serde_json::json!({"query": "pasta", "has_vegan": true}),
        )]),
        ModelTurn::Final("Prueba el spaghetti de Dino.".to_string()),
    ]));
    let mut agent = agent_with(Arc::clone(&backend) as Arc<dyn ChatBackend>).await;

    let cancel = CancellationToken::new();
    let reply = agent.respond("pasta vegana?", &cancel).await.expect("respond");
    assert_eq!(reply, "Prueba el spaghetti de Dino.");

    assert_calls_are_paired(agent.conversation());
    let result_body = agent
        .conversation()
        .turns()
        .iter()
        .find_map(|t| match &t.kind {
            TurnKind::ToolResult { body, is_error, .. } => Some((body.clone(), *is_error)),
            _ => None,
        })
        .expect("tool result recorded");
    assert!(!result_body.1);
    assert!(result_body.0.starts_with("<valid>"));
    assert!(result_body.0.contains("Spaghetti al pomodoro"));

    // the second round sees the tool result in its history
    let requests = backend.recorded_requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .history
        .iter()
        .any(|t| matches!(&t.kind, TurnKind::ToolResult { .. })));
}

#[tokio::test]
async fn malformed_tool_arguments_become_error_result_for_the_model() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ModelTurn::ToolCalls(vec![tool_call(
            "c1",
            "search_restaurants",
            serde_json::json!({"query": "pasta", "open_at_time": "25:99"}),
        )]),
        ModelTurn::Final("Disculpa, lo intento de otra forma.".to_string()),
    ]));
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let reply = agent
        .respond("sitios abiertos a las 25:99?", &cancel)
        .await
        .expect("respond");
    assert_eq!(reply, "Disculpa, lo intento de otra forma.");

    assert_calls_are_paired(agent.conversation());
    let (body, is_error) = agent
        .conversation()
        .turns()
        .iter()
        .find_map(|t| match &t.kind {
            TurnKind::ToolResult { body, is_error, .. } => Some((body.clone(), *is_error)),
            _ => None,
        })
        .expect("tool result recorded");
    assert!(is_error);
    assert!(body.starts_with("Error:"));
}

#[tokio::test]
async fn unknown_restaurant_in_walking_time_is_recoverable() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ModelTurn::ToolCalls(vec![tool_call(
            "c1",
            "get_walking_time",
            serde_json::json!({"from_restaurant": "Dino", "to_restaurant": "Nowhere"}),
        )]),
        ModelTurn::Final("No encuentro ese restaurante.".to_string()),
    ]));
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let reply = agent.respond("cuanto se tarda?", &cancel).await.expect("respond");
    assert_eq!(reply, "No encuentro ese restaurante.");
    assert_calls_are_paired(agent.conversation());
}

#[tokio::test]
async fn exhausted_tool_budget_falls_back_to_an_apology() {
    let rounds = Config::load(std::env::temp_dir().join("mesa-guide-nonexistent"))
        .expect("config")
        .model
        .max_tool_rounds as usize;
    let script: Vec<ModelTurn> = (0..rounds + 2)
        .map(|i| {
            ModelTurn::ToolCalls(vec![tool_call(
                &format!("c{}", i),
                "search_dishes",
                serde_json::json!({"query": "pasta"}),
            )])
        })
        .collect();
    let backend = Arc::new(ScriptedBackend::new(script));
    let mut agent = agent_with(Arc::clone(&backend) as Arc<dyn ChatBackend>).await;

    let cancel = CancellationToken::new();
    let reply = agent.respond("pasta", &cancel).await.expect("respond");
    assert!(reply.starts_with("Lo siento"));

    // the model was asked exactly max_tool_rounds times
    assert_eq!(backend.recorded_requests().await.len(), rounds);
    assert_calls_are_paired(agent.conversation());
    let last = agent.conversation().turns().last().expect("turns");
    assert!(matches!(&last.kind, TurnKind::Assistant { text } if text == &reply));
}

#[tokio::test]
async fn streaming_delivers_chunks_and_full_reply() {
    let backend = Arc::new(ScriptedBackend::new(vec![ModelTurn::Final(
        "Te recomiendo Corso Iluzione.".to_string(),
    )]));
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply = agent
        .respond_streaming("carbonara?", tx, &cancel)
        .await
        .expect("respond");

    let mut streamed = String::new();
    while let Ok(chunk) = rx.try_recv() {
        streamed.push_str(&chunk);
    }
    assert_eq!(streamed, reply);
    assert_eq!(reply, "Te recomiendo Corso Iluzione.");
}

#[tokio::test]
async fn streaming_emits_only_the_final_reply_across_tool_rounds() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ModelTurn::ToolCalls(vec![tool_call(
            "c1",
            "search_dishes",
            serde_json::json!({"query": "pasta"}),
        )]),
        ModelTurn::Final("Prueba el spaghetti de Dino.".to_string()),
    ]));
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply = agent
        .respond_streaming("pasta?", tx, &cancel)
        .await
        .expect("respond");

    // the tool round contributes nothing to the channel
    let mut streamed = String::new();
    while let Ok(chunk) = rx.try_recv() {
        streamed.push_str(&chunk);
    }
    assert_eq!(streamed, reply);
    assert_eq!(reply, "Prueba el spaghetti de Dino.");
}

#[tokio::test]
async fn exhausted_budget_streams_the_fallback_reply() {
    let rounds = Config::load(std::env::temp_dir().join("mesa-guide-nonexistent"))
        .expect("config")
        .model
        .max_tool_rounds as usize;
    let script: Vec<ModelTurn> = (0..rounds + 1)
        .map(|i| {
            ModelTurn::ToolCalls(vec![tool_call(
                &format!("c{}", i),
                "search_dishes",
                serde_json::json!({"query": "pasta"}),
            )])
        })
        .collect();
    let backend = Arc::new(ScriptedBackend::new(script));
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reply = agent
        .respond_streaming("pasta", tx, &cancel)
        .await
        .expect("respond");
    assert!(reply.starts_with("Lo siento"));

    // a streaming caller reads the apology off the channel too
    let mut streamed = String::new();
    while let Ok(chunk) = rx.try_recv() {
        streamed.push_str(&chunk);
    }
    assert_eq!(streamed, reply);
}

#[tokio::test]
async fn cancellation_while_awaiting_model_appends_nothing_after_user_turn() {
    let reached = Arc::new(Notify::new());
    let backend = Arc::new(HangingBackend {
        reached: Arc::clone(&reached),
    });
    let mut agent = agent_with(backend).await;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let (result, ()) = tokio::join!(agent.respond("pasta", &cancel), async move {
        reached.notified().await;
        canceller.cancel();
    });
    assert!(matches!(result, Err(GuideError::Cancelled)));

    let last = agent.conversation().turns().last().expect("turns");
    assert!(matches!(&last.kind, TurnKind::User { text } if text == "pasta"));
}

#[tokio::test]
async fn cancellation_during_tool_round_pairs_aborted_results() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(ScriptedBackend::cancelling(
        vec![ModelTurn::ToolCalls(vec![
            tool_call("c1", "search_dishes", serde_json::json!({"query": "pasta"})),
            tool_call("c2", "search_restaurants", serde_json::json!({"query": "pasta"})),
        ])],
        cancel.clone(),
    ));
    let mut agent = agent_with(backend).await;

    let result = agent.respond("pasta", &cancel).await;
    assert!(matches!(result, Err(GuideError::Cancelled)));

    // both invocations still got a (aborted) result
    assert_calls_are_paired(agent.conversation());
    let aborted: Vec<bool> = agent
        .conversation()
        .turns()
        .iter()
        .filter_map(|t| match &t.kind {
            TurnKind::ToolResult { is_error, .. } => Some(*is_error),
            _ => None,
        })
        .collect();
    assert_eq!(aborted, vec![true, true]);
}

#[tokio::test]
async fn each_round_gets_a_fresh_system_prompt() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        ModelTurn::ToolCalls(vec![tool_call(
            "c1",
            "search_dishes",
            serde_json::json!({"query": "pasta"}),
        )]),
        ModelTurn::Final("Listo.".to_string()),
    ]));
    let mut agent = agent_with(Arc::clone(&backend) as Arc<dyn ChatBackend>).await;

    let cancel = CancellationToken::new();
    agent.respond("pasta", &cancel).await.expect("respond");

    let requests = backend.recorded_requests().await;
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert!(request.system_prompt.contains("asistente virtual"));
        assert!(!request.tools.is_empty());
    }
}
