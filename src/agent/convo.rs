//! Append-only conversation transcript.

use serde::{Deserialize, Serialize};

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// What a single turn contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnKind {
    System { text: String },
    User { text: String },
    Assistant { text: String },
    ToolCall(ToolInvocation),
    ToolResult {
        call_id: String,
        name: String,
        body: String,
        is_error: bool,
    },
}

/// One transcript entry. `seq` increases monotonically across the whole
/// conversation and never resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: TurnKind,
}

/// The full transcript. Turns are only ever appended; every tool invocation
/// the model makes is recorded next to its result so the history always
/// replays cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
    next_seq: u64,
}

impl Conversation {
    /// Start a conversation seeded with the system turn and the assistant's
    /// scripted greeting.
    #[inline]
    pub fn seeded(system_prompt: String, welcome: String) -> Self {
        let mut convo = Self::default();
        convo.push(TurnKind::System {
            text: system_prompt,
        });
        convo.push(TurnKind::Assistant { text: welcome });
        convo
    }

    #[inline]
    pub fn push(&mut self, kind: TurnKind) -> &Turn {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.turns.push(Turn { seq, kind });
        self.turns.last().expect("just pushed")
    }

    #[inline]
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(TurnKind::User { text: text.into() });
    }

    #[inline]
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(TurnKind::Assistant { text: text.into() });
    }

    #[inline]
    pub fn push_tool_call(&mut self, invocation: ToolInvocation) {
        self.push(TurnKind::ToolCall(invocation));
    }

    #[inline]
    pub fn push_tool_result(
        &mut self,
        call_id: impl Into<String>,
        name: impl Into<String>,
        body: impl Into<String>,
        is_error: bool,
    ) {
        self.push(TurnKind::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            body: body.into(),
            is_error,
        });
    }

    /// The complete transcript, tool plumbing included.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The user-facing view: user and assistant text only.
    #[inline]
    pub fn visible(&self) -> Vec<&Turn> {
        self.turns
            .iter()
            .filter(|t| matches!(t.kind, TurnKind::User { .. } | TurnKind::Assistant { .. }))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_conversation_has_system_then_welcome() {
        let convo = Conversation::seeded("sys".to_string(), "hola".to_string());
        assert_eq!(convo.len(), 2);
        assert!(matches!(&convo.turns()[0].kind, TurnKind::System { text } if text == "sys"));
        assert!(matches!(&convo.turns()[1].kind, TurnKind::Assistant { text } if text == "hola"));
    }

    #[test]
    fn seq_is_monotonic() {
        let mut convo = Conversation::seeded("sys".to_string(), "hola".to_string());
        convo.push_user("hi");
        convo.push_assistant("hello");
        let seqs: Vec<u64> = convo.turns().iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn visible_hides_tool_plumbing() {
        let mut convo = Conversation::seeded("sys".to_string(), "hola".to_string());
        convo.push_user("pasta?");
        convo.push_tool_call(ToolInvocation {
            call_id: "c1".to_string(),
            name: "search_dishes".to_string(),
            arguments: serde_json::json!({"query": "pasta"}),
        });
        convo.push_tool_result("c1", "search_dishes", "<valid>\n</valid>", false);
        convo.push_assistant("Te recomiendo Dino.");

        let visible = convo.visible();
        assert_eq!(visible.len(), 3);
        assert!(visible
            .iter()
            .all(|t| matches!(t.kind, TurnKind::User { .. } | TurnKind::Assistant { .. })));
    }
}
