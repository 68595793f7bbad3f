use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::MessageStore;

/// `None` means "not yet known", which is distinct from an authoritative zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    /// External http(s) reference or a `data:image/...;base64,` payload.
    pub url: String,
    pub media_kind: MediaKind,
    #[serde(default)]
    pub validated: bool,
}

impl Attachment {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            id: crate::utils::new_message_id(),
            url: url.into(),
            media_kind: MediaKind::Image,
            validated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost: Option<f64>,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessage {
    pub id: String,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AssistantState {
    Streaming,
    /// Streaming again after a user-requested retry.
    Retrying,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkChannel {
    Reasoning,
    Final,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub reasoning_content: String,
    #[serde(default)]
    pub reasoning_expanded: bool,
    #[serde(default)]
    pub reasoning_user_toggled: bool,
    #[serde(default)]
    pub reasoning_auto_expanded: bool,
    #[serde(default)]
    pub thinking_model: bool,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub raw_usage: Option<Value>,
    pub state: AssistantState,
    pub created_at: u64,
    /// When the current streaming attempt began; a retry restarts it.
    #[serde(default)]
    pub streaming_since: u64,
}

impl AssistantMessage {
    pub fn placeholder(id: String, thinking_model: bool, created_at: u64) -> Self {
        Self {
            id,
            content: String::new(),
            reasoning_content: String::new(),
            reasoning_expanded: thinking_model,
            reasoning_user_toggled: false,
            reasoning_auto_expanded: false,
            thinking_model,
            usage: TokenUsage::default(),
            cost: None,
            raw_usage: None,
            state: AssistantState::Streaming,
            created_at,
            streaming_since: created_at,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, AssistantState::Streaming | AssistantState::Retrying)
    }

    pub fn is_error(&self) -> bool {
        self.state == AssistantState::Error
    }

    pub fn is_retrying(&self) -> bool {
        self.state == AssistantState::Retrying
    }

    /// Appends streamed text. Returns false when the message is no longer streaming.
    pub fn append_chunk(&mut self, channel: ChunkChannel, text: &str) -> bool {
        if !self.is_streaming() {
            return false;
        }
        match channel {
            ChunkChannel::Final => self.content.push_str(text),
            ChunkChannel::Reasoning => {
                self.reasoning_content.push_str(text);
                if self.thinking_model
                    && !text.is_empty()
                    && !self.reasoning_expanded
                    && !self.reasoning_user_toggled
                    && !self.reasoning_auto_expanded
                {
                    self.reasoning_expanded = true;
                    self.reasoning_auto_expanded = true;
                }
            }
        }
        true
    }

    pub fn complete(&mut self, usage: TokenUsage, cost: f64, raw_usage: Option<Value>) {
        self.usage = usage;
        self.cost = Some(cost);
        self.raw_usage = raw_usage;
        self.state = AssistantState::Complete;
    }

    pub fn fail(&mut self, apology: &str) {
        self.content = apology.to_string();
        self.state = AssistantState::Error;
    }

    /// Clears buffers and usage, keeping the id and creation time.
    pub fn begin_retry(&mut self, thinking_model: bool, now: u64) {
        self.content.clear();
        self.reasoning_content.clear();
        self.usage = TokenUsage::default();
        self.cost = None;
        self.raw_usage = None;
        self.thinking_model = thinking_model;
        if !self.reasoning_user_toggled {
            self.reasoning_expanded = thinking_model;
        }
        self.reasoning_auto_expanded = false;
        self.streaming_since = now;
        self.state = AssistantState::Retrying;
    }

    pub fn set_reasoning_expanded(&mut self, expanded: bool) {
        self.reasoning_expanded = expanded;
        self.reasoning_user_toggled = true;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::User(m) => &m.id,
            Message::Assistant(m) => &m.id,
            Message::System(m) => &m.id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::System(_) => "system",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User(m) => &m.content,
            Message::Assistant(m) => &m.content,
            Message::System(m) => &m.content,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            Message::User(m) => m.created_at,
            Message::Assistant(m) => m.created_at,
            Message::System(m) => m.created_at,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            Message::User(m) => m.usage,
            Message::Assistant(m) => m.usage,
            Message::System(_) => TokenUsage::default(),
        }
    }

    pub fn cost(&self) -> Option<f64> {
        match self {
            Message::User(m) => m.cost,
            Message::Assistant(m) => m.cost,
            Message::System(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Message::Assistant(m) if m.is_streaming())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Assistant(m) if m.is_error())
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Message::User(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub total_tokens: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub model_id: String,
    pub scenario_id: String,
    #[serde(default)]
    pub messages: MessageStore,
    #[serde(default)]
    pub totals: SessionTotals,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Session {
    pub fn new(id: String, model_id: String, scenario_id: String, now: u64) -> Self {
        Self {
            id,
            model_id,
            scenario_id,
            messages: MessageStore::default(),
            totals: SessionTotals::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholder_expansion_follows_model_class() {
        assert!(AssistantMessage::placeholder("a".into(), true, 0).reasoning_expanded);
        assert!(!AssistantMessage::placeholder("b".into(), false, 0).reasoning_expanded);
    }

    #[test]
    fn test_reasoning_auto_expands_once() {
        let mut msg = AssistantMessage::placeholder("a".into(), true, 0);
        msg.reasoning_expanded = false;
        msg.append_chunk(ChunkChannel::Reasoning, "");
        assert!(!msg.reasoning_expanded);
        msg.append_chunk(ChunkChannel::Reasoning, "t");
        assert!(msg.reasoning_expanded);

        msg.set_reasoning_expanded(false);
        msg.append_chunk(ChunkChannel::Reasoning, "more");
        assert!(!msg.reasoning_expanded);
        assert_eq!(msg.reasoning_content, "tmore");
    }

    #[test]
    fn test_retry_restarts_streaming_clock() {
        let mut msg = AssistantMessage::placeholder("a".into(), false, 1_000);
        msg.fail("nope");
        msg.begin_retry(false, 61_000);
        assert_eq!(msg.created_at, 1_000);
        assert_eq!(msg.streaming_since, 61_000);
        assert!(msg.is_retrying());
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_chunks_rejected_after_terminal_state() {
        let mut msg = AssistantMessage::placeholder("a".into(), false, 0);
        assert!(msg.append_chunk(ChunkChannel::Final, "hi"));
        msg.complete(TokenUsage::default(), 0.0, None);
        assert!(!msg.append_chunk(ChunkChannel::Final, " there"));
        assert_eq!(msg.content, "hi");
        assert!(!msg.is_streaming());
    }

    #[test]
    fn test_message_serializes_with_role_tag() {
        let msg = Message::User(UserMessage {
            id: "u1".into(),
            content: "hello".into(),
            attachments: vec![],
            usage: TokenUsage::default(),
            cost: None,
            created_at: 1,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], json!("user"));
        assert_eq!(value["createdAt"], json!(1));
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
