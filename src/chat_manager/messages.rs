use serde::{Deserialize, Serialize};

use super::types::{AssistantMessage, Message, UserMessage};
use crate::error::ChatError;

/// Ordered messages of the active session.
/// Decoding goes through `from_messages`, so stored duplicates are dropped there too.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<Message>", into = "Vec<Message>")]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl From<Vec<Message>> for MessageStore {
    fn from(messages: Vec<Message>) -> Self {
        Self::from_messages(messages)
    }
}

impl From<MessageStore> for Vec<Message> {
    fn from(store: MessageStore) -> Self {
        store.messages
    }
}

impl MessageStore {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut store = Self::default();
        for message in messages {
            if let Err(err) = store.append(message) {
                crate::utils::log_warn("chat", format!("dropping message: {}", err));
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Rejects ids already present.
    pub fn append(&mut self, message: Message) -> Result<(), ChatError> {
        if self.position(message.id()).is_some() {
            return Err(ChatError::Storage(format!(
                "duplicate message id {}",
                message.id()
            )));
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id() == id)
    }

    /// Applies `f` to the message with `id`.
    pub fn patch<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Result<R, ChatError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or_else(|| ChatError::MessageNotFound(id.to_string()))?;
        Ok(f(message))
    }

    pub fn patch_assistant<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut AssistantMessage) -> R,
    ) -> Result<R, ChatError> {
        self.patch(id, |message| match message {
            Message::Assistant(assistant) => Ok(f(assistant)),
            _ => Err(ChatError::MessageNotFound(id.to_string())),
        })?
    }

    pub fn patch_user<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut UserMessage) -> R,
    ) -> Result<R, ChatError> {
        self.patch(id, |message| match message {
            Message::User(user) => Ok(f(user)),
            _ => Err(ChatError::MessageNotFound(id.to_string())),
        })?
    }

    pub fn last_user_message(&self) -> Option<&UserMessage> {
        self.messages.iter().rev().find_map(Message::as_user)
    }

    /// The most recent user message strictly before `index`.
    pub fn last_user_before(&self, index: usize) -> Option<(usize, &UserMessage)> {
        self.messages[..index.min(self.messages.len())]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, m)| m.as_user().map(|u| (i, u)))
    }

    pub fn first_user_message(&self) -> Option<&UserMessage> {
        self.messages.iter().find_map(Message::as_user)
    }

    pub fn error_messages(&self, now_ms: u64, stuck_timeout_ms: u64) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| super::classify::is_error_message(m, now_ms, stuck_timeout_ms))
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::types::{ChunkChannel, TokenUsage};

    fn user(id: &str, text: &str) -> Message {
        Message::User(UserMessage {
            id: id.into(),
            content: text.into(),
            attachments: vec![],
            usage: TokenUsage::default(),
            cost: None,
            created_at: 0,
        })
    }

    fn assistant(id: &str) -> Message {
        Message::Assistant(AssistantMessage::placeholder(id.into(), false, 0))
    }

    #[test]
    fn test_append_rejects_duplicate_ids() {
        let mut store = MessageStore::default();
        store.append(user("u1", "hi")).unwrap();
        assert!(store.append(user("u1", "again")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_decoding_drops_repeated_ids() {
        let raw = serde_json::to_value(vec![user("u1", "first"), user("u1", "copy"), assistant("a1")])
            .unwrap();
        let store: MessageStore = serde_json::from_value(raw).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("u1").unwrap().content(), "first");

        let back = serde_json::to_value(&store).unwrap();
        assert_eq!(back.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_patch_assistant_requires_assistant_role() {
        let mut store = MessageStore::default();
        store.append(user("u1", "hi")).unwrap();
        store.append(assistant("a1")).unwrap();

        store
            .patch_assistant("a1", |a| a.append_chunk(ChunkChannel::Final, "ok"))
            .unwrap();
        assert_eq!(store.get("a1").unwrap().content(), "ok");
        assert!(store.patch_assistant("u1", |_| ()).is_err());
        assert_eq!(
            store.patch_assistant("nope", |_| ()).unwrap_err(),
            ChatError::MessageNotFound("nope".into())
        );
    }

    #[test]
    fn test_last_user_before_index() {
        let mut store = MessageStore::default();
        store.append(user("u1", "first")).unwrap();
        store.append(assistant("a1")).unwrap();
        store.append(user("u2", "second")).unwrap();
        store.append(assistant("a2")).unwrap();

        let (idx, found) = store.last_user_before(3).unwrap();
        assert_eq!((idx, found.id.as_str()), (2, "u2"));
        let (idx, found) = store.last_user_before(2).unwrap();
        assert_eq!((idx, found.id.as_str()), (0, "u1"));
        assert!(store.last_user_before(0).is_none());
        assert_eq!(store.last_user_message().unwrap().id, "u2");
    }

    #[test]
    fn test_streaming_content_is_monotonic() {
        let mut store = MessageStore::default();
        store.append(assistant("a1")).unwrap();
        let mut last_len = 0;
        for chunk in ["a", "", "bc", "def"] {
            store
                .patch_assistant("a1", |a| a.append_chunk(ChunkChannel::Final, chunk))
                .unwrap();
            let len = store.get("a1").unwrap().content().len();
            assert!(len >= last_len);
            last_len = len;
        }
        assert_eq!(last_len, 6);
    }
}
