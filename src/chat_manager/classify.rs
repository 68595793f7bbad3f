use super::types::{AssistantMessage, Message};

/// Shown in place of the reply when an exchange fails.
pub const APOLOGY_TEXT: &str = "Sorry, something went wrong. Please try again.";

const FAILURE_PHRASES: &[&str] = &[
    "something went wrong",
    "api call failed",
    "request failed",
    "network error",
    "抱歉，发生了错误",
    "API调用失败",
    "请求失败",
    "网络请求失败",
];

fn contains_failure_phrase(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    FAILURE_PHRASES.iter().any(|p| lowered.contains(p) || text.contains(p))
}

fn assistant_is_error(message: &AssistantMessage, now_ms: u64, stuck_timeout_ms: u64) -> bool {
    if message.is_error() {
        return true;
    }
    let empty = message.content.trim().is_empty() && message.reasoning_content.trim().is_empty();
    if message.is_streaming() {
        let since = message.streaming_since.max(message.created_at);
        if empty && now_ms.saturating_sub(since) > stuck_timeout_ms {
            return true;
        }
    } else if empty {
        return true;
    }
    contains_failure_phrase(&message.content) || contains_failure_phrase(&message.reasoning_content)
}

/// Whether the retry affordance should be shown for `message`. Recomputed on every read.
pub fn is_error_message(message: &Message, now_ms: u64, stuck_timeout_ms: u64) -> bool {
    match message {
        Message::Assistant(assistant) => assistant_is_error(assistant, now_ms, stuck_timeout_ms),
        _ => false,
    }
}
