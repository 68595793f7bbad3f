use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::types::{AssistantState, Message, UserMessage};
use crate::config::ChatConfig;
use crate::models::{ModelCatalog, ModelPricing};
use crate::utils::log_warn;

/// Provider-ready request plus the bits the local simulator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model_id: String,
    pub body: Value,
    pub last_user_text: String,
    pub prompt_text: String,
    pub image_count: usize,
    /// Resolved from the live catalog, so local pricing matches session accounting.
    pub pricing: ModelPricing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

fn user_content(message: &UserMessage, multimodal: bool) -> Value {
    if message.attachments.is_empty() {
        return Value::String(message.content.clone());
    }
    if !multimodal {
        log_warn(
            "chat",
            format!(
                "dropping {} attachment(s) from {}: model has no image input",
                message.attachments.len(),
                message.id
            ),
        );
        return Value::String(message.content.clone());
    }

    let mut parts = Vec::with_capacity(message.attachments.len() + 1);
    let text = message.content.trim();
    if !text.is_empty() {
        parts.push(json!({ "type": "text", "text": text }));
    }
    for attachment in &message.attachments {
        parts.push(json!({
            "type": "image_url",
            "image_url": { "url": attachment.url, "detail": "auto" },
        }));
    }
    Value::Array(parts)
}

/// Translates the system prompt and `history` into an OpenAI-compatible body.
pub fn build_request(
    model_id: &str,
    catalog: &ModelCatalog,
    config: &ChatConfig,
    system_prompt: &str,
    history: &[Message],
) -> ChatRequest {
    let multimodal = catalog.is_multimodal(model_id);
    let mut messages = Vec::with_capacity(history.len() + 1);
    let mut prompt_text = String::new();
    let mut image_count = 0usize;
    let mut last_user_text = String::new();

    if !system_prompt.is_empty() {
        messages.push(json!({ "role": "system", "content": system_prompt }));
        prompt_text.push_str(system_prompt);
    }

    for message in history {
        match message {
            Message::System(m) => {
                messages.push(json!({ "role": "system", "content": m.content }));
                prompt_text.push_str(&m.content);
            }
            Message::User(m) => {
                messages.push(json!({ "role": "user", "content": user_content(m, multimodal) }));
                prompt_text.push_str(&m.content);
                if multimodal {
                    image_count += m.attachments.len();
                }
                last_user_text = m.content.clone();
            }
            Message::Assistant(m) => {
                if m.state != AssistantState::Complete {
                    continue;
                }
                messages.push(json!({ "role": "assistant", "content": m.content }));
                prompt_text.push_str(&m.content);
            }
        }
    }

    let mut body = json!({
        "model": model_id,
        "messages": messages,
        "stream": false,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "top_p": config.top_p,
        "frequency_penalty": config.frequency_penalty,
    });
    if catalog.is_thinking(model_id) {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("enable_thinking".into(), Value::Bool(true));
            obj.insert("thinking_budget".into(), json!(config.thinking_budget));
        }
    }

    ChatRequest {
        model_id: model_id.to_string(),
        body,
        last_user_text,
        prompt_text,
        image_count,
        pricing: catalog.pricing_or_fallback(model_id),
    }
}

/// Finds token usage anywhere in a response, accepting the common key spellings.
pub fn extract_usage(data: &Value) -> Option<UsageSummary> {
    match data {
        Value::Object(map) => {
            if let Some(Value::Object(obj)) = map.get("usage") {
                if let Some(summary) = usage_from_map(obj) {
                    return Some(summary);
                }
            }
            usage_from_map(map)
        }
        _ => None,
    }
}

fn usage_from_map(map: &Map<String, Value>) -> Option<UsageSummary> {
    fn take_first(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
        keys.iter()
            .filter_map(|key| map.get(*key))
            .find_map(parse_token_value)
    }

    let prompt_tokens = take_first(
        map,
        &["prompt_tokens", "input_tokens", "promptTokens", "inputTokens"],
    );
    let completion_tokens = take_first(
        map,
        &[
            "completion_tokens",
            "output_tokens",
            "completionTokens",
            "outputTokens",
        ],
    );
    let total_tokens = take_first(map, &["total_tokens", "totalTokens"]).or_else(|| {
        match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        }
    });

    if prompt_tokens.is_none() && completion_tokens.is_none() && total_tokens.is_none() {
        None
    } else {
        Some(UsageSummary {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        })
    }
}

fn parse_token_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(num) => num.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub fn extract_error_message(payload: &Value) -> Option<String> {
    let message = match payload.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| map.get("type").and_then(Value::as_str))
            .map(str::to_string),
        Some(other) => Some(other.to_string()),
        None => payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::attachments::png_data_url;
    use crate::chat_manager::types::{AssistantMessage, Attachment, TokenUsage};

    fn user(id: &str, text: &str, attachments: Vec<Attachment>) -> Message {
        Message::User(UserMessage {
            id: id.into(),
            content: text.into(),
            attachments,
            usage: TokenUsage::default(),
            cost: None,
            created_at: 0,
        })
    }

    fn assistant(id: &str, text: &str, state: AssistantState) -> Message {
        let mut msg = AssistantMessage::placeholder(id.into(), false, 0);
        msg.content = text.into();
        msg.state = state;
        Message::Assistant(msg)
    }

    #[test]
    fn test_system_prompt_leads_and_errors_are_skipped() {
        let history = vec![
            user("u1", "hello", vec![]),
            assistant("a1", "Sorry", AssistantState::Error),
            user("u2", "again", vec![]),
            assistant("a2", "hi!", AssistantState::Complete),
        ];
        let req = build_request(
            "deepseek-ai/DeepSeek-V3",
            &ModelCatalog::default(),
            &ChatConfig::default(),
            "be nice",
            &history,
        );
        let msgs = req.body["messages"].as_array().unwrap();
        let roles: Vec<&str> = msgs.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "user", "assistant"]);
        assert_eq!(msgs[0]["content"], "be nice");
        assert_eq!(req.body["stream"], false);
        assert_eq!(req.body["max_tokens"], 2048);
        assert!(req.body.get("enable_thinking").is_none());
        assert_eq!(req.last_user_text, "again");
    }

    #[test]
    fn test_multimodal_model_gets_structured_parts() {
        let history = vec![user(
            "u1",
            "  what is this?  ",
            vec![Attachment::image(png_data_url())],
        )];
        let req = build_request(
            "Qwen/Qwen2.5-VL-72B-Instruct",
            &ModelCatalog::default(),
            &ChatConfig::default(),
            "sys",
            &history,
        );
        let parts = req.body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "what is this?");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["detail"], "auto");
        assert_eq!(req.image_count, 1);
    }

    #[test]
    fn test_text_model_never_receives_images() {
        let history = vec![user("u1", "look", vec![Attachment::image(png_data_url())])];
        let req = build_request(
            "deepseek-ai/DeepSeek-V3",
            &ModelCatalog::default(),
            &ChatConfig::default(),
            "sys",
            &history,
        );
        assert_eq!(req.body["messages"][1]["content"], "look");
        assert!(!req.body.to_string().contains("data:image"));
        assert_eq!(req.image_count, 0);
    }

    #[test]
    fn test_thinking_model_adds_budget() {
        let req = build_request(
            "deepseek-ai/DeepSeek-R1",
            &ModelCatalog::default(),
            &ChatConfig::default(),
            "sys",
            &[user("u1", "why?", vec![])],
        );
        assert_eq!(req.body["enable_thinking"], true);
        assert_eq!(req.body["thinking_budget"], 4096);
    }

    #[test]
    fn test_extract_usage_aliases() {
        let usage = extract_usage(&json!({
            "usage": {"prompt_tokens": 11129, "completion_tokens": "126"}
        }))
        .unwrap();
        assert_eq!(usage.prompt_tokens, Some(11129));
        assert_eq!(usage.completion_tokens, Some(126));
        assert_eq!(usage.total_tokens, Some(11255));

        let camel = extract_usage(&json!({"inputTokens": 3, "outputTokens": 4, "totalTokens": 9}));
        assert_eq!(camel.unwrap().total_tokens, Some(9));
        assert!(extract_usage(&json!({"choices": []})).is_none());
    }

    #[test]
    fn test_extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(&json!({"error": {"message": " quota exceeded "}})),
            Some("quota exceeded".into())
        );
        assert_eq!(
            extract_error_message(&json!({"message": "Invalid token"})),
            Some("Invalid token".into())
        );
        assert_eq!(extract_error_message(&json!({"code": 20015})), None);
    }
}
