use serde_json::Value;
use std::time::Duration;

use super::playback::play_back;
use super::{build_client, CompletionUsage, EventSink, Transport, TransportHandle};
use crate::chat_manager::request::{extract_error_message, extract_usage, ChatRequest};
use crate::chat_manager::types::ChunkChannel;
use crate::config::ChatConfig;
use crate::error::{AppError, AuthFailureKind, ChatError, TransportFailureKind};
use crate::providers::ApiCredential;
use crate::serde_utils::{sanitize_header_value, summarize_json};
use crate::usage::estimate::{estimate_completion_tokens, estimate_token_usage};
use crate::utils::{log_error, log_info, log_warn};

/// Non-streaming chat completions against the SiliconFlow API, replayed as chunks.
pub struct SiliconFlowTransport {
    client: reqwest::Client,
    endpoint: String,
    credential: ApiCredential,
    reasoning_interval: Duration,
    content_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    pub content: String,
    pub reasoning: String,
    pub usage: CompletionUsage,
}

impl SiliconFlowTransport {
    pub fn new(credential: ApiCredential, config: &ChatConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client(Some(config.request_timeout_ms))?,
            endpoint: format!(
                "{}/chat/completions",
                config.api_base_url.trim_end_matches('/')
            ),
            credential,
            reasoning_interval: Duration::from_millis(config.reasoning_char_interval_ms),
            content_interval: Duration::from_millis(config.content_char_interval_ms),
        })
    }
}

fn classify_send_error(err: &reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::TransportFailure(TransportFailureKind::Timeout)
    } else {
        ChatError::TransportFailure(TransportFailureKind::Network(err.to_string()))
    }
}

fn http_failure(status: u16, body: &str) -> ChatError {
    if status == 401 {
        return ChatError::AuthFailure(AuthFailureKind::Invalid);
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| extract_error_message(&v))
        .unwrap_or_else(|| body.trim().to_string());
    ChatError::TransportFailure(TransportFailureKind::Http { status, message })
}

/// Reads the first choice and its usage. Missing usage falls back to local estimates.
pub fn parse_completion(payload: &Value, request: &ChatRequest) -> Result<ParsedCompletion, ChatError> {
    let message = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or(ChatError::TransportFailure(
            TransportFailureKind::MalformedResponse,
        ))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let reasoning = message
        .get("reasoning_content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let summary = extract_usage(payload);
    let prompt_tokens = summary
        .and_then(|s| s.prompt_tokens)
        .unwrap_or_else(|| estimate_token_usage(&request.prompt_text, request.image_count).total_tokens);
    let completion_tokens = summary
        .and_then(|s| s.completion_tokens)
        .unwrap_or_else(|| estimate_completion_tokens(&content));
    let total_tokens = summary
        .and_then(|s| s.total_tokens)
        .unwrap_or(prompt_tokens + completion_tokens);

    Ok(ParsedCompletion {
        content,
        reasoning,
        usage: CompletionUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost: None,
            usage: payload.get("usage").cloned().unwrap_or(Value::Null),
        },
    })
}

async fn request_completion(
    client: &reqwest::Client,
    endpoint: &str,
    credential: &ApiCredential,
    request: &ChatRequest,
) -> Result<ParsedCompletion, ChatError> {
    log_info(
        "transport",
        format!(
            "POST {} model={} authorization={} body={}",
            endpoint,
            request.model_id,
            sanitize_header_value("Authorization", credential.expose()),
            summarize_json(&request.body)
        ),
    );

    let response = client
        .post(endpoint)
        .bearer_auth(credential.expose())
        .json(&request.body)
        .send()
        .await
        .map_err(|e| classify_send_error(&e))?;

    let status = response.status();
    let body = response.text().await.map_err(|e| classify_send_error(&e))?;
    if !status.is_success() {
        log_warn(
            "transport",
            format!("completion failed with status {}", status.as_u16()),
        );
        return Err(http_failure(status.as_u16(), &body));
    }

    let payload: Value = serde_json::from_str(&body).map_err(|e| {
        log_error("transport", format!("unparseable completion body: {}", e));
        ChatError::TransportFailure(TransportFailureKind::MalformedResponse)
    })?;
    parse_completion(&payload, request)
}

impl Transport for SiliconFlowTransport {
    fn send(&self, request: ChatRequest, sink: EventSink) -> TransportHandle {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let credential = self.credential.clone();
        let reasoning_interval = self.reasoning_interval;
        let content_interval = self.content_interval;
        let cancel = sink.cancel_token();

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = sink.cancelled() => return,
                result = request_completion(&client, &endpoint, &credential, &request) => result,
            };

            let parsed = match outcome {
                Ok(parsed) => parsed,
                Err(err) => {
                    sink.fail(err);
                    return;
                }
            };

            if !play_back(&sink, ChunkChannel::Reasoning, &parsed.reasoning, reasoning_interval).await {
                return;
            }
            if !play_back(&sink, ChunkChannel::Final, &parsed.content, content_interval).await {
                return;
            }
            sink.complete(parsed.usage);
        });

        TransportHandle::new(cancel, task)
    }
}
