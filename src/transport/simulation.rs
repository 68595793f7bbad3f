use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

use super::playback::play_back;
use super::{CompletionUsage, EventSink, Transport, TransportHandle};
use crate::chat_manager::request::ChatRequest;
use crate::chat_manager::types::ChunkChannel;
use crate::config::ChatConfig;
use crate::models::pricing::calculate_cost_with;
use crate::usage::estimate::{estimate_completion_tokens, estimate_token_usage};

const GREETING: &str = "你好！我是AI助手，很高兴为您服务。";
const FOLLOW_UP: &str = "根据您的问题，我来为您详细解答...";
const IMAGE_REPLY: &str = "我看到您提到了图片。如果您上传了图片，我可以帮您分析图片内容，包括识别物体、文字、场景等。请上传图片，我来为您详细解读！";
const CODE_REPLY: &str = "我可以帮助您解决编程相关的问题！无论是代码调试、算法解释、还是技术选型，我都能为您提供专业的建议和解决方案。";
const WRITING_REPLY: &str = "我很乐意帮助您进行写作！我可以协助您：\n\n• 文章结构规划\n• 内容创作和润色\n• 语法检查和优化\n• 创意灵感提供\n\n请告诉我您想写什么类型的内容？";

const ECHO_CHARS: usize = 20;

/// Canned reply for `user_text`. Same input, same output.
pub fn simulated_reply(user_text: &str) -> String {
    let has_any = |words: &[&str]| words.iter().any(|w| user_text.contains(w));

    if has_any(&["图片", "照片", "看看", "image", "photo", "picture"]) {
        IMAGE_REPLY.to_string()
    } else if has_any(&["代码", "编程", "code", "program"]) {
        CODE_REPLY.to_string()
    } else if has_any(&["写作", "文章", "writing", "essay"]) {
        WRITING_REPLY.to_string()
    } else if user_text.is_empty() {
        GREETING.to_string()
    } else {
        let head: String = user_text.chars().take(ECHO_CHARS).collect();
        let ellipsis = if user_text.chars().count() > ECHO_CHARS {
            "..."
        } else {
            ""
        };
        format!(
            "关于\"{}{}\"这个问题，让我来为您详细解答：\n\n{}",
            head, ellipsis, FOLLOW_UP
        )
    }
}

/// Offline stand-in used when no API key is configured.
pub struct SimulatedTransport {
    char_interval: Duration,
    completion_delay: Duration,
}

impl SimulatedTransport {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            char_interval: Duration::from_millis(config.simulation_char_interval_ms),
            completion_delay: Duration::from_millis(config.simulation_completion_delay_ms),
        }
    }
}

impl Transport for SimulatedTransport {
    fn send(&self, request: ChatRequest, sink: EventSink) -> TransportHandle {
        let char_interval = self.char_interval;
        let completion_delay = self.completion_delay;
        let cancel = sink.cancel_token();

        let task = tokio::spawn(async move {
            let reply = simulated_reply(&request.last_user_text);
            if !play_back(&sink, ChunkChannel::Final, &reply, char_interval).await {
                return;
            }

            tokio::select! {
                biased;
                _ = sink.cancelled() => return,
                _ = sleep(completion_delay) => {}
            }

            let prompt_tokens =
                estimate_token_usage(&request.prompt_text, request.image_count).total_tokens;
            let completion_tokens = estimate_completion_tokens(&reply);
            let cost = calculate_cost_with(&request.pricing, prompt_tokens, completion_tokens);
            sink.complete(CompletionUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: cost.total_tokens,
                cost: Some(cost.total_cost),
                usage: json!({
                    "prompt_tokens": prompt_tokens,
                    "completion_tokens": completion_tokens,
                    "total_tokens": cost.total_tokens,
                }),
            });
        });

        TransportHandle::new(cancel, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_replies() {
        assert_eq!(simulated_reply("帮我看看这张图片"), IMAGE_REPLY);
        assert_eq!(simulated_reply("写一段代码"), CODE_REPLY);
        assert_eq!(simulated_reply("help with my essay"), WRITING_REPLY);
        assert_eq!(simulated_reply(""), GREETING);
    }

    #[test]
    fn test_echo_truncates_long_questions() {
        let reply = simulated_reply("abcdefghijklmnopqrstuvwxyz");
        assert!(reply.starts_with("关于\"abcdefghijklmnopqrst...\""));
        let short = simulated_reply("hello");
        assert!(short.starts_with("关于\"hello\""));
        assert_eq!(short, simulated_reply("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_uses_request_pricing() {
        use crate::models::ModelPricing;
        use crate::transport::TransportEventKind;
        use tokio::sync::mpsc;
        use tokio_util::sync::CancellationToken;

        let pricing = ModelPricing {
            input_per_million: 100.0,
            output_per_million: 300.0,
        };
        let request = ChatRequest {
            model_id: "deepseek-ai/DeepSeek-V3".into(),
            body: json!({}),
            last_user_text: "hi".into(),
            prompt_text: "hi".into(),
            image_count: 0,
            pricing,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new("ex", tx, CancellationToken::new());
        let _handle = SimulatedTransport::new(&ChatConfig::default()).send(request, sink);

        let usage = loop {
            match rx.recv().await.unwrap().kind {
                TransportEventKind::Complete(usage) => break usage,
                TransportEventKind::Chunk { .. } => continue,
                TransportEventKind::Failed(err) => panic!("unexpected failure {:?}", err),
            }
        };
        let expected = calculate_cost_with(&pricing, usage.prompt_tokens, usage.completion_tokens);
        assert_eq!(usage.cost, Some(expected.total_cost));
    }
}
