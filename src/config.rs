use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.siliconflow.cn/v1";
pub const DEFAULT_MODEL_ID: &str = "deepseek-ai/DeepSeek-V3";

/// Engine policy knobs. Every field has a default so a partial JSON blob deserializes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub thinking_budget: u32,
    pub reasoning_char_interval_ms: u64,
    pub content_char_interval_ms: u64,
    pub simulation_char_interval_ms: u64,
    pub simulation_completion_delay_ms: u64,
    pub error_cooldown_ms: u64,
    pub stuck_stream_timeout_ms: u64,
    pub history_cap: usize,
    pub title_char_budget: usize,
    pub max_attachments: usize,
    pub max_attachment_bytes: usize,
    pub default_model_id: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            request_timeout_ms: 60_000,
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.7,
            frequency_penalty: 0.5,
            thinking_budget: 4096,
            reasoning_char_interval_ms: 20,
            content_char_interval_ms: 30,
            simulation_char_interval_ms: 50,
            simulation_completion_delay_ms: 500,
            error_cooldown_ms: 2_000,
            stuck_stream_timeout_ms: 30_000,
            history_cap: 100,
            title_char_budget: 20,
            max_attachments: 9,
            max_attachment_bytes: 10 * 1024 * 1024,
            default_model_id: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }
}

/// A conversation preset. Only the system prompt reaches the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            id: "general".to_string(),
            name: "通用对话".to_string(),
            description: "智能AI助手，可以回答各种问题".to_string(),
            system_prompt: "你是一个友善且专业的AI助手。请用简洁明了的方式回答用户的问题，提供有用的信息和建议。如果用户上传了图片，请仔细分析图片内容并给出相关回复。".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub selected_model: String,
    pub auto_save: bool,
    pub show_token_count: bool,
    pub theme: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            selected_model: DEFAULT_MODEL_ID.to_string(),
            auto_save: true,
            show_token_count: true,
            theme: "light".to_string(),
        }
    }
}
