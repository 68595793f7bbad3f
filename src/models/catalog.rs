use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::pricing::FALLBACK_PRICING;
use crate::models::{ModelInfo, ModelPricing};
use crate::serde_utils::redact_api_key;
use crate::utils::{log_info, log_warn};

lazy_static! {
    pub static ref DEFAULT_MODELS: Vec<ModelInfo> = vec![
        ModelInfo {
            id: "deepseek-ai/DeepSeek-V3".into(),
            name: "DeepSeek-V3".into(),
            context_length: 65536,
            max_output_tokens: 8192,
            input_price_per_million: 2.0,
            output_price_per_million: 8.0,
            supports_multimodal: false,
            is_thinking_model: false,
        },
        ModelInfo {
            id: "Qwen/Qwen2.5-VL-72B-Instruct".into(),
            name: "Qwen2.5-VL-72B".into(),
            context_length: 131072,
            max_output_tokens: 8192,
            input_price_per_million: 4.13,
            output_price_per_million: 4.13,
            supports_multimodal: true,
            is_thinking_model: false,
        },
        ModelInfo {
            id: "deepseek-ai/DeepSeek-R1".into(),
            name: "DeepSeek-R1".into(),
            context_length: 98304,
            max_output_tokens: 8192,
            input_price_per_million: 4.0,
            output_price_per_million: 16.0,
            supports_multimodal: false,
            is_thinking_model: true,
        },
    ];
}

/// Vision models served by SiliconFlow that the remote listing does not flag.
const KNOWN_MULTIMODAL_IDS: &[&str] = &[
    "Qwen/Qwen2.5-VL-72B-Instruct",
    "Qwen/Qwen2.5-VL-32B-Instruct",
    "deepseek-ai/deepseek-vl2",
    "Qwen/QVQ-72B-Preview",
];

const KNOWN_THINKING_IDS: &[&str] = &["deepseek-ai/DeepSeek-R1", "Qwen/QwQ-32B", "Qwen/QVQ-72B-Preview"];

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: DEFAULT_MODELS.clone(),
        }
    }
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn find(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn is_multimodal(&self, model_id: &str) -> bool {
        self.find(model_id)
            .map(|m| m.supports_multimodal)
            .unwrap_or(false)
    }

    pub fn is_thinking(&self, model_id: &str) -> bool {
        self.find(model_id)
            .map(|m| m.is_thinking_model)
            .unwrap_or(false)
    }

    pub fn pricing_for(&self, model_id: &str) -> Option<ModelPricing> {
        self.find(model_id).map(ModelInfo::pricing)
    }

    /// Pricing for the model, or the fallback price when it is not listed.
    pub fn pricing_or_fallback(&self, model_id: &str) -> ModelPricing {
        match self.pricing_for(model_id) {
            Some(pricing) => pricing,
            None => {
                log_warn(
                    "pricing",
                    format!("no pricing for {}; applying fallback price", model_id),
                );
                FALLBACK_PRICING
            }
        }
    }

    pub fn display_name(&self, model_id: &str) -> String {
        self.find(model_id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| model_id.to_string())
    }

    /// Remote entries replace local ones with the same id; new ids are appended.
    pub fn merge_remote(&mut self, remote: Vec<ModelInfo>) {
        for model in remote {
            match self.models.iter_mut().find(|m| m.id == model.id) {
                Some(existing) => *existing = model,
                None => self.models.push(model),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteModelList {
    #[serde(default)]
    data: Vec<RemoteModel>,
}

impl RemoteModel {
    /// Listed models keep their local metadata; unlisted ones get fallback pricing.
    pub fn to_model_info(&self, local: &ModelCatalog) -> ModelInfo {
        if let Some(known) = local.find(&self.id) {
            return known.clone();
        }
        let name = self
            .id
            .rsplit('/')
            .next()
            .unwrap_or(self.id.as_str())
            .to_string();
        ModelInfo {
            id: self.id.clone(),
            name,
            context_length: 32768,
            max_output_tokens: 4096,
            input_price_per_million: FALLBACK_PRICING.input_per_million,
            output_price_per_million: FALLBACK_PRICING.output_per_million,
            supports_multimodal: KNOWN_MULTIMODAL_IDS.contains(&self.id.as_str()),
            is_thinking_model: KNOWN_THINKING_IDS.contains(&self.id.as_str()),
        }
    }
}

/// Fetches the chat model listing from `{base_url}/models`.
pub async fn fetch_remote_catalog(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Result<Vec<RemoteModel>, AppError> {
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    log_info(
        "catalog",
        format!("fetching {} with key {}", url, redact_api_key(api_key)),
    );

    let response = client
        .get(&url)
        .query(&[("type", "text"), ("sub_type", "chat")])
        .bearer_auth(api_key)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AppError::Other(format!(
            "Model listing failed: {}",
            response.status()
        )));
    }

    let list: RemoteModelList = response.json().await?;
    Ok(list.data)
}

/// Merges the remote listing into `catalog`, keeping the local table on failure.
pub async fn refresh_catalog(
    catalog: &mut ModelCatalog,
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> usize {
    match fetch_remote_catalog(client, base_url, api_key).await {
        Ok(remote) => {
            let merged: Vec<ModelInfo> = remote.iter().map(|m| m.to_model_info(catalog)).collect();
            let count = merged.len();
            catalog.merge_remote(merged);
            log_info("catalog", format!("merged {} remote models", count));
            count
        }
        Err(err) => {
            log_warn(
                "catalog",
                format!("remote catalog unavailable, using local table: {}", err),
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_flags() {
        let catalog = ModelCatalog::default();
        assert!(catalog.is_multimodal("Qwen/Qwen2.5-VL-72B-Instruct"));
        assert!(!catalog.is_multimodal("deepseek-ai/DeepSeek-V3"));
        assert!(catalog.is_thinking("deepseek-ai/DeepSeek-R1"));
        assert!(!catalog.is_thinking("missing/model"));
        assert_eq!(catalog.pricing_or_fallback("missing/model"), FALLBACK_PRICING);
    }

    #[test]
    fn test_merge_remote_overrides_and_appends() {
        let mut catalog = ModelCatalog::default();
        let mut cheaper = catalog.find("deepseek-ai/DeepSeek-V3").unwrap().clone();
        cheaper.output_price_per_million = 4.0;
        let extra = RemoteModel {
            id: "Qwen/QwQ-32B".into(),
            owned_by: None,
        }
        .to_model_info(&catalog);

        catalog.merge_remote(vec![cheaper, extra]);

        assert_eq!(catalog.models().len(), 4);
        assert_eq!(
            catalog
                .pricing_for("deepseek-ai/DeepSeek-V3")
                .unwrap()
                .output_per_million,
            4.0
        );
        let qwq = catalog.find("Qwen/QwQ-32B").unwrap();
        assert_eq!(qwq.name, "QwQ-32B");
        assert!(qwq.is_thinking_model);
    }

    #[test]
    fn test_remote_listing_parses() {
        let raw = r#"{"object":"list","data":[{"id":"deepseek-ai/DeepSeek-V3","object":"model","owned_by":""}]}"#;
        let list: RemoteModelList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "deepseek-ai/DeepSeek-V3");
    }
}
