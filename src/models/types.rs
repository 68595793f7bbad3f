use serde::{Deserialize, Serialize};

/// Prices in CNY per one million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Cost calculation result for a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestCost {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: u64,
    pub max_output_tokens: u64,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    #[serde(default)]
    pub supports_multimodal: bool,
    #[serde(default)]
    pub is_thinking_model: bool,
}

impl ModelInfo {
    pub fn pricing(&self) -> ModelPricing {
        ModelPricing {
            input_per_million: self.input_price_per_million,
            output_per_million: self.output_price_per_million,
        }
    }
}
