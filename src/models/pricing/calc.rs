use crate::error::ChatError;
use crate::models::catalog::DEFAULT_MODELS;
use crate::models::{ModelPricing, RequestCost};
use crate::utils::log_warn;

use super::FALLBACK_PRICING;

const COST_SCALE: f64 = 1_000_000.0;

/// Rounds to six decimal places.
pub fn round_cost(value: f64) -> f64 {
    (value * COST_SCALE).round() / COST_SCALE
}

pub fn calculate_cost_with(
    pricing: &ModelPricing,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> RequestCost {
    let input_cost = (prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_million;
    let output_cost = (completion_tokens as f64 / 1_000_000.0) * pricing.output_per_million;

    RequestCost {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        input_cost: round_cost(input_cost),
        output_cost: round_cost(output_cost),
        total_cost: round_cost(input_cost + output_cost),
    }
}

/// Looks the model up in the built-in table.
pub fn calculate_cost(
    model_id: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> Result<RequestCost, ChatError> {
    let model = DEFAULT_MODELS
        .iter()
        .find(|m| m.id == model_id)
        .ok_or_else(|| ChatError::UnknownModel(model_id.to_string()))?;
    Ok(calculate_cost_with(
        &model.pricing(),
        prompt_tokens,
        completion_tokens,
    ))
}

pub fn calculate_cost_or_fallback(
    model_id: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> RequestCost {
    match calculate_cost(model_id, prompt_tokens, completion_tokens) {
        Ok(cost) => cost,
        Err(err) => {
            log_warn("pricing", format!("{}; applying fallback price", err));
            calculate_cost_with(&FALLBACK_PRICING, prompt_tokens, completion_tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6
    }

    #[test]
    fn test_deepseek_v3_exchange_cost() {
        let cost = calculate_cost("deepseek-ai/DeepSeek-V3", 11129, 126).unwrap();
        assert!(close(cost.input_cost, 0.022258));
        assert!(close(cost.output_cost, 0.001008));
        assert!(close(cost.total_cost, 0.023266));
        assert_eq!(cost.total_tokens, 11255);
    }

    #[test]
    fn test_cost_is_repeatable() {
        for (p, c) in [(0, 0), (1, 1), (123_456, 7_890), (5_000_000, 3)] {
            let a = calculate_cost("deepseek-ai/DeepSeek-R1", p, c).unwrap();
            let b = calculate_cost("deepseek-ai/DeepSeek-R1", p, c).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_total_is_sum_of_separate_parts() {
        let models = [
            "deepseek-ai/DeepSeek-V3",
            "Qwen/Qwen2.5-VL-72B-Instruct",
            "deepseek-ai/DeepSeek-R1",
        ];
        for model in models {
            for (p, c) in [(11129, 126), (1, 999_999), (777, 0), (42_424, 13_131)] {
                let whole = calculate_cost(model, p, c).unwrap();
                let input_only = calculate_cost(model, p, 0).unwrap();
                let output_only = calculate_cost(model, 0, c).unwrap();
                assert!(
                    (whole.total_cost - (input_only.input_cost + output_only.output_cost)).abs()
                        <= 2e-6,
                    "{} {} {}",
                    model,
                    p,
                    c
                );
            }
        }
    }

    #[test]
    fn test_unknown_model_is_reported() {
        let err = calculate_cost("acme/unknown", 10, 10).unwrap_err();
        assert_eq!(err, ChatError::UnknownModel("acme/unknown".into()));
    }

    #[test]
    fn test_fallback_uses_documented_price() {
        let cost = calculate_cost_or_fallback("acme/unknown", 1_000_000, 1_000_000);
        assert!(close(cost.input_cost, FALLBACK_PRICING.input_per_million));
        assert!(close(cost.output_cost, FALLBACK_PRICING.output_per_million));
    }

    #[test]
    fn test_round_cost_keeps_six_places() {
        assert_eq!(round_cost(0.0000014), 0.000001);
        assert_eq!(round_cost(0.0232664), 0.023266);
    }
}
