pub mod calc;

use crate::models::ModelPricing;

pub use calc::{calculate_cost, calculate_cost_or_fallback, calculate_cost_with, round_cost};

/// Applied to every model without a pricing entry (DeepSeek-V3 list price).
pub const FALLBACK_PRICING: ModelPricing = ModelPricing {
    input_per_million: 2.0,
    output_per_million: 8.0,
};
