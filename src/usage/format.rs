pub const CURRENCY_SYMBOL: &str = "¥";

fn compact(value: f64) -> String {
    let text = format!("{:.1}", value);
    text.strip_suffix(".0").map(str::to_string).unwrap_or(text)
}

/// "126 tokens", "1.5K tokens", "1.5M tokens".
pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{}M tokens", compact(tokens as f64 / 1_000_000.0))
    } else if tokens >= 1_000 {
        format!("{}K tokens", compact(tokens as f64 / 1_000.0))
    } else {
        format!("{} tokens", tokens)
    }
}

/// More decimals for smaller amounts so sub-cent costs stay visible.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.001 {
        format!("{}{:.6}", CURRENCY_SYMBOL, cost)
    } else if cost < 1.0 {
        format!("{}{:.4}", CURRENCY_SYMBOL, cost)
    } else {
        format!("{}{:.2}", CURRENCY_SYMBOL, cost)
    }
}

pub fn format_model_price(price_per_million: f64) -> String {
    format!("{}{:.2}/M tokens", CURRENCY_SYMBOL, price_per_million)
}
