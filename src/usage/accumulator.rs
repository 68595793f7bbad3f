use chrono::{DateTime, Utc};

use super::tracking::{PeriodStats, UsageDelta, UsageStats};
use crate::chat_manager::messages::MessageStore;
use crate::chat_manager::types::{Session, SessionTotals};
use crate::models::pricing::round_cost;
use crate::models::ModelPricing;
use crate::utils::log_info;

/// Sums every message. Messages without a stored cost are priced at the output rate.
pub fn recompute_session_totals(messages: &MessageStore, pricing: &ModelPricing) -> SessionTotals {
    let mut totals = SessionTotals::default();
    let mut cost = 0.0;

    for message in messages.iter() {
        let usage = message.usage();
        let tokens = usage.tokens.unwrap_or(0);
        totals.total_tokens += tokens;
        totals.total_prompt_tokens += usage.prompt_tokens.unwrap_or(0);
        totals.total_completion_tokens += usage.completion_tokens.unwrap_or(0);

        cost += match message.cost() {
            Some(stored) => stored,
            None => tokens as f64 / 1_000_000.0 * pricing.output_per_million,
        };
    }

    totals.total_cost = round_cost(cost);
    totals
}

fn fold_into(bucket: &mut PeriodStats, delta: &UsageDelta) {
    bucket.tokens += delta.tokens;
    bucket.cost = round_cost(bucket.cost + delta.cost);
    bucket.count += 1;
}

/// Refreshes session totals, then adds `delta` to the global buckets for `completed_at`.
///
/// Returns whether the global stats changed. A zero delta leaves them untouched.
pub fn record_exchange(
    session: &mut Session,
    stats: &mut UsageStats,
    delta: UsageDelta,
    completed_at: DateTime<Utc>,
    pricing: &ModelPricing,
) -> bool {
    session.totals = recompute_session_totals(&session.messages, pricing);
    session.updated_at = completed_at.timestamp_millis().max(0) as u64;

    if delta.tokens == 0 && delta.cost == 0.0 {
        return false;
    }

    let day = completed_at.format("%Y-%m-%d").to_string();
    let month = completed_at.format("%Y-%m").to_string();

    stats.total_tokens += delta.tokens;
    stats.total_cost = round_cost(stats.total_cost + delta.cost);
    fold_into(stats.daily_stats.entry(day).or_default(), &delta);
    fold_into(stats.monthly_stats.entry(month).or_default(), &delta);
    stats.last_updated = Some(completed_at.to_rfc3339());

    log_info(
        "usage",
        format!(
            "recorded exchange: tokens={} cost={:.6} session_total={}",
            delta.tokens, delta.cost, session.totals.total_tokens
        ),
    );
    true
}
