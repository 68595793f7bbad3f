use super::tracking::UsageStats;
use crate::error::AppError;
use crate::models::pricing::round_cost;
use crate::storage_manager::kv::{get_or, read_json, write_json, KvStore};
use crate::storage_manager::TOKEN_STATS_KEY;
use crate::utils::log_info;

/// Narrow persistence surface for the global usage stats.
pub struct UsageRepository<'a> {
    store: &'a dyn KvStore,
}

impl<'a> UsageRepository<'a> {
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self { store }
    }

    /// For display. Unreadable stats show as empty.
    pub fn load(&self) -> UsageStats {
        get_or(self.store, TOKEN_STATS_KEY, UsageStats::default())
    }

    /// For read-modify-write. Fails instead of handing back an empty value to save over.
    pub fn load_for_update(&self) -> Result<UsageStats, AppError> {
        Ok(read_json(self.store, TOKEN_STATS_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, stats: &UsageStats) -> Result<(), AppError> {
        write_json(self.store, TOKEN_STATS_KEY, stats)
    }

    pub fn clear(&self) -> Result<(), AppError> {
        let cleared = UsageStats {
            last_updated: Some(chrono::Utc::now().to_rfc3339()),
            ..UsageStats::default()
        };
        self.save(&cleared)?;
        log_info("usage", "usage stats cleared");
        Ok(())
    }
}

/// Totals to display. Older records may carry zero totals next to populated buckets,
/// so a zero field is rebuilt from the daily buckets, or the monthly ones when there are none.
pub fn effective_totals(stats: &UsageStats) -> (u64, f64) {
    let buckets = if stats.daily_stats.is_empty() {
        &stats.monthly_stats
    } else {
        &stats.daily_stats
    };
    let (bucket_tokens, bucket_cost) = buckets
        .values()
        .fold((0u64, 0.0f64), |(t, c), b| (t + b.tokens, c + b.cost));

    let tokens = if stats.total_tokens != 0 {
        stats.total_tokens
    } else {
        bucket_tokens
    };
    let cost = if stats.total_cost != 0.0 {
        stats.total_cost
    } else {
        bucket_cost
    };
    (tokens, round_cost(cost))
}
