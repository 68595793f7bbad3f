use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Totals for one day (`YYYY-MM-DD`) or month (`YYYY-MM`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub count: u64,
}

/// Cross-session usage, persisted under the token stats key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub daily_stats: BTreeMap<String, PeriodStats>,
    #[serde(default)]
    pub monthly_stats: BTreeMap<String, PeriodStats>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            total_tokens: 0,
            total_cost: 0.0,
            daily_stats: BTreeMap::new(),
            monthly_stats: BTreeMap::new(),
            last_updated: None,
        }
    }
}

impl UsageStats {
    /// Days newest first.
    pub fn daily_breakdown(&self) -> Vec<(String, PeriodStats)> {
        self.daily_stats
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn monthly_breakdown(&self) -> Vec<(String, PeriodStats)> {
        self.monthly_stats
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// What one finished exchange adds to the global buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageDelta {
    pub tokens: u64,
    pub cost: f64,
}
