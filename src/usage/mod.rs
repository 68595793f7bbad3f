pub mod accumulator;
pub mod estimate;
pub mod format;
pub mod repository;
pub mod tracking;

pub use accumulator::{record_exchange, recompute_session_totals};
pub use repository::{effective_totals, UsageRepository};
pub use tracking::{PeriodStats, UsageDelta, UsageStats};
