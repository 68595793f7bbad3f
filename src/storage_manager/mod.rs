pub mod kv;
pub mod sessions;
pub mod settings;

pub const CHAT_HISTORY_KEY: &str = "chat_history";
pub const USER_SETTINGS_KEY: &str = "user_settings";
pub const TOKEN_STATS_KEY: &str = "token_stats";
pub const SELECTED_MODEL_KEY: &str = "selected_model";
pub const API_KEY_KEY: &str = "siliconflow_api_key";

pub use kv::{KvStore, MemoryStore, SqliteStore};
pub use sessions::{save_session, HistoryRecord};
