use std::path::PathBuf;

use uuid::Uuid;

pub const SERVICE: &str = "siliconchat";

/// Default location for the key-value database and log files.
pub fn default_data_dir() -> Result<PathBuf, String> {
    dirs::data_dir()
        .map(|base| base.join(SERVICE))
        .ok_or_else(|| "No data directory available on this platform".to_string())
}

pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn new_exchange_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn log_info(component: &str, message: impl AsRef<str>) {
    tracing::info!(component = component, "{}", message.as_ref());
}

pub fn log_warn(component: &str, message: impl AsRef<str>) {
    tracing::warn!(component = component, "{}", message.as_ref());
}

pub fn log_error(component: &str, message: impl AsRef<str>) {
    tracing::error!(component = component, "{}", message.as_ref());
}

pub fn log_debug(component: &str, message: impl AsRef<str>) {
    tracing::debug!(component = component, "{}", message.as_ref());
}
