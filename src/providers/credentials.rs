use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{AppError, AuthFailureKind};
use crate::serde_utils::redact_api_key;
use crate::storage_manager::kv::KvStore;
use crate::storage_manager::API_KEY_KEY;
use crate::utils::{log_info, log_warn};

const MIN_KEY_CHARS: usize = 20;
const EXPECTED_PREFIX: &str = "sk-";

/// An API key that is wiped from memory when dropped.
#[derive(Clone)]
pub struct ApiCredential {
    key: Zeroizing<String>,
}

impl std::fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiCredential({})", redact_api_key(&self.key))
    }
}

impl ApiCredential {
    /// Trims and checks the key. A missing `sk-` prefix only logs a warning.
    pub fn parse(raw: &str) -> Result<Self, AuthFailureKind> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthFailureKind::Missing);
        }
        if trimmed.chars().count() < MIN_KEY_CHARS {
            return Err(AuthFailureKind::Malformed);
        }
        if !trimmed.starts_with(EXPECTED_PREFIX) {
            log_warn(
                "credentials",
                format!(
                    "key {} does not start with {}",
                    redact_api_key(trimmed),
                    EXPECTED_PREFIX
                ),
            );
        }
        Ok(Self {
            key: Zeroizing::new(trimmed.to_string()),
        })
    }

    pub fn expose(&self) -> &str {
        self.key.as_str()
    }

    pub fn redacted(&self) -> String {
        redact_api_key(&self.key)
    }
}

/// Reads the stored key. A blank or absent entry yields `None`.
pub fn load_api_key(store: &dyn KvStore) -> Result<Option<Zeroizing<String>>, AppError> {
    match store.get(API_KEY_KEY)? {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            Ok(Some(Zeroizing::new(s.trim().to_string())))
        }
        _ => Ok(None),
    }
}

/// Resolves the credential for the next exchange. `Ok(None)` means run locally.
pub fn load_credential(store: &dyn KvStore) -> Result<Option<ApiCredential>, AuthFailureKind> {
    let stored = match load_api_key(store) {
        Ok(stored) => stored,
        Err(err) => {
            log_warn("credentials", format!("failed to read api key: {}", err));
            None
        }
    };
    match stored {
        Some(key) => ApiCredential::parse(&key).map(Some),
        None => Ok(None),
    }
}

pub fn save_api_key(store: &dyn KvStore, raw: &str) -> Result<ApiCredential, AppError> {
    let credential = ApiCredential::parse(raw)
        .map_err(|kind| AppError::Other(kind.user_message().to_string()))?;
    store.set(API_KEY_KEY, Value::String(credential.expose().to_string()))?;
    log_info(
        "credentials",
        format!("stored api key {}", credential.redacted()),
    );
    Ok(credential)
}

pub fn clear_api_key(store: &dyn KvStore) -> Result<(), AppError> {
    store.remove(API_KEY_KEY)?;
    log_info("credentials", "api key removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::kv::MemoryStore;

    #[test]
    fn test_parse_distinguishes_failures() {
        assert_eq!(ApiCredential::parse("   ").unwrap_err(), AuthFailureKind::Missing);
        assert_eq!(ApiCredential::parse("sk-short").unwrap_err(), AuthFailureKind::Malformed);
        assert!(ApiCredential::parse("sk-abcdefghijklmnopqrstuvwxyz").is_ok());
        // Prefix is advisory only.
        assert!(ApiCredential::parse("abcdefghijklmnopqrstuvwxyz").is_ok());
    }

    #[test]
    fn test_debug_output_is_redacted() {
        let cred = ApiCredential::parse("  sk-abcdefghijklmnopqrstuvwxyz ").unwrap();
        assert_eq!(cred.expose(), "sk-abcdefghijklmnopqrstuvwxyz");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("qrstuvwxyz"));
    }

    #[test]
    fn test_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(load_credential(&store).unwrap().is_none());

        save_api_key(&store, "sk-abcdefghijklmnopqrstuvwxyz").unwrap();
        let loaded = load_credential(&store).unwrap().unwrap();
        assert_eq!(loaded.expose(), "sk-abcdefghijklmnopqrstuvwxyz");

        assert!(save_api_key(&store, "bad").is_err());
        clear_api_key(&store).unwrap();
        assert!(load_credential(&store).unwrap().is_none());
    }

    #[test]
    fn test_short_stored_key_is_malformed() {
        let store = MemoryStore::new();
        store.set(API_KEY_KEY, Value::String("sk-123".into())).unwrap();
        assert_eq!(load_credential(&store).unwrap_err(), AuthFailureKind::Malformed);
    }
}
