use serde_json::Value;

use super::kv::{get_or, write_json, KvStore};
use super::{SELECTED_MODEL_KEY, USER_SETTINGS_KEY};
use crate::config::UserSettings;
use crate::error::AppError;
use crate::utils::log_info;

pub fn load_settings(store: &dyn KvStore) -> UserSettings {
    get_or(store, USER_SETTINGS_KEY, UserSettings::default())
}

/// Merges `patch` over what is stored, so unknown keys written by other clients survive.
pub fn save_settings(store: &dyn KvStore, patch: Value) -> Result<UserSettings, AppError> {
    let mut merged = match store.get(USER_SETTINGS_KEY)? {
        Some(Value::Object(map)) => map,
        _ => match serde_json::to_value(UserSettings::default())? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        },
    };
    match patch {
        Value::Object(fields) => {
            for (k, v) in fields {
                merged.insert(k, v);
            }
        }
        other => {
            return Err(AppError::Other(format!(
                "settings patch must be an object, got {}",
                other
            )))
        }
    }

    let settings: UserSettings = serde_json::from_value(Value::Object(merged.clone()))?;
    store.set(USER_SETTINGS_KEY, Value::Object(merged))?;
    log_info("storage", "user settings saved");
    Ok(settings)
}

pub fn load_selected_model(store: &dyn KvStore) -> Option<String> {
    get_or::<Option<String>>(store, SELECTED_MODEL_KEY, None).filter(|id| !id.is_empty())
}

pub fn save_selected_model(store: &dyn KvStore, model_id: &str) -> Result<(), AppError> {
    write_json(store, SELECTED_MODEL_KEY, &model_id)?;
    log_info("storage", format!("selected model {}", model_id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_manager::kv::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_settings_merge_over_stored_values() {
        let store = MemoryStore::new();
        assert_eq!(load_settings(&store), UserSettings::default());

        store
            .set(USER_SETTINGS_KEY, json!({"theme": "dark", "fontScale": 1.2}))
            .unwrap();
        let saved = save_settings(&store, json!({"autoSave": false})).unwrap();
        assert_eq!(saved.theme, "dark");
        assert!(!saved.auto_save);

        let raw = store.get(USER_SETTINGS_KEY).unwrap().unwrap();
        assert_eq!(raw["fontScale"], json!(1.2));
    }

    #[test]
    fn test_settings_patch_must_be_object() {
        let store = MemoryStore::new();
        assert!(save_settings(&store, json!([1, 2])).is_err());
    }

    #[test]
    fn test_selected_model_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(load_selected_model(&store), None);
        save_selected_model(&store, "deepseek-ai/DeepSeek-R1").unwrap();
        assert_eq!(
            load_selected_model(&store).as_deref(),
            Some("deepseek-ai/DeepSeek-R1")
        );
    }
}
