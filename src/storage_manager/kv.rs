use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::AppError;
use crate::utils::{log_info, log_warn};

/// Synchronous key-value store over JSON values.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError>;
    fn set(&self, key: &str, value: Value) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

pub fn read_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Reads `key`, falling back to `default` when missing or undecodable.
pub fn get_or<T: DeserializeOwned>(store: &dyn KvStore, key: &str, default: T) -> T {
    match read_json(store, key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(err) => {
            log_warn(
                "storage",
                format!("stored value under {} is unreadable: {}", key, err),
            );
            default
        }
    }
}

pub fn write_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<(), AppError> {
    store.set(key, serde_json::to_value(value)?)
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let map = self
            .inner
            .lock()
            .map_err(|e| AppError::Other(format!("Store lock poisoned: {}", e)))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| AppError::Other(format!("Store lock poisoned: {}", e)))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| AppError::Other(format!("Store lock poisoned: {}", e)))?;
        map.remove(key);
        Ok(())
    }
}

/// SQLite-backed store with a single `kv` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                "#,
        )?;
        log_info(
            "storage",
            format!("opened key-value store at {}", path.as_ref().display()),
        );
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|e| AppError::Other(format!("Database lock poisoned: {}", e)))
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let conn = self.lock()?;
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            r#"INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![key, value.to_string(), now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("k", json!({"a": 1})).unwrap();
        store.set("k", json!({"a": 2})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 2})));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_upserts() {
        let store = SqliteStore::in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_get_or_falls_back_on_bad_shape() {
        let store = MemoryStore::new();
        store.set("n", json!("not a number")).unwrap();
        assert_eq!(get_or::<u32>(&store, "n", 7), 7);
        assert_eq!(get_or::<u32>(&store, "absent", 3), 3);
        write_json(&store, "n", &5u32).unwrap();
        assert_eq!(get_or::<u32>(&store, "n", 7), 5);
    }
}
