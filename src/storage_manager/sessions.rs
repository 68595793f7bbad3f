use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kv::KvStore;
use super::CHAT_HISTORY_KEY;
use crate::chat_manager::messages::MessageStore;
use crate::chat_manager::types::{Message, Session};
use crate::config::{ChatConfig, Scenario};
use crate::error::AppError;
use crate::models::ModelCatalog;
use crate::serde_utils::truncate_for_log;
use crate::usage::recompute_session_totals;
use crate::utils::{log_info, log_warn};

const IMAGE_TITLE_MARKER: &str = "图片对话";
const PREVIEW_CHARS: usize = 50;

/// One saved conversation in the history list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub title: String,
    pub scenario: String,
    #[serde(default)]
    pub scenario_name: String,
    pub model: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_prompt_tokens: u64,
    #[serde(default)]
    pub total_completion_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    pub created_at: u64,
    pub updated_at: u64,
}

fn truncate_chars(text: &str, budget: usize) -> (String, bool) {
    let count = text.chars().count();
    if count <= budget {
        (text.to_string(), false)
    } else {
        (text.chars().take(budget).collect(), true)
    }
}

/// Title from the first user message, or `{scenario} - {date}` when there is none.
pub fn derive_title(messages: &MessageStore, scenario_name: &str, budget: usize) -> String {
    let Some(first) = messages.first_user_message() else {
        return format!(
            "{} - {}",
            scenario_name,
            chrono::Local::now().format("%Y-%m-%d %H:%M")
        );
    };

    let text = first.content.trim();
    let base = if text.is_empty() { IMAGE_TITLE_MARKER } else { text };
    let full = if first.attachments.is_empty() {
        base.to_string()
    } else {
        format!("{} - {}", IMAGE_TITLE_MARKER, base)
    };

    match truncate_chars(&full, budget) {
        (title, true) => format!("{}...", title),
        (title, false) => title,
    }
}

pub fn build_record(
    session: &Session,
    catalog: &ModelCatalog,
    scenario: &Scenario,
    config: &ChatConfig,
    now: u64,
) -> HistoryRecord {
    HistoryRecord {
        id: session.id.clone(),
        title: derive_title(&session.messages, &scenario.name, config.title_char_budget),
        scenario: session.scenario_id.clone(),
        scenario_name: scenario.name.clone(),
        model: session.model_id.clone(),
        model_name: catalog.display_name(&session.model_id),
        messages: session.messages.as_slice().to_vec(),
        total_tokens: session.totals.total_tokens,
        total_prompt_tokens: session.totals.total_prompt_tokens,
        total_completion_tokens: session.totals.total_completion_tokens,
        total_cost: session.totals.total_cost,
        created_at: session
            .messages
            .iter()
            .next()
            .map(Message::created_at)
            .unwrap_or(session.created_at),
        updated_at: now,
    }
}

/// Stored entries as raw JSON. Write paths edit this so undecodable entries survive.
fn load_raw_history(store: &dyn KvStore) -> Result<Vec<Value>, AppError> {
    match store.get(CHAT_HISTORY_KEY)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => Ok(entries),
        Some(other) => Err(AppError::Other(format!(
            "chat history is not a list: {}",
            truncate_for_log(&other.to_string(), 64)
        ))),
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

/// Decodable entries, newest first. Entries that fail to decode are skipped, not dropped.
pub fn list_history(store: &dyn KvStore) -> Vec<HistoryRecord> {
    let raw = match load_raw_history(store) {
        Ok(raw) => raw,
        Err(err) => {
            log_warn("storage", format!("chat history is unreadable: {}", err));
            return Vec::new();
        }
    };
    raw.into_iter()
        .filter_map(|entry| {
            let id = entry_id(&entry).unwrap_or("?").to_string();
            match serde_json::from_value(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    log_warn("storage", format!("skipping history entry {}: {}", id, err));
                    None
                }
            }
        })
        .collect()
}

fn write_history(store: &dyn KvStore, history: Vec<Value>) -> Result<(), AppError> {
    store.set(CHAT_HISTORY_KEY, Value::Array(history))
}

/// Replaces the entry with the same id in place, or inserts at the front; keeps at most `cap`.
fn upsert_entry(history: &mut Vec<Value>, record: Value, cap: usize) {
    let id = entry_id(&record).map(str::to_string);
    match history
        .iter_mut()
        .find(|entry| id.is_some() && entry_id(entry) == id.as_deref())
    {
        Some(existing) => *existing = record,
        None => history.insert(0, record),
    }
    history.truncate(cap);
}

/// Upserts the session into history. Sessions without messages are never written.
pub fn save_session(
    store: &dyn KvStore,
    session: &Session,
    catalog: &ModelCatalog,
    scenario: &Scenario,
    config: &ChatConfig,
    now: u64,
) -> Result<bool, AppError> {
    if session.messages.is_empty() {
        return Ok(false);
    }
    let record = serde_json::to_value(build_record(session, catalog, scenario, config, now))?;
    let mut history = load_raw_history(store)?;
    upsert_entry(&mut history, record, config.history_cap);
    let entries = history.len();
    write_history(store, history)?;
    log_info(
        "storage",
        format!(
            "saved session {} ({} messages, {} entries in history)",
            session.id,
            session.messages.len(),
            entries
        ),
    );
    Ok(true)
}

pub fn get_history_record(store: &dyn KvStore, id: &str) -> Option<HistoryRecord> {
    list_history(store).into_iter().find(|r| r.id == id)
}

pub fn delete_history_record(store: &dyn KvStore, id: &str) -> Result<bool, AppError> {
    let mut history = load_raw_history(store)?;
    let before = history.len();
    history.retain(|entry| entry_id(entry) != Some(id));
    if history.len() == before {
        log_warn("storage", format!("history entry {} not found", id));
        return Ok(false);
    }
    write_history(store, history)?;
    Ok(true)
}

pub fn clear_history(store: &dyn KvStore) -> Result<(), AppError> {
    write_history(store, Vec::new())?;
    log_info("storage", "chat history cleared");
    Ok(())
}

/// Case-insensitive match on title, scenario name or model name.
pub fn search_history(store: &dyn KvStore, keyword: &str) -> Vec<HistoryRecord> {
    let needle = keyword.trim().to_lowercase();
    let history = list_history(store);
    if needle.is_empty() {
        return history;
    }
    history
        .into_iter()
        .filter(|r| {
            r.title.to_lowercase().contains(&needle)
                || r.scenario_name.to_lowercase().contains(&needle)
                || r.model_name.to_lowercase().contains(&needle)
        })
        .collect()
}

/// First user message, cut to 50 characters.
pub fn preview(record: &HistoryRecord) -> String {
    let first = record
        .messages
        .iter()
        .find_map(Message::as_user)
        .map(|m| m.content.trim().to_string())
        .unwrap_or_default();
    match truncate_chars(&first, PREVIEW_CHARS) {
        (text, true) => format!("{}...", text),
        (text, false) => text,
    }
}

/// Rebuilds a live session from a saved record. Totals are recomputed from the messages.
pub fn resume_session(record: &HistoryRecord, catalog: &ModelCatalog) -> Session {
    let mut session = Session::new(
        record.id.clone(),
        record.model.clone(),
        record.scenario.clone(),
        record.created_at,
    );
    session.messages = MessageStore::from_messages(record.messages.clone());
    session.totals = recompute_session_totals(
        &session.messages,
        &catalog.pricing_or_fallback(&session.model_id),
    );
    session.updated_at = record.updated_at;
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_manager::types::{Attachment, TokenUsage, UserMessage};
    use crate::storage_manager::kv::MemoryStore;

    fn user(id: &str, text: &str, attachments: Vec<Attachment>) -> Message {
        Message::User(UserMessage {
            id: id.into(),
            content: text.into(),
            attachments,
            usage: TokenUsage {
                tokens: Some(10),
                prompt_tokens: Some(10),
                completion_tokens: None,
            },
            cost: None,
            created_at: 5,
        })
    }

    fn session(id: &str, text: &str) -> Session {
        let mut s = Session::new(id.into(), "deepseek-ai/DeepSeek-V3".into(), "general".into(), 1);
        s.messages = MessageStore::from_messages(vec![user(&format!("{}-u", id), text, vec![])]);
        s
    }

    fn save(store: &MemoryStore, s: &Session, config: &ChatConfig) -> bool {
        save_session(
            store,
            s,
            &ModelCatalog::default(),
            &Scenario::default(),
            config,
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_session_is_not_saved() {
        let store = MemoryStore::new();
        let empty = Session::new("s".into(), "m".into(), "general".into(), 0);
        assert!(!save(&store, &empty, &ChatConfig::default()));
        assert!(store.get(CHAT_HISTORY_KEY).unwrap().is_none());
    }

    #[test]
    fn test_upsert_keeps_one_entry_with_latest_content() {
        let store = MemoryStore::new();
        let config = ChatConfig::default();
        save(&store, &session("s1", "first draft"), &config);
        save(&store, &session("s2", "other"), &config);
        save(&store, &session("s1", "second draft"), &config);

        let history = list_history(&store);
        assert_eq!(history.len(), 2);
        let s1: Vec<&HistoryRecord> = history.iter().filter(|r| r.id == "s1").collect();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].title, "second draft");
        // Updated in place, not moved to the front.
        assert_eq!(history[1].id, "s1");
    }

    #[test]
    fn test_history_is_capped_newest_first() {
        let store = MemoryStore::new();
        let config = ChatConfig {
            history_cap: 3,
            ..ChatConfig::default()
        };
        for i in 0..5 {
            save(&store, &session(&format!("s{}", i), "hello"), &config);
        }
        let ids: Vec<String> = list_history(&store).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_title_rules() {
        let short = MessageStore::from_messages(vec![user("u", "Hello there", vec![])]);
        assert_eq!(derive_title(&short, "通用对话", 20), "Hello there");

        let long = MessageStore::from_messages(vec![user("u", "abcdefghijklmnopqrstuvwxyz", vec![])]);
        assert_eq!(derive_title(&long, "通用对话", 20), "abcdefghijklmnopqrst...");

        let image = MessageStore::from_messages(vec![user(
            "u",
            "cat",
            vec![Attachment::image("https://example.com/cat.png")],
        )]);
        assert_eq!(derive_title(&image, "通用对话", 20), "图片对话 - cat");

        let none = MessageStore::default();
        assert!(derive_title(&none, "通用对话", 20).starts_with("通用对话 - "));
    }

    #[test]
    fn test_save_keeps_entries_that_fail_to_decode() {
        let store = MemoryStore::new();
        let config = ChatConfig::default();
        save(&store, &session("old1", "kept"), &config);
        let mut history = store.get(CHAT_HISTORY_KEY).unwrap().unwrap();
        let mut broken = history[0].clone();
        broken["id"] = serde_json::json!("old2");
        broken["messages"][0]["role"] = serde_json::json!("bot");
        history.as_array_mut().unwrap().push(broken);
        store.set(CHAT_HISTORY_KEY, history).unwrap();

        save(&store, &session("new", "fresh"), &config);

        let raw = store.get(CHAT_HISTORY_KEY).unwrap().unwrap();
        let ids: Vec<&str> = raw
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["new", "old1", "old2"]);
        let listed: Vec<String> = list_history(&store).into_iter().map(|r| r.id).collect();
        assert_eq!(listed, vec!["new", "old1"]);

        assert!(delete_history_record(&store, "old2").unwrap());
        assert_eq!(store.get(CHAT_HISTORY_KEY).unwrap().unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_save_refuses_to_replace_unreadable_history() {
        let store = MemoryStore::new();
        store
            .set(CHAT_HISTORY_KEY, serde_json::json!({"not": "a list"}))
            .unwrap();
        let result = save_session(
            &store,
            &session("s1", "hello"),
            &ModelCatalog::default(),
            &Scenario::default(),
            &ChatConfig::default(),
            100,
        );
        assert!(result.is_err());
        assert_eq!(
            store.get(CHAT_HISTORY_KEY).unwrap().unwrap(),
            serde_json::json!({"not": "a list"})
        );
    }

    #[test]
    fn test_search_delete_and_preview() {
        let store = MemoryStore::new();
        let config = ChatConfig::default();
        save(&store, &session("s1", "rust lifetimes explained"), &config);
        save(&store, &session("s2", "蛋糕食谱"), &config);

        assert_eq!(search_history(&store, "RUST").len(), 1);
        assert_eq!(search_history(&store, "DeepSeek").len(), 2);
        assert_eq!(search_history(&store, "  ").len(), 2);

        let record = get_history_record(&store, "s2").unwrap();
        assert_eq!(preview(&record), "蛋糕食谱");

        assert!(delete_history_record(&store, "s1").unwrap());
        assert!(!delete_history_record(&store, "s1").unwrap());
        clear_history(&store).unwrap();
        assert!(list_history(&store).is_empty());
    }

    #[test]
    fn test_resume_recomputes_totals() {
        let mut record = build_record(
            &session("s1", "hi"),
            &ModelCatalog::default(),
            &Scenario::default(),
            &ChatConfig::default(),
            50,
        );
        record.total_tokens = 9999;
        let resumed = resume_session(&record, &ModelCatalog::default());
        assert_eq!(resumed.totals.total_tokens, 10);
        assert_eq!(resumed.messages.len(), 1);
        assert_eq!(resumed.id, "s1");
    }
}
