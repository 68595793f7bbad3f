use serde_json::Value;

pub fn truncate_for_log(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max).collect();
        format!("{}…", truncated)
    }
}

pub fn sanitize_header_value(key: &str, value: &str) -> String {
    let lowered = key.to_ascii_lowercase();
    if lowered.contains("authorization")
        || lowered.contains("api-key")
        || lowered.contains("apikey")
        || lowered.contains("secret")
        || lowered.contains("token")
        || lowered.contains("cookie")
    {
        "***".into()
    } else {
        truncate_for_log(value, 64)
    }
}

/// Keeps the first eight characters of a key so logs can tell keys apart.
pub fn redact_api_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{}... (len {})", prefix, key.chars().count())
}

/// Short preview of a request body. Inline image payloads are replaced by their size.
pub fn summarize_json(value: &Value) -> String {
    truncate_for_log(&strip_data_urls(value).to_string(), 512)
}

fn strip_data_urls(value: &Value) -> Value {
    match value {
        Value::String(s) if s.starts_with("data:") => {
            Value::String(format!("<data url, {} bytes>", s.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_data_urls).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), strip_data_urls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
