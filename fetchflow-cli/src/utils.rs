use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

/// Replaces the password of a connection URL with `***`. Strings that do
/// not parse as URLs are returned unchanged.
pub fn redact_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_err() {
                return raw.to_string();
            }
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Stable key for a fetched item: its `id` field when present, otherwise
/// the SHA-256 of its JSON encoding.
pub fn item_key(item: &Value) -> String {
    match item.get("id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(item.to_string().as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

/// Splits `KEY=VALUE`; the key must be non-empty.
pub fn parse_key_value(s: &str) -> Option<(&str, &str)> {
    let (k, v) = s.split_once('=')?;
    let k = k.trim();
    if k.is_empty() {
        None
    } else {
        Some((k, v))
    }
}

/// Non-empty, non-comment lines of a sources file.
pub fn parse_sources(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}
