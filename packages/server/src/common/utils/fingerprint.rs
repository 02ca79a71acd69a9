use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Fields that change on every read and must not affect the fingerprint.
const VOLATILE_FIELDS: &[&str] = &["timestamp"];

/// Generate a fingerprint for a progress payload, usable as an ETag.
///
/// SHA-256 over the canonical JSON of `value` with volatile fields removed.
/// Object keys are emitted in sorted order at every level, so two payloads
/// with equal content always hash the same regardless of insertion order.
pub fn generate_fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&strip_volatile(value)).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The fingerprint wrapped in quotes, as sent in the `ETag` header.
pub fn etag_for(value: &Value) -> String {
    format!("\"{}\"", generate_fingerprint(value))
}

/// Whether an `If-None-Match` header value matches `etag`.
///
/// Accepts a comma-separated list, weak validators and `*`.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let bare = etag.trim_matches('"');
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*"
            || candidate.trim_start_matches("W/").trim_matches('"') == bare
    })
}

fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let stripped: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !VOLATILE_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(stripped)
        }
        other => other.clone(),
    }
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{}]", body)
        }
        scalar => scalar.to_string(),
    }
}
