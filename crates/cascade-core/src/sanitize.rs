//! Output sanitization
//!
//! Step outputs and progress-event details are persisted as JSON; values
//! under credential-looking keys are redacted first.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::JsonMap;

/// Replacement for redacted values
pub const REDACTED: &str = "[REDACTED]";

static SENSITIVE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(password|passwd|secret|token|api[_-]?key|credential|authorization|private[_-]?key|access[_-]?key)",
    )
    .expect("sensitive key pattern")
});

/// Return a copy of `value` with credential-looking keys redacted at any
/// nesting depth
pub fn redact_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = JsonMap::new();
            for (key, entry) in map {
                if SENSITIVE_KEY_RE.is_match(key) {
                    redacted.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive(entry));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive).collect()),
        other => other.clone(),
    }
}

/// Redact an outputs map before persistence
pub fn redact_outputs(outputs: &JsonMap) -> JsonMap {
    match redact_sensitive(&Value::Object(outputs.clone())) {
        Value::Object(map) => map,
        _ => unreachable!("redacting an object yields an object"),
    }
}
