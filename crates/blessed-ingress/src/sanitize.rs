//! Capability-based log sanitizer.
//!
//! Boundary log lines carry request detail; anything that looks like a
//! secret is replaced before the value reaches a log record. The
//! sanitizer is a value transform, not a formatter hook, so it works the
//! same for tracing fields, error detail, and test assertions.

use serde_json::Value;

/// Replacement for redacted values.
const REDACTED: &str = "[redacted]";

/// Key substrings whose values are always redacted, case-insensitive.
const SECRET_KEY_MARKERS: &[&str] = &[
    "token",
    "capability",
    "passphrase",
    "password",
    "secret",
    "authorization",
    "private_key",
    "seed",
];

/// Redact secret-bearing fields from a JSON value, recursively.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if is_secret_key(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), sanitize(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SECRET_KEY_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_keys_redacted_at_any_depth() {
        let input = json!({
            "asset": "BTC",
            "capability": "eyJhbGciOi...",
            "nested": {"api_token": "abc", "score": 0.8},
            "list": [{"passphrase": "hunter2"}],
        });
        let clean = sanitize(&input);
        assert_eq!(clean["capability"], "[redacted]");
        assert_eq!(clean["nested"]["api_token"], "[redacted]");
        assert_eq!(clean["list"][0]["passphrase"], "[redacted]");
        // Non-secret values survive untouched.
        assert_eq!(clean["asset"], "BTC");
        assert_eq!(clean["nested"]["score"], 0.8);
    }

    #[test]
    fn case_is_irrelevant() {
        let input = json!({"Authorization": "Bearer x", "SECRET_KEY": "y"});
        let clean = sanitize(&input);
        assert_eq!(clean["Authorization"], "[redacted]");
        assert_eq!(clean["SECRET_KEY"], "[redacted]");
    }
}
