//! Deterministic payload encoding – the wire compatibility surface.
//!
//! Two independent implementations must agree byte-for-byte on this encoding
//! because the event hash covers it. The rules:
//!
//! * object keys sorted lexicographically (by UTF-8 bytes) at every level,
//! * no insignificant whitespace,
//! * integers serialized as integers, floats with the shortest
//!   round-trip decimal representation,
//! * non-finite floats are unrepresentable (`serde_json::Number` refuses
//!   them before a payload ever reaches this module),
//! * the top level must be an object.

use serde_json::Value;

use crate::error::StoreError;

/// Encode a payload into its canonical byte form.
///
/// Fails when the top level is not a JSON object.
pub fn canonical_payload_bytes(payload: &Value) -> Result<Vec<u8>, StoreError> {
    if !payload.is_object() {
        return Err(StoreError::InvalidPayload(
            "payload must be a JSON object".into(),
        ));
    }
    let mut out = Vec::with_capacity(128);
    write_value(payload, &mut out)?;
    Ok(out)
}

/// Canonical bytes of an arbitrary JSON value.
///
/// Used for payload fingerprinting (duplicate detection) where the
/// top-level-object restriction does not apply.
pub fn canonical_value_bytes(value: &Value) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::with_capacity(64);
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), StoreError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        // serde_json renders integers via itoa and floats via ryu, which is
        // exactly the integer-exact / shortest-round-trip rule.
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => write_escaped(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Key order in the incoming map is not trusted; sort explicitly
            // so the encoding is independent of how the payload was built.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_escaped(key, out);
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

/// JSON string escaping: the two mandatory escapes plus `\u00XX` for other
/// control characters. No optional escapes, so the form is unique.
fn write_escaped(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0C}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let a = json!({"b": {"z": 1, "a": 2}, "a": 3});
        let b = json!({"a": 3, "b": {"a": 2, "z": 1}});
        assert_eq!(
            canonical_payload_bytes(&a).unwrap(),
            canonical_payload_bytes(&b).unwrap()
        );
        assert_eq!(
            canonical_payload_bytes(&a).unwrap(),
            br#"{"a":3,"b":{"a":2,"z":1}}"#.to_vec()
        );
    }

    #[test]
    fn no_whitespace() {
        let v = json!({"k": [1, 2, {"x": true}]});
        let bytes = canonical_payload_bytes(&v).unwrap();
        assert!(!bytes.contains(&b' '));
        assert_eq!(bytes, br#"{"k":[1,2,{"x":true}]}"#.to_vec());
    }

    #[test]
    fn integers_stay_integers() {
        let v = json!({"n": 42, "m": -7, "big": 9_007_199_254_740_993u64});
        let s = String::from_utf8(canonical_payload_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, r#"{"big":9007199254740993,"m":-7,"n":42}"#);
    }

    #[test]
    fn floats_shortest_round_trip() {
        let v = json!({"x": 0.1, "y": 1.5, "z": 24.1});
        let s = String::from_utf8(canonical_payload_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, r#"{"x":0.1,"y":1.5,"z":24.1}"#);
    }

    #[test]
    fn strings_escaped_uniquely() {
        let v = json!({"s": "line\nbreak \"quoted\" \\ \u{01}"});
        let s = String::from_utf8(canonical_payload_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, "{\"s\":\"line\\nbreak \\\"quoted\\\" \\\\ \\u0001\"}");
    }

    #[test]
    fn unicode_passes_through_unescaped() {
        let v = json!({"s": "héllo ∆"});
        let s = String::from_utf8(canonical_payload_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, r#"{"s":"héllo ∆"}"#);
    }

    #[test]
    fn top_level_must_be_object() {
        assert!(canonical_payload_bytes(&json!(42)).is_err());
        assert!(canonical_payload_bytes(&json!([1])).is_err());
        assert!(canonical_payload_bytes(&json!("str")).is_err());
        assert!(canonical_payload_bytes(&json!(null)).is_err());
    }

    #[test]
    fn encoding_round_trips_through_serde_json() {
        let v = json!({"a": [1, 2.5, "three"], "b": {"nested": null}});
        let bytes = canonical_payload_bytes(&v).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, v);
    }
}
