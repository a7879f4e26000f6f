//! Canonical-JSON md5 checksums
//!
//! Battle records are content-addressed by md5 over a canonical JSON
//! rendering: object keys sorted, items joined with `", "`, keys and values
//! joined with `": "`, and non-ASCII characters escaped as `\uXXXX`. The
//! exact byte layout matters: prompt checksums are used as object-store key
//! components and as the prebaked-prompt lookup index, so they must remain
//! stable across releases.

use serde_json::Value;

/// Hex-encoded md5 of raw bytes.
pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Hex-encoded md5 of `value + salt`.
///
/// Used to pseudonymize user IPs and fingerprints; raw values never outlive
/// the call.
pub fn salted_md5(value: &str, salt: &str) -> String {
    md5_hex(format!("{}{}", value, salt).as_bytes())
}

/// md5 over the canonical JSON rendering of a value.
pub fn json_checksum(value: &Value) -> String {
    md5_hex(canonical_json(value).as_bytes())
}

/// Render a JSON value canonically: sorted keys, `", "` / `": "` separators.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(key, out);
                out.push_str(": ");
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

// ASCII-only string escaping; astral characters become surrogate pairs.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if (c as u32) > 0x7e => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
