//! A deterministic JSON encoding that two independent implementations —
//! potentially in different languages — will produce byte-for-byte
//! identically for the same logical value, so a detached signature over it
//! is portable.
//!
//! Rules (§4.1): object keys sorted lexicographically at every depth,
//! array order preserved, no inter-token whitespace, minimal string
//! escaping, numbers rendered as `serde_json` already normalizes them.

use serde_json::Value;
use std::fmt::Write as _;

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            // serde_json already prints the shortest round-trippable form;
            // that is by construction a valid canonical number token.
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_escaped_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped_string(key, out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Minimal JSON string escaping: control characters, `"`, and `\`.
/// Everything else (including non-ASCII) passes through verbatim, matching
/// the "fixed minimal scheme" §4.1 calls for.
fn write_escaped_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
