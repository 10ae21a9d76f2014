//! Configuration fingerprinting.
//!
//! A fingerprint is FNV-1a (32-bit) over a canonical rendering of the
//! configuration in which object keys are sorted at every depth, so two
//! configurations that differ only in key insertion order share a tag.

use serde::Serialize;
use serde_json::{json, Value};

use ofs_core::OfsError;

use crate::serde::to_value;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Renders a JSON tree with object keys sorted lexicographically at every depth.
pub fn stable_stringify(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => out.push_str(&number_literal(number)),
        Value::String(text) => out.push_str(&Value::String(text.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key], out);
            }
            out.push('}');
        }
    }
}

// Integral floats render without a fraction so `1` and `1.0` agree.
fn number_literal(number: &serde_json::Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e21 => {
            format!("{}", v as i128)
        }
        Some(v) => format!("{v}"),
        None => number.to_string(),
    }
}

/// 32-bit FNV-1a over the UTF-8 bytes of `text`.
pub fn fnv1a32(text: &str) -> u32 {
    text.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Formats a hash as eight lowercase hex digits.
pub fn hash_hex(hash: u32) -> String {
    format!("{hash:08x}")
}

/// Fingerprint of `{snapshot, protocol}` used to tag exports.
pub fn config_hash<P: Serialize>(snapshot: &Value, protocol: &P) -> Result<String, OfsError> {
    let protocol = to_value(protocol)?;
    let payload = json!({ "snapshot": snapshot, "protocol": protocol });
    Ok(hash_hex(fnv1a32(&stable_stringify(&payload))))
}
