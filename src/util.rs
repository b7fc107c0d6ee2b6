use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    format!("{:x}", hasher.finalize())
}

/// First `max` characters of `s`, used for error previews.
pub fn preview(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    let mut out: String = trimmed.chars().take(max).collect();
    if trimmed.chars().count() > max {
        out.push_str("...");
    }
    out
}

/// Interprets a CLI argument as JSON when it parses, otherwise as a string.
pub fn parse_cli_value(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    Value::String(raw.to_string())
}

pub fn value_at_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in path.split('.') {
        if seg.is_empty() {
            continue;
        }
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// Sets a dotted path, creating (or replacing non-object) intermediate nodes.
pub fn set_value_at_path(
    root: &mut Value,
    path: &str,
    new_value: Value,
) -> Result<(), ValidationError> {
    let mut segs: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some(last) = segs.pop() else {
        return Err(ValidationError::new("key path cannot be empty"));
    };
    let mut cur = root;
    for seg in segs {
        if !cur.is_object() {
            *cur = json!({});
        }
        let Some(obj) = cur.as_object_mut() else {
            return Err(ValidationError::new(format!("cannot descend into '{seg}'")));
        };
        cur = obj.entry(seg.to_string()).or_insert_with(|| json!({}));
    }
    if !cur.is_object() {
        *cur = json!({});
    }
    let Some(obj) = cur.as_object_mut() else {
        return Err(ValidationError::new(format!("cannot set '{last}'")));
    };
    obj.insert(last.to_string(), new_value);
    Ok(())
}
