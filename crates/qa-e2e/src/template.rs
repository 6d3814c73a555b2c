//! `{name}` placeholders in paths and bodies.
//!
//! A placeholder is a brace-delimited run of ASCII lowercase letters,
//! digits and underscores. Anything else between braces is left as is.

use std::collections::BTreeMap;

use serde_json::Value;

/// Variables extracted so far in a run.
pub type Vars = BTreeMap<String, String>;

fn placeholders(raw: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let bytes = raw.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            if bytes[pos] == b'{' {
                let start = pos;
                let mut end = pos + 1;
                while end < bytes.len() && is_name_byte(bytes[end]) {
                    end += 1;
                }
                if end < bytes.len() && bytes[end] == b'}' && end > start + 1 {
                    pos = end + 1;
                    return Some((start, end + 1));
                }
            }
            pos += 1;
        }
        None
    })
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'
}

/// Names referenced by a string.
pub fn references(raw: &str) -> Vec<String> {
    placeholders(raw)
        .map(|(start, end)| raw[start + 1..end - 1].to_string())
        .collect()
}

/// Names referenced anywhere in a JSON value (string leaves only).
pub fn value_references(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => references(s),
        Value::Array(items) => items.iter().flat_map(value_references).collect(),
        Value::Object(map) => map.values().flat_map(value_references).collect(),
        _ => Vec::new(),
    }
}

/// Substitute every placeholder. Returns the first missing name on error.
pub fn render(raw: &str, vars: &Vars) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for (start, end) in placeholders(raw) {
        let name = &raw[start + 1..end - 1];
        let value = vars.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(&raw[last..start]);
        out.push_str(value);
        last = end;
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

/// Substitute placeholders in every string leaf of a JSON value.
pub fn render_value(value: &Value, vars: &Vars) -> Result<Value, String> {
    Ok(match value {
        Value::String(s) => Value::String(render(s, vars)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, vars))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, vars)?)))
                .collect::<Result<_, String>>()?,
        ),
        other => other.clone(),
    })
}
