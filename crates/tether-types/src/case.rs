//! Key case conversion at the serialization boundary.
//!
//! The UI speaks camelCase, the rendering server speaks snake_case. These
//! helpers rewrite every object key of a JSON value, recursing through arrays
//! and nested objects. Values themselves are never touched.

use serde_json::{Map, Value};

/// Convert a single key from snake_case to camelCase.
///
/// An underscore is dropped when it follows a non-underscore character and
/// precedes an ASCII lowercase letter; that letter is uppercased. Leading
/// underscores and underscores before digits are kept.
///
/// ```
/// # use tether_types::case::to_camel_key;
/// assert_eq!(to_camel_key("just_pinged"), "justPinged");
/// assert_eq!(to_camel_key("_private"), "_private");
/// assert_eq!(to_camel_key("layer_2"), "layer_2");
/// assert_eq!(to_camel_key("alreadyCamel"), "alreadyCamel");
/// ```
#[must_use]
pub fn to_camel_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        if c == '_'
            && prev.is_some_and(|p| p != '_')
            && let Some(next) = chars.peek().copied()
            && next.is_ascii_lowercase()
        {
            chars.next();
            out.push(next.to_ascii_uppercase());
            prev = Some(next);
            continue;
        }
        out.push(c);
        prev = Some(c);
    }

    out
}

/// Convert a single key from camelCase to snake_case.
///
/// Every ASCII uppercase letter after the first position becomes `_` plus its
/// lowercase form.
///
/// ```
/// # use tether_types::case::to_snake_key;
/// assert_eq!(to_snake_key("pingPong"), "ping_pong");
/// assert_eq!(to_snake_key("loaderName"), "loader_name");
/// assert_eq!(to_snake_key("already_snake"), "already_snake");
/// ```
#[must_use]
pub fn to_snake_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Deep copy of `value` with every object key converted to camelCase.
#[must_use]
pub fn to_camel(value: &Value) -> Value {
    let mut value = value.clone();
    camelize_in_place(&mut value);
    value
}

/// Deep copy of `value` with every object key converted to snake_case.
#[must_use]
pub fn to_snake(value: &Value) -> Value {
    let mut value = value.clone();
    snakeize_in_place(&mut value);
    value
}

/// Convert every object key in `value` to camelCase without copying leaves.
pub fn camelize_in_place(value: &mut Value) {
    rewrite_keys(value, to_camel_key);
}

/// Convert every object key in `value` to snake_case without copying leaves.
pub fn snakeize_in_place(value: &mut Value) {
    rewrite_keys(value, to_snake_key);
}

fn rewrite_keys(value: &mut Value, convert: fn(&str) -> String) {
    match value {
        Value::Object(map) => {
            let old = std::mem::take(map);
            let mut rewritten = Map::with_capacity(old.len());
            for (key, mut child) in old {
                rewrite_keys(&mut child, convert);
                rewritten.insert(convert(&key), child);
            }
            *map = rewritten;
        }
        Value::Array(items) => {
            for item in items {
                rewrite_keys(item, convert);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}
