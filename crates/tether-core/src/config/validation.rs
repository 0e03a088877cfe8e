//! Config validation - warns about unknown fields

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Validate JSON config and warn about unknown fields.
///
/// Unknown fields are ignored by deserialization, so a typo silently falls
/// back to the default.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    for path in unknown_fields(content) {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

/// Dotted paths of fields the config does not know, e.g.
/// `"connection.reconectDelayMs"`. Empty for unparseable input.
#[must_use]
pub fn unknown_fields(content: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };
    let mut unknowns = find_unknown_keys(&value, &expected_config_keys(), "");
    unknowns.sort();
    unknowns
}

fn find_unknown_keys(value: &Value, expected: &ExpectedKeys, prefix: &str) -> Vec<String> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };

    let mut unknowns = Vec::new();
    for (key, child) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        if let Some(nested) = expected.nested.get(key.as_str()) {
            unknowns.extend(find_unknown_keys(child, nested, &path));
        } else if !expected.fields.contains(key.as_str()) {
            unknowns.push(path);
        }
    }
    unknowns
}

/// Expected keys for a config section.
/// `fields` are leaf fields, `nested` are sections with their own keys.
#[derive(Default)]
struct ExpectedKeys {
    fields: HashSet<&'static str>,
    nested: HashMap<&'static str, ExpectedKeys>,
}

impl ExpectedKeys {
    fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
            nested: HashMap::new(),
        }
    }

    fn with_nested(mut self, key: &'static str, nested: ExpectedKeys) -> Self {
        self.nested.insert(key, nested);
        self
    }
}

fn expected_config_keys() -> ExpectedKeys {
    ExpectedKeys::default()
        .with_nested(
            "connection",
            ExpectedKeys::new(&["url", "reconnectDelayMs", "maxQueuedFrames"]),
        )
        .with_nested("upload", ExpectedKeys::new(&["chunkSize"]))
        .with_nested(
            "channels",
            ExpectedKeys::new(&["binaryMethod", "progressMethod"]),
        )
        .with_nested("cache", ExpectedKeys::new(&["enabled"]))
}
