//! JSON and YAML documents.
//!
//! A document that fails to parse is still a successful extraction: the
//! record carries `<fmt>_valid = false` and the parser message.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use super::text::{decode_lossy, preview, read_capped};
use super::{Extractor, Sniff};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn of(entry: &FileEntry) -> Option<Self> {
        match entry.extension().as_str() {
            ".json" | ".geojson" | ".jsonld" => Some(Format::Json),
            ".yaml" | ".yml" => Some(Format::Yaml),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
        }
    }
}

pub struct StructuredExtractor {
    max_bytes: usize,
    preview_chars: usize,
}

impl StructuredExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            max_bytes: config.max_structure_bytes,
            preview_chars: config.preview_chars,
        }
    }
}

impl Extractor for StructuredExtractor {
    fn name(&self) -> &str {
        "structured"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        Format::of(entry).is_some()
            || matches!(
                sniff.mime(),
                "application/json" | "application/x-yaml" | "text/yaml" | "text/x-yaml"
            )
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let format = Format::of(entry).unwrap_or(Format::Json);
        let p = format.prefix();
        let (bytes, truncated) = read_capped(&entry.path, self.max_bytes)?;

        let mut fields = Fields::new();
        fields.insert(
            "content_preview".into(),
            Value::String(preview(&decode_lossy(&bytes), self.preview_chars)),
        );
        fields.insert(format!("{p}_size"), Value::from(entry.size));
        if truncated {
            // Too large to parse within the configured budget.
            fields.insert(format!("{p}_too_large"), Value::Bool(true));
            return Ok(fields);
        }

        let parsed = match format {
            Format::Json => serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()),
            Format::Yaml => parse_yaml(&bytes, &mut fields),
        };
        match parsed {
            Ok(root) => {
                let keys = root_keys(&root);
                fields.insert(format!("{p}_valid"), Value::Bool(true));
                fields.insert(format!("{p}_structure"), structure(&root));
                fields.insert(format!("{p}_root_key_count"), Value::from(keys.len()));
                fields.insert(
                    format!("{p}_root_keys"),
                    Value::Array(keys.into_iter().map(Value::String).collect()),
                );
                fields.insert(format!("{p}_depth"), Value::from(depth(&root)));
            }
            Err(message) => {
                tracing::debug!(path = %entry.path.display(), error = %message, "invalid {p} document");
                fields.insert(format!("{p}_valid"), Value::Bool(false));
                fields.insert(format!("{p}_error"), Value::String(message));
            }
        }
        Ok(fields)
    }
}

/// Parse one or more YAML documents. Several documents become an array
/// root and set `yaml_document_count`.
fn parse_yaml(bytes: &[u8], fields: &mut Fields) -> Result<Value, String> {
    use serde::Deserialize;

    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(doc).map_err(|e| e.to_string())?;
        docs.push(yaml_to_json(value));
    }
    match docs.len() {
        0 => Ok(Value::Null),
        1 => Ok(docs.remove(0)),
        n => {
            fields.insert("yaml_document_count".into(), Value::from(n));
            Ok(Value::Array(docs))
        }
    }
}

fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Y;
    match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Y::Mapping(mapping) => {
            let mut out = Map::new();
            for (k, v) in mapping {
                let key = match k {
                    Y::String(s) => s,
                    other => serde_yaml::to_string(&other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                out.insert(key, yaml_to_json(v));
            }
            Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

fn structure(root: &Value) -> Value {
    match root {
        Value::Object(map) => json!({
            "type": "object",
            "key_count": map.len(),
            "sample_keys": map.keys().take(5).cloned().collect::<Vec<_>>(),
        }),
        Value::Array(items) => {
            let types: BTreeSet<&str> = items.iter().take(5).map(type_name).collect();
            json!({
                "type": "array",
                "length": items.len(),
                "sample_item_types": types.into_iter().collect::<Vec<_>>(),
            })
        }
        Value::String(s) => json!({ "type": "string", "length": s.chars().count() }),
        other => json!({ "type": type_name(other) }),
    }
}

fn root_keys(root: &Value) -> Vec<String> {
    match root {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Nesting depth; scalars and empty containers are depth 0.
fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.values().map(|v| depth(v) + 1).max().unwrap_or(0),
        Value::Array(items) => items.iter().map(|v| depth(v) + 1).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::entry_for;

    fn extract(name: &str, content: &str) -> Fields {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        StructuredExtractor::new(&ExtractConfig::default())
            .extract(&entry_for(&path))
            .unwrap()
    }

    #[test]
    fn json_structure_and_depth() {
        let fields = extract(
            "config.json",
            r#"{"name":"x","config":{"retry":{"count":3}},"tags":["a","b"]}"#,
        );
        assert_eq!(fields["json_valid"], true);
        assert_eq!(fields["json_root_key_count"], 3);
        assert_eq!(fields["json_depth"], 3);
        assert_eq!(fields["json_structure"]["type"], "object");
    }

    #[test]
    fn invalid_json_is_not_a_failure() {
        let fields = extract("broken.json", "{\"a\": ");
        assert_eq!(fields["json_valid"], false);
        assert!(fields["json_error"].as_str().unwrap().contains("EOF"));
    }

    #[test]
    fn yaml_documents() {
        let fields = extract("app.yaml", "name: demo\nports:\n  - 80\n  - 443\n");
        assert_eq!(fields["yaml_valid"], true);
        assert_eq!(fields["yaml_root_keys"], json!(["name", "ports"]));
        assert_eq!(fields["yaml_depth"], 2);

        let multi = extract("multi.yml", "a: 1\n---\nb: 2\n");
        assert_eq!(multi["yaml_document_count"], 2);
        assert_eq!(multi["yaml_structure"]["type"], "array");
        assert_eq!(multi["yaml_structure"]["sample_item_types"], json!(["object"]));
    }

    #[test]
    fn array_item_types_are_sorted_and_unique() {
        let fields = extract("list.json", r#"[1, "x", true, null, 2]"#);
        assert_eq!(
            fields["json_structure"]["sample_item_types"],
            json!(["boolean", "null", "number", "string"])
        );
        assert_eq!(fields["json_depth"], 1);
    }
}
