//! Builders for manifest YAML used across tests.

#![allow(dead_code)]

use serde_json::{json, Map, Value};

/// Builds a single manifest document.
pub struct ManifestBuilder {
    object: Map<String, Value>,
}

impl ManifestBuilder {
    pub fn new(api_version: &str, kind: &str, name: &str) -> Self {
        let mut object = Map::new();
        object.insert("apiVersion".into(), json!(api_version));
        object.insert("kind".into(), json!(kind));
        object.insert("metadata".into(), json!({ "name": name }));
        Self { object }
    }

    pub fn config_map(name: &str) -> Self {
        Self::new("v1", "ConfigMap", name)
    }

    pub fn namespace_object(name: &str) -> Self {
        Self::new("v1", "Namespace", name)
    }

    pub fn in_namespace(self, namespace: &str) -> Self {
        self.metadata("namespace", json!(namespace))
    }

    pub fn metadata(mut self, key: &str, value: Value) -> Self {
        if let Some(Value::Object(meta)) = self.object.get_mut("metadata") {
            meta.insert(key.to_string(), value);
        }
        self
    }

    pub fn data(mut self, key: &str, value: &str) -> Self {
        let data = self
            .object
            .entry("data")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(data) = data {
            data.insert(key.to_string(), json!(value));
        }
        self
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.object.insert(key.to_string(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.object.clone())
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.object).expect("Failed to serialize manifest")
    }
}

/// Joins documents with `---` separator lines.
pub fn multi_doc(documents: &[&ManifestBuilder]) -> String {
    documents
        .iter()
        .map(|d| d.to_yaml())
        .collect::<Vec<_>>()
        .join("---\n")
}
