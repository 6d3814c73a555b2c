//! Operations the load engine can issue
//!
//! Paths and bodies may contain `{target}` (an identifier from the shared
//! target cache) and `{unique}` (a fresh random token) placeholders.

use std::collections::BTreeMap;

use qa_core::{Method, OperationCategory, QaError, QaResult};
use serde_json::{json, Value};

/// One operation of the traffic mix.
#[derive(Debug, Clone)]
pub struct OperationDef {
    pub name: String,
    pub category: OperationCategory,
    /// Service key in the `services` configuration section
    pub service: String,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    /// Needs an identifier from the shared target cache
    pub needs_target: bool,
    /// JSON pointer to the identifier a successful response produces
    pub produces_target: Option<String>,
}

impl OperationDef {
    fn read(name: &str, service: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            category: OperationCategory::Read,
            service: service.to_string(),
            method: Method::GET,
            path: path.to_string(),
            body: None,
            needs_target: path.contains("{target}"),
            produces_target: None,
        }
    }

    fn write(name: &str, service: &str, method: Method, path: &str, body: Value) -> Self {
        let needs_target = path.contains("{target}") || body.to_string().contains("{target}");
        Self {
            name: name.to_string(),
            category: OperationCategory::Write,
            service: service.to_string(),
            method,
            path: path.to_string(),
            body: Some(body),
            needs_target,
            produces_target: None,
        }
    }

    fn producing(mut self, pointer: &str) -> Self {
        self.produces_target = Some(pointer.to_string());
        self
    }

    /// Path with placeholders substituted.
    pub fn render_path(&self, target: Option<&str>, unique: &str) -> String {
        substitute(&self.path, target, unique)
    }

    /// Body with placeholders substituted in every string value.
    pub fn render_body(&self, target: Option<&str>, unique: &str) -> Option<Value> {
        self.body.as_ref().map(|body| render_value(body, target, unique))
    }
}

fn substitute(raw: &str, target: Option<&str>, unique: &str) -> String {
    let rendered = raw.replace("{unique}", unique);
    match target {
        Some(target) => rendered.replace("{target}", target),
        None => rendered,
    }
}

fn render_value(value: &Value, target: Option<&str>, unique: &str) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, target, unique)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, target, unique)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, target, unique)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Registry of operations, keyed by name.
#[derive(Debug, Clone)]
pub struct OperationCatalog {
    operations: BTreeMap<String, OperationDef>,
    /// Operation used to synthesize targets (seeding and empty cache)
    seed: OperationDef,
}

impl OperationCatalog {
    /// Build a catalog; the seed operation must exist and produce targets.
    pub fn new(operations: Vec<OperationDef>, seed_operation: &str) -> QaResult<Self> {
        let operations: BTreeMap<String, OperationDef> =
            operations.into_iter().map(|op| (op.name.clone(), op)).collect();

        let seed = operations
            .get(seed_operation)
            .cloned()
            .ok_or_else(|| QaError::validation(format!("seed operation `{seed_operation}` is not in the catalog")))?;
        if seed.produces_target.is_none() || seed.needs_target {
            return Err(QaError::validation(format!(
                "seed operation `{seed_operation}` must produce a target without needing one"
            )));
        }

        Ok(Self { operations, seed })
    }

    /// The listing-platform operation set.
    pub fn standard() -> QaResult<Self> {
        let operations = vec![
            OperationDef::read("list_pois", "poi", "/pois?page=1&page_size=20"),
            OperationDef::read("list_assets", "asset", "/assets?page=1&page_size=20"),
            OperationDef::read("list_scripts", "script", "/scripts?page=1&page_size=20"),
            OperationDef::read("list_renders", "render", "/renders?page=1&page_size=20"),
            OperationDef::read("health", "poi", "/healthz"),
            OperationDef::read("get_poi", "poi", "/pois/{target}"),
            OperationDef::write(
                "create_poi",
                "poi",
                Method::POST,
                "/pois",
                json!({
                    "name": "Load POI {unique}",
                    "description": "Created by the load generator",
                    "address": "1 Load Street, Paris",
                    "lat": 48.8566,
                    "lon": 2.3522,
                    "poi_type": "villa",
                    "tags": ["load"],
                }),
            )
            .producing("/id"),
            OperationDef::write(
                "create_asset",
                "asset",
                Method::POST,
                "/assets",
                json!({
                    "poi_id": "{target}",
                    "name": "load-{unique}.jpg",
                    "asset_type": "photo",
                    "file_path": "/data/assets/load-{unique}.jpg",
                    "mime_type": "image/jpeg",
                    "file_size": 1024,
                }),
            ),
            OperationDef::write(
                "update_poi",
                "poi",
                Method::PATCH,
                "/pois/{target}",
                json!({ "description": "Updated by the load generator {unique}" }),
            ),
        ];
        Self::new(operations, "create_poi")
    }

    pub fn get(&self, name: &str) -> Option<&OperationDef> {
        self.operations.get(name)
    }

    /// Look up an operation that must exist.
    pub fn require(&self, name: &str) -> QaResult<&OperationDef> {
        self.get(name)
            .ok_or_else(|| QaError::validation(format!("unknown load operation `{name}`")))
    }

    pub fn seed_operation(&self) -> &OperationDef {
        &self.seed
    }

    /// Services the catalog talks to.
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.operations.values().map(|op| op.service.as_str()).collect();
        services.sort_unstable();
        services.dedup();
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog() {
        let catalog = OperationCatalog::standard().unwrap();

        assert_eq!(catalog.seed_operation().name, "create_poi");
        assert!(catalog.require("update_poi").unwrap().needs_target);
        assert!(catalog.require("create_asset").unwrap().needs_target);
        assert!(!catalog.require("list_pois").unwrap().needs_target);
        assert!(catalog.require("get_poi").unwrap().needs_target);
        assert!(catalog.require("delete_all").is_err());
        assert_eq!(catalog.services(), vec!["asset", "poi", "render", "script"]);
    }

    #[test]
    fn test_render_placeholders() {
        let catalog = OperationCatalog::standard().unwrap();
        let op = catalog.require("create_asset").unwrap();

        let body = op.render_body(Some("poi-123"), "abc").unwrap();
        assert_eq!(body["poi_id"], "poi-123");
        assert_eq!(body["name"], "load-abc.jpg");
        assert_eq!(body["file_size"], 1024);

        let update = catalog.require("update_poi").unwrap();
        assert_eq!(update.render_path(Some("p1"), "x"), "/pois/p1");
    }

    #[test]
    fn test_seed_operation_must_produce() {
        let ops = vec![OperationDef::read("health", "poi", "/healthz")];
        assert!(OperationCatalog::new(ops, "health").is_err());
    }
}
