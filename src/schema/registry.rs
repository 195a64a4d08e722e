//! Schema registry
//!
//! Schemas are loaded once at startup from `<schemas_dir>/*.json` (one schema
//! per file), checked, and then shared read-only behind `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::errors::{SchemaError, SchemaResult};
use super::types::ObjectSchema;

/// Name-indexed set of checked schemas
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<ObjectSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in the directory, in file name order.
    ///
    /// A missing directory yields an empty registry.
    pub fn load_dir(dir: &Path) -> SchemaResult<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }

        let entries = fs::read_dir(dir).map_err(|e| {
            SchemaError::malformed_file(
                dir.display().to_string(),
                format!("Failed to read schema directory: {}", e),
            )
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                SchemaError::malformed_file(
                    dir.display().to_string(),
                    format!("Failed to read directory entry: {}", e),
                )
            })?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            registry.load_file(&path)?;
        }
        registry.check_relations()?;

        Ok(registry)
    }

    /// Loads a single schema file.
    pub fn load_file(&mut self, path: &Path) -> SchemaResult<()> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed_file(path.display().to_string(), format!("Failed to read file: {}", e))
        })?;

        let schema: ObjectSchema = serde_json::from_str(&content).map_err(|e| {
            SchemaError::malformed_file(path.display().to_string(), format!("Invalid schema: {}", e))
        })?;

        self.register(schema)
    }

    /// Checks and registers a schema.
    pub fn register(&mut self, schema: ObjectSchema) -> SchemaResult<()> {
        schema.check()?;

        if self.schemas.contains_key(&schema.name) {
            return Err(SchemaError::duplicate_schema(&schema.name));
        }

        tracing::debug!(event = "schema_registered", schema = %schema.name, fields = schema.fields.len());
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Every relation must point at a registered schema.
    pub fn check_relations(&self) -> SchemaResult<()> {
        for schema in self.schemas.values() {
            for target in schema.relation_targets() {
                if !self.schemas.contains_key(target) {
                    return Err(SchemaError::invalid(
                        &schema.name,
                        format!("relation target '{}' is not a registered schema", target),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ObjectSchema>> {
        self.schemas.get(name).cloned()
    }

    /// Like [`get`](Self::get), as an error
    pub fn require(&self, name: &str) -> SchemaResult<Arc<ObjectSchema>> {
        self.get(name).ok_or_else(|| SchemaError::unknown_schema(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Schema names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::errors::SchemaErrorCode;
    use crate::schema::types::{FieldKind, FieldSpec, RelationRules};
    use tempfile::TempDir;

    fn users() -> ObjectSchema {
        ObjectSchema::new("users", vec![FieldSpec::new("email", FieldKind::string()).required()])
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SchemaRegistry::new();
        registry.register(users()).unwrap();

        assert!(registry.contains("users"));
        assert_eq!(registry.get("users").unwrap().name, "users");
        assert!(registry.get("orders").is_none());
        assert_eq!(
            registry.require("orders").unwrap_err().code(),
            SchemaErrorCode::MangoloUnknownSchema
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(users()).unwrap();

        let err = registry.register(users()).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::MangoloDuplicateSchema);
    }

    #[test]
    fn test_load_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("users.json"),
            r#"{ "name": "users", "fields": [{ "name": "email", "kind": { "type": "string" }, "required": true }] }"#,
        )
        .unwrap();
        fs::write(temp.path().join("README.md"), "not a schema").unwrap();

        let registry = SchemaRegistry::load_dir(temp.path()).unwrap();
        assert_eq!(registry.names(), vec!["users"]);
    }

    #[test]
    fn test_load_dir_malformed_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("broken.json"), "{ not json").unwrap();

        let err = SchemaRegistry::load_dir(temp.path()).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::MangoloSchemaMalformedFile);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = SchemaRegistry::load_dir(&temp.path().join("absent")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dangling_relation_rejected() {
        let mut registry = SchemaRegistry::new();
        registry
            .register(ObjectSchema::new(
                "orders",
                vec![FieldSpec::new(
                    "customer",
                    FieldKind::Relation(RelationRules {
                        target: "users".into(),
                        many: false,
                    }),
                )],
            ))
            .unwrap();

        assert!(registry.check_relations().is_err());
        registry.register(users()).unwrap();
        assert!(registry.check_relations().is_ok());
    }
}
