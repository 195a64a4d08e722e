//! Schema type definitions
//!
//! A schema file is one JSON object:
//!
//! ```json
//! {
//!   "name": "products",
//!   "fields": [
//!     { "name": "title", "kind": { "type": "string", "max_length": 120 }, "required": true },
//!     { "name": "price", "kind": { "type": "number", "min": 0 } }
//!   ],
//!   "indexes": [{ "name": "by_title", "fields": ["title"], "kind": "unique" }],
//!   "permissions": { "read": [{ "allow": ["*"] }] }
//! }
//! ```
//!
//! Every field has exactly one kind and the kind carries only the modifiers
//! legal for it. Unknown modifiers are rejected during deserialization;
//! cross-field constraints are checked by [`ObjectSchema::check`].

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use super::errors::{SchemaError, SchemaResult};
use super::expr::Expr;
use super::permissions::Permissions;

/// A compiled regular expression that round-trips through its source text
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Pattern::new(&source)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::try_from(source).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringRules {
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub pattern: Option<Pattern>,
    #[serde(default)]
    pub default: Option<String>,
    /// Stored through the encryption layer of the store
    #[serde(default)]
    pub encrypted: bool,
    /// Replaced by its Argon2 hash once every check passes
    #[serde(default, alias = "bcrypt")]
    pub hashed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumberRules {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub integer: bool,
    /// Assigned by the store at commit when absent
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub default: Option<Number>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BooleanRules {
    #[serde(default)]
    pub default: Option<bool>,
}

/// Modifiers for `date` and `timestamp` fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemporalRules {
    /// Set to now when the record is created without a value
    #[serde(default)]
    pub auto_now: bool,
    /// Set to now on every write
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumRules {
    pub values: Vec<String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectRules {
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrayRules {
    pub items: Box<FieldKind>,
    #[serde(default)]
    pub min_items: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub unique_items: bool,
}

/// A file reference: `{ "name": ..., "size": ..., "mime_type": ... }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRules {
    /// Maximum size in bytes
    #[serde(default)]
    pub max_size: Option<u64>,
    /// Accepted MIME types; empty accepts any
    #[serde(default)]
    pub mime_types: Vec<String>,
}

/// A reference to records of another schema by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationRules {
    pub target: String,
    #[serde(default)]
    pub many: bool,
}

/// Primitive kind of a field with the modifiers legal for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    String(StringRules),
    Number(NumberRules),
    Boolean(BooleanRules),
    Date(TemporalRules),
    Timestamp(TemporalRules),
    Enum(EnumRules),
    Object(ObjectRules),
    Array(ArrayRules),
    File(FileRules),
    Relation(RelationRules),
}

impl FieldKind {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String(_) => "string",
            FieldKind::Number(_) => "number",
            FieldKind::Boolean(_) => "boolean",
            FieldKind::Date(_) => "date",
            FieldKind::Timestamp(_) => "timestamp",
            FieldKind::Enum(_) => "enum",
            FieldKind::Object(_) => "object",
            FieldKind::Array(_) => "array",
            FieldKind::File(_) => "file",
            FieldKind::Relation(_) => "relation",
        }
    }

    pub fn string() -> Self {
        FieldKind::String(StringRules::default())
    }

    pub fn number() -> Self {
        FieldKind::Number(NumberRules::default())
    }

    pub fn boolean() -> Self {
        FieldKind::Boolean(BooleanRules::default())
    }

    /// Structural checks on the modifiers of this kind.
    fn check(&self, path: &str, nested: bool) -> Result<(), String> {
        match self {
            FieldKind::String(rules) => {
                if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
                    if min > max {
                        return Err(format!("{}: min_length {} exceeds max_length {}", path, min, max));
                    }
                }
            }
            FieldKind::Number(rules) => {
                if let (Some(min), Some(max)) = (rules.min, rules.max) {
                    if min > max {
                        return Err(format!("{}: min {} exceeds max {}", path, min, max));
                    }
                }
                if rules.auto_increment && rules.default.is_some() {
                    return Err(format!("{}: auto_increment cannot have a default", path));
                }
                if rules.auto_increment && nested {
                    return Err(format!("{}: auto_increment is only allowed on top-level fields", path));
                }
            }
            FieldKind::Boolean(_) | FieldKind::File(_) => {}
            FieldKind::Date(rules) | FieldKind::Timestamp(rules) => {
                if (rules.auto_now || rules.auto_update) && rules.default.is_some() {
                    return Err(format!("{}: auto_now/auto_update cannot have a default", path));
                }
            }
            FieldKind::Enum(rules) => {
                if rules.values.is_empty() {
                    return Err(format!("{}: enum must declare at least one value", path));
                }
                let mut seen = HashSet::new();
                for value in &rules.values {
                    if !seen.insert(value) {
                        return Err(format!("{}: enum value '{}' declared twice", path, value));
                    }
                }
                if let Some(default) = &rules.default {
                    if !rules.values.contains(default) {
                        return Err(format!("{}: default '{}' is not an enum value", path, default));
                    }
                }
            }
            FieldKind::Object(rules) => check_fields(&rules.fields, path, true)?,
            FieldKind::Array(rules) => {
                if let (Some(min), Some(max)) = (rules.min_items, rules.max_items) {
                    if min > max {
                        return Err(format!("{}: min_items {} exceeds max_items {}", path, min, max));
                    }
                }
                rules.items.check(&format!("{}[]", path), true)?;
            }
            FieldKind::Relation(rules) => {
                if rules.target.is_empty() {
                    return Err(format!("{}: relation target is empty", path));
                }
            }
        }
        Ok(())
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Field becomes required when this predicate holds over the validated
    /// sibling fields
    #[serde(default)]
    pub required_if: Option<Expr>,
    /// Value must not already exist in the collection
    #[serde(default)]
    pub unique: bool,
    /// Derived from other fields; never accepted from input
    #[serde(default)]
    pub computed: Option<Expr>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            required_if: None,
            unique: false,
            computed: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_if(mut self, guard: Expr) -> Self {
        self.required_if = Some(guard);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn computed(mut self, expr: Expr) -> Self {
        self.computed = Some(expr);
        self
    }

    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }
}

/// Index kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Btree,
    Unique,
    Composite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDef {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub kind: IndexKind,
}

/// Object-level validation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationRule {
    pub name: String,
    /// Must hold for the record to be valid
    pub validate: Expr,
    pub message: String,
    /// Rule only applies when this holds
    #[serde(default)]
    pub condition: Option<Expr>,
}

/// Object schema ("slice")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectSchema {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

/// Name of the store-assigned identifier, accepted without declaration
pub const ID_FIELD: &str = "id";

impl ObjectSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields,
            indexes: Vec::new(),
            permissions: Permissions::default(),
            validations: Vec::new(),
        }
    }

    /// Gets a top-level field by name
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field sets whose values must be unique in the collection: every
    /// `unique` field plus every unique index.
    pub fn unique_constraints(&self) -> Vec<Vec<String>> {
        let mut out: Vec<Vec<String>> = self
            .fields
            .iter()
            .filter(|f| f.unique)
            .map(|f| vec![f.name.clone()])
            .collect();

        for index in self.indexes.iter().filter(|i| i.kind == IndexKind::Unique) {
            if !out.contains(&index.fields) {
                out.push(index.fields.clone());
            }
        }
        out
    }

    /// Load-time checks. A schema that passes is immutable from then on.
    pub fn check(&self) -> SchemaResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::invalid("<unnamed>", "schema name is empty"));
        }

        check_fields(&self.fields, "", false).map_err(|e| SchemaError::invalid(&self.name, e))?;

        // Computed fields may read plain fields and computed fields declared
        // before them.
        let mut visible: HashSet<&str> = self
            .fields
            .iter()
            .filter(|f| !f.is_computed())
            .map(|f| f.name.as_str())
            .collect();
        visible.insert(ID_FIELD);
        for field in &self.fields {
            if let Some(expr) = &field.computed {
                for name in expr.referenced_fields() {
                    if !visible.contains(name.as_str()) {
                        return Err(SchemaError::invalid(
                            &self.name,
                            format!(
                                "computed field '{}' references '{}', which is not a plain or earlier computed field",
                                field.name, name
                            ),
                        ));
                    }
                }
                visible.insert(field.name.as_str());
            }
        }

        let declared: HashSet<&str> = self
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(std::iter::once(ID_FIELD))
            .collect();

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("index '{}' declared twice", index.name),
                ));
            }
            if index.fields.is_empty() {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("index '{}' has no fields", index.name),
                ));
            }
            if index.kind == IndexKind::Composite && index.fields.len() < 2 {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("composite index '{}' needs at least two fields", index.name),
                ));
            }
            if let Some(missing) = index.fields.iter().find(|f| !declared.contains(f.as_str())) {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("index '{}' references undeclared field '{}'", index.name, missing),
                ));
            }
        }

        for rule in &self.validations {
            let mut referenced = rule.validate.referenced_fields();
            if let Some(condition) = &rule.condition {
                referenced.extend(condition.referenced_fields());
            }
            if let Some(missing) = referenced.iter().find(|f| !declared.contains(f.as_str())) {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("rule '{}' references undeclared field '{}'", rule.name, missing),
                ));
            }
        }

        for field in self.permissions.referenced_fields() {
            if !declared.contains(field.as_str()) {
                return Err(SchemaError::invalid(
                    &self.name,
                    format!("permissions reference undeclared field '{}'", field),
                ));
            }
        }

        Ok(())
    }

    /// Relation targets named by this schema, including nested ones
    pub fn relation_targets(&self) -> Vec<&str> {
        fn walk<'a>(kind: &'a FieldKind, out: &mut Vec<&'a str>) {
            match kind {
                FieldKind::Relation(rules) => out.push(rules.target.as_str()),
                FieldKind::Object(rules) => rules.fields.iter().for_each(|f| walk(&f.kind, out)),
                FieldKind::Array(rules) => walk(&rules.items, out),
                _ => {}
            }
        }

        let mut out = Vec::new();
        self.fields.iter().for_each(|f| walk(&f.kind, &mut out));
        out
    }
}

fn check_fields(fields: &[FieldSpec], prefix: &str, nested: bool) -> Result<(), String> {
    let mut names = HashSet::new();
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", prefix, field.name)
        };

        if field.name.is_empty() {
            return Err(format!("{}: field name is empty", prefix));
        }
        if !names.insert(field.name.as_str()) {
            return Err(format!("field '{}' declared twice", path));
        }
        if !nested && field.name == ID_FIELD {
            return Err(format!("field '{}' is reserved for the store", ID_FIELD));
        }
        if field.required && field.required_if.is_some() {
            return Err(format!("{}: required and required_if are exclusive", path));
        }
        if field.computed.is_some() {
            if nested {
                return Err(format!("{}: computed fields must be top-level", path));
            }
            if field.required || field.required_if.is_some() {
                return Err(format!("{}: computed fields cannot be required", path));
            }
        }
        if field.unique && nested {
            return Err(format!("{}: unique is only allowed on top-level fields", path));
        }
        if let Some(guard) = &field.required_if {
            let siblings: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
            for name in guard.referenced_fields() {
                if name == field.name || !siblings.contains(name.as_str()) {
                    return Err(format!(
                        "{}: required_if references '{}', which is not a sibling field",
                        path, name
                    ));
                }
            }
        }

        field.kind.check(&path, nested)?;
    }
    Ok(())
}
