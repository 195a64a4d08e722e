//! Schema error types
//!
//! Error codes:
//! - MANGOLO_SCHEMA_INVALID (schema definition rejected at load time)
//! - MANGOLO_UNKNOWN_SCHEMA (lookup of an unregistered schema)
//! - MANGOLO_DUPLICATE_SCHEMA (two schemas share a name)
//! - MANGOLO_SCHEMA_MALFORMED_FILE (schema file unreadable or not valid JSON)
//!
//! Record validation failures are not `SchemaError`s. They are collected
//! into [`ValidationErrors`], which always holds every violation found.

use std::fmt;

use serde::Serialize;

/// Schema-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Schema definition violates a load-time check
    MangoloSchemaInvalid,
    /// Schema name not found
    MangoloUnknownSchema,
    /// Schema name registered twice
    MangoloDuplicateSchema,
    /// Schema file could not be read or parsed
    MangoloSchemaMalformedFile,
}

impl SchemaErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::MangoloSchemaInvalid => "MANGOLO_SCHEMA_INVALID",
            SchemaErrorCode::MangoloUnknownSchema => "MANGOLO_UNKNOWN_SCHEMA",
            SchemaErrorCode::MangoloDuplicateSchema => "MANGOLO_DUPLICATE_SCHEMA",
            SchemaErrorCode::MangoloSchemaMalformedFile => "MANGOLO_SCHEMA_MALFORMED_FILE",
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Schema error type with full context
#[derive(Debug)]
pub struct SchemaError {
    code: SchemaErrorCode,
    message: String,
    schema: Option<String>,
}

impl SchemaError {
    /// A schema definition failed a load-time check
    pub fn invalid(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = schema.into();
        Self {
            code: SchemaErrorCode::MangoloSchemaInvalid,
            message: format!("Schema '{}' is invalid: {}", name, reason.into()),
            schema: Some(name),
        }
    }

    /// Create an unknown schema error
    pub fn unknown_schema(schema: impl Into<String>) -> Self {
        let name = schema.into();
        Self {
            code: SchemaErrorCode::MangoloUnknownSchema,
            message: format!("Schema '{}' not found", name),
            schema: Some(name),
        }
    }

    /// Create a duplicate schema error
    pub fn duplicate_schema(schema: impl Into<String>) -> Self {
        let name = schema.into();
        Self {
            code: SchemaErrorCode::MangoloDuplicateSchema,
            message: format!("Schema '{}' is already registered", name),
            schema: Some(name),
        }
    }

    /// Create an error for malformed schema file
    pub fn malformed_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: SchemaErrorCode::MangoloSchemaMalformedFile,
            message: format!("Malformed schema file '{}': {}", path.into(), reason.into()),
            schema: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> SchemaErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the schema name if applicable
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for SchemaError {}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Which check a value failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    Required,
    Type,
    Min,
    Max,
    MinLength,
    MaxLength,
    Pattern,
    Enum,
    MinItems,
    MaxItems,
    UniqueItems,
    Undeclared,
    File,
    Relation,
    /// Object-level validation rule
    Rule,
    /// Unique field or index already taken (decided at commit)
    Unique,
    /// Hashing or another transformation failed
    Transform,
}

/// Validation failure details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationDetails {
    /// Field path (e.g., "address.city", "tags[2]"); the rule name for rule
    /// failures
    pub field: String,
    /// Violated check
    pub reason: Violation,
    /// Human-readable message
    pub message: String,
}

impl ValidationDetails {
    pub fn new(field: impl Into<String>, reason: Violation, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is required", field);
        Self::new(field, Violation::Required, message)
    }

    pub fn extra_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is not a declared field", field);
        Self::new(field, Violation::Undeclared, message)
    }

    pub fn type_mismatch(field: impl Into<String>, expected: &str) -> Self {
        let field = field.into();
        let message = format!("{} must be {}", field, expected);
        Self::new(field, Violation::Type, message)
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Every violation found while validating one record, in field
/// declaration order followed by rule order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<ValidationDetails>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, details: ValidationDetails) {
        self.errors.push(details);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationDetails> {
        self.errors.iter()
    }

    /// Whether any violation is reported for the field or below it
    pub fn touches(&self, field: &str) -> bool {
        self.errors.iter().any(|e| {
            e.field == field
                || e.field
                    .strip_prefix(field)
                    .map_or(false, |rest| rest.starts_with('.') || rest.starts_with('['))
        })
    }

    pub fn into_vec(self) -> Vec<ValidationDetails> {
        self.errors
    }
}

impl From<ValidationDetails> for ValidationErrors {
    fn from(details: ValidationDetails) -> Self {
        Self {
            errors: vec![details],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.message.clone()).collect();
        write!(f, "validation failed: {}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SchemaErrorCode::MangoloSchemaInvalid.code(), "MANGOLO_SCHEMA_INVALID");
        assert_eq!(SchemaErrorCode::MangoloUnknownSchema.code(), "MANGOLO_UNKNOWN_SCHEMA");
        assert_eq!(SchemaErrorCode::MangoloDuplicateSchema.code(), "MANGOLO_DUPLICATE_SCHEMA");
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = SchemaError::invalid("users", "field 'email' declared twice");
        let display = format!("{}", err);
        assert!(display.starts_with("MANGOLO_SCHEMA_INVALID"));
        assert!(display.contains("email"));
        assert_eq!(err.schema(), Some("users"));
    }

    #[test]
    fn test_touches_nested_paths() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationDetails::missing_field("address.city"));
        errors.push(ValidationDetails::type_mismatch("tags[1]", "a string"));

        assert!(errors.touches("address"));
        assert!(errors.touches("tags"));
        assert!(!errors.touches("addr"));
        assert!(!errors.touches("name"));
    }

    #[test]
    fn test_serializes_as_list() {
        let errors: ValidationErrors = ValidationDetails::missing_field("email").into();
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json[0]["field"], "email");
        assert_eq!(json[0]["reason"], "required");
    }
}
