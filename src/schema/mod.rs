//! Schema subsystem
//!
//! Object schemas ("slices") are declared as JSON, checked once at load time
//! and shared immutably. Records are validated against them before any write.
//!
//! # Design Principles
//!
//! - Every field has exactly one kind; illegal modifiers never load
//! - Validation collects every violation instead of stopping at the first
//! - Store-dependent checks (uniqueness, relations, auto-increment) are
//!   deferred to the writing transaction
//! - Validation of a normalized record is the identity

mod errors;
pub mod expr;
pub mod permissions;
mod registry;
mod types;
pub mod validator;

pub use errors::{
    SchemaError, SchemaErrorCode, SchemaResult, ValidationDetails, ValidationErrors, Violation,
};
pub use expr::Expr;
pub use permissions::{Action, PermissionRule, Permissions, Principal};
pub use registry::SchemaRegistry;
pub use types::{
    ArrayRules, BooleanRules, EnumRules, FieldKind, FieldSpec, FileRules, IndexDef, IndexKind,
    NumberRules, ObjectRules, ObjectSchema, Pattern, RelationRules, StringRules, TemporalRules,
    ValidationRule, ID_FIELD,
};
pub use validator::{
    validate, validate_update, validate_with, DeferredCheck, ValidatedRecord, ValidationMode, ValidationOptions,
};
