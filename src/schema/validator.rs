//! Record validation
//!
//! Each declared field goes through the same pipeline:
//!
//! 1. presence (required, optional, or `required_if` evaluated over the
//!    sibling fields that already validated)
//! 2. coercion (numeric strings, `"true"`/`"false"`, date and timestamp
//!    normalization)
//! 3. defaults for absent optional fields
//! 4. range, length, pattern, enum and item checks; uniqueness is deferred
//!    to commit
//! 5. transformations (hashing, encryption marker), only once the whole
//!    record is valid
//!
//! Every violation is collected; nothing short-circuits at the object level.
//! A `hashed` field keeps an existing hash only through [`validate_update`],
//! where it equals the stored value at the same path; any other input is
//! checked as plaintext and hashed.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};

use super::errors::{ValidationDetails, ValidationErrors, Violation};
use super::types::{FieldKind, FieldSpec, ObjectSchema, ID_FIELD};
use crate::auth::crypto;

/// Create validates a new record; update validates the merge of a stored
/// record and a patch and refreshes `auto_update` timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    #[default]
    Create,
    Update,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    pub mode: ValidationMode,
    /// Clock reading used for `auto_now` and `auto_update`
    pub now: DateTime<Utc>,
}

impl ValidationOptions {
    pub fn create() -> Self {
        Self {
            mode: ValidationMode::Create,
            now: Utc::now(),
        }
    }

    pub fn update() -> Self {
        Self {
            mode: ValidationMode::Update,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self::create()
    }
}

/// Checks that need the store and are resolved inside the writing
/// transaction just before commit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum DeferredCheck {
    /// No other record may carry the same values for these fields
    Unique { fields: Vec<String>, values: Vec<Value> },
    /// The store assigns the next integer when the record is created
    AutoIncrement { field: String },
    /// Every id must exist in the target collection
    Relation {
        field: String,
        target: String,
        ids: Vec<Value>,
    },
}

/// A fully normalized record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedRecord {
    pub schema: String,
    pub data: Map<String, Value>,
    pub deferred: Vec<DeferredCheck>,
    /// Paths of fields carrying the encryption marker
    pub encrypted_fields: Vec<String>,
}

impl ValidatedRecord {
    pub fn id(&self) -> Option<&Value> {
        self.data.get(ID_FIELD)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

/// Validates a new record.
pub fn validate(schema: &ObjectSchema, candidate: &Value) -> Result<ValidatedRecord, ValidationErrors> {
    validate_with(schema, candidate, ValidationOptions::create())
}

/// Validates a record with explicit mode and clock.
pub fn validate_with(
    schema: &ObjectSchema,
    candidate: &Value,
    options: ValidationOptions,
) -> Result<ValidatedRecord, ValidationErrors> {
    validate_record(schema, candidate, options, HashMap::new())
}

/// Validates the merge of `stored` and a patch in update mode. Hashes in
/// `candidate` that equal the stored hash at the same path are kept as is.
pub fn validate_update(
    schema: &ObjectSchema,
    candidate: &Value,
    stored: &Map<String, Value>,
    options: ValidationOptions,
) -> Result<ValidatedRecord, ValidationErrors> {
    let mut trusted = HashMap::new();
    stored_hashes(&schema.fields, stored, "", &mut trusted);
    let options = ValidationOptions {
        mode: ValidationMode::Update,
        ..options
    };
    validate_record(schema, candidate, options, trusted)
}

fn validate_record(
    schema: &ObjectSchema,
    candidate: &Value,
    options: ValidationOptions,
    trusted_hashes: HashMap<String, String>,
) -> Result<ValidatedRecord, ValidationErrors> {
    let Some(input) = candidate.as_object() else {
        return Err(ValidationDetails::type_mismatch("$root", "an object").into());
    };

    let mut ctx = Context {
        options,
        deferred: Vec::new(),
        trusted_hashes,
    };

    let mut outcome = validate_fields(&schema.fields, input, "", &mut ctx, true);

    if let Some(id) = input.get(ID_FIELD).filter(|v| !v.is_null()) {
        outcome.data.insert(ID_FIELD.to_string(), id.clone());
    }

    let mut errors = outcome.errors;
    for rule in &schema.validations {
        let mut referenced = rule.validate.referenced_fields();
        if let Some(condition) = &rule.condition {
            referenced.extend(condition.referenced_fields());
        }
        if referenced.iter().any(|f| errors.touches(f)) {
            continue;
        }
        if let Some(condition) = &rule.condition {
            if !condition.eval_bool(&outcome.data) {
                continue;
            }
        }
        if !rule.validate.eval_bool(&outcome.data) {
            errors.push(ValidationDetails::new(&rule.name, Violation::Rule, &rule.message));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    for fields in schema.unique_constraints() {
        let values: Option<Vec<Value>> = fields.iter().map(|f| outcome.data.get(f).cloned()).collect();
        if let Some(values) = values {
            ctx.deferred.push(DeferredCheck::Unique { fields, values });
        }
    }

    let mut encrypted_fields = Vec::new();
    apply_transforms(&schema.fields, &mut outcome.data, "", &ctx.trusted_hashes, &mut encrypted_fields)
        .map_err(ValidationErrors::from)?;

    Ok(ValidatedRecord {
        schema: schema.name.clone(),
        data: outcome.data,
        deferred: ctx.deferred,
        encrypted_fields,
    })
}

struct Context {
    options: ValidationOptions,
    deferred: Vec<DeferredCheck>,
    /// path -> hash already stored for a `hashed` field
    trusted_hashes: HashMap<String, String>,
}

impl Context {
    fn is_trusted_hash(&self, path: &str, value: &str) -> bool {
        self.trusted_hashes.get(path).map_or(false, |stored| stored == value)
    }
}

struct ObjectOutcome {
    data: Map<String, Value>,
    errors: ValidationErrors,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Validates one object level. Errors come out in field declaration order,
/// followed by undeclared input fields.
fn validate_fields(
    fields: &[FieldSpec],
    input: &Map<String, Value>,
    prefix: &str,
    ctx: &mut Context,
    top_level: bool,
) -> ObjectOutcome {
    let mut values: BTreeMap<usize, Value> = BTreeMap::new();
    let mut field_errors: Vec<ValidationErrors> = vec![ValidationErrors::new(); fields.len()];

    // Unconditional fields first, so conditional guards can read them.
    for (idx, field) in fields.iter().enumerate() {
        if field.is_computed() || field.required_if.is_some() {
            continue;
        }
        if let Some(value) = validate_field(field, field.required, input, prefix, ctx, &mut field_errors[idx]) {
            values.insert(idx, value);
        }
    }

    let scope = scope_of(fields, &values);
    for (idx, field) in fields.iter().enumerate() {
        let Some(guard) = &field.required_if else {
            continue;
        };
        let required = guard.eval_bool(&scope);
        if let Some(value) = validate_field(field, required, input, prefix, ctx, &mut field_errors[idx]) {
            values.insert(idx, value);
        }
    }

    // Computed fields see plain fields and the computed fields before them.
    for (idx, field) in fields.iter().enumerate() {
        let Some(expr) = &field.computed else {
            continue;
        };
        let blocked = expr
            .referenced_fields()
            .iter()
            .any(|name| fields.iter().position(|f| &f.name == name).map_or(false, |i| !field_errors[i].is_empty()));
        if blocked {
            continue;
        }
        let scope = scope_of(fields, &values);
        let computed = expr.eval(&scope);
        if computed.is_null() {
            continue;
        }
        let path = join(prefix, &field.name);
        if let Some(value) = check_value(&field.kind, computed, &path, ctx, &mut field_errors[idx]) {
            values.insert(idx, value);
        }
    }

    let mut errors = ValidationErrors::new();
    for field_error in field_errors {
        errors.extend(field_error);
    }

    for key in input.keys() {
        let declared = fields.iter().any(|f| &f.name == key);
        if !declared && !(top_level && key == ID_FIELD) {
            errors.push(ValidationDetails::extra_field(join(prefix, key)));
        }
    }

    let mut data = Map::new();
    for (idx, value) in values {
        data.insert(fields[idx].name.clone(), value);
    }
    ObjectOutcome { data, errors }
}

fn scope_of(fields: &[FieldSpec], values: &BTreeMap<usize, Value>) -> Map<String, Value> {
    values
        .iter()
        .map(|(idx, value)| (fields[*idx].name.clone(), value.clone()))
        .collect()
}

/// Presence, defaults, then coercion and checks for one declared field.
fn validate_field(
    field: &FieldSpec,
    required: bool,
    input: &Map<String, Value>,
    prefix: &str,
    ctx: &mut Context,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    let path = join(prefix, &field.name);
    let supplied = input.get(&field.name).filter(|v| !v.is_null()).cloned();

    let candidate = match (&field.kind, supplied) {
        (FieldKind::Date(rules) | FieldKind::Timestamp(rules), Some(_))
            if rules.auto_update && ctx.options.mode == ValidationMode::Update =>
        {
            Some(now_value(&field.kind, ctx))
        }
        (_, Some(value)) => Some(value),
        (FieldKind::Number(rules), None) if rules.auto_increment => {
            ctx.deferred.push(DeferredCheck::AutoIncrement { field: path });
            return None;
        }
        (_, None) if required => {
            errors.push(ValidationDetails::missing_field(path));
            return None;
        }
        (kind, None) => default_value(kind, ctx),
    };

    check_value(&field.kind, candidate?, &path, ctx, errors)
}

fn default_value(kind: &FieldKind, ctx: &Context) -> Option<Value> {
    match kind {
        FieldKind::String(rules) => rules.default.clone().map(Value::String),
        FieldKind::Number(rules) => rules.default.clone().map(Value::Number),
        FieldKind::Boolean(rules) => rules.default.map(Value::Bool),
        FieldKind::Enum(rules) => rules.default.clone().map(Value::String),
        FieldKind::Date(rules) | FieldKind::Timestamp(rules) => {
            if rules.auto_now || rules.auto_update {
                Some(now_value(kind, ctx))
            } else {
                rules.default.clone().map(Value::String)
            }
        }
        FieldKind::Object(_) | FieldKind::Array(_) | FieldKind::File(_) | FieldKind::Relation(_) => None,
    }
}

fn now_value(kind: &FieldKind, ctx: &Context) -> Value {
    match kind {
        FieldKind::Date(_) => Value::String(ctx.options.now.date_naive().format("%Y-%m-%d").to_string()),
        _ => Value::String(format_timestamp(ctx.options.now)),
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Coerces and checks a present value. Returns the normalized value when no
/// violation was found; every violation is appended to `errors`.
fn check_value(
    kind: &FieldKind,
    value: Value,
    path: &str,
    ctx: &mut Context,
    errors: &mut ValidationErrors,
) -> Option<Value> {
    let before = errors.len();

    let normalized = match kind {
        FieldKind::String(rules) => {
            let Value::String(s) = value else {
                errors.push(ValidationDetails::type_mismatch(path, "a string"));
                return None;
            };
            if rules.hashed && ctx.is_trusted_hash(path, &s) {
                return Some(Value::String(s));
            }
            let len = s.chars().count();
            if let Some(min) = rules.min_length {
                if len < min {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::MinLength,
                        format!("{} must be at least {} characters", path, min),
                    ));
                }
            }
            if let Some(max) = rules.max_length {
                if len > max {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::MaxLength,
                        format!("{} must be at most {} characters", path, max),
                    ));
                }
            }
            if let Some(pattern) = &rules.pattern {
                if !pattern.is_match(&s) {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::Pattern,
                        format!("{} does not match the required format", path),
                    ));
                }
            }
            Value::String(s)
        }
        FieldKind::Number(rules) => {
            let Some(number) = coerce_number(&value) else {
                errors.push(ValidationDetails::type_mismatch(path, "a number"));
                return None;
            };
            let Some(f) = number.as_f64() else {
                errors.push(ValidationDetails::type_mismatch(path, "a number"));
                return None;
            };
            if (rules.integer || rules.auto_increment) && f.fract() != 0.0 {
                errors.push(ValidationDetails::type_mismatch(path, "an integer"));
                return None;
            }
            if let Some(min) = rules.min {
                if f < min {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::Min,
                        format!("{} must be at least {}", path, min),
                    ));
                }
            }
            if let Some(max) = rules.max {
                if f > max {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::Max,
                        format!("{} must be at most {}", path, max),
                    ));
                }
            }
            if (rules.integer || rules.auto_increment) && number.is_f64() && f.abs() < i64::MAX as f64 {
                Value::Number(Number::from(f as i64))
            } else {
                Value::Number(number)
            }
        }
        FieldKind::Boolean(_) => match value {
            Value::Bool(b) => Value::Bool(b),
            Value::String(s) if s == "true" => Value::Bool(true),
            Value::String(s) if s == "false" => Value::Bool(false),
            _ => {
                errors.push(ValidationDetails::type_mismatch(path, "a boolean"));
                return None;
            }
        },
        FieldKind::Date(_) => match value.as_str().and_then(parse_date) {
            Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            None => {
                errors.push(ValidationDetails::type_mismatch(path, "a date (YYYY-MM-DD)"));
                return None;
            }
        },
        FieldKind::Timestamp(_) => match parse_timestamp(&value) {
            Some(ts) => Value::String(format_timestamp(ts)),
            None => {
                errors.push(ValidationDetails::type_mismatch(path, "an RFC 3339 timestamp"));
                return None;
            }
        },
        FieldKind::Enum(rules) => {
            let Value::String(s) = value else {
                errors.push(ValidationDetails::type_mismatch(path, "a string"));
                return None;
            };
            if !rules.values.contains(&s) {
                errors.push(ValidationDetails::new(
                    path,
                    Violation::Enum,
                    format!("{} must be one of: {}", path, rules.values.join(", ")),
                ));
            }
            Value::String(s)
        }
        FieldKind::Object(rules) => {
            let Value::Object(map) = value else {
                errors.push(ValidationDetails::type_mismatch(path, "an object"));
                return None;
            };
            let outcome = validate_fields(&rules.fields, &map, path, ctx, false);
            errors.extend(outcome.errors);
            Value::Object(outcome.data)
        }
        FieldKind::Array(rules) => {
            let Value::Array(items) = value else {
                errors.push(ValidationDetails::type_mismatch(path, "an array"));
                return None;
            };
            if let Some(min) = rules.min_items {
                if items.len() < min {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::MinItems,
                        format!("{} must have at least {} items", path, min),
                    ));
                }
            }
            if let Some(max) = rules.max_items {
                if items.len() > max {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::MaxItems,
                        format!("{} must have at most {} items", path, max),
                    ));
                }
            }
            let mut normalized = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                if item.is_null() {
                    errors.push(ValidationDetails::type_mismatch(item_path, rules.items.type_name()));
                    continue;
                }
                if let Some(v) = check_value(&rules.items, item, &item_path, ctx, errors) {
                    normalized.push(v);
                }
            }
            if rules.unique_items {
                let mut seen = HashSet::new();
                if normalized.iter().any(|v| !seen.insert(v.to_string())) {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::UniqueItems,
                        format!("{} must not contain duplicates", path),
                    ));
                }
            }
            Value::Array(normalized)
        }
        FieldKind::File(rules) => {
            let Some(file) = value.as_object() else {
                errors.push(ValidationDetails::type_mismatch(path, "a file reference"));
                return None;
            };
            let name = file.get("name").and_then(Value::as_str);
            let size = file.get("size").and_then(Value::as_u64);
            let mime = file.get("mime_type").and_then(Value::as_str);
            let (Some(_), Some(size), Some(mime)) = (name, size, mime) else {
                errors.push(ValidationDetails::type_mismatch(
                    path,
                    "a file reference with name, size and mime_type",
                ));
                return None;
            };
            if let Some(max) = rules.max_size {
                if size > max {
                    errors.push(ValidationDetails::new(
                        path,
                        Violation::File,
                        format!("{} must be at most {} bytes", path, max),
                    ));
                }
            }
            if !rules.mime_types.is_empty() && !rules.mime_types.iter().any(|m| m == mime) {
                errors.push(ValidationDetails::new(
                    path,
                    Violation::File,
                    format!("{} must be one of: {}", path, rules.mime_types.join(", ")),
                ));
            }
            value
        }
        FieldKind::Relation(rules) => {
            let ids = if rules.many {
                match &value {
                    Value::Array(items) if items.iter().all(is_id) => items.clone(),
                    _ => {
                        errors.push(ValidationDetails::new(
                            path,
                            Violation::Relation,
                            format!("{} must be a list of {} ids", path, rules.target),
                        ));
                        return None;
                    }
                }
            } else if is_id(&value) {
                vec![value.clone()]
            } else {
                errors.push(ValidationDetails::new(
                    path,
                    Violation::Relation,
                    format!("{} must be a {} id", path, rules.target),
                ));
                return None;
            };
            if !ids.is_empty() {
                ctx.deferred.push(DeferredCheck::Relation {
                    field: path.to_string(),
                    target: rules.target.clone(),
                    ids,
                });
            }
            value
        }
    };

    (errors.len() == before).then_some(normalized)
}

fn is_id(value: &Value) -> bool {
    matches!(value, Value::String(s) if !s.is_empty()) || value.is_u64() || value.is_i64()
}

fn coerce_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Number::from(i));
            }
            s.parse::<f64>().ok().filter(|f| f.is_finite()).and_then(Number::from_f64)
        }
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.with_timezone(&Utc).date_naive()))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| Utc.from_utc_datetime(&dt))
            }),
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Collects the stored hashes of `hashed` fields by path.
fn stored_hashes(fields: &[FieldSpec], data: &Map<String, Value>, prefix: &str, out: &mut HashMap<String, String>) {
    for field in fields {
        if let Some(value) = data.get(&field.name) {
            stored_hash_value(&field.kind, value, &join(prefix, &field.name), out);
        }
    }
}

fn stored_hash_value(kind: &FieldKind, value: &Value, path: &str, out: &mut HashMap<String, String>) {
    match (kind, value) {
        (FieldKind::String(rules), Value::String(s)) if rules.hashed && crypto::is_password_hash(s) => {
            out.insert(path.to_string(), s.clone());
        }
        (FieldKind::Object(rules), Value::Object(map)) => stored_hashes(&rules.fields, map, path, out),
        (FieldKind::Array(rules), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                stored_hash_value(&rules.items, item, &format!("{}[{}]", path, i), out);
            }
        }
        _ => {}
    }
}

/// Hashes `hashed` strings other than trusted stored hashes and records
/// encrypted field paths.
fn apply_transforms(
    fields: &[FieldSpec],
    data: &mut Map<String, Value>,
    prefix: &str,
    trusted: &HashMap<String, String>,
    encrypted: &mut Vec<String>,
) -> Result<(), ValidationDetails> {
    for field in fields {
        let path = join(prefix, &field.name);
        if let Some(value) = data.get_mut(&field.name) {
            transform_value(&field.kind, value, &path, trusted, encrypted)?;
        }
    }
    Ok(())
}

fn transform_value(
    kind: &FieldKind,
    value: &mut Value,
    path: &str,
    trusted: &HashMap<String, String>,
    encrypted: &mut Vec<String>,
) -> Result<(), ValidationDetails> {
    match kind {
        FieldKind::String(rules) => {
            if rules.encrypted {
                encrypted.push(path.to_string());
            }
            if let (true, Value::String(plain)) = (rules.hashed, &*value) {
                if trusted.get(path) != Some(plain) {
                    let hash = crypto::hash_password(plain).map_err(|e| {
                        ValidationDetails::new(path, Violation::Transform, format!("{}: {}", path, e))
                    })?;
                    *value = Value::String(hash);
                }
            }
        }
        FieldKind::Object(rules) => {
            if let Value::Object(map) = value {
                apply_transforms(&rules.fields, map, path, trusted, encrypted)?;
            }
        }
        FieldKind::Array(rules) => {
            if let Value::Array(items) = value {
                for (i, item) in items.iter_mut().enumerate() {
                    transform_value(&rules.items, item, &format!("{}[{}]", path, i), trusted, encrypted)?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}
