//! # List Query Parameters
//!
//! `limit` and `offset` page the result; every other parameter is an
//! equality filter on a declared top-level field, coerced to the field's
//! kind.

use std::collections::HashMap;

use serde_json::Value;

use crate::dispatch::{DispatchError, DispatchResult};
use crate::schema::{FieldKind, ObjectSchema, ID_FIELD};
use crate::store::Query;

/// Maximum number of records that can be returned
pub const MAX_LIMIT: usize = 1000;

/// Default limit if not specified
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    pub filters: Vec<(String, Value)>,
    pub limit: usize,
    pub offset: usize,
}

impl ListParams {
    pub fn parse(schema: &ObjectSchema, params: &HashMap<String, String>) -> DispatchResult<Self> {
        let mut result = ListParams {
            filters: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        };

        for (key, value) in params {
            match key.as_str() {
                "limit" => result.limit = parse_usize(key, value)?,
                "offset" => result.offset = parse_usize(key, value)?,
                ID_FIELD => result.filters.push((key.clone(), Value::String(value.clone()))),
                _ => {
                    let field = schema
                        .field(key)
                        .ok_or_else(|| DispatchError::bad_request(format!("unknown filter field '{}'", key)))?;
                    result.filters.push((key.clone(), coerce(&field.kind, value)));
                }
            }
        }

        if result.limit > MAX_LIMIT {
            return Err(DispatchError::bad_request(format!(
                "limit {} exceeds maximum {}",
                result.limit, MAX_LIMIT
            )));
        }

        // Stable filter order regardless of map iteration
        result.filters.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }

    /// Store query for the filters; paging happens after permission checks.
    pub fn query(&self) -> Query {
        self.filters
            .iter()
            .fold(Query::new(), |q, (field, value)| q.filter(field.clone(), value.clone()))
    }
}

fn parse_usize(key: &str, value: &str) -> DispatchResult<usize> {
    value
        .parse()
        .map_err(|_| DispatchError::bad_request(format!("{} must be a non-negative integer", key)))
}

fn coerce(kind: &FieldKind, raw: &str) -> Value {
    match kind {
        FieldKind::Number(_) => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Boolean(_) => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}
