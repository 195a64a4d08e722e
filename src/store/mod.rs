//! # Store
//!
//! Narrow persistence interface used by handlers and the transaction
//! coordinator. Records are JSON objects keyed by their `id` field.
//!
//! [`InMemoryStore`] is the bundled implementation.

mod errors;
mod memory;

use serde_json::{Map, Value};

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;

use crate::schema::ID_FIELD;

/// A stored record
pub type Record = Map<String, Value>;

/// Equality filter over top-level fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    /// Skip the record with this id
    pub exclude_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(excluded) = &self.exclude_id {
            if record_id(record).as_deref() == Some(excluded.as_str()) {
                return false;
            }
        }
        self.filters.iter().all(|(field, expected)| {
            record.get(field).map_or(expected.is_null(), |actual| values_equal(actual, expected))
        })
    }

    /// Applies offset and limit to an already filtered, ordered list.
    pub fn page(&self, records: Vec<Record>) -> Vec<Record> {
        let iter = records.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// String form of a record id. Numeric ids are accepted.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Condition confirmed atomically with a transaction's commit, against
/// committed state plus the transaction's own writes
#[derive(Debug, Clone, PartialEq)]
pub enum CommitCheck {
    /// No visible record in `collection` matches `query`
    Absent { collection: String, query: Query },
    /// A record with `id` is visible in `collection`
    Present { collection: String, id: String },
}

/// Result of a checked commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Indexes of the checks that failed, ascending. Nothing was applied.
    Rejected(Vec<usize>),
}

/// Persistence interface
pub trait Store: Send + Sync {
    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>>;

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>>;

    fn exists(&self, collection: &str, query: &Query) -> StoreResult<bool> {
        Ok(!self.find(collection, &query.clone().limit(1))?.is_empty())
    }

    /// Stores a new record, assigning an `id` when it has none.
    fn create(&self, collection: &str, record: Record) -> StoreResult<Record>;

    /// Merges `patch` into the stored record. A `null` patch value removes
    /// the field; `id` is never changed.
    fn update(&self, collection: &str, id: &str, patch: Record) -> StoreResult<Record>;

    /// Returns whether a record was removed.
    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Next value of a per-collection integer sequence.
    fn next_sequence(&self, collection: &str, field: &str) -> StoreResult<i64>;

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// A store transaction. Writes are invisible to others until `commit`;
/// `rollback` (or dropping the box) discards them.
pub trait StoreTransaction: Send {
    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>>;

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>>;

    fn exists(&self, collection: &str, query: &Query) -> StoreResult<bool> {
        Ok(!self.find(collection, &query.clone().limit(1))?.is_empty())
    }

    fn create(&mut self, collection: &str, record: Record) -> StoreResult<Record>;

    fn update(&mut self, collection: &str, id: &str, patch: Record) -> StoreResult<Record>;

    fn delete(&mut self, collection: &str, id: &str) -> StoreResult<bool>;

    fn next_sequence(&mut self, collection: &str, field: &str) -> StoreResult<i64>;

    /// Commits only when every check holds. Checks and writes are applied
    /// under the same commit lock, so no other commit can interleave.
    fn commit_checked(self: Box<Self>, checks: &[CommitCheck]) -> StoreResult<CommitOutcome>;

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.commit_checked(&[]).map(|_| ())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
