//! # Transaction Coordinator
//!
//! Groups store operations into one atomic unit. Any failing operation,
//! failed deferred check or uncaught error rolls the whole unit back;
//! dropping an open [`Transaction`] (for example when a request times out)
//! rolls back too.
//!
//! ```ignore
//! coordinator.run(|tx| {
//!     tx.patch("accounts", "a", debit)?;
//!     tx.patch("accounts", "b", credit)?;
//!     Ok(())
//! })?;
//! ```

mod errors;

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

pub use errors::{TransactionError, TransactionResult};

use crate::schema::{DeferredCheck, ValidatedRecord, ValidationDetails, ValidationErrors, Violation};
use crate::store::{record_id, CommitCheck, CommitOutcome, Query, Record, Store, StoreError, StoreTransaction};

/// Opens transactions against a store
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn Store>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn begin(&self) -> TransactionResult<Transaction> {
        let inner = self.store.begin()?;
        let id = Uuid::new_v4();
        tracing::debug!(event = "transaction_started", transaction_id = %id);
        Ok(Transaction {
            id,
            inner: Some(inner),
            pending: Vec::new(),
            staged: 0,
        })
    }

    /// Runs `f` inside a transaction: commits when it returns `Ok`, rolls
    /// back when it returns `Err`.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}

/// A deferred check bound to the record it came from
#[derive(Debug)]
struct PendingCheck {
    collection: String,
    record_id: Option<String>,
    check: DeferredCheck,
}

/// One open transaction
pub struct Transaction {
    id: Uuid,
    inner: Option<Box<dyn StoreTransaction>>,
    pending: Vec<PendingCheck>,
    staged: usize,
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of writes staged so far
    pub fn staged_writes(&self) -> usize {
        self.staged
    }

    fn inner(&self) -> TransactionResult<&dyn StoreTransaction> {
        self.inner.as_deref().ok_or(TransactionError::Closed)
    }

    /// Runs one staged operation; on failure the transaction is rolled back.
    fn stage<T>(
        &mut self,
        op: impl FnOnce(&mut dyn StoreTransaction) -> Result<T, StoreError>,
    ) -> TransactionResult<T> {
        let inner = self.inner.as_deref_mut().ok_or(TransactionError::Closed)?;
        match op(inner) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.abort(&err.to_string());
                Err(err.into())
            }
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> TransactionResult<Option<Record>> {
        Ok(self.inner()?.get(collection, id)?)
    }

    pub fn find(&self, collection: &str, query: &Query) -> TransactionResult<Vec<Record>> {
        Ok(self.inner()?.find(collection, query)?)
    }

    /// Creates a validated record. Auto-increment fields are assigned here;
    /// uniqueness and relations are checked at commit.
    pub fn create(&mut self, record: ValidatedRecord) -> TransactionResult<Record> {
        let collection = record.schema.clone();
        let mut data = record.data;
        let mut checks = Vec::new();

        for check in record.deferred {
            match check {
                DeferredCheck::AutoIncrement { field } => {
                    let next = self.stage(|tx| tx.next_sequence(&collection, &field))?;
                    data.insert(field, Value::from(next));
                }
                other => checks.push(other),
            }
        }

        let created = self.stage(|tx| tx.create(&collection, data))?;
        self.staged += 1;
        let record_id = record_id(&created);
        self.pending.extend(checks.into_iter().map(|check| PendingCheck {
            collection: collection.clone(),
            record_id: record_id.clone(),
            check,
        }));
        Ok(created)
    }

    /// Replaces the stored record's fields with a validated record. Stored
    /// fields absent from the record are removed.
    pub fn update(&mut self, id: &str, record: ValidatedRecord) -> TransactionResult<Record> {
        let collection = record.schema.clone();
        let current = self
            .get(&collection, id)?
            .ok_or_else(|| StoreError::not_found(&collection, id));
        let current = match current {
            Ok(current) => current,
            Err(err) => {
                self.abort(&err.to_string());
                return Err(err.into());
            }
        };

        let mut patch = record.data;
        for key in current.keys() {
            if !patch.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }

        let mut checks = Vec::new();
        for check in record.deferred {
            match check {
                DeferredCheck::AutoIncrement { field } => {
                    // Keep the number assigned at creation.
                    if let Some(existing) = current.get(&field) {
                        patch.insert(field, existing.clone());
                    }
                }
                other => checks.push(other),
            }
        }

        let updated = self.stage(|tx| tx.update(&collection, id, patch))?;
        self.staged += 1;
        self.pending.extend(checks.into_iter().map(|check| PendingCheck {
            collection: collection.clone(),
            record_id: Some(id.to_string()),
            check,
        }));
        Ok(updated)
    }

    /// Merges a raw patch without validation.
    pub fn patch(&mut self, collection: &str, id: &str, patch: Record) -> TransactionResult<Record> {
        let updated = self.stage(|tx| tx.update(collection, id, patch))?;
        self.staged += 1;
        Ok(updated)
    }

    /// Creates a raw record without validation.
    pub fn insert(&mut self, collection: &str, record: Record) -> TransactionResult<Record> {
        let created = self.stage(|tx| tx.create(collection, record))?;
        self.staged += 1;
        Ok(created)
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> TransactionResult<bool> {
        let deleted = self.stage(|tx| tx.delete(collection, id))?;
        self.staged += 1;
        Ok(deleted)
    }

    /// Commits, resolving deferred checks under the store's commit lock.
    /// Either every staged write becomes visible or none does.
    pub fn commit(mut self) -> TransactionResult<()> {
        let (checks, details) = self.commit_checks();
        let inner = self.inner.take().ok_or(TransactionError::Closed)?;

        match inner.commit_checked(&checks) {
            Ok(CommitOutcome::Committed) => {
                tracing::debug!(event = "transaction_committed", transaction_id = %self.id, writes = self.staged);
                Ok(())
            }
            Ok(CommitOutcome::Rejected(failed)) => {
                let mut errors = ValidationErrors::new();
                for index in failed {
                    if let Some(detail) = details.get(index) {
                        errors.push(detail.clone());
                    }
                }
                tracing::warn!(event = "transaction_rolled_back", transaction_id = %self.id, reason = "deferred checks failed");
                Err(TransactionError::Validation(errors))
            }
            Err(err) => {
                tracing::warn!(event = "transaction_rolled_back", transaction_id = %self.id, reason = %err);
                Err(err.into())
            }
        }
    }

    /// Discards every staged write.
    pub fn rollback(mut self) {
        self.abort("rolled back");
    }

    /// Store-level checks for every pending deferred check, each paired with
    /// the violation reported when it fails.
    fn commit_checks(&self) -> (Vec<CommitCheck>, Vec<ValidationDetails>) {
        let mut checks = Vec::new();
        let mut details = Vec::new();

        for pending in &self.pending {
            match &pending.check {
                DeferredCheck::Unique { fields, values } => {
                    let mut query = Query::new();
                    for (field, value) in fields.iter().zip(values) {
                        query = query.filter(field.clone(), value.clone());
                    }
                    if let Some(id) = &pending.record_id {
                        query = query.excluding(id.clone());
                    }
                    checks.push(CommitCheck::Absent {
                        collection: pending.collection.clone(),
                        query,
                    });
                    let message = format!("{} must be unique", fields.join(" + "));
                    details.push(ValidationDetails::new(fields.join(","), Violation::Unique, message));
                }
                DeferredCheck::Relation { field, target, ids } => {
                    for id in ids {
                        let key = match id {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        let message = format!("{} references missing {} '{}'", field, target, key);
                        checks.push(CommitCheck::Present {
                            collection: target.clone(),
                            id: key,
                        });
                        details.push(ValidationDetails::new(field, Violation::Relation, message));
                    }
                }
                DeferredCheck::AutoIncrement { .. } => {}
            }
        }
        (checks, details)
    }

    fn abort(&mut self, reason: &str) {
        if let Some(inner) = self.inner.take() {
            if let Err(err) = inner.rollback() {
                tracing::error!(event = "transaction_rollback_failed", transaction_id = %self.id, error = %err);
            }
            tracing::warn!(event = "transaction_rolled_back", transaction_id = %self.id, reason = %reason);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort("dropped while open");
    }
}
