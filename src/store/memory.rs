//! In-memory store
//!
//! Commits are serialized under one write lock; transactional writes are
//! buffered in the transaction until then, so readers only ever see
//! committed state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::{record_id, CommitCheck, CommitOutcome, Query, Record, Store, StoreTransaction};
use crate::schema::ID_FIELD;

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Record>>,
    sequences: HashMap<(String, String), i64>,
}

impl State {
    fn next_sequence(&mut self, collection: &str, field: &str) -> i64 {
        let key = (collection.to_string(), field.to_string());
        let current = match self.sequences.get(&key) {
            Some(value) => *value,
            None => self
                .collections
                .get(collection)
                .into_iter()
                .flat_map(|records| records.values())
                .filter_map(|r| r.get(field).and_then(Value::as_i64))
                .max()
                .unwrap_or(0),
        };
        let next = current + 1;
        self.sequences.insert(key, next);
        next
    }
}

/// Reference [`Store`] implementation keeping everything in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records in a collection
    pub fn count(&self, collection: &str) -> StoreResult<usize> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.collections.get(collection).map_or(0, BTreeMap::len))
    }

    fn transaction(&self) -> MemoryTransaction {
        MemoryTransaction {
            state: Arc::clone(&self.state),
            writes: HashMap::new(),
        }
    }
}

impl Store for InMemoryStore {
    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>> {
        self.transaction().find(collection, query)
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    fn create(&self, collection: &str, record: Record) -> StoreResult<Record> {
        let mut tx = Box::new(self.transaction());
        let created = tx.create(collection, record)?;
        tx.commit()?;
        Ok(created)
    }

    fn update(&self, collection: &str, id: &str, patch: Record) -> StoreResult<Record> {
        let mut tx = Box::new(self.transaction());
        let updated = tx.update(collection, id, patch)?;
        tx.commit()?;
        Ok(updated)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut tx = Box::new(self.transaction());
        let deleted = tx.delete(collection, id)?;
        tx.commit()?;
        Ok(deleted)
    }

    fn next_sequence(&self, collection: &str, field: &str) -> StoreResult<i64> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.next_sequence(collection, field))
    }

    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(self.transaction()))
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Created(Record),
    Updated(Record),
    Deleted,
}

struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    /// collection -> id -> staged write
    writes: HashMap<String, BTreeMap<String, Staged>>,
}

impl MemoryTransaction {
    fn staged(&self, collection: &str, id: &str) -> Option<&Staged> {
        self.writes.get(collection).and_then(|c| c.get(id))
    }

    fn stage(&mut self, collection: &str, id: String, staged: Staged) {
        self.writes.entry(collection.to_string()).or_default().insert(id, staged);
    }
}

impl StoreTransaction for MemoryTransaction {
    fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Record>> {
        let mut visible = {
            let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
            state.collections.get(collection).cloned().unwrap_or_default()
        };

        if let Some(writes) = self.writes.get(collection) {
            for (id, staged) in writes {
                match staged {
                    Staged::Created(record) | Staged::Updated(record) => {
                        visible.insert(id.clone(), record.clone());
                    }
                    Staged::Deleted => {
                        visible.remove(id);
                    }
                }
            }
        }

        let matching = visible.into_values().filter(|r| query.matches(r)).collect();
        Ok(query.page(matching))
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        match self.staged(collection, id) {
            Some(Staged::Created(record) | Staged::Updated(record)) => Ok(Some(record.clone())),
            Some(Staged::Deleted) => Ok(None),
            None => {
                let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
                Ok(state.collections.get(collection).and_then(|c| c.get(id)).cloned())
            }
        }
    }

    fn create(&mut self, collection: &str, mut record: Record) -> StoreResult<Record> {
        let id = record_id(&record).unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.get(collection, &id)?.is_some() {
            return Err(StoreError::conflict(collection, &id));
        }

        if !record.contains_key(ID_FIELD) {
            record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }

        let staged = match self.staged(collection, &id) {
            // Re-creating a record deleted earlier in this transaction.
            Some(Staged::Deleted) => Staged::Updated(record.clone()),
            _ => Staged::Created(record.clone()),
        };
        self.stage(collection, id, staged);
        Ok(record)
    }

    fn update(&mut self, collection: &str, id: &str, patch: Record) -> StoreResult<Record> {
        let mut current = self
            .get(collection, id)?
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        for (key, value) in patch {
            if key == ID_FIELD {
                continue;
            }
            if value.is_null() {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }

        let staged = match self.staged(collection, id) {
            Some(Staged::Created(_)) => Staged::Created(current.clone()),
            _ => Staged::Updated(current.clone()),
        };
        self.stage(collection, id.to_string(), staged);
        Ok(current)
    }

    fn delete(&mut self, collection: &str, id: &str) -> StoreResult<bool> {
        if self.get(collection, id)?.is_none() {
            return Ok(false);
        }

        match self.staged(collection, id) {
            Some(Staged::Created(_)) => {
                if let Some(writes) = self.writes.get_mut(collection) {
                    writes.remove(id);
                }
            }
            _ => self.stage(collection, id.to_string(), Staged::Deleted),
        }
        Ok(true)
    }

    fn next_sequence(&mut self, collection: &str, field: &str) -> StoreResult<i64> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        let staged_max = self
            .writes
            .get(collection)
            .into_iter()
            .flat_map(|w| w.values())
            .filter_map(|s| match s {
                Staged::Created(r) | Staged::Updated(r) => r.get(field).and_then(Value::as_i64),
                Staged::Deleted => None,
            })
            .max()
            .unwrap_or(0);

        let mut next = state.next_sequence(collection, field);
        if next <= staged_max {
            next = staged_max + 1;
            state.sequences.insert((collection.to_string(), field.to_string()), next);
        }
        Ok(next)
    }

    fn commit_checked(self: Box<Self>, checks: &[CommitCheck]) -> StoreResult<CommitOutcome> {
        let MemoryTransaction { state, writes } = *self;
        let mut state = state.write().map_err(|_| StoreError::LockPoisoned)?;

        // Check everything first so a conflict or failed check applies nothing.
        for (collection, writes) in &writes {
            let base = state.collections.get(collection);
            for (id, staged) in writes {
                let present = base.map_or(false, |c| c.contains_key(id));
                let ok = match staged {
                    Staged::Created(_) => !present,
                    Staged::Updated(_) | Staged::Deleted => present,
                };
                if !ok {
                    return Err(StoreError::conflict(collection, id));
                }
            }
        }

        let failed: Vec<usize> = checks
            .iter()
            .enumerate()
            .filter(|(_, check)| !check_holds(&state, &writes, check))
            .map(|(i, _)| i)
            .collect();
        if !failed.is_empty() {
            return Ok(CommitOutcome::Rejected(failed));
        }

        for (collection, writes) in writes {
            let records = state.collections.entry(collection).or_default();
            for (id, staged) in writes {
                match staged {
                    Staged::Created(record) | Staged::Updated(record) => {
                        records.insert(id, record);
                    }
                    Staged::Deleted => {
                        records.remove(&id);
                    }
                }
            }
        }
        Ok(CommitOutcome::Committed)
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

/// Evaluates a check against committed state overlaid with staged writes.
fn check_holds(
    state: &State,
    writes: &HashMap<String, BTreeMap<String, Staged>>,
    check: &CommitCheck,
) -> bool {
    match check {
        CommitCheck::Absent { collection, query } => {
            let staged = writes.get(collection);
            let committed = state
                .collections
                .get(collection)
                .into_iter()
                .flatten()
                .filter(|(id, _)| staged.map_or(true, |s| !s.contains_key(*id)))
                .map(|(_, record)| record);
            let pending = staged.into_iter().flat_map(|s| s.values()).filter_map(|s| match s {
                Staged::Created(record) | Staged::Updated(record) => Some(record),
                Staged::Deleted => None,
            });
            !committed.chain(pending).any(|record| query.matches(record))
        }
        CommitCheck::Present { collection, id } => match writes.get(collection).and_then(|s| s.get(id)) {
            Some(Staged::Created(_) | Staged::Updated(_)) => true,
            Some(Staged::Deleted) => false,
            None => state.collections.get(collection).map_or(false, |c| c.contains_key(id)),
        },
    }
}
