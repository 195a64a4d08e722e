//! Built-in CRUD handlers
//!
//! Every schema `<name>` gets `<name>.list`, `<name>.get`, `<name>.create`,
//! `<name>.update` and `<name>.delete`. Writes are validated and run inside
//! a transaction. Records the caller may not read are invisible: lists skip
//! them and `get` answers 404.

mod query;

use std::sync::Arc;

use serde_json::{json, Map, Value};

pub use query::{ListParams, DEFAULT_LIMIT, MAX_LIMIT};

use crate::dispatch::{
    ComponentRegistry, DispatchError, DispatchResult, Handler, HandlerFuture, RequestContext, Response,
};
use crate::schema::{validate, validate_update, Action, ObjectSchema, SchemaRegistry, ValidationOptions};
use crate::store::Record;
use crate::transaction::TransactionCoordinator;

/// Operation served by a [`CrudHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl CrudOp {
    pub const ALL: [CrudOp; 5] = [CrudOp::List, CrudOp::Get, CrudOp::Create, CrudOp::Update, CrudOp::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrudOp::List => "list",
            CrudOp::Get => "get",
            CrudOp::Create => "create",
            CrudOp::Update => "update",
            CrudOp::Delete => "delete",
        }
    }
}

/// Registers the five CRUD handlers of every schema, skipping ids the
/// registry already holds.
pub fn register_crud(registry: &mut ComponentRegistry, schemas: &SchemaRegistry, coordinator: &TransactionCoordinator) {
    for name in schemas.names() {
        let Some(schema) = schemas.get(name) else {
            continue;
        };
        for op in CrudOp::ALL {
            let id = format!("{}.{}", name, op.as_str());
            if registry.has_handler(&id) {
                continue;
            }
            registry.register_handler(id, CrudHandler::new(Arc::clone(&schema), op, coordinator.clone()));
        }
    }
}

pub struct CrudHandler {
    schema: Arc<ObjectSchema>,
    op: CrudOp,
    coordinator: TransactionCoordinator,
}

impl CrudHandler {
    pub fn new(schema: Arc<ObjectSchema>, op: CrudOp, coordinator: TransactionCoordinator) -> Self {
        Self { schema, op, coordinator }
    }

    fn collection(&self) -> &str {
        &self.schema.name
    }

    fn handle(&self, ctx: &mut RequestContext) -> DispatchResult<Response> {
        match self.op {
            CrudOp::List => self.list(ctx),
            CrudOp::Get => self.get(ctx),
            CrudOp::Create => self.create(ctx),
            CrudOp::Update => self.update(ctx),
            CrudOp::Delete => self.delete(ctx),
        }
    }

    fn can(&self, action: Action, ctx: &RequestContext, record: &Record) -> bool {
        self.schema.permissions.allows_record(action, ctx.auth.as_ref(), record)
    }

    fn denied(&self, action: Action, ctx: &RequestContext) -> DispatchError {
        DispatchError::denied(action, self.collection(), ctx.auth.is_some())
    }

    fn list(&self, ctx: &RequestContext) -> DispatchResult<Response> {
        let params = ListParams::parse(&self.schema, &ctx.query)?;
        let visible: Vec<Record> = self
            .coordinator
            .store()
            .find(self.collection(), &params.query())?
            .into_iter()
            .filter(|record| self.can(Action::Read, ctx, record))
            .collect();

        let total = visible.len();
        let data: Vec<Value> = visible
            .into_iter()
            .skip(params.offset)
            .take(params.limit)
            .map(Value::Object)
            .collect();

        Ok(Response::ok(json!({
            "data": data,
            "count": total,
            "limit": params.limit,
            "offset": params.offset,
        })))
    }

    fn get(&self, ctx: &RequestContext) -> DispatchResult<Response> {
        let id = record_param(ctx)?;
        let record = self.coordinator.store().get(self.collection(), id)?;

        match record {
            Some(record) if self.can(Action::Read, ctx, &record) => Ok(Response::ok(Value::Object(record))),
            _ => Err(DispatchError::not_found(format!("{} '{}'", self.collection(), id))),
        }
    }

    fn create(&self, ctx: &mut RequestContext) -> DispatchResult<Response> {
        let validated = match ctx.validated.take() {
            Some(validated) if validated.schema == self.schema.name => validated,
            _ => validate(&self.schema, &body(ctx)?)?,
        };
        if !self.can(Action::Create, ctx, &validated.data) {
            return Err(self.denied(Action::Create, ctx));
        }

        let created = self.coordinator.run(|tx| -> DispatchResult<Record> { Ok(tx.create(validated)?) })?;
        Ok(Response::created(Value::Object(created)))
    }

    fn update(&self, ctx: &RequestContext) -> DispatchResult<Response> {
        let id = record_param(ctx)?;
        let patch = match body(ctx)? {
            Value::Object(patch) => patch,
            _ => return Err(DispatchError::bad_request("update body must be a JSON object")),
        };

        let updated = self.coordinator.run(|tx| -> DispatchResult<Record> {
            let current = tx
                .get(self.collection(), id)?
                .filter(|record| self.can(Action::Read, ctx, record))
                .ok_or_else(|| DispatchError::not_found(format!("{} '{}'", self.collection(), id)))?;
            if !self.can(Action::Update, ctx, &current) {
                return Err(self.denied(Action::Update, ctx));
            }

            let merged = merge(current.clone(), patch);
            let validated = validate_update(&self.schema, &Value::Object(merged), &current, ValidationOptions::update())?;
            Ok(tx.update(id, validated)?)
        })?;

        Ok(Response::ok(Value::Object(updated)))
    }

    fn delete(&self, ctx: &RequestContext) -> DispatchResult<Response> {
        let id = record_param(ctx)?;

        self.coordinator.run(|tx| -> DispatchResult<()> {
            let current = tx
                .get(self.collection(), id)?
                .filter(|record| self.can(Action::Read, ctx, record))
                .ok_or_else(|| DispatchError::not_found(format!("{} '{}'", self.collection(), id)))?;
            if !self.can(Action::Delete, ctx, &current) {
                return Err(self.denied(Action::Delete, ctx));
            }
            tx.delete(self.collection(), id)?;
            Ok(())
        })?;

        Ok(Response::no_content())
    }
}

impl Handler for CrudHandler {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> HandlerFuture<'a> {
        Box::pin(async move { self.handle(ctx) })
    }
}

fn record_param(ctx: &RequestContext) -> DispatchResult<&str> {
    ctx.param("id")
        .ok_or_else(|| DispatchError::bad_request("route has no :id parameter"))
}

/// Parsed body: the resource set by `parse_json`, else the raw body, else
/// an empty object.
fn body(ctx: &RequestContext) -> DispatchResult<Value> {
    if let Some(resource) = &ctx.resource {
        return Ok(resource.clone());
    }
    if ctx.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(&ctx.body).map_err(|e| DispatchError::bad_request(format!("malformed JSON body: {}", e)))
}

/// Stored record overlaid with the patch; a `null` patch value clears the
/// field. The id never changes.
fn merge(mut current: Record, patch: Record) -> Record {
    for (key, value) in patch {
        if key == crate::schema::ID_FIELD {
            continue;
        }
        if value.is_null() {
            current.remove(&key);
        } else {
            current.insert(key, value);
        }
    }
    current
}
