//! Built-in middleware registration

use std::sync::Arc;

use crate::auth::AuthProvider;
use crate::dispatch::middleware::{
    AuthenticateMiddleware, AuthorizeMiddleware, ObserveMiddleware, ParseJson, RequireRole, ValidateMiddleware,
};
use crate::dispatch::{ComponentRegistry, Middleware};
use crate::schema::{Action, SchemaRegistry};

/// Registers built-in middleware under names the application has not
/// already taken. `authenticate` needs an auth provider.
pub fn register_middleware(
    registry: &mut ComponentRegistry,
    schemas: &Arc<SchemaRegistry>,
    auth: Option<Arc<dyn AuthProvider>>,
) {
    if !registry.has_middleware("parse_json") {
        registry.register_middleware("parse_json", ParseJson);
    }
    if !registry.has_middleware("observe") {
        registry.register_middleware("observe", ObserveMiddleware);
    }
    if let Some(provider) = auth {
        if !registry.has_middleware("authenticate") {
            registry.register_middleware("authenticate", AuthenticateMiddleware::new(provider));
        }
    }

    if !registry.has_middleware("validate") {
        let schemas = Arc::clone(schemas);
        registry.register_middleware_factory("validate", move |name: &str| {
            let schema = schemas
                .get(name)
                .ok_or_else(|| format!("unknown schema '{}'", name))?;
            Ok(Arc::new(ValidateMiddleware::new(schema)) as Arc<dyn Middleware>)
        });
    }

    if !registry.has_middleware("authorize") {
        let schemas = Arc::clone(schemas);
        registry.register_middleware_factory("authorize", move |args: &str| {
            let (name, action) = args
                .split_once(':')
                .ok_or_else(|| "expected authorize:<schema>:<action>".to_string())?;
            let schema = schemas
                .get(name)
                .ok_or_else(|| format!("unknown schema '{}'", name))?;
            let action = Action::parse(action).ok_or_else(|| format!("unknown action '{}'", action))?;
            Ok(Arc::new(AuthorizeMiddleware::new(schema, action)) as Arc<dyn Middleware>)
        });
    }

    if !registry.has_middleware("require_role") {
        registry.register_middleware_factory("require_role", |role: &str| {
            if role.is_empty() {
                return Err("expected require_role:<role>".to_string());
            }
            Ok(Arc::new(RequireRole::new(role)) as Arc<dyn Middleware>)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteError;
    use crate::schema::{FieldKind, FieldSpec, ObjectSchema};

    fn schemas() -> Arc<SchemaRegistry> {
        let mut schemas = SchemaRegistry::new();
        schemas
            .register(ObjectSchema::new("products", vec![FieldSpec::new("name", FieldKind::string())]))
            .unwrap();
        Arc::new(schemas)
    }

    #[test]
    fn test_factories() {
        let mut registry = ComponentRegistry::new();
        register_middleware(&mut registry, &schemas(), None);

        assert!(registry.middleware("parse_json").is_ok());
        assert!(registry.middleware("validate:products").is_ok());
        assert!(registry.middleware("authorize:products:read").is_ok());
        assert!(registry.middleware("require_role:admin").is_ok());

        assert!(matches!(registry.middleware("validate:orders"), Err(RouteError::InvalidMiddleware { .. })));
        assert!(matches!(registry.middleware("authorize:products:fly"), Err(RouteError::InvalidMiddleware { .. })));
        assert!(matches!(registry.middleware("authenticate"), Err(RouteError::UnknownMiddleware(_))));
    }
}
