//! Route table
//!
//! Built once with [`RouteTableBuilder`] and frozen into a [`RouteTable`].
//! Resolution is read-only and needs no locking.

use std::collections::HashMap;

use super::errors::{RouteError, RouteResult};
use super::method::{Method, MethodScope};
use super::pattern::{split_path, CatchScope, Params, PathPattern};

/// A registered route
#[derive(Debug, Clone)]
pub struct RouteEntry<H> {
    pub method: Method,
    pub pattern: PathPattern,
    /// Middleware names in execution order
    pub middleware: Vec<String>,
    pub handler: H,
}

#[derive(Debug, Clone)]
struct CatchEntry<C> {
    method: MethodScope,
    scope: CatchScope,
    handler: C,
}

/// Outcome of resolving a request
#[derive(Debug)]
pub enum Resolution<'a, H, C> {
    NotFound,
    Matched(RouteMatch<'a, H, C>),
}

#[derive(Debug)]
pub struct RouteMatch<'a, H, C> {
    pub route: &'a RouteEntry<H>,
    pub params: Params,
    /// Most specific catch handler covering the request
    pub catch: Option<&'a C>,
}

#[derive(Debug)]
pub struct RouteTableBuilder<H, C> {
    routes: HashMap<Method, Vec<RouteEntry<H>>>,
    catches: Vec<CatchEntry<C>>,
}

impl<H, C> Default for RouteTableBuilder<H, C> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            catches: Vec::new(),
        }
    }
}

impl<H, C> RouteTableBuilder<H, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. A route's own catch handler gets the exact scope
    /// of its pattern.
    ///
    /// Fails when another route of the same method can match a common path
    /// with the same number of literal segments.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        middleware: Vec<String>,
        handler: H,
        catch: Option<C>,
    ) -> RouteResult<()> {
        let pattern = PathPattern::parse(pattern)?;

        if let Some(existing) = self.routes.get(&method).and_then(|routes| {
            routes
                .iter()
                .find(|r| r.pattern.literal_count() == pattern.literal_count() && r.pattern.overlaps(&pattern))
        }) {
            return Err(RouteError::Conflict {
                method: method.to_string(),
                pattern: pattern.to_string(),
                existing: existing.pattern.to_string(),
            });
        }

        if let Some(handler) = catch {
            self.add_catch_scope(MethodScope::Only(method), CatchScope::Exact(pattern.clone()), handler)?;
        }

        self.routes.entry(method).or_default().push(RouteEntry {
            method,
            pattern,
            middleware,
            handler,
        });
        Ok(())
    }

    /// Registers a catch handler for `METHOD|ALL` and an exact pattern or a
    /// `prefix/*` scope.
    pub fn add_catch(&mut self, method: MethodScope, scope: &str, handler: C) -> RouteResult<()> {
        let scope = CatchScope::parse(scope)?;
        self.add_catch_scope(method, scope, handler)
    }

    fn add_catch_scope(&mut self, method: MethodScope, scope: CatchScope, handler: C) -> RouteResult<()> {
        if self.catches.iter().any(|c| c.method == method && c.scope == scope) {
            return Err(RouteError::DuplicateCatch(format!("{} {}", method, scope)));
        }
        self.catches.push(CatchEntry { method, scope, handler });
        Ok(())
    }

    pub fn build(mut self) -> RouteTable<H, C> {
        for routes in self.routes.values_mut() {
            // Stable sort keeps registration order among non-overlapping
            // patterns.
            routes.sort_by(|a, b| b.pattern.literal_count().cmp(&a.pattern.literal_count()));
        }
        RouteTable {
            routes: self.routes,
            catches: self.catches,
        }
    }
}

/// Frozen route table
#[derive(Debug)]
pub struct RouteTable<H, C> {
    /// Per method, most literal segments first
    routes: HashMap<Method, Vec<RouteEntry<H>>>,
    catches: Vec<CatchEntry<C>>,
}

impl<H, C> RouteTable<H, C> {
    pub fn resolve(&self, method: Method, path: &str) -> Resolution<'_, H, C> {
        let segments = split_path(path);

        let found = self.routes.get(&method).and_then(|routes| {
            routes
                .iter()
                .find_map(|route| route.pattern.matches(&segments).map(|params| (route, params)))
        });

        match found {
            None => Resolution::NotFound,
            Some((route, params)) => Resolution::Matched(RouteMatch {
                route,
                params,
                catch: self.catch_for_segments(method, &segments),
            }),
        }
    }

    /// Most specific catch handler covering a request. Candidates rank
    /// lexicographically by:
    ///
    /// 1. scope kind: an exact pattern beats any `prefix/*`
    /// 2. method: a specific method beats `ALL`
    /// 3. prefix length, then literal segment count
    ///
    /// Scope kind comes first, so `ALL /reports/daily` wins over
    /// `GET /reports/*` for `GET /reports/daily`, and `GET /admin/*` wins
    /// over `ALL /admin/users/*` for `GET /admin/users/1`.
    pub fn catch_for(&self, method: Method, path: &str) -> Option<&C> {
        self.catch_for_segments(method, &split_path(path))
    }

    fn catch_for_segments(&self, method: Method, segments: &[&str]) -> Option<&C> {
        self.catches
            .iter()
            .filter(|c| c.method.covers(method) && c.scope.covers(segments))
            .max_by_key(|c| {
                let (exact, len, literals) = c.scope.rank();
                (exact, c.method.is_specific(), len, literals)
            })
            .map(|c| &c.handler)
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteEntry<H>> {
        let mut all: Vec<&RouteEntry<H>> = self.routes.values().flatten().collect();
        all.sort_by(|a, b| a.pattern.as_str().cmp(b.pattern.as_str()).then(a.method.cmp(&b.method)));
        all.into_iter()
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: &[(Method, &str, &'static str)]) -> RouteTable<&'static str, &'static str> {
        let mut builder = RouteTableBuilder::new();
        for (method, pattern, handler) in routes {
            builder.register(*method, pattern, vec![], *handler, None).unwrap();
        }
        builder.build()
    }

    fn handler_for(table: &RouteTable<&'static str, &'static str>, method: Method, path: &str) -> Option<&'static str> {
        match table.resolve(method, path) {
            Resolution::Matched(m) => Some(m.route.handler),
            Resolution::NotFound => None,
        }
    }

    #[test]
    fn test_most_literal_wins() {
        let table = table(&[
            (Method::Get, "/users/:id", "show"),
            (Method::Get, "/users/me", "me"),
        ]);

        assert_eq!(handler_for(&table, Method::Get, "/users/me"), Some("me"));
        assert_eq!(handler_for(&table, Method::Get, "/users/7"), Some("show"));
        assert_eq!(handler_for(&table, Method::Post, "/users/7"), None);
        assert_eq!(handler_for(&table, Method::Get, "/users"), None);
    }

    #[test]
    fn test_params_captured() {
        let table = table(&[(Method::Get, "/products/:id", "get")]);
        match table.resolve(Method::Get, "products/42") {
            Resolution::Matched(m) => assert_eq!(m.params["id"], "42"),
            Resolution::NotFound => panic!("expected a match"),
        }
    }

    #[test]
    fn test_equal_literal_overlap_rejected() {
        let mut builder: RouteTableBuilder<&str, &str> = RouteTableBuilder::new();
        builder.register(Method::Get, "/a/:x/c", vec![], "one", None).unwrap();

        let err = builder.register(Method::Get, "/:y/b/c", vec![], "two", None).unwrap_err();
        assert!(matches!(err, RouteError::Conflict { .. }));

        let err = builder.register(Method::Get, "/a/:z/c", vec![], "dup", None).unwrap_err();
        assert!(matches!(err, RouteError::Conflict { .. }));

        // Other methods and disjoint literals are fine.
        builder.register(Method::Post, "/:y/b/c", vec![], "post", None).unwrap();
        builder.register(Method::Get, "/:y/b/d", vec![], "other", None).unwrap();
    }

    #[test]
    fn test_catch_ranking() {
        let mut builder: RouteTableBuilder<&str, &str> = RouteTableBuilder::new();
        builder.register(Method::Get, "/admin/users/:id", vec![], "user", Some("route")).unwrap();
        builder.add_catch(MethodScope::Any, "/*", "global").unwrap();
        builder.add_catch(MethodScope::Any, "/admin/*", "admin_all").unwrap();
        builder.add_catch(MethodScope::Only(Method::Get), "/admin/*", "admin_get").unwrap();
        builder.add_catch(MethodScope::Any, "/admin/users/*", "admin_users").unwrap();
        let table = builder.build();

        assert_eq!(table.catch_for(Method::Get, "/admin/users/1"), Some(&"route"));
        assert_eq!(table.catch_for(Method::Post, "/admin/users/1"), Some(&"admin_users"));
        assert_eq!(table.catch_for(Method::Get, "/admin/settings"), Some(&"admin_get"));
        assert_eq!(table.catch_for(Method::Post, "/admin/settings"), Some(&"admin_all"));
        assert_eq!(table.catch_for(Method::Get, "/public"), Some(&"global"));
    }

    #[test]
    fn test_exact_scope_outranks_method_specific_prefix() {
        let mut builder: RouteTableBuilder<&str, &str> = RouteTableBuilder::new();
        builder.add_catch(MethodScope::Only(Method::Get), "/reports/*", "reports_get").unwrap();
        builder.add_catch(MethodScope::Any, "/reports/daily", "daily_all").unwrap();
        let table = builder.build();

        assert_eq!(table.catch_for(Method::Get, "/reports/daily"), Some(&"daily_all"));
        assert_eq!(table.catch_for(Method::Post, "/reports/daily"), Some(&"daily_all"));
        assert_eq!(table.catch_for(Method::Get, "/reports/weekly"), Some(&"reports_get"));
        assert_eq!(table.catch_for(Method::Post, "/reports/weekly"), None);
    }

    #[test]
    fn test_duplicate_catch_rejected() {
        let mut builder: RouteTableBuilder<&str, &str> = RouteTableBuilder::new();
        builder.add_catch(MethodScope::Any, "/admin/*", "a").unwrap();
        assert!(builder.add_catch(MethodScope::Any, "/admin/*", "b").is_err());
        assert!(builder.add_catch(MethodScope::Only(Method::Get), "/admin/*", "c").is_ok());
    }
}
