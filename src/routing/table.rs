//! Frozen route table backed by `matchit`.
//!
//! # Responsibilities
//! - Hold one radix tree per method plus one for `ANY` routes
//! - Resolve (method, path) to a route and its path params
//! - Report the allowed methods for a path, both for automatic OPTIONS
//!   answers and when only the method is wrong
//!
//! # Design Decisions
//! - Built once by `Router::freeze`, read-only afterwards, shared via `Arc`
//! - Method trees are tried before the `ANY` tree
//! - Automatic OPTIONS is answered at resolve time from the same method scan
//!   as 405, so both always report the same `Allow`; an explicit OPTIONS
//!   route matching the path wins

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use axum::http::Method;

use crate::http::view::View;
use crate::routing::middleware::ComposedChain;
use crate::routing::route::{RouteMethod, RouteTimeout};
use crate::routing::RouterError;

/// A route with its middleware chain flattened.
#[derive(Debug)]
pub struct CompiledRoute {
    pub method: RouteMethod,
    /// Fully-qualified pattern (group prefixes applied).
    pub pattern: String,
    pub view: View,
    pub chain: ComposedChain,
    pub timeout: Option<RouteTimeout>,
}

/// Result of resolving a request against the table.
#[derive(Debug)]
pub enum Resolution<'a> {
    Matched {
        route: &'a Arc<CompiledRoute>,
        params: Vec<(String, String)>,
    },
    /// Generated OPTIONS answer; runs no user middleware.
    AutoOptions {
        allow: String,
    },
    NotFound,
    MethodNotAllowed {
        allow: String,
    },
}

/// Immutable matcher index for a whole router tree.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Arc<CompiledRoute>>,
    by_method: HashMap<Method, matchit::Router<usize>>,
    any: matchit::Router<usize>,
    has_any: bool,
    auto_options: bool,
}

impl RouteTable {
    /// Build the table. With `auto_options`, OPTIONS requests for a path
    /// served by at least one explicit method are answered automatically.
    pub(crate) fn build(routes: Vec<CompiledRoute>, auto_options: bool) -> Result<Self, RouterError> {
        let mut table = RouteTable {
            auto_options,
            ..RouteTable::default()
        };
        for route in routes {
            table.insert(route)?;
        }
        Ok(table)
    }

    fn insert(&mut self, route: CompiledRoute) -> Result<(), RouterError> {
        let index = self.routes.len();
        let tree = match &route.method {
            RouteMethod::Method(m) => self.by_method.entry(m.clone()).or_default(),
            RouteMethod::Any => {
                self.has_any = true;
                &mut self.any
            }
        };
        tree.insert(route.pattern.as_str(), index)
            .map_err(|e| RouterError::Conflict {
                method: route.method.to_string(),
                pattern: route.pattern.clone(),
                reason: e.to_string(),
            })?;
        self.routes.push(Arc::new(route));
        Ok(())
    }

    /// Resolve a request.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        if let Some(found) = self.lookup(self.by_method.get(method), path) {
            return found;
        }

        let allowed = self.allowed_methods(path);
        if *method == Method::OPTIONS && self.auto_options && !allowed.is_empty() {
            return Resolution::AutoOptions { allow: allowed };
        }
        if self.has_any {
            if let Some(found) = self.lookup(Some(&self.any), path) {
                return found;
            }
        }

        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::MethodNotAllowed { allow: allowed }
        }
    }

    /// Sorted, comma-separated methods with an explicit route matching
    /// `path`, plus OPTIONS when it is answered automatically. Empty when
    /// no explicit method matches.
    pub fn allowed_methods(&self, path: &str) -> String {
        let mut allowed: BTreeSet<&str> = self
            .by_method
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.as_str())
            .collect();
        if self.auto_options && !allowed.is_empty() {
            allowed.insert(Method::OPTIONS.as_str());
        }
        allowed.into_iter().collect::<Vec<_>>().join(", ")
    }

    fn lookup(&self, tree: Option<&matchit::Router<usize>>, path: &str) -> Option<Resolution<'_>> {
        let matched = tree?.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(Resolution::Matched {
            route: &self.routes[*matched.value],
            params,
        })
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes.len())
            .field("methods", &self.by_method.keys().collect::<Vec<_>>())
            .field("auto_options", &self.auto_options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::RequestContext;
    use crate::http::view::ViewResult;
    use futures_util::future::BoxFuture;

    fn noop(_ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
        Box::pin(async { Ok(()) })
    }

    fn route(method: RouteMethod, pattern: &str) -> CompiledRoute {
        CompiledRoute {
            method,
            pattern: pattern.to_string(),
            view: View::new(noop),
            chain: ComposedChain::default(),
            timeout: None,
        }
    }

    fn get(pattern: &str) -> CompiledRoute {
        route(RouteMethod::Method(Method::GET), pattern)
    }

    fn matched_pattern(resolution: Resolution<'_>) -> (String, Vec<(String, String)>) {
        match resolution {
            Resolution::Matched { route, params } => (route.pattern.clone(), params),
            other => panic!("expected a route match, got {:?}", other),
        }
    }

    #[test]
    fn extracts_path_params() {
        let table = RouteTable::build(vec![get("/users/{id}")], true).unwrap();

        let (pattern, params) = matched_pattern(table.resolve(&Method::GET, "/users/42"));
        assert_eq!(pattern, "/users/{id}");
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn wrong_method_lists_allowed() {
        let table = RouteTable::build(vec![get("/users/{id}")], true).unwrap();

        match table.resolve(&Method::POST, "/users/42") {
            Resolution::MethodNotAllowed { allow } => assert_eq!(allow, "GET, OPTIONS"),
            other => panic!("expected method not allowed, got {:?}", other),
        }
    }

    #[test]
    fn unknown_path_is_not_found() {
        let table = RouteTable::build(vec![get("/a")], true).unwrap();
        assert!(matches!(table.resolve(&Method::GET, "/b"), Resolution::NotFound));
    }

    #[test]
    fn auto_options_lists_methods() {
        let routes = vec![
            get("/items"),
            route(RouteMethod::Method(Method::POST), "/items"),
        ];
        let table = RouteTable::build(routes, true).unwrap();

        match table.resolve(&Method::OPTIONS, "/items") {
            Resolution::AutoOptions { allow } => assert_eq!(allow, "GET, OPTIONS, POST"),
            other => panic!("expected auto options, got {:?}", other),
        }
    }

    #[test]
    fn auto_options_can_be_disabled() {
        let table = RouteTable::build(vec![get("/items")], false).unwrap();
        match table.resolve(&Method::POST, "/items") {
            Resolution::MethodNotAllowed { allow } => assert_eq!(allow, "GET"),
            other => panic!("expected method not allowed, got {:?}", other),
        }
    }

    #[test]
    fn custom_options_is_kept() {
        let routes = vec![
            get("/items"),
            route(RouteMethod::Method(Method::OPTIONS), "/items"),
        ];
        let table = RouteTable::build(routes, true).unwrap();

        assert!(matches!(
            table.resolve(&Method::OPTIONS, "/items"),
            Resolution::Matched { .. }
        ));
    }

    #[test]
    fn any_route_answers_remaining_methods() {
        let routes = vec![get("/hook"), route(RouteMethod::Any, "/hook")];
        let table = RouteTable::build(routes, true).unwrap();

        let (pattern, _) = matched_pattern(table.resolve(&Method::DELETE, "/hook"));
        assert_eq!(pattern, "/hook");
        match table.resolve(&Method::GET, "/hook") {
            Resolution::Matched { route: r, .. } => {
                assert_eq!(r.method, RouteMethod::Method(Method::GET))
            }
            other => panic!("expected GET route, got {:?}", other),
        }
    }

    #[test]
    fn conflicting_params_are_rejected() {
        let err = RouteTable::build(
            vec![get("/users/{id}"), get("/users/{name}")],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, RouterError::Conflict { .. }));
    }

    #[test]
    fn static_segment_wins_over_param() {
        let table = RouteTable::build(
            vec![get("/users/{id}"), get("/users/me")],
            true,
        )
        .unwrap();
        let (pattern, params) = matched_pattern(table.resolve(&Method::GET, "/users/me"));
        assert_eq!(pattern, "/users/me");
        assert!(params.is_empty());
    }

    fn options_allow(table: &RouteTable, path: &str) -> String {
        match table.resolve(&Method::OPTIONS, path) {
            Resolution::AutoOptions { allow } => allow,
            other => panic!("expected auto options, got {:?}", other),
        }
    }

    fn not_allowed(table: &RouteTable, method: Method, path: &str) -> String {
        match table.resolve(&method, path) {
            Resolution::MethodNotAllowed { allow } => allow,
            other => panic!("expected method not allowed, got {:?}", other),
        }
    }

    #[test]
    fn differently_named_params_under_different_methods() {
        let routes = vec![
            get("/users/{id}"),
            route(RouteMethod::Method(Method::POST), "/users/{name}"),
        ];
        let table = RouteTable::build(routes, true).unwrap();

        assert_eq!(options_allow(&table, "/users/7"), "GET, OPTIONS, POST");
        assert_eq!(not_allowed(&table, Method::PUT, "/users/7"), "GET, OPTIONS, POST");
    }

    #[test]
    fn explicit_options_next_to_other_param_name() {
        let routes = vec![
            get("/users/{id}"),
            route(RouteMethod::Method(Method::OPTIONS), "/users/{name}"),
        ];
        let table = RouteTable::build(routes, true).unwrap();

        match table.resolve(&Method::OPTIONS, "/users/7") {
            Resolution::Matched { route, params } => {
                assert_eq!(route.pattern, "/users/{name}");
                assert_eq!(params, vec![("name".to_string(), "7".to_string())]);
            }
            other => panic!("expected explicit OPTIONS route, got {:?}", other),
        }
    }

    #[test]
    fn options_and_405_agree_on_overlapping_patterns() {
        let routes = vec![
            get("/users/{id}"),
            route(RouteMethod::Method(Method::POST), "/users/me"),
        ];
        let table = RouteTable::build(routes, true).unwrap();

        let options = options_allow(&table, "/users/me");
        assert_eq!(options, "GET, OPTIONS, POST");
        assert_eq!(not_allowed(&table, Method::PUT, "/users/me"), options);
        assert_eq!(options_allow(&table, "/users/42"), "GET, OPTIONS");
    }

    #[test]
    fn any_only_path_gets_no_auto_options() {
        let table = RouteTable::build(vec![route(RouteMethod::Any, "/hook")], true).unwrap();

        assert!(matches!(
            table.resolve(&Method::OPTIONS, "/hook"),
            Resolution::Matched { .. }
        ));
        assert_eq!(table.allowed_methods("/hook"), "");
    }
}
