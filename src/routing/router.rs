//! Router tree: prefix-scoped groups of routes.
//!
//! # Responsibilities
//! - Hold every scope of one tree in an arena
//! - Register routes and child groups while the tree is mutable
//! - Reject duplicate (method, full pattern) pairs at registration
//! - Freeze the tree into a `RouteTable`
//!
//! # Design Decisions
//! - Scopes live in a `Vec`; children are indices, the parent link is a
//!   non-owning index used only for prefix and middleware inheritance
//! - `Router` is a cheap handle (shared tree + node index)
//! - Freezing is idempotent and irreversible

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::Method;

use crate::http::view::{Middleware, View};
use crate::routing::middleware::{compose, Middlewares};
use crate::routing::route::{Route, RouteMethod};
use crate::routing::table::{CompiledRoute, RouteTable};
use crate::routing::RouterError;

const ROOT: usize = 0;

struct Scope {
    /// Effective prefix (all ancestor prefixes applied).
    prefix: String,
    parent: Option<usize>,
    mutable: bool,
    routes: Vec<Route>,
    children: Vec<usize>,
    middlewares: Middlewares,
}

struct Tree {
    scopes: Vec<Scope>,
    registered: HashSet<(RouteMethod, String)>,
    handle_options: bool,
    frozen: Option<Arc<RouteTable>>,
}

/// Handle to one scope of a router tree.
///
/// ```
/// use futures_util::future::BoxFuture;
/// use switchyard::{RequestContext, Router, ViewResult};
///
/// fn show(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
///     Box::pin(async move {
///         let id = ctx.param("id").unwrap_or_default().to_string();
///         ctx.text(id);
///         Ok(())
///     })
/// }
///
/// let root = Router::new();
/// let users = root.group("/users").unwrap();
/// users.get("/{id}", show).unwrap();
///
/// let table = root.freeze().unwrap();
/// assert!(users.get("/other", show).is_err());
/// # let _ = table;
/// ```
#[derive(Clone)]
pub struct Router {
    tree: Arc<Mutex<Tree>>,
    node: usize,
}

impl Router {
    /// New root scope with an empty prefix.
    pub fn new() -> Self {
        let root = Scope {
            prefix: String::new(),
            parent: None,
            mutable: true,
            routes: Vec::new(),
            children: Vec::new(),
            middlewares: Middlewares::default(),
        };
        Self {
            tree: Arc::new(Mutex::new(Tree {
                scopes: vec![root],
                registered: HashSet::new(),
                handle_options: true,
                frozen: None,
            })),
            node: ROOT,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().expect("router tree mutex poisoned")
    }

    fn mutable_scope<'t>(&self, tree: &'t mut Tree) -> Result<&'t mut Scope, RouterError> {
        let scope = &mut tree.scopes[self.node];
        if !scope.mutable {
            return Err(RouterError::Frozen);
        }
        Ok(scope)
    }

    /// Effective prefix of this scope.
    pub fn prefix(&self) -> String {
        self.lock().scopes[self.node].prefix.clone()
    }

    pub fn is_frozen(&self) -> bool {
        !self.lock().scopes[self.node].mutable
    }

    /// Create a child scope under `prefix`.
    pub fn group(&self, prefix: &str) -> Result<Router, RouterError> {
        validate_pattern(prefix)?;
        let mut tree = self.lock();
        let parent_prefix = self.mutable_scope(&mut tree)?.prefix.clone();

        let index = tree.scopes.len();
        tree.scopes.push(Scope {
            prefix: join_paths(&parent_prefix, prefix),
            parent: Some(self.node),
            mutable: true,
            routes: Vec::new(),
            children: Vec::new(),
            middlewares: Middlewares::default(),
        });
        tree.scopes[self.node].children.push(index);

        tracing::debug!(prefix = %tree.scopes[index].prefix, "Router group created");
        Ok(Router {
            tree: Arc::clone(&self.tree),
            node: index,
        })
    }

    /// Run `middleware` before every view of this scope and its descendants.
    pub fn use_before(&self, middleware: impl Into<Middleware>) -> Result<&Self, RouterError> {
        let mut tree = self.lock();
        self.mutable_scope(&mut tree)?
            .middlewares
            .before
            .push(middleware.into());
        Ok(self)
    }

    /// Run `middleware` after every view of this scope and its descendants.
    pub fn use_after(&self, middleware: impl Into<Middleware>) -> Result<&Self, RouterError> {
        let mut tree = self.lock();
        self.mutable_scope(&mut tree)?
            .middlewares
            .after
            .push(middleware.into());
        Ok(self)
    }

    /// Remove `middleware` from every chain composed through this scope.
    pub fn skip(&self, middleware: &Middleware) -> Result<&Self, RouterError> {
        let mut tree = self.lock();
        self.mutable_scope(&mut tree)?
            .middlewares
            .skip
            .push(middleware.clone());
        Ok(self)
    }

    /// Enable or disable automatic OPTIONS answers for the whole tree.
    pub fn handle_options(&self, enabled: bool) -> Result<&Self, RouterError> {
        let mut tree = self.lock();
        self.mutable_scope(&mut tree)?;
        tree.handle_options = enabled;
        Ok(self)
    }

    /// Register a route in this scope.
    pub fn add(&self, route: Route) -> Result<(), RouterError> {
        validate_pattern(&route.pattern)?;
        let mut tree = self.lock();
        let prefix = self.mutable_scope(&mut tree)?.prefix.clone();
        let full = join_paths(&prefix, &route.pattern);

        let key = (route.method.clone(), full.clone());
        if tree.registered.contains(&key) {
            return Err(RouterError::DuplicateRoute {
                method: route.method.to_string(),
                pattern: full,
            });
        }
        tree.registered.insert(key);

        tracing::debug!(method = %route.method, pattern = %full, "Route registered");
        tree.scopes[self.node].routes.push(route);
        Ok(())
    }

    pub fn register(
        &self,
        method: impl Into<RouteMethod>,
        pattern: &str,
        view: impl Into<View>,
        middlewares: Middlewares,
    ) -> Result<(), RouterError> {
        self.add(Route::new(method, pattern, view).middlewares(middlewares))
    }

    pub fn get(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::GET, pattern, view))
    }

    pub fn head(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::HEAD, pattern, view))
    }

    pub fn post(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::POST, pattern, view))
    }

    pub fn put(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::PUT, pattern, view))
    }

    pub fn patch(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::PATCH, pattern, view))
    }

    pub fn delete(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::DELETE, pattern, view))
    }

    pub fn options(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::new(Method::OPTIONS, pattern, view))
    }

    pub fn any(&self, pattern: &str, view: impl Into<View>) -> Result<(), RouterError> {
        self.add(Route::any(pattern, view))
    }

    /// Build the route table for the whole tree and make every scope
    /// immutable. Later calls return the same table.
    pub fn freeze(&self) -> Result<Arc<RouteTable>, RouterError> {
        let mut tree = self.lock();
        if let Some(table) = &tree.frozen {
            return Ok(Arc::clone(table));
        }

        let mut compiled = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let scope = &tree.scopes[index];
            let ancestors = ancestor_chains(&tree, index);
            for route in &scope.routes {
                let mut chains = ancestors.clone();
                chains.push(&route.middlewares);
                compiled.push(CompiledRoute {
                    method: route.method.clone(),
                    pattern: join_paths(&scope.prefix, &route.pattern),
                    view: route.view.clone(),
                    chain: compose(&chains),
                    timeout: route.timeout.clone(),
                });
            }
            stack.extend(scope.children.iter().rev());
        }

        let table = Arc::new(RouteTable::build(compiled, tree.handle_options)?);

        for scope in tree.scopes.iter_mut() {
            scope.mutable = false;
        }
        tree.frozen = Some(Arc::clone(&table));

        tracing::info!(
            scopes = tree.scopes.len(),
            endpoints = table.len(),
            "Router frozen"
        );
        Ok(table)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("node", &self.node).finish()
    }
}

/// Middleware chains from the root down to `index`, outermost first.
fn ancestor_chains(tree: &Tree, index: usize) -> Vec<&Middlewares> {
    let mut chains = Vec::new();
    let mut current = Some(index);
    while let Some(i) = current {
        chains.push(&tree.scopes[i].middlewares);
        current = tree.scopes[i].parent;
    }
    chains.reverse();
    chains
}

fn validate_pattern(pattern: &str) -> Result<(), RouterError> {
    if pattern.is_empty() {
        return Err(RouterError::EmptyPattern);
    }
    if !pattern.starts_with('/') {
        return Err(RouterError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

/// `"/api" + "/"` is `"/api"`; `"" + "/"` is `"/"`.
pub(crate) fn join_paths(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if pattern == "/" && !prefix.is_empty() {
        return prefix.to_string();
    }
    format!("{}{}", prefix, pattern)
}
