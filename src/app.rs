//! Application assembly: route trees, hooks and configuration.
//!
//! `App` derefs to its default [`Router`], so routes are registered on it
//! directly:
//!
//! ```
//! use futures_util::future::BoxFuture;
//! use switchyard::{App, Config, RequestContext, ViewResult};
//!
//! fn index(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
//!     Box::pin(async move {
//!         ctx.text("hello");
//!         Ok(())
//!     })
//! }
//!
//! let mut app = App::new(Config::default());
//! app.get("/", index).unwrap();
//! app.virtual_host("docs.example.com").get("/", index).unwrap();
//! let dispatcher = app.freeze().unwrap();
//! # let _ = dispatcher;
//! ```

use std::ops::Deref;
use std::sync::Arc;

use axum::http::StatusCode;

use crate::config::Config;
use crate::http::context::RequestContext;
use crate::http::dispatch::{Dispatcher, Hooks};
use crate::http::view::{BoxError, ConnStateHook, View};
use crate::net::connection::{ConnState, ConnectionId};
use crate::routing::{Router, RouterError};

/// Everything needed to serve: the default route tree, virtual-host trees,
/// hooks and the configuration.
pub struct App {
    config: Config,
    router: Router,
    hosts: Vec<(String, Router)>,
    hooks: Hooks,
}

impl App {
    /// `server.handle_options` from `config` becomes the default for every
    /// tree; `handle_options` on a tree before freezing overrides it.
    pub fn new(config: Config) -> Self {
        let router = new_tree(config.server.handle_options);
        Self {
            config,
            router,
            hosts: Vec::new(),
            hooks: Hooks::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The default route tree, used when no virtual host matches.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Root of the route tree served for requests to `host`. Calling this
    /// again with the same host returns the same tree.
    pub fn virtual_host(&mut self, host: &str) -> Router {
        let host = host.to_ascii_lowercase();
        if let Some((_, router)) = self.hosts.iter().find(|(h, _)| *h == host) {
            return router.clone();
        }
        let router = new_tree(self.config.server.handle_options);
        self.hosts.push((host, router.clone()));
        router
    }

    pub fn on_not_found(&mut self, view: impl Into<View>) -> &mut Self {
        self.hooks.not_found = view.into();
        self
    }

    pub fn on_method_not_allowed(&mut self, view: impl Into<View>) -> &mut Self {
        self.hooks.method_not_allowed = view.into();
        self
    }

    pub fn on_error<F>(&mut self, view: F) -> &mut Self
    where
        F: Fn(&mut RequestContext, &BoxError, StatusCode) + Send + Sync + 'static,
    {
        self.hooks.error = Arc::new(view);
        self
    }

    pub fn on_panic<F>(&mut self, view: F) -> &mut Self
    where
        F: Fn(&mut RequestContext, Box<dyn std::any::Any + Send>) + Send + Sync + 'static,
    {
        self.hooks.panic = Arc::new(view);
        self
    }

    pub fn on_conn_state<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(ConnectionId, ConnState) + Send + Sync + 'static,
    {
        self.hooks.conn_state = Some(Arc::new(hook) as ConnStateHook);
        self
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Freeze every tree and build the dispatcher. Registration errors
    /// surface here at the latest.
    pub fn freeze(&self) -> Result<Dispatcher, RouterError> {
        let mut dispatcher = Dispatcher::new(self.router.freeze()?, self.hooks.clone());
        for (host, router) in &self.hosts {
            dispatcher = dispatcher.with_host(host, router.freeze()?);
        }
        Ok(dispatcher.with_concurrency_limit(self.config.limits.concurrency))
    }
}

fn new_tree(handle_options: bool) -> Router {
    let router = Router::new();
    // A fresh tree is mutable, so this cannot fail.
    let _ = router.handle_options(handle_options);
    router
}

impl Deref for App {
    type Target = Router;

    fn deref(&self) -> &Router {
        &self.router
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("addr", &self.config.server.addr)
            .field("hosts", &self.hosts.iter().map(|(h, _)| h).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
