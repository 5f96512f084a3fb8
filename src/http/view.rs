//! Handler contracts exposed to application code.
//!
//! # Responsibilities
//! - Define the single function-shaped capability shared by views and middlewares
//! - Give middlewares an identity so a chain can skip them
//! - Define the error, panic and connection-state hooks
//!
//! # Design Decisions
//! - One trait (`Handler`) for views and middlewares; no hierarchy
//! - Identity is the `Arc` allocation, so a skip must reuse the same `Middleware` value
//! - Handlers borrow the context for the duration of the call and never keep it

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::http::context::RequestContext;
use crate::net::connection::{ConnState, ConnectionId};

/// Error type returned by views and middlewares.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a view or middleware call.
pub type ViewResult = Result<(), BoxError>;

/// Something that processes one request through its context.
///
/// Implemented for every `Fn(&mut RequestContext) -> BoxFuture<'_, ViewResult>`,
/// so plain functions work directly:
///
/// ```
/// use futures_util::future::BoxFuture;
/// use switchyard::{RequestContext, ViewResult};
///
/// fn hello(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
///     Box::pin(async move {
///         ctx.text("hello");
///         Ok(())
///     })
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ViewResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ViewResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ViewResult> {
        (self)(ctx)
    }
}

/// A route handler.
#[derive(Clone)]
pub struct View {
    handler: Arc<dyn Handler>,
}

impl View {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Build a view from a closure. Going through this constructor lets the
    /// compiler infer the higher-ranked closure signature.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ViewResult> + Send + Sync + 'static,
    {
        Self::new(f)
    }

    pub(crate) fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ViewResult> {
        self.handler.call(ctx)
    }
}

impl<H: Handler> From<H> for View {
    fn from(handler: H) -> Self {
        View::new(handler)
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("View")
    }
}

/// A view-shaped function run before or after a route's own view.
///
/// Cloning a middleware keeps its identity: a clone placed in a skip list
/// removes every occurrence of the original from a composed chain.
#[derive(Clone)]
pub struct Middleware {
    name: Arc<str>,
    handler: Arc<dyn Handler>,
}

impl Middleware {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self::named("middleware", handler)
    }

    /// Same as [`Middleware::new`] with a name used in logs.
    pub fn named<H: Handler>(name: &str, handler: H) -> Self {
        Self {
            name: Arc::from(name),
            handler: Arc::new(handler),
        }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ViewResult> + Send + Sync + 'static,
    {
        Self::new(f)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when both values are the same middleware.
    pub fn same_as(&self, other: &Middleware) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.handler) as *const (),
            Arc::as_ptr(&other.handler) as *const (),
        )
    }

    pub(crate) fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ViewResult> {
        self.handler.call(ctx)
    }
}

impl<H: Handler> From<H> for Middleware {
    fn from(handler: H) -> Self {
        Middleware::new(handler)
    }
}

impl PartialEq for Middleware {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Middleware {}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}

/// Turns an error returned by a view or middleware into a response.
pub type ErrorView = Arc<dyn Fn(&mut RequestContext, &BoxError, StatusCode) + Send + Sync>;

/// Turns a panic payload recovered from a view or middleware into a response.
pub type PanicView = Arc<dyn Fn(&mut RequestContext, Box<dyn Any + Send>) + Send + Sync>;

/// Observes connection state changes.
pub type ConnStateHook = Arc<dyn Fn(ConnectionId, ConnState) + Send + Sync>;
