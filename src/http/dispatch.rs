//! Request dispatch: route resolution and pipeline execution.
//!
//! # Pipeline
//! ```text
//! request → resolve (host tree → RouteTable)
//!   Matched      → [timeout task?] before* → view → after* → response
//!   NotFound     → not_found view
//!   NotAllowed   → Allow header → method_not_allowed view
//! ```
//!
//! # Design Decisions
//! - Before-chain errors and `stop()` short-circuit; the after-chain always runs
//! - The first after-chain error is reported once the whole chain has run
//! - Panics are caught per request and turned into the panic view's response
//! - A timed-out pipeline is abandoned, never aborted

use std::collections::HashMap;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Semaphore;

use crate::http::context::RequestContext;
use crate::http::response::{
    default_error_view, default_method_not_allowed, default_not_found, default_panic_view,
    panic_message,
};
use crate::http::view::{BoxError, ConnStateHook, ErrorView, PanicView, View};
use crate::observability::metrics;
use crate::routing::table::{CompiledRoute, Resolution, RouteTable};

/// Views invoked outside of a matched route.
#[derive(Clone)]
pub struct Hooks {
    pub not_found: View,
    pub method_not_allowed: View,
    pub error: ErrorView,
    pub panic: PanicView,
    pub conn_state: Option<ConnStateHook>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            not_found: default_not_found(),
            method_not_allowed: default_method_not_allowed(),
            error: default_error_view(),
            panic: default_panic_view(),
            conn_state: None,
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("conn_state", &self.conn_state.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct Inner {
    default: Arc<RouteTable>,
    hosts: HashMap<String, Arc<RouteTable>>,
    hooks: Hooks,
    limit: Option<Arc<Semaphore>>,
}

/// Tower service executing requests against frozen route tables.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(default: Arc<RouteTable>, hooks: Hooks) -> Self {
        Self {
            inner: Arc::new(Inner {
                default,
                hosts: HashMap::new(),
                hooks,
                limit: None,
            }),
        }
    }

    /// Serve requests whose host is `host` from `table`.
    pub fn with_host(mut self, host: &str, table: Arc<RouteTable>) -> Self {
        self.inner_mut().hosts.insert(host.to_ascii_lowercase(), table);
        self
    }

    /// Bound the number of requests dispatched at once. Extra requests wait.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.inner_mut().limit = Some(Arc::new(Semaphore::new(limit)));
        self
    }

    fn inner_mut(&mut self) -> &mut Inner {
        Arc::make_mut(&mut self.inner)
    }

    pub fn hooks(&self) -> &Hooks {
        &self.inner.hooks
    }

    /// Handle one request.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let _permit = match &self.inner.limit {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };

        let started = Instant::now();
        let method = request.method().clone();
        let response = self.resolve_and_run(RequestContext::from_request(request)).await;
        metrics::record_request(method.as_str(), response.status().as_u16(), started);
        response
    }

    async fn resolve_and_run(&self, mut ctx: RequestContext) -> Response<Body> {
        let inner = &self.inner;
        let table = ctx
            .host()
            .and_then(|host| inner.hosts.get(&host))
            .unwrap_or(&inner.default);

        match table.resolve(ctx.method(), ctx.path()) {
            Resolution::Matched { route, params } => {
                let route = Arc::clone(route);
                ctx.set_params(params);
                run_route(Arc::clone(inner), route, ctx).await
            }
            Resolution::AutoOptions { allow } => {
                let mut response = Response::new(Body::empty());
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                response
            }
            Resolution::NotFound => {
                run_hook(&inner.hooks, &inner.hooks.not_found, ctx).await
            }
            Resolution::MethodNotAllowed { allow } => {
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    ctx.set_header(header::ALLOW, value);
                }
                run_hook(&inner.hooks, &inner.hooks.method_not_allowed, ctx).await
            }
        }
    }
}

impl tower::Service<Request<Body>> for Dispatcher {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatch(request).await) })
    }
}

/// Run a matched route, racing it against its timeout when it has one.
async fn run_route(inner: Arc<Inner>, route: Arc<CompiledRoute>, ctx: RequestContext) -> Response<Body> {
    let Some(timeout) = route.timeout.clone() else {
        return run_guarded(&inner.hooks, &route, ctx).await;
    };

    let flag = ctx.timeout_flag();
    let task = tokio::spawn(async move { run_guarded(&inner.hooks, &route, ctx).await });

    match tokio::time::timeout(timeout.duration, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(join_error)) => {
            tracing::error!(error = %join_error, "Route task failed");
            let mut response = Response::new(Body::from("Internal Server Error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
        Err(_elapsed) => {
            // The task keeps running on its own; its writes are now ignored.
            flag.store(true, Ordering::Release);
            metrics::record_timeout();
            tracing::warn!(timeout = ?timeout.duration, "Route timed out");
            timeout.response()
        }
    }
}

/// Run the pipeline with panic recovery.
async fn run_guarded(hooks: &Hooks, route: &CompiledRoute, mut ctx: RequestContext) -> Response<Body> {
    let outcome = AssertUnwindSafe(run_pipeline(hooks, route, &mut ctx))
        .catch_unwind()
        .await;
    if let Err(payload) = outcome {
        recover(hooks, &mut ctx, payload);
    }
    ctx.into_response()
}

/// before* → view → after*.
pub(crate) async fn run_pipeline(hooks: &Hooks, route: &CompiledRoute, ctx: &mut RequestContext) {
    let mut proceed = true;

    for middleware in &route.chain.before {
        ctx.reset_continue();
        if let Err(err) = middleware.call(ctx).await {
            tracing::warn!(middleware = middleware.name(), error = %err, "Before middleware failed");
            let status = if ctx.status() == StatusCode::OK {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                ctx.status()
            };
            (hooks.error)(ctx, &err, status);
            proceed = false;
            break;
        }
        if !ctx.should_continue() {
            proceed = false;
            break;
        }
    }

    if proceed && !ctx.view_skipped() {
        if let Err(err) = route.view.call(ctx).await {
            tracing::warn!(pattern = %route.pattern, error = %err, "View failed");
            (hooks.error)(ctx, &err, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    let mut first_error: Option<BoxError> = None;
    for middleware in &route.chain.after {
        if let Err(err) = middleware.call(ctx).await {
            tracing::warn!(middleware = middleware.name(), error = %err, "After middleware failed");
            first_error.get_or_insert(err);
        }
    }
    if let Some(err) = first_error {
        (hooks.error)(ctx, &err, StatusCode::INTERNAL_SERVER_ERROR);
    }
}

/// Run a not-found / method-not-allowed view with the same error and panic handling.
async fn run_hook(hooks: &Hooks, view: &View, mut ctx: RequestContext) -> Response<Body> {
    let outcome = AssertUnwindSafe(view.call(&mut ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => (hooks.error)(&mut ctx, &err, StatusCode::INTERNAL_SERVER_ERROR),
        Err(payload) => recover(hooks, &mut ctx, payload),
    }
    ctx.into_response()
}

fn recover(hooks: &Hooks, ctx: &mut RequestContext, payload: Box<dyn std::any::Any + Send>) {
    tracing::error!(
        method = %ctx.method(),
        path = %ctx.path(),
        panic = panic_message(payload.as_ref()),
        "Recovered panic while serving request"
    );
    metrics::record_panic();
    ctx.reset_response();
    (hooks.panic)(ctx, payload);
}
