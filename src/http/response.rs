//! Default responses for routing outcomes, errors and panics.
//!
//! # Design Decisions
//! - Plain text bodies; applications that want richer pages install hooks
//! - Panic payloads are logged, never echoed to the client

use std::any::Any;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::http::context::RequestContext;
use crate::http::view::{BoxError, ErrorView, PanicView, View, ViewResult};

fn not_found(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        ctx.error("Not Found", StatusCode::NOT_FOUND);
        Ok(())
    })
}

fn method_not_allowed(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
    Box::pin(async move {
        let allow = ctx.response_headers().get(axum::http::header::ALLOW).cloned();
        ctx.error("Method Not Allowed", StatusCode::METHOD_NOT_ALLOWED);
        if let Some(allow) = allow {
            ctx.set_header(axum::http::header::ALLOW, allow);
        }
        Ok(())
    })
}

pub fn default_not_found() -> View {
    View::new(not_found)
}

pub fn default_method_not_allowed() -> View {
    View::new(method_not_allowed)
}

pub fn default_error_view() -> ErrorView {
    Arc::new(|ctx: &mut RequestContext, err: &BoxError, status: StatusCode| {
        ctx.error(err.to_string(), status);
    })
}

pub fn default_panic_view() -> PanicView {
    Arc::new(|ctx: &mut RequestContext, _payload: Box<dyn Any + Send>| {
        ctx.error("Internal Server Error", StatusCode::INTERNAL_SERVER_ERROR);
    })
}

/// Best-effort text of a panic payload, for logs.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
