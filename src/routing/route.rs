//! Route declarations.

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Response, StatusCode};

use crate::http::view::{Middleware, View};
use crate::routing::middleware::Middlewares;

/// Method a route answers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Method(Method),
    /// Every method not claimed by a more specific route on the same path.
    Any,
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Method(method)
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Method(m) => write!(f, "{}", m),
            RouteMethod::Any => f.write_str("ANY"),
        }
    }
}

/// Deadline for a route's pipeline and the response sent when it passes.
#[derive(Clone, Debug)]
pub struct RouteTimeout {
    pub duration: Duration,
    pub message: String,
    pub status: StatusCode,
}

impl RouteTimeout {
    pub fn response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.message.clone()));
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// A (method, pattern) binding to a view, with its own middlewares and an
/// optional timeout.
///
/// ```
/// use std::time::Duration;
/// use axum::http::{Method, StatusCode};
/// use futures_util::future::BoxFuture;
/// use switchyard::{RequestContext, Route, ViewResult};
///
/// fn slow(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
///     Box::pin(async move { ctx.text("done"); Ok(()) })
/// }
///
/// let route = Route::new(Method::GET, "/report", slow)
///     .timeout(Duration::from_secs(2), "report timed out", StatusCode::SERVICE_UNAVAILABLE);
/// assert_eq!(route.pattern(), "/report");
/// ```
#[derive(Clone, Debug)]
pub struct Route {
    pub(crate) method: RouteMethod,
    pub(crate) pattern: String,
    pub(crate) view: View,
    pub(crate) middlewares: Middlewares,
    pub(crate) timeout: Option<RouteTimeout>,
}

impl Route {
    pub fn new(method: impl Into<RouteMethod>, pattern: &str, view: impl Into<View>) -> Self {
        Self {
            method: method.into(),
            pattern: pattern.to_string(),
            view: view.into(),
            middlewares: Middlewares::default(),
            timeout: None,
        }
    }

    /// Route answering every method.
    pub fn any(pattern: &str, view: impl Into<View>) -> Self {
        Self::new(RouteMethod::Any, pattern, view)
    }

    pub fn use_before(mut self, middleware: impl Into<Middleware>) -> Self {
        self.middlewares.before.push(middleware.into());
        self
    }

    pub fn use_after(mut self, middleware: impl Into<Middleware>) -> Self {
        self.middlewares.after.push(middleware.into());
        self
    }

    pub fn skip(mut self, middleware: &Middleware) -> Self {
        self.middlewares.skip.push(middleware.clone());
        self
    }

    /// Replace the route's middlewares wholesale.
    pub fn middlewares(mut self, middlewares: Middlewares) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn timeout(mut self, duration: Duration, message: &str, status: StatusCode) -> Self {
        self.timeout = Some(RouteTimeout {
            duration,
            message: message.to_string(),
            status,
        });
        self
    }

    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    /// Pattern as declared, before the group prefix is applied.
    pub fn pattern(&self) -> &str {
        &self.pattern
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

    #[test]
    fn builder_collects_middlewares() {
        let auth = Middleware::named("auth", noop);
        let route = Route::new(Method::POST, "/items", noop)
            .use_before(auth.clone())
            .use_after(noop)
            .skip(&auth);

        assert_eq!(route.method(), &RouteMethod::Method(Method::POST));
        assert_eq!(route.middlewares.before.len(), 1);
        assert_eq!(route.middlewares.after.len(), 1);
        assert!(route.middlewares.skip[0].same_as(&auth));
    }

    #[tokio::test]
    async fn timeout_response_carries_status_and_message() {
        let route = Route::any("/slow", noop).timeout(
            Duration::from_millis(50),
            "too slow",
            StatusCode::GATEWAY_TIMEOUT,
        );
        let response = route.timeout.as_ref().unwrap().response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"too slow");
    }
}
