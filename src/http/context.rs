//! Per-request context handed to views and middlewares.
//!
//! # Responsibilities
//! - Expose the parsed request (method, uri, headers, body, path params)
//! - Accumulate the response (status, headers, body)
//! - Carry the chain-control flags (`should_continue`, `skip_view`)
//! - Carry the timeout flag shared with the dispatcher
//!
//! # Design Decisions
//! - Owned by the task serving the request; never cloned
//! - The timeout flag is the only state shared across tasks, so it is atomic
//! - Once the flag is set every response write is silently ignored

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{
    header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, Response,
    StatusCode, Uri, Version,
};
use serde::Serialize;

use crate::http::view::BoxError;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Request/response state for a single request.
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: Option<Body>,
    params: Vec<(String, String)>,
    values: Extensions,

    status: StatusCode,
    response_headers: HeaderMap,
    response_body: Body,

    should_continue: bool,
    skip_view: bool,
    timed_out: Arc<AtomicBool>,
}

impl RequestContext {
    /// Wrap an incoming request.
    pub fn from_request(request: Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body: Some(body),
            params: Vec::new(),
            values: Extensions::new(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: Body::empty(),
            should_continue: true,
            skip_view: false,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Request extensions set by outer layers.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Value of the `x-request-id` header assigned at the edge.
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
    }

    /// Host the request was sent to, without port, lowercased.
    pub fn host(&self) -> Option<String> {
        let raw = self
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))?;
        Some(strip_port(raw).to_ascii_lowercase())
    }

    /// Path parameter extracted by the matched pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// Take the request body. Returns `None` if it was already taken.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Read the whole request body. Size limits are enforced before dispatch.
    pub async fn body_bytes(&mut self) -> Result<Bytes, BoxError> {
        match self.body.take() {
            Some(body) => Ok(axum::body::to_bytes(body, usize::MAX).await?),
            None => Ok(Bytes::new()),
        }
    }

    /// Store a per-request value, keyed by its type.
    pub fn set_value<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(value);
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    // --- chain control ---

    /// Stop the remaining before-middlewares and the view. After-middlewares still run.
    pub fn stop(&mut self) {
        self.should_continue = false;
    }

    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    /// Skip the route's view while still running the rest of the chain.
    pub fn skip_view(&mut self) {
        self.skip_view = true;
    }

    pub fn view_skipped(&self) -> bool {
        self.skip_view
    }

    pub(crate) fn reset_continue(&mut self) {
        self.should_continue = true;
    }

    // --- timeout ---

    /// True once the route timeout fired. Writes are ignored from then on.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub(crate) fn timeout_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.timed_out)
    }

    // --- response ---

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.timed_out() {
            return;
        }
        self.status = status;
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if self.timed_out() {
            return;
        }
        self.response_headers.insert(name, value);
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        if self.timed_out() {
            return;
        }
        self.response_body = body.into();
    }

    /// Plain text response with the current status.
    pub fn text(&mut self, body: impl Into<String>) {
        self.set_header(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        self.set_body(body.into());
    }

    /// JSON response with the current status.
    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<(), BoxError> {
        let bytes = serde_json::to_vec(value)?;
        self.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static(APPLICATION_JSON),
        );
        self.set_body(bytes);
        Ok(())
    }

    /// Replace the response with a status and plain text message.
    pub fn error(&mut self, message: impl Into<String>, status: StatusCode) {
        if self.timed_out() {
            return;
        }
        self.response_headers.clear();
        self.set_status(status);
        self.text(message);
    }

    /// Drop whatever response was built so far.
    pub(crate) fn reset_response(&mut self) {
        self.status = StatusCode::OK;
        self.response_headers.clear();
        self.response_body = Body::empty();
    }

    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(self.response_body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.response_headers;
        response
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("params", &self.params)
            .field("status", &self.status)
            .field("should_continue", &self.should_continue)
            .field("skip_view", &self.skip_view)
            .finish()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:8080
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(uri: &str) -> RequestContext {
        let request = Request::builder()
            .uri(uri)
            .header(header::HOST, "Example.COM:8080")
            .body(Body::from("payload"))
            .unwrap();
        RequestContext::from_request(request)
    }

    #[test]
    fn host_strips_port_and_case() {
        assert_eq!(ctx("/").host().as_deref(), Some("example.com"));
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("localhost"), "localhost");
    }

    #[test]
    fn params_lookup() {
        let mut c = ctx("/users/42");
        c.set_params(vec![("id".into(), "42".into())]);
        assert_eq!(c.param("id"), Some("42"));
        assert_eq!(c.param("name"), None);
    }

    #[test]
    fn writes_after_timeout_are_ignored() {
        let mut c = ctx("/");
        c.set_status(StatusCode::CREATED);
        c.timeout_flag().store(true, Ordering::Release);

        c.set_status(StatusCode::ACCEPTED);
        c.text("late");
        c.error("late", StatusCode::BAD_REQUEST);

        assert!(c.timed_out());
        assert_eq!(c.status(), StatusCode::CREATED);
        assert!(c.response_headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn user_values_by_type() {
        #[derive(Clone, Debug, PartialEq)]
        struct User(&'static str);

        let mut c = ctx("/");
        c.set_value(User("ada"));
        assert_eq!(c.value::<User>(), Some(&User("ada")));
    }

    #[tokio::test]
    async fn body_is_read_once() {
        let mut c = ctx("/");
        assert_eq!(c.body_bytes().await.unwrap(), Bytes::from("payload"));
        assert!(c.body_bytes().await.unwrap().is_empty());
    }
}
