//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the dispatcher in the edge layers (request ID, tracing, limits)
//! - Configure HTTP/1.1 options from config; HTTP/2 is negotiated automatically
//! - Serve a prepared listener (TCP, TLS or unix) until shutdown
//! - Drain in-flight connections on shutdown, bounded by the shutdown timeout
//!
//! # Design Decisions
//! - TCP and TLS go through axum-server so its `Handle` drives the drain
//! - Unix sockets use hyper-util directly with the same service stack
//! - Connection limits and state hooks live in the acceptor, not in layers

use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue};
use axum::Router as AxumRouter;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, LimitsConfig};
use crate::http::dispatch::Dispatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{ConnectionTracker, TrackingAcceptor};
use crate::net::listener::BoundListener;
use crate::net::tls::load_tls_config;

/// Smallest read buffer hyper accepts.
const MIN_READ_BUFFER: usize = 8192;

const X_REQUEST_ID: &str = "x-request-id";

/// HTTP server for one process.
pub struct HttpServer {
    router: AxumRouter,
    config: Config,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: Config, dispatcher: Dispatcher) -> Self {
        let tracker = ConnectionTracker::new(
            config.limits.max_connections,
            dispatcher.hooks().conn_state.clone(),
        );
        let router = Self::build_router(&config, dispatcher);
        Self {
            router,
            config,
            tracker,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &Config, dispatcher: Dispatcher) -> AxumRouter {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        let server_name = HeaderValue::from_str(&config.server.name)
            .unwrap_or_else(|_| HeaderValue::from_static("switchyard"));

        let mut router = AxumRouter::new()
            .fallback_service(dispatcher)
            .layer(RequestBodyLimitLayer::new(config.limits.max_request_body_size));
        if config.server.compress {
            router = router.layer(CompressionLayer::new());
        }
        router
            .layer(SetResponseHeaderLayer::if_not_present(header::SERVER, server_name))
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    pub async fn serve(self, listener: BoundListener, shutdown: Shutdown) -> std::io::Result<()> {
        match listener {
            BoundListener::Tcp(listener) => self.serve_tcp(listener, shutdown).await,
            #[cfg(unix)]
            BoundListener::Unix(listener, _socket_file) => self.serve_unix(listener, shutdown).await,
        }
    }

    async fn serve_tcp(
        self,
        listener: std::net::TcpListener,
        shutdown: Shutdown,
    ) -> std::io::Result<()> {
        let handle = axum_server::Handle::new();
        let drain = self.drain_timeout();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown.wait().await;
                tracing::info!(timeout = ?drain, "Stopping HTTP server");
                match drain {
                    Some(timeout) => handle.graceful_shutdown(Some(timeout)),
                    None => handle.shutdown(),
                }
            }
        });

        tracing::info!(
            address = %listener.local_addr()?,
            tls = self.config.tls.is_some(),
            "HTTP server starting"
        );

        let acceptor = TrackingAcceptor::new(self.tracker.clone());
        let service = self.router.into_make_service();
        match &self.config.tls {
            Some(tls) => {
                let rustls = load_tls_config(tls).await?;
                let mut server = axum_server::from_tcp(listener)
                    .acceptor(axum_server::tls_rustls::RustlsAcceptor::new(rustls).acceptor(acceptor))
                    .handle(handle);
                configure_http(server.http_builder(), &self.config.limits);
                server.serve(service).await?;
            }
            None => {
                let mut server = axum_server::from_tcp(listener)
                    .acceptor(acceptor)
                    .handle(handle);
                configure_http(server.http_builder(), &self.config.limits);
                server.serve(service).await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    #[cfg(unix)]
    async fn serve_unix(
        self,
        listener: std::os::unix::net::UnixListener,
        shutdown: Shutdown,
    ) -> std::io::Result<()> {
        use hyper_util::rt::TokioIo;
        use hyper_util::service::TowerToHyperService;

        use crate::net::connection::TrackedStream;

        let listener = tokio::net::UnixListener::from_std(listener)?;
        let mut builder = auto::Builder::new(TokioExecutor::new());
        configure_http(&mut builder, &self.config.limits);
        let drain = self.drain_timeout();

        tracing::info!("HTTP server starting on unix socket");
        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
                _ = shutdown.wait() => break,
            };

            let guard = self.tracker.track().await;
            let io = TokioIo::new(TrackedStream::new(stream, guard));
            let service = TowerToHyperService::new(self.router.clone());
            let builder = builder.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let conn = builder.serve_connection_with_upgrades(io, service);
                tokio::pin!(conn);
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(error = %e, "Connection error");
                        }
                    }
                    _ = shutdown.wait() => {
                        if drain.is_some() {
                            conn.as_mut().graceful_shutdown();
                            let _ = conn.await;
                        }
                    }
                }
            });
        }

        drop(listener);
        tracing::info!(timeout = ?drain, "Stopping HTTP server");
        if let Some(timeout) = drain {
            if tokio::time::timeout(timeout, self.tracker.wait_idle()).await.is_err() {
                tracing::warn!(
                    open = self.tracker.active_count(),
                    "Shutdown timeout reached with connections still open"
                );
            }
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn drain_timeout(&self) -> Option<Duration> {
        self.config
            .process
            .graceful_shutdown
            .then(|| self.config.process.shutdown_timeout())
    }
}

fn configure_http(builder: &mut auto::Builder<TokioExecutor>, limits: &LimitsConfig) {
    let mut http1 = builder.http1();
    http1
        .keep_alive(limits.keepalive)
        .max_buf_size(limits.read_buffer_size.max(MIN_READ_BUFFER))
        .timer(TokioTimer::new());
    if let Some(timeout) = limits.read_timeout() {
        http1.header_read_timeout(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use futures_util::future::BoxFuture;
    use tower::ServiceExt;

    use crate::http::context::RequestContext;
    use crate::http::view::ViewResult;
    use crate::App;

    fn echo_id(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
        Box::pin(async move {
            let id = ctx.request_id().unwrap_or_default().to_string();
            ctx.text(id);
            Ok(())
        })
    }

    fn router_for(config: Config) -> AxumRouter {
        let app = App::new(config.clone());
        app.get("/id", echo_id).unwrap();
        HttpServer::build_router(&config, app.freeze().unwrap())
    }

    #[tokio::test]
    async fn assigns_request_id_and_server_header() {
        let response = router_for(Config::default())
            .oneshot(Request::get("/id").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::SERVER], "switchyard");
        let header_id = response.headers()[X_REQUEST_ID].to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(header_id.as_bytes(), &body[..]);
        assert_eq!(header_id.len(), 36);
    }

    #[tokio::test]
    async fn keeps_client_request_id() {
        let response = router_for(Config::default())
            .oneshot(
                Request::get("/id")
                    .header(X_REQUEST_ID, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[X_REQUEST_ID], "abc-123");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let mut config = Config::default();
        config.limits.max_request_body_size = 8;
        let response = router_for(config)
            .oneshot(
                Request::post("/id")
                    .header(header::CONTENT_LENGTH, "32")
                    .body(Body::from(vec![b'x'; 32]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
