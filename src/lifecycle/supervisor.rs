//! Process supervision: listener ownership, signals and the serve loop.
//!
//! # Data Flow
//! ```text
//! ProcessSupervisor::new(app)
//!     → start(): validate → freeze routes → bind / inherit listener
//!                → metrics exporter → signal task          [Listening]
//!     → serve(): single/worker: HttpServer until shutdown   [Draining]
//!                master: WorkerPool until shutdown
//!     → drained                                             [Stopped]
//! ```
//!
//! # Design Decisions
//! - The role (single, master, worker) is fixed at construction from the
//!   environment marker and `process.prefork`
//! - Workers always stop on SIGTERM, whatever signals are configured, so the
//!   master can stop them
//! - A prefork master freezes the routes too, so registration errors surface
//!   before any worker is spawned

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::app::App;
use crate::config::{validate_config, ConfigError, ProcessConfig};
use crate::http::dispatch::Dispatcher;
use crate::http::server::HttpServer;
use crate::lifecycle::prefork::{self, PreforkError, WorkerPool};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::{self, ShutdownSignal};
use crate::net::listener::{BindOptions, BoundListener, ListenerError};
use crate::observability::metrics;
use crate::routing::RouterError;

/// Error type for starting and running a server process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("route registration failed: {0}")]
    Router(#[from] RouterError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Prefork(#[from] PreforkError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(String),

    #[error("supervisor is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SupervisorState,
        actual: SupervisorState,
    },
}

/// What this process does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Binds and serves on its own.
    Single,
    /// Binds, spawns workers and serves nothing.
    Master,
    /// Serves on a socket inherited from (or shared with) the master.
    Worker,
}

impl Role {
    pub fn detect(process: &ProcessConfig) -> Self {
        if prefork::is_child() {
            Role::Worker
        } else if process.prefork {
            Role::Master
        } else {
            Role::Single
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Created,
    Listening,
    Draining,
    Stopped,
}

enum Prepared {
    Serve {
        listener: BoundListener,
        dispatcher: Dispatcher,
    },
    Master {
        listener_fd: Option<i32>,
        // Kept open so restarted workers inherit the same socket.
        listener: Option<BoundListener>,
    },
}

/// Stops a supervisor and observes its state from another task.
#[derive(Clone)]
pub struct SupervisorHandle {
    shutdown: Shutdown,
    state: watch::Receiver<SupervisorState>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Begin draining without waiting.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Begin draining and wait until the supervisor reports `Stopped`.
    /// Returns `false` if that did not happen within `timeout`, which is
    /// always the case when `serve` was never called.
    pub async fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown.trigger();
        let mut state = self.state.clone();
        let stopped = matches!(
            tokio::time::timeout(timeout, state.wait_for(|s| *s == SupervisorState::Stopped)).await,
            Ok(Ok(_))
        );
        stopped
    }
}

/// Owns one process's listener and lifecycle.
pub struct ProcessSupervisor {
    app: App,
    role: Role,
    shutdown: Shutdown,
    state: Arc<watch::Sender<SupervisorState>>,
    prepared: Option<Prepared>,
    local_addr: Option<SocketAddr>,
}

impl ProcessSupervisor {
    pub fn new(app: App) -> Self {
        let role = Role::detect(&app.config().process);
        Self::with_role(app, role)
    }

    pub fn with_role(app: App, role: Role) -> Self {
        let (state, _) = watch::channel(SupervisorState::Created);
        Self {
            app,
            role,
            shutdown: Shutdown::new(),
            state: Arc::new(state),
            prepared: None,
            local_addr: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Handle that stops this supervisor when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Begin draining, as if a shutdown signal had arrived. Returns at once;
    /// `serve` returns when draining is done. To block until then from
    /// another task, use [`SupervisorHandle::shutdown_and_wait`].
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Cloneable handle that outlives `serve` taking the supervisor.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            shutdown: self.shutdown.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Bound TCP address, once started. `None` for unix sockets and for a
    /// master that left binding to its workers.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Validate, freeze and open the listener. After this returns the
    /// process is accepting connections (or, for a master, ready to spawn).
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.expect_state(SupervisorState::Created)?;
        let config = self.app.config().clone();
        validate_config(&config).map_err(ConfigError::Validation)?;

        let dispatcher = self.app.freeze()?;
        let options = BindOptions::from_config(&config);
        let addr = config.server.addr.as_str();

        let prepared = match self.role {
            Role::Single => Prepared::Serve {
                listener: BoundListener::bind(addr, &options)?,
                dispatcher,
            },
            Role::Worker => {
                let listener = match prefork::inherited_fd() {
                    Some(fd) => inherit(fd)?,
                    None => BoundListener::bind(addr, &options)?,
                };
                prefork::watch_master(self.shutdown.clone());
                Prepared::Serve {
                    listener,
                    dispatcher,
                }
            }
            Role::Master => master_listener(addr, &options)?,
        };

        self.local_addr = match &prepared {
            Prepared::Serve { listener, .. } => listener.local_addr(),
            Prepared::Master { listener, .. } => {
                listener.as_ref().and_then(BoundListener::local_addr)
            }
        };

        if self.role != Role::Worker && config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_address
                .parse()
                .map_err(|e: std::net::AddrParseError| ServerError::Metrics(e.to_string()))?;
            metrics::init_metrics(addr).map_err(|e| ServerError::Metrics(e.to_string()))?;
        }

        self.install_signal_handlers(&config.process)?;

        tracing::info!(
            role = ?self.role,
            address = %config.server.addr,
            local_addr = ?self.local_addr,
            pid = std::process::id(),
            worker = ?prefork::worker_id(),
            "Server listening"
        );
        self.prepared = Some(prepared);
        self.state.send_replace(SupervisorState::Listening);
        Ok(())
    }

    /// Serve until shutdown, then drain. Returns once this process is done.
    pub async fn serve(mut self) -> Result<(), ServerError> {
        self.expect_state(SupervisorState::Listening)?;
        let prepared = self.prepared.take().ok_or(ServerError::InvalidState {
            expected: SupervisorState::Listening,
            actual: self.state(),
        })?;

        let draining = tokio::spawn({
            let shutdown = self.shutdown.clone();
            let state = Arc::clone(&self.state);
            async move {
                shutdown.wait().await;
                state.send_if_modified(|s| {
                    let listening = *s == SupervisorState::Listening;
                    if listening {
                        *s = SupervisorState::Draining;
                    }
                    listening
                });
            }
        });

        let config = self.app.config().clone();
        let result = match prepared {
            Prepared::Serve {
                listener,
                dispatcher,
            } => HttpServer::new(config, dispatcher)
                .serve(listener, self.shutdown.clone())
                .await
                .map_err(ServerError::from),
            Prepared::Master {
                listener_fd,
                listener: _held,
            } => match WorkerPool::for_current_exe(listener_fd) {
                Ok(pool) => prefork::run_master(&config.process, pool, self.shutdown.clone())
                    .await
                    .map_err(ServerError::from),
                Err(e) => Err(e.into()),
            },
        };

        // Releases the signal task when serving ended on its own.
        self.shutdown.trigger();
        let _ = draining.await;
        self.state.send_replace(SupervisorState::Stopped);

        match &result {
            Ok(()) => tracing::info!(role = ?self.role, "Shutdown complete"),
            Err(e) => tracing::error!(role = ?self.role, error = %e, "Server stopped with error"),
        }
        result
    }

    /// `start` followed by `serve`.
    pub async fn run(mut self) -> Result<(), ServerError> {
        self.start().await?;
        self.serve().await
    }

    fn install_signal_handlers(&self, process: &ProcessConfig) -> Result<(), ServerError> {
        let mut wanted = signals::parse_signals(&process.shutdown_signals);
        if self.role == Role::Worker && !wanted.contains(&ShutdownSignal::Terminate) {
            wanted.push(ShutdownSignal::Terminate);
        }
        let received = signals::wait_for_any(&wanted).map_err(ServerError::Signal)?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = received => {
                    tracing::info!(%signal, "Shutdown signal received");
                    shutdown.trigger();
                }
                _ = shutdown.wait() => {}
            }
        });
        Ok(())
    }

    fn expect_state(&self, expected: SupervisorState) -> Result<(), ServerError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState { expected, actual })
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn inherit(fd: i32) -> Result<BoundListener, ListenerError> {
    // SAFETY: the master passes the descriptor of its listening socket and
    // nothing else in this process has claimed it.
    unsafe { BoundListener::from_inherited(fd) }
}

#[cfg(not(unix))]
fn inherit(_fd: i32) -> Result<BoundListener, ListenerError> {
    Err(ListenerError::Unsupported("socket inheritance"))
}

#[cfg(unix)]
fn master_listener(addr: &str, options: &BindOptions) -> Result<Prepared, ListenerError> {
    let listener = BoundListener::bind(addr, options)?;
    let fd = listener.share_with_children()?;
    Ok(Prepared::Master {
        listener_fd: Some(fd),
        listener: Some(listener),
    })
}

// Without descriptor inheritance each worker binds its own port-reuse socket.
#[cfg(not(unix))]
fn master_listener(_addr: &str, _options: &BindOptions) -> Result<Prepared, ListenerError> {
    Ok(Prepared::Master {
        listener_fd: None,
        listener: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::future::BoxFuture;

    use crate::config::Config;
    use crate::http::context::RequestContext;
    use crate::http::view::ViewResult;

    fn hello(ctx: &mut RequestContext) -> BoxFuture<'_, ViewResult> {
        Box::pin(async move {
            ctx.text("hello");
            Ok(())
        })
    }

    fn local_config() -> Config {
        let mut config = Config::default();
        config.server.addr = "127.0.0.1:0".to_string();
        config.process.shutdown_timeout_secs = 1;
        config
    }

    #[test]
    fn role_without_marker() {
        let mut process = ProcessConfig::default();
        assert_eq!(Role::detect(&process), Role::Single);
        process.prefork = true;
        assert_eq!(Role::detect(&process), Role::Master);
    }

    #[tokio::test]
    async fn serves_then_stops_on_shutdown() {
        let app = App::new(local_config());
        app.get("/", hello).unwrap();
        let mut supervisor = ProcessSupervisor::with_role(app, Role::Single);
        let mut states = supervisor.subscribe_state();

        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Listening);
        let addr = supervisor.local_addr().unwrap();
        let handle = supervisor.shutdown_handle();
        let task = tokio::spawn(supervisor.serve());

        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello");

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        states.wait_for(|s| *s == SupervisorState::Stopped).await.unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_and_wait_blocks_until_stopped() {
        let app = App::new(local_config());
        app.get("/", hello).unwrap();
        let mut supervisor = ProcessSupervisor::with_role(app, Role::Single);
        supervisor.start().await.unwrap();
        let addr = supervisor.local_addr().unwrap();
        let handle = supervisor.handle();
        let task = tokio::spawn(supervisor.serve());

        assert_eq!(handle.state(), SupervisorState::Listening);
        assert!(handle.shutdown_and_wait(Duration::from_secs(5)).await);
        assert_eq!(handle.state(), SupervisorState::Stopped);
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_and_wait_times_out_without_serve() {
        let mut supervisor = ProcessSupervisor::with_role(App::new(local_config()), Role::Single);
        supervisor.start().await.unwrap();
        let handle = supervisor.handle();

        assert!(!handle.shutdown_and_wait(Duration::from_millis(50)).await);
        assert_eq!(handle.state(), SupervisorState::Listening);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut supervisor = ProcessSupervisor::with_role(App::new(local_config()), Role::Single);
        supervisor.start().await.unwrap();
        assert!(matches!(
            supervisor.start().await,
            Err(ServerError::InvalidState {
                expected: SupervisorState::Created,
                actual: SupervisorState::Listening,
            })
        ));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_binding() {
        let mut config = local_config();
        config.process.shutdown_signals = vec!["SIGNOPE".to_string()];
        let mut supervisor = ProcessSupervisor::with_role(App::new(config), Role::Single);

        assert!(matches!(
            supervisor.start().await,
            Err(ServerError::Config(ConfigError::Validation(_)))
        ));
        assert_eq!(supervisor.state(), SupervisorState::Created);
        assert!(supervisor.local_addr().is_none());
    }

    #[tokio::test]
    async fn conflicting_patterns_fail_start() {
        let app = App::new(local_config());
        app.get("/users/{id}", hello).unwrap();
        app.group("/users").unwrap().get("/{name}", hello).unwrap();

        let mut supervisor = ProcessSupervisor::with_role(app, Role::Single);
        assert!(matches!(
            supervisor.start().await,
            Err(ServerError::Router(RouterError::Conflict { .. }))
        ));
        assert_eq!(supervisor.state(), SupervisorState::Created);
    }
}
