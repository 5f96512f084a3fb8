//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;

use switchyard::{App, Config, ProcessSupervisor, Role, ServerError, Shutdown};

/// A single-process server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to finish draining.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Config bound to an ephemeral loopback port with a short drain timeout.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.addr = "127.0.0.1:0".to_string();
    config.process.shutdown_timeout_secs = 2;
    config
}

/// Start `app` in single-process mode. The listener is bound when this
/// returns, so requests can be sent right away.
pub async fn start(app: App) -> TestServer {
    let mut supervisor = ProcessSupervisor::with_role(app, Role::Single);
    supervisor.start().await.expect("server failed to start");
    let addr = supervisor.local_addr().expect("tcp listener");
    let shutdown = supervisor.shutdown_handle();
    let task = tokio::spawn(supervisor.serve());
    TestServer {
        addr,
        shutdown,
        task,
    }
}

/// Reserve a free loopback port. The port is released before returning.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

/// Poll `url` until it answers or `timeout` passes.
pub async fn wait_until_ready(url: &str, timeout: Duration) -> bool {
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if client.get(url).send().await.is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
