//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listening address and HTTP behaviour.
    pub server: ServerConfig,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Prefork, port reuse and shutdown.
    pub process: ProcessConfig,

    /// Connection and request limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Socket family to listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// IPv4 or IPv6, whichever the address is.
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
    /// Unix domain socket; `addr` is a filesystem path.
    Unix,
}

impl Network {
    pub fn is_tcp(&self) -> bool {
        !matches!(self, Network::Unix)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000"), or a socket path for unix.
    pub addr: String,

    /// Value of the `Server` response header.
    pub name: String,

    pub network: Network,

    /// Answer OPTIONS automatically for every registered path.
    pub handle_options: bool,

    /// Gzip responses when the client accepts it.
    pub compress: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            name: "switchyard".to_string(),
            network: Network::Tcp,
            handle_options: true,
            compress: false,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Run one worker process per CPU sharing the listening socket.
    pub prefork: bool,

    /// Worker count; 0 means one per logical CPU.
    pub prefork_workers: usize,

    /// Worker crashes tolerated before the master gives up; 0 means half the workers.
    pub prefork_recover_threshold: usize,

    /// Set `SO_REUSEPORT` on the listening socket.
    pub reuse_port: bool,

    /// Drain in-flight requests on shutdown signals.
    pub graceful_shutdown: bool,

    /// Signals that start a shutdown.
    pub shutdown_signals: Vec<String>,

    /// Maximum time to wait for in-flight requests when draining.
    pub shutdown_timeout_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            prefork: false,
            prefork_workers: 0,
            prefork_recover_threshold: 0,
            reuse_port: false,
            graceful_shutdown: true,
            shutdown_signals: vec!["SIGINT".to_string(), "SIGTERM".to_string()],
            shutdown_timeout_secs: 30,
        }
    }
}

impl ProcessConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Effective worker count.
    pub fn workers(&self) -> usize {
        if self.prefork_workers > 0 {
            return self.prefork_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Effective crash budget for the given worker count.
    pub fn recover_threshold(&self, workers: usize) -> usize {
        if self.prefork_recover_threshold > 0 {
            self.prefork_recover_threshold
        } else {
            (workers / 2).max(1)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Requests dispatched at once; extra requests wait.
    pub concurrency: usize,

    /// Open connections per process (backpressure).
    pub max_connections: usize,

    /// Maximum request body size in bytes.
    pub max_request_body_size: usize,

    /// Per-connection read buffer in bytes.
    pub read_buffer_size: usize,

    /// Time allowed to receive request headers, in milliseconds. 0 disables it.
    pub read_timeout_ms: u64,

    /// HTTP keep-alive.
    pub keepalive: bool,

    /// TCP keep-alive probes on accepted sockets.
    pub tcp_keepalive: bool,

    pub tcp_keepalive_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            concurrency: 256 * 1024,
            max_connections: 10_000,
            max_request_body_size: 4 * 1024 * 1024,
            read_buffer_size: 16 * 1024,
            read_timeout_ms: 0,
            keepalive: true,
            tcp_keepalive: false,
            tcp_keepalive_secs: 60,
        }
    }
}

impl LimitsConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: Config = toml::from_str("[server]\naddr = \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:9000");
        assert_eq!(config.server.network, Network::Tcp);
        assert!(config.process.graceful_shutdown);
        assert_eq!(config.process.shutdown_signals, ["SIGINT", "SIGTERM"]);
        assert!(config.tls.is_none());
    }

    #[test]
    fn network_and_format_parse_lowercase() {
        let config: Config = toml::from_str(
            "[server]\nnetwork = \"unix\"\naddr = \"/tmp/s.sock\"\n[observability]\nlog_format = \"json\"\n",
        )
        .unwrap();
        assert_eq!(config.server.network, Network::Unix);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn worker_defaults() {
        let process = ProcessConfig {
            prefork_workers: 4,
            ..ProcessConfig::default()
        };
        assert_eq!(process.workers(), 4);
        assert_eq!(process.recover_threshold(4), 2);
        assert_eq!(process.recover_threshold(1), 1);
        assert!(ProcessConfig::default().workers() >= 1);
    }
}
