//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, known signal names)
//! - Reject combinations the process layer cannot serve
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{Config, Network};
use crate::lifecycle::signals::parse_signal;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server.addr must not be empty")]
    EmptyAddress,

    #[error("server.addr {addr:?} is not a valid {network} address")]
    InvalidAddress { addr: String, network: Network },

    #[error("TLS is not supported on unix sockets")]
    TlsOnUnixSocket,

    #[error("prefork is not supported on unix sockets")]
    PreforkOnUnixSocket,

    #[error("prefork requires process.reuse_port on this platform")]
    PreforkWithoutReusePort,

    #[error("unknown shutdown signal {0:?}")]
    UnknownSignal(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let server = &config.server;

    if server.addr.is_empty() {
        errors.push(ValidationError::EmptyAddress);
    } else if server.network.is_tcp() {
        match server.addr.parse::<SocketAddr>() {
            Ok(addr) => {
                let family_ok = match server.network {
                    Network::Tcp4 => addr.is_ipv4(),
                    Network::Tcp6 => addr.is_ipv6(),
                    _ => true,
                };
                if !family_ok {
                    errors.push(ValidationError::InvalidAddress {
                        addr: server.addr.clone(),
                        network: server.network,
                    });
                }
            }
            Err(_) => errors.push(ValidationError::InvalidAddress {
                addr: server.addr.clone(),
                network: server.network,
            }),
        }
    }

    if server.network == Network::Unix {
        if config.tls.is_some() {
            errors.push(ValidationError::TlsOnUnixSocket);
        }
        if config.process.prefork {
            errors.push(ValidationError::PreforkOnUnixSocket);
        }
    }

    if config.process.prefork && !cfg!(unix) && !config.process.reuse_port {
        errors.push(ValidationError::PreforkWithoutReusePort);
    }

    for name in &config.process.shutdown_signals {
        if parse_signal(name).is_none() {
            errors.push(ValidationError::UnknownSignal(name.clone()));
        }
    }

    let limits = &config.limits;
    for (value, field) in [
        (limits.concurrency, "limits.concurrency"),
        (limits.max_connections, "limits.max_connections"),
        (limits.max_request_body_size, "limits.max_request_body_size"),
        (limits.read_buffer_size, "limits.read_buffer_size"),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
