//! Listening socket creation.
//!
//! # Responsibilities
//! - Bind TCP (v4/v6/dual) and unix sockets from config
//! - Apply socket options (`SO_REUSEADDR`, `SO_REUSEPORT`, keep-alive, v6-only)
//! - Hand a bound socket to a child process and take it back there
//!
//! # Design Decisions
//! - Sockets are built with socket2 so options are set before `bind`
//! - Listeners are returned as std types; the server converts them
//!   inside the runtime that serves them
//! - Stale unix socket files are removed before binding and on drop

use std::net::{SocketAddr, TcpListener};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

use crate::config::{Config, Network};

const BACKLOG: i32 = 1024;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid {network} address {addr:?}")]
    InvalidAddress { addr: String, network: Network },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to inherit listening socket: {0}")]
    Inherit(std::io::Error),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// A bound, non-blocking listening socket.
#[derive(Debug)]
pub enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, UnixSocketFile),
}

/// Removes the socket file when the listener goes away.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixSocketFile(PathBuf);

#[cfg(unix)]
impl Drop for UnixSocketFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Socket options applied at bind time.
#[derive(Debug, Clone)]
pub struct BindOptions {
    pub network: Network,
    pub reuse_port: bool,
    pub tcp_keepalive: Option<Duration>,
}

impl BindOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            network: config.server.network,
            reuse_port: config.process.reuse_port,
            tcp_keepalive: config
                .limits
                .tcp_keepalive
                .then(|| Duration::from_secs(config.limits.tcp_keepalive_secs)),
        }
    }
}

impl BoundListener {
    /// Bind the address in `addr` according to `options`.
    pub fn bind(addr: &str, options: &BindOptions) -> Result<Self, ListenerError> {
        match options.network {
            Network::Unix => Self::bind_unix(addr),
            network => {
                let socket_addr: SocketAddr =
                    addr.parse().map_err(|_| ListenerError::InvalidAddress {
                        addr: addr.to_string(),
                        network,
                    })?;
                let family_ok = match network {
                    Network::Tcp4 => socket_addr.is_ipv4(),
                    Network::Tcp6 => socket_addr.is_ipv6(),
                    _ => true,
                };
                if !family_ok {
                    return Err(ListenerError::InvalidAddress {
                        addr: addr.to_string(),
                        network,
                    });
                }
                let listener = bind_tcp(socket_addr, options).map_err(|source| ListenerError::Bind {
                    addr: addr.to_string(),
                    source,
                })?;
                tracing::info!(
                    address = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
                    network = %network,
                    reuse_port = options.reuse_port,
                    "Listener bound"
                );
                Ok(BoundListener::Tcp(listener))
            }
        }
    }

    #[cfg(unix)]
    fn bind_unix(path: &str) -> Result<Self, ListenerError> {
        use std::os::unix::fs::PermissionsExt;

        let bind_err = |source| ListenerError::Bind {
            addr: path.to_string(),
            source,
        };
        let file = Path::new(path);
        if file.exists() {
            std::fs::remove_file(file).map_err(bind_err)?;
        }
        let listener = UnixListener::bind(file).map_err(bind_err)?;
        let guard = UnixSocketFile(file.to_path_buf());
        std::fs::set_permissions(file, std::fs::Permissions::from_mode(0o666)).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        tracing::info!(path = %path, "Unix listener bound");
        Ok(BoundListener::Unix(listener, guard))
    }

    #[cfg(not(unix))]
    fn bind_unix(_path: &str) -> Result<Self, ListenerError> {
        Err(ListenerError::Unsupported("unix sockets"))
    }

    /// Local TCP address, if this is a TCP listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            BoundListener::Tcp(l) => l.local_addr().ok(),
            #[cfg(unix)]
            BoundListener::Unix(..) => None,
        }
    }

    /// Clear close-on-exec so a spawned child inherits the socket, and
    /// return the descriptor number to pass along.
    #[cfg(unix)]
    pub fn share_with_children(&self) -> Result<i32, ListenerError> {
        use std::os::unix::io::AsRawFd;

        match self {
            BoundListener::Tcp(l) => {
                SockRef::from(l)
                    .set_cloexec(false)
                    .map_err(ListenerError::Inherit)?;
                Ok(l.as_raw_fd())
            }
            BoundListener::Unix(..) => Err(ListenerError::Unsupported("sharing unix sockets")),
        }
    }

    #[cfg(not(unix))]
    pub fn share_with_children(&self) -> Result<i32, ListenerError> {
        Err(ListenerError::Unsupported("socket inheritance"))
    }

    /// Take ownership of a TCP listening socket inherited from the parent.
    ///
    /// # Safety
    /// `fd` must be an open listening TCP socket owned by nothing else in
    /// this process.
    #[cfg(unix)]
    pub unsafe fn from_inherited(fd: i32) -> Result<Self, ListenerError> {
        use std::os::unix::io::FromRawFd;

        let listener = TcpListener::from_raw_fd(fd);
        let sock = SockRef::from(&listener);
        // Fail early on a descriptor that is not a listening socket.
        sock.local_addr().map_err(ListenerError::Inherit)?;
        sock.set_cloexec(true).map_err(ListenerError::Inherit)?;
        listener
            .set_nonblocking(true)
            .map_err(ListenerError::Inherit)?;
        Ok(BoundListener::Tcp(listener))
    }
}

fn bind_tcp(addr: SocketAddr, options: &BindOptions) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    if options.reuse_port {
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;
        #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
        tracing::warn!("SO_REUSEPORT is not available on this platform; ignoring reuse_port");
    }
    if options.network == Network::Tcp6 {
        socket.set_only_v6(true)?;
    }
    if let Some(time) = options.tcp_keepalive {
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}
