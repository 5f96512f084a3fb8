//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Config (network, addr, reuse_port)
//!     → listener.rs (socket2 bind, or inherit from prefork master)
//!     → tls.rs (optional rustls config)
//!     → connection.rs (slot limit, state hook, drain tracking)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     New → Closed
//! ```
//!
//! # Design Decisions
//! - Connection slots are bounded; a full tracker makes accepting wait
//! - The drain waits on the tracker, not on the accept loop
//! - TLS wraps the tracked stream, so slots cover the handshake too

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnState, ConnectionId, ConnectionTracker, TrackedStream, TrackingAcceptor};
pub use listener::{BindOptions, BoundListener, ListenerError};
