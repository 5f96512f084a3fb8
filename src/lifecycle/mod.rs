//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (supervisor.rs):
//!     Validate config → Freeze routes → Bind or inherit listener → Listening
//!
//! Prefork (prefork.rs):
//!     Master: share socket → spawn workers → restart crashed ones
//!     Worker: inherited socket → serve like a single process
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     Configured signal or shutdown() → Stop accepting → Drain → Stopped
//! ```
//!
//! # Design Decisions
//! - Registration and bind errors are fatal before any traffic is accepted
//! - Shutdown has a timeout: connections still open after it are dropped
//! - A master forwards SIGTERM to its workers and waits for them

pub mod prefork;
pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use signals::ShutdownSignal;
pub use supervisor::{ProcessSupervisor, Role, ServerError, SupervisorHandle, SupervisorState};
