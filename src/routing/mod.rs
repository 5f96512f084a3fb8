//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (startup):
//!     Router::group / Router::add
//!     → router.rs (arena of scopes, duplicate detection)
//!
//! Freeze (once):
//!     walk tree → compose middlewares per route (middleware.rs)
//!     → insert full patterns into per-method radix trees (table.rs)
//!     → mark every scope immutable
//!
//! Request:
//!     (method, path) → RouteTable::resolve
//!     → Matched(endpoint, params) | NotFound | MethodNotAllowed(allow)
//! ```
//!
//! # Design Decisions
//! - Registration mistakes are startup errors, never request-time errors
//! - Duplicate (method, full pattern) is rejected; no precedence rules
//! - Table is immutable after freeze (shared without locks)

pub mod middleware;
pub mod route;
pub mod router;
pub mod table;

pub use middleware::{compose, ComposedChain, Middlewares};
pub use route::{Route, RouteMethod, RouteTimeout};
pub use router::Router;
pub use table::{CompiledRoute, Resolution, RouteTable};

/// Route registration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route pattern must not be empty")]
    EmptyPattern,

    #[error("route pattern {0:?} must start with '/'")]
    InvalidPattern(String),

    #[error("route {method} {pattern} is already registered")]
    DuplicateRoute { method: String, pattern: String },

    #[error("router is frozen; routes and groups can no longer be added")]
    Frozen,

    #[error("route {method} {pattern} conflicts with an existing route: {reason}")]
    Conflict {
        method: String,
        pattern: String,
        reason: String,
    },
}
