//! Resilience helpers.
//!
//! # Design Decisions
//! - Crashed prefork workers are restarted with exponential backoff and
//!   jitter so a crash loop does not spin the master
//! - Restarts are bounded by the recover threshold (see `lifecycle::prefork`)

pub mod backoff;

pub use backoff::calculate_backoff;
