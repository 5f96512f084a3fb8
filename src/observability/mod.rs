//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     logging.rs (subscriber: env filter → pretty or JSON fmt layer)
//!     metrics.rs (Prometheus exporter, single/master processes only)
//!
//! Per request / connection / worker:
//!     dispatcher, tracker and master record switchyard_* metrics
//!     TraceLayer logs each request with its x-request-id span
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metric calls are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
