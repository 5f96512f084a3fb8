//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → handed to App / ProcessSupervisor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; prefork workers re-read the same file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    Config, LimitsConfig, LogFormat, Network, ObservabilityConfig, ProcessConfig, ServerConfig,
    TlsConfig,
};
pub use validation::{validate_config, ValidationError};
