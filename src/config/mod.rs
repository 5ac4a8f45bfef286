//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → EngineConfig (validated, immutable)
//!     → policy_for(target) resolves [defaults] + [targets.<name>]
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the engine copies what it needs
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AggregateConfig, EngineConfig, GatewayConfig, ObservabilityConfig, PolicyConfig,
    PolicyOverrides,
};
pub use validation::{validate_config, ValidationError};
