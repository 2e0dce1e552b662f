//! Configuration utilities.

/// TOML configuration loading, validation and hot reload.
pub mod toml_config;

pub use toml_config::{ConfigManager, MarketScoutConfig};
