//! Persistence: the TOML configuration file.

pub mod config;

pub use config::{load_config, BridgeSection, ConfigError, FileConfig};
