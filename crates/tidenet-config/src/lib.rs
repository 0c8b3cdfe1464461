//! Configuration for the tidenet server.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. Every section uses `#[serde(default)]`, so older and newer
//! files both load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CONFIG_FILE, Config, DebugConfig, NetworkConfig, ServerConfig};
pub use error::ConfigError;
