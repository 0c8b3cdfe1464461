//! OS-specific directories for the server.

use std::path::{Path, PathBuf};

use crate::ServerError;

const APP_NAME: &str = "tidenet";

/// Where the server keeps its config and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDirs {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Holds the JSON log file.
    pub log_dir: PathBuf,
}

impl ServerDirs {
    /// Resolve the platform config directory (XDG on Linux, Known Folders on
    /// Windows, Library on macOS).
    pub fn resolve() -> Result<Self, ServerError> {
        let base = dirs::config_dir().ok_or(ServerError::NoConfigDir)?;
        Ok(Self::resolve_with_root(&base))
    }

    /// Resolve directories under a custom base path.
    pub fn resolve_with_root(root: &Path) -> Self {
        Self::from_config_dir(root.join(APP_NAME))
    }

    /// Use `config_dir` as given, with logs beside the config file.
    pub fn from_config_dir(config_dir: PathBuf) -> Self {
        let log_dir = config_dir.join("logs");
        Self {
            config_dir,
            log_dir,
        }
    }
}
