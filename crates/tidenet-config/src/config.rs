//! Configuration structs with server defaults and RON persistence.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name inside the config directory.
pub const CONFIG_FILE: &str = "config.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener and per-connection limits.
    pub network: NetworkConfig,
    /// Game loop settings.
    pub server: ServerConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listening port.
    pub port: u16,
    /// Exact address to bind. Empty binds all interfaces.
    pub bind_address: String,
    /// Prefer a dual-stack IPv6 socket when no address is given.
    pub dual_stack: bool,
    /// Listen backlog.
    pub backlog: i32,
    /// Maximum handshake bytes before the terminator.
    pub header_byte_limit: usize,
    /// Maximum buffered body bytes per connection.
    pub max_pending_packet: usize,
    /// Coalescing send buffer size per connection.
    pub coalesce_buffer_size: usize,
    /// Channels peers may select in their handshake.
    pub channels: Vec<u32>,
}

/// Game loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Ticks per second.
    pub tick_rate: u32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to a file in the log directory.
    pub log_to_file: bool,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 28010,
            bind_address: String::new(),
            dual_stack: true,
            backlog: 100,
            header_byte_limit: 10 * 1024,
            max_pending_packet: 10 * 1024 * 1024,
            coalesce_buffer_size: 1024,
            channels: vec![0],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { tick_rate: 20 }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl NetworkConfig {
    /// Parsed `bind_address`, or `None` to bind all interfaces.
    pub fn bind_ip(&self) -> Result<Option<IpAddr>, ConfigError> {
        let trimmed = self.bind_address.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse()
            .map(Some)
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                field: "network.bind_address",
                reason: format!("{trimmed:?}: {e}"),
            })
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    ///
    /// `self` must be the config as read from disk. A config with CLI
    /// overrides applied goes through [`Config::reload_with_overrides`].
    /// Listener settings only take effect on restart.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(config_dir)?;
        Ok(self.changed_to(new_config))
    }

    pub(crate) fn read(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }

    pub(crate) fn changed_to(&self, new_config: Self) -> Option<Self> {
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Some(new_config)
        } else {
            None
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.tick_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "server.tick_rate",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.network.coalesce_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "network.coalesce_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.network.max_pending_packet <= 4 {
            return Err(ConfigError::Invalid {
                field: "network.max_pending_packet",
                reason: "must leave room for a frame after the length prefix".to_string(),
            });
        }
        self.network.bind_ip()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("port: 28010"));
        assert!(ron_str.contains("tick_rate: 20"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(network: (port: 9000))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.channels, vec![0]);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let ron_str = "(future_setting: true)";
        let result: Result<Config, _> = ron::from_str(ron_str);
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.port = 31000;
        config.network.channels = vec![0, 4, 9];
        config.server.tick_rate = 30;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("tidenet");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.server.tick_rate = 60;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.map(|c| c.server.tick_rate), Some(60));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_bind_ip_parsing() {
        let mut network = NetworkConfig::default();
        assert_eq!(network.bind_ip().unwrap(), None);

        network.bind_address = "127.0.0.1".to_string();
        assert_eq!(network.bind_ip().unwrap(), Some("127.0.0.1".parse().unwrap()));

        network.bind_address = " ::1 ".to_string();
        assert_eq!(network.bind_ip().unwrap(), Some("::1".parse().unwrap()));

        network.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            network.bind_ip(),
            Err(ConfigError::Invalid { field: "network.bind_address", .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.server.tick_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.max_pending_packet = 4;
        assert!(config.validate().is_err());
    }
}
