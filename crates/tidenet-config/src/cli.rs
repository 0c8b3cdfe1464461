//! Command-line argument parsing for the tidenet server.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::{Config, ConfigError};

/// tidenet server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "tidenet-server", about = "tidenet game server")]
pub struct CliArgs {
    /// Listening port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind (defaults to all interfaces).
    #[arg(long)]
    pub bind: Option<String>,

    /// Server ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Extra channel to accept, may be repeated.
    #[arg(long = "channel")]
    pub channels: Vec<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(ref bind) = args.bind {
            self.network.bind_address = bind.clone();
        }
        if let Some(rate) = args.tick_rate {
            self.server.tick_rate = rate;
        }
        for &channel in &args.channels {
            if !self.network.channels.contains(&channel) {
                self.network.channels.push(channel);
            }
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }

    /// Hot-reload for a config that had `args` applied at startup.
    ///
    /// The file is re-read and `args` applied on top before comparing, so
    /// an untouched file reports `None`.
    pub fn reload_with_overrides(
        &self,
        config_dir: &Path,
        args: &CliArgs,
    ) -> Result<Option<Self>, ConfigError> {
        let mut new_config = Self::read(config_dir)?;
        new_config.apply_cli_overrides(args);
        Ok(self.changed_to(new_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(4000),
            bind: Some("10.0.0.5".to_string()),
            channels: vec![0, 3],
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 4000);
        assert_eq!(config.network.bind_address, "10.0.0.5");
        assert_eq!(config.network.channels, vec![0, 3]);
        // Non-overridden fields retain defaults
        assert_eq!(config.server.tick_rate, 20);
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_reload_keeps_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            port: Some(4000),
            channels: vec![5],
            ..Default::default()
        };
        let mut config = Config::load_or_create(dir.path()).unwrap();
        config.apply_cli_overrides(&args);

        // untouched file
        assert!(config.reload_with_overrides(dir.path(), &args).unwrap().is_none());

        let mut on_disk = Config::load_or_create(dir.path()).unwrap();
        on_disk.server.tick_rate = 30;
        on_disk.save(dir.path()).unwrap();

        let updated = config
            .reload_with_overrides(dir.path(), &args)
            .unwrap()
            .unwrap();
        assert_eq!(updated.server.tick_rate, 30);
        assert_eq!(updated.network.port, 4000);
        assert_eq!(updated.network.channels, vec![0, 5]);
        assert!(updated.reload_with_overrides(dir.path(), &args).unwrap().is_none());
    }

    #[test]
    fn test_parse_from_args() {
        let args = CliArgs::parse_from([
            "tidenet-server",
            "--port",
            "1234",
            "--tick-rate",
            "64",
            "--channel",
            "7",
            "--channel",
            "8",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.port, Some(1234));
        assert_eq!(args.tick_rate, Some(64));
        assert_eq!(args.channels, vec![7, 8]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.config.is_none());
    }
}
