//! Configuration module for the threadbank server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the bank server
#[derive(Parser, Debug, Default)]
#[command(name = "threadbank")]
#[command(version = "0.1.0")]
#[command(about = "A multi-desk bank transaction server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Public dispatcher address (e.g., 127.0.0.1:7878)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of desks in the pool
    #[arg(short = 'd', long)]
    pub desks: Option<usize>,

    /// Interface the desks bind to
    #[arg(long)]
    pub desk_host: Option<String>,

    /// First desk port; desk N binds base + N (ephemeral ports if unset)
    #[arg(long)]
    pub desk_base_port: Option<u16>,

    /// Ledger file
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Transaction journal file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Public dispatcher address
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of desks
    #[serde(default = "default_desks")]
    pub desks: usize,
    /// Interface the desks bind to
    #[serde(default = "default_desk_host")]
    pub desk_host: String,
    /// First desk port
    pub desk_base_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            desks: default_desks(),
            desk_host: default_desk_host(),
            desk_base_port: None,
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Ledger file
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger: default_ledger(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Transaction journal file
    #[serde(default = "default_journal")]
    pub journal: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            journal: default_journal(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_desks() -> usize {
    10
}

fn default_desk_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ledger() -> PathBuf {
    PathBuf::from("account_details.txt")
}

fn default_journal() -> PathBuf {
    PathBuf::from("log.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub desks: usize,
    pub desk_host: IpAddr,
    pub desk_base_port: Option<u16>,
    pub ledger_path: PathBuf,
    pub journal_path: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge already-parsed CLI args with the TOML file they name.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let desks = cli.desks.unwrap_or(toml_config.server.desks);
        if desks == 0 {
            return Err(ConfigError::NoDesks);
        }

        let desk_host = cli.desk_host.unwrap_or(toml_config.server.desk_host);
        let desk_host = desk_host
            .parse()
            .map_err(|_| ConfigError::InvalidDeskHost(desk_host.clone()))?;

        let desk_base_port = cli.desk_base_port.or(toml_config.server.desk_base_port);
        if let Some(base) = desk_base_port {
            let last = u16::try_from(desks - 1)
                .ok()
                .and_then(|offset| base.checked_add(offset));
            if last.is_none() {
                return Err(ConfigError::DeskPortRange { base, desks });
            }
        }

        Ok(Config {
            listen,
            desks,
            desk_host,
            desk_base_port,
            ledger_path: cli.ledger.unwrap_or(toml_config.storage.ledger),
            journal_path: cli.journal.unwrap_or(toml_config.logging.journal),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Address desk `index` binds to.
    ///
    /// `merge` has checked that every index below `desks` fits in a port.
    pub fn desk_addr(&self, index: usize) -> SocketAddr {
        let port = self.desk_base_port.map_or(0, |base| {
            u16::try_from(index)
                .ok()
                .and_then(|offset| base.checked_add(offset))
                .unwrap_or(u16::MAX)
        });
        SocketAddr::new(self.desk_host, port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),

    #[error("Invalid desk host '{0}'")]
    InvalidDeskHost(String),

    #[error("At least one desk is required")]
    NoDesks,

    #[error("{desks} desks starting at port {base} run past port 65535")]
    DeskPortRange { base: u16, desks: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7878");
        assert_eq!(config.server.desks, 10);
        assert_eq!(config.storage.ledger, PathBuf::from("account_details.txt"));
        assert_eq!(config.logging.journal, PathBuf::from("log.txt"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            desks = 4
            desk_base_port = 9100

            [storage]
            ledger = "/var/lib/bank/accounts.txt"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.desks, 4);
        assert_eq!(config.server.desk_host, "127.0.0.1");
        assert_eq!(config.server.desk_base_port, Some(9100));
        assert_eq!(
            config.storage.ledger,
            PathBuf::from("/var/lib/bank/accounts.txt")
        );
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.journal, PathBuf::from("log.txt"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            desks = 4
            [logging]
            level = "warn"
        "#,
        )
        .unwrap();
        let cli = CliArgs {
            desks: Some(2),
            listen: Some("127.0.0.1:0".to_string()),
            ..Default::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.desks, 2);
        assert_eq!(config.listen, "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_resolve_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.toml");
        std::fs::write(&path, "[server]\ndesks = 3\n").unwrap();

        let config = Config::resolve(CliArgs {
            config: Some(path),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.desks, 3);
        assert_eq!(config.listen, "127.0.0.1:7878".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        let cli = CliArgs {
            desks: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::NoDesks)
        ));

        let cli = CliArgs {
            listen: Some("not an address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidListen(_))
        ));

        let cli = CliArgs {
            desk_host: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidDeskHost(_))
        ));
    }

    #[test]
    fn test_desk_ports_must_fit() {
        let cli = CliArgs {
            desks: Some(10),
            desk_base_port: Some(65530),
            ..Default::default()
        };
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::DeskPortRange { base: 65530, desks: 10 })
        ));

        let cli = CliArgs {
            desks: Some(6),
            desk_base_port: Some(65530),
            ..Default::default()
        };
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        assert_eq!(config.desk_addr(5).port(), 65535);
    }

    #[test]
    fn test_desk_addr() {
        let mut config = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.desk_addr(3), "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        config.desk_base_port = Some(9100);
        assert_eq!(config.desk_addr(3), "127.0.0.1:9103".parse::<SocketAddr>().unwrap());

        config.desk_host = "::1".parse().unwrap();
        assert_eq!(config.desk_addr(0), "[::1]:9100".parse::<SocketAddr>().unwrap());
    }
}
