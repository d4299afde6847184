//! Relay configuration.
//!
//! Every setting is resolved from, in order of precedence:
//! CLI flag (or its `ROOMCAST_*` environment variable), the TOML config
//! file, then the compiled default. The file lives at
//! `<config_dir>/roomcast/config.toml` unless `--config` names another one:
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:5000"
//! max_frame_size = 65536
//! outbox_capacity = 1024
//!
//! [log]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};

use crate::server::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_OUTBOX_CAPACITY};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unexpected keys.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A setting resolved to a value the relay cannot run with.
    #[error("invalid {setting}: {reason}")]
    Invalid {
        /// Name of the setting.
        setting: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Roomcast relay server")]
pub struct RelayCliArgs {
    /// Address to listen on.
    #[arg(short, long, env = "ROOMCAST_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of `<config_dir>/roomcast/config.toml`.
    #[arg(short, long, env = "ROOMCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Largest inbound frame accepted, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Frames a connection may have queued before it is evicted.
    #[arg(long)]
    pub outbox_capacity: Option<usize>,

    /// Log filter (trace, debug, info, warn, error or an `EnvFilter`
    /// directive).
    #[arg(long, env = "ROOMCAST_LOG")]
    pub log_level: Option<String>,
}

/// On-disk layout of the config file. Absent keys leave the lower layer
/// in place.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    server: ServerSection,
    log: LogSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
    outbox_capacity: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
}

impl ConfigFile {
    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("roomcast").join("config.toml"))
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads a file that must exist.
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Reads the default file, treating a missing one as empty.
    fn read_default() -> Result<Self, ConfigError> {
        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        match Self::read(&path) {
            Err(ConfigError::ReadFile { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(Self::default())
            }
            other => other,
        }
    }
}

/// Fully resolved relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to listen on (e.g., `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_size: usize,
    /// Frames a connection may have queued before it is evicted.
    pub outbox_capacity: usize,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Resolves the configuration for `cli`.
    ///
    /// An explicit `--config` file must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or a
    /// resolved value is out of range.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => ConfigFile::read(path)?,
            None => ConfigFile::read_default()?,
        };
        let config = Self::default().overlay_file(file).overlay_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn overlay_file(mut self, file: ConfigFile) -> Self {
        let ConfigFile { server, log } = file;
        if let Some(bind_addr) = server.bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(size) = server.max_frame_size {
            self.max_frame_size = size;
        }
        if let Some(capacity) = server.outbox_capacity {
            self.outbox_capacity = capacity;
        }
        if let Some(level) = log.level {
            self.log_level = level;
        }
        self
    }

    fn overlay_cli(mut self, cli: &RelayCliArgs) -> Self {
        if let Some(bind_addr) = &cli.bind {
            self.bind_addr.clone_from(bind_addr);
        }
        if let Some(size) = cli.max_frame_size {
            self.max_frame_size = size;
        }
        if let Some(capacity) = cli.outbox_capacity {
            self.outbox_capacity = capacity;
        }
        if let Some(level) = &cli.log_level {
            self.log_level.clone_from(level);
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid {
                setting: "max_frame_size",
                reason: "must be at least 1 byte",
            });
        }
        if self.outbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                setting: "outbox_capacity",
                reason: "must hold at least 1 frame",
            });
        }
        Ok(())
    }
}
