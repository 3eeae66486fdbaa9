//! Persistent configuration
//!
//! `config.json` holds the values the rule set is parameterized by. The CLI
//! loads it, applies its overrides, and turns the result into validated
//! [`RuntimeParameters`] with [`AppConfig::runtime_parameters`].

use crate::core::rules::{MAX_INTERFACES, RuntimeParameters};
use crate::utils::get_config_dir;
use crate::validators;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Errors from loading, saving or validating the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("Cannot determine the configuration directory (is $HOME set?)")]
    NoConfigDir,
}

/// Rule set parameters as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Firewall mark identifying already-handled packets
    #[serde(default = "default_mark")]
    pub mark: u32,
    #[serde(default = "default_mask")]
    pub mask: u32,
    /// NFQUEUE number the inspection process listens on
    #[serde(default = "default_queue_num")]
    pub queue_num: u32,
    /// Ingress interfaces to scope to, in order
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Ignore `interfaces` and divert traffic from every interface
    #[serde(default)]
    pub all_interfaces: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mark: default_mark(),
            mask: default_mask(),
            queue_num: default_queue_num(),
            interfaces: Vec::new(),
            all_interfaces: false,
        }
    }
}

fn default_mark() -> u32 {
    0x8000
}

fn default_mask() -> u32 {
    0x8000
}

fn default_queue_num() -> u32 {
    512
}

impl AppConfig {
    /// Validates the configuration and produces the rule set parameters.
    ///
    /// Interfaces after the first empty entry are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero mask, an out-of-range queue
    /// number, a malformed interface name, too many interfaces, or no
    /// interfaces without `all_interfaces`.
    pub fn runtime_parameters(&self) -> Result<RuntimeParameters, ConfigError> {
        let invalid = |field, message| ConfigError::Invalid { field, message };

        let mask = validators::validate_mask(self.mask).map_err(|m| invalid("mask", m))?;
        let queue_num =
            validators::validate_queue_num(self.queue_num).map_err(|m| invalid("queue number", m))?;
        if let Some(warning) = validators::check_mark_outside_mask(self.mark, mask) {
            warn!("{warning}");
        }

        let interfaces = if self.all_interfaces {
            if !self.interfaces.is_empty() {
                warn!(
                    "All interfaces selected; ignoring {} configured interface(s)",
                    self.interfaces.len()
                );
            }
            Vec::new()
        } else {
            self.scoped_interfaces()?
        };

        Ok(RuntimeParameters {
            mark: self.mark,
            mask,
            queue_num,
            interfaces,
            all_interfaces: self.all_interfaces,
        })
    }

    fn scoped_interfaces(&self) -> Result<Vec<String>, ConfigError> {
        let end = self
            .interfaces
            .iter()
            .position(String::is_empty)
            .unwrap_or(self.interfaces.len());
        if end < self.interfaces.len() {
            warn!(
                "Interface list ends at empty entry #{}; {} later entry(ies) ignored",
                end + 1,
                self.interfaces.len() - end - 1
            );
        }

        let names = &self.interfaces[..end];
        if names.is_empty() {
            return Err(ConfigError::Invalid {
                field: "interfaces",
                message: "none configured; pass -i <name> or --all-interfaces".to_string(),
            });
        }
        if names.len() > MAX_INTERFACES {
            return Err(ConfigError::Invalid {
                field: "interfaces",
                message: format!("{} given, at most {MAX_INTERFACES} supported", names.len()),
            });
        }

        names
            .iter()
            .map(|name| {
                validators::validate_interface(name).map_err(|message| ConfigError::Invalid {
                    field: "interface name",
                    message: format!("'{name}': {message}"),
                })
            })
            .collect()
    }
}

/// Default location of `config.json`
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be written or renamed.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    use tokio::fs::OpenOptions;
    use tokio::io::AsyncWriteExt;

    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let temp_path = path.with_extension("json.tmp");

    // Create file with restrictive permissions from the start to prevent
    // race condition where file is briefly world-readable
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600) // Set permissions BEFORE any data is written
        .open(&temp_path)
        .await
        .map_err(io_err)?;

    file.write_all(json.as_bytes()).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?; // Ensure data is flushed to physical media

    // Atomic rename
    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            io_err(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            ))
        } else {
            io_err(e)
        }
    })
}

/// Saves the config to the default location.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if no home directory is known, or
/// [`ConfigError::Io`] if writing fails.
pub async fn save_config(config: &AppConfig) -> Result<PathBuf, ConfigError> {
    let path = default_config_path().ok_or(ConfigError::NoConfigDir)?;
    save_config_to(config, &path).await?;
    Ok(path)
}

/// Loads the config from `path`, or returns the defaults if it does not exist.
///
/// # Errors
///
/// A file that exists but cannot be read or parsed is an error rather than
/// silently replaced by defaults, since that would provision different marks
/// than the inspection process expects.
pub async fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppConfig::default()),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub async fn load_config() -> Result<AppConfig, ConfigError> {
    match default_config_path() {
        Some(path) => load_config_from(&path).await,
        None => Ok(AppConfig::default()),
    }
}
