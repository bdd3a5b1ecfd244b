//! Runtime configuration.
//!
//! Settings come from defaults, then an optional YAML config file, then
//! environment variables, then CLI flags (applied by the binary). The
//! shared credential is deliberately environment-only so it never lands in
//! a config file on disk.

use serde::Deserialize;
use std::path::PathBuf;

/// Name of the environment variable holding the shared credential.
pub const API_KEY_ENV: &str = "FILE_SYNCER_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to dial (main) or listen on (replica)
    pub addr: String,
    /// Directory holding the files to sync
    pub directory: PathBuf,
    /// File extension filter for the one-level directory scan
    pub extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            directory: PathBuf::from("test_data"),
            extension: "md".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            config = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;
        }

        if let Ok(addr) = std::env::var("FILE_SYNCER_ADDR") {
            config.addr = addr;
        }
        if let Ok(directory) = std::env::var("FILE_SYNCER_DIRECTORY") {
            config.directory = PathBuf::from(directory);
        }
        if let Ok(extension) = std::env::var("FILE_SYNCER_EXTENSION") {
            config.extension = extension;
        }

        Ok(config)
    }

    /// Default config file path: ~/.config/file-syncer/config.yaml
    pub fn default_config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".config")
            .join("file-syncer")
            .join("config.yaml")
    }

    /// Reads the shared credential from the environment.
    pub fn api_key() -> Result<String, ConfigError> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    MissingApiKey,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingApiKey => {
                write!(f, "{} environment variable is required", API_KEY_ENV)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
