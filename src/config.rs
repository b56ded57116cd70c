//! Configuration loading
//!
//! Handles:
//! - collector timing, fallback and WinRM auth settings
//! - provider token lifetime and request timeout
//! - reading targets and credentials from JSON, YAML or TOML files

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collector: CollectorConfig,
    pub providers: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub connect_timeout_secs: u64,
    pub settle_millis: u64,
    pub read_chunk_bytes: usize,
    /// Applies to the whole session, not just connect.
    pub session_timeout_secs: u64,
    pub workers: usize,
    pub winrm_fallback: bool,
    pub winrm_port: u16,
    pub winrm_auth: WinRmAuth,
    pub strict_host_keys: bool,
}

/// How the WinRM fallback authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinRmAuth {
    /// Negotiate/NTLM handshake, with message sealing over plain http.
    #[default]
    Ntlm,
    /// HTTP Basic; the host must allow Basic auth and unencrypted traffic.
    Basic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub token_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 3,
            settle_millis: 1300,
            read_chunk_bytes: 4096,
            session_timeout_secs: 15,
            workers: 1,
            winrm_fallback: true,
            winrm_port: 5985,
            winrm_auth: WinRmAuth::Ntlm,
            strict_host_keys: false,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3600,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the per-user config file. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::config_file_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "loading config");
        let content = read(&path)?;
        toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path,
            message: e.to_string(),
        })
    }

    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("vm-inventory");
        path.push("config.toml");
        Some(path)
    }
}

/// Deserialize a document, picking the format from the file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = read(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Json {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| ConfigError::Yaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::Toml {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
