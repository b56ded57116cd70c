use std::path::PathBuf;

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures opening or driving a remote session. Never fatal to a batch.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {addr} timed out after {secs}s")]
    ConnectTimeout { addr: String, secs: u64 },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Authentication rejected for user '{0}'")]
    AuthRejected(String),

    #[error("Host key for {0} was rejected")]
    HostKeyRejected(String),

    #[error("Session exceeded {0}s")]
    SessionTimeout(u64),

    #[error("SSH error: {0}")]
    Ssh(String),

    #[error("WinRM error: {0}")]
    WinRm(String),

    #[error("NTLM negotiation failed: {0}")]
    Ntlm(String),

    #[error("WinRM request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::UnknownKey => TransportError::HostKeyRejected("server".to_string()),
            other => TransportError::Ssh(other.to_string()),
        }
    }
}

impl From<sspi::Error> for TransportError {
    fn from(err: sspi::Error) -> Self {
        TransportError::Ntlm(err.to_string())
    }
}

/// Failures turning a raw fact block into facts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No valid data found between START and END markers")]
    MarkersNotFound,

    #[error("Output was truncated before the END marker")]
    Truncated,

    #[error("No private IP found on the IPs line")]
    NoPrivateIp,
}

/// Vendor API failures. Fatal to the adapter invocation that raised them.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Unknown CSP type: {0}")]
    UnknownVendor(String),

    #[error("Unknown zone '{zone}' for {vendor}")]
    UnknownZone { vendor: String, zone: String },

    #[error("Missing credential field '{0}'")]
    MissingCredential(&'static str),

    #[error("API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Authentication response was missing {0}")]
    MissingToken(&'static str),

    #[error("Duplicate private IP {0} in vendor response")]
    DuplicatePrivateIp(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response body: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {message}")]
    Toml { path: PathBuf, message: String },

    #[error("Invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("Invalid YAML in {path}: {message}")]
    Yaml { path: PathBuf, message: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
}
