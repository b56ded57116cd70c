// Guest fact collection over SSH, with WinRM as the fallback transport
pub mod script;
pub mod parser;
pub mod ssh;
pub mod winrm;
mod ntlm;
pub mod collector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
pub use collector::FactCollector;
pub use script::Dialect;

/// One host to log into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    #[serde(default)]
    pub hostname: String,
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostTarget {
    /// Name used in logs and error entries.
    pub fn label(&self) -> &str {
        if self.hostname.is_empty() {
            &self.ip
        } else {
            &self.hostname
        }
    }
}

/// A way of running the composite script on a host and returning raw output.
#[async_trait]
pub trait FactTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Output dialect produced by this transport.
    fn dialect(&self) -> Dialect;

    /// Run the composite script once and return whatever output was captured.
    /// Implementations release their session before returning, on every path.
    async fn run_script(&self, target: &HostTarget) -> Result<String, TransportError>;
}
