//! SSH transport: interactive shell, one composite write, settle, bounded read.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::error::TransportError;
use crate::facts::script::Dialect;
use crate::facts::{FactTransport, HostTarget};

// How long to wait for another output packet before treating the buffer as drained.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// SSH client handler for russh
struct ClientHandler {
    host: String,
    port: u16,
    strict_host_keys: bool,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.strict_host_keys {
            debug!(
                host = %self.host,
                fingerprint = %server_public_key.fingerprint(),
                "accepting host key"
            );
            return Ok(true);
        }

        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(known) => {
                if !known {
                    warn!(host = %self.host, "host key not present in known_hosts");
                }
                Ok(known)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "host key mismatch");
                Ok(false)
            }
        }
    }
}

pub struct SshTransport {
    connect_timeout: Duration,
    settle: Duration,
    read_chunk_bytes: usize,
    inactivity_timeout: Duration,
    strict_host_keys: bool,
}

impl SshTransport {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            settle: Duration::from_millis(config.settle_millis),
            read_chunk_bytes: config.read_chunk_bytes,
            inactivity_timeout: Duration::from_secs(config.session_timeout_secs),
            strict_host_keys: config.strict_host_keys,
        }
    }

    async fn connect(
        &self,
        target: &HostTarget,
    ) -> Result<client::Handle<ClientHandler>, TransportError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.inactivity_timeout),
            ..Default::default()
        });

        let addr = format!("{}:{}", target.ip, target.port);
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((target.ip.as_str(), target.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.clone(),
            secs: self.connect_timeout.as_secs(),
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;

        let handler = ClientHandler {
            host: target.ip.clone(),
            port: target.port,
            strict_host_keys: self.strict_host_keys,
        };
        let mut session = client::connect_stream(config, stream, handler)
            .await
            .map_err(|e| match TransportError::from(e) {
                TransportError::HostKeyRejected(_) => TransportError::HostKeyRejected(addr.clone()),
                other => other,
            })?;

        let authenticated = session
            .authenticate_password(&target.user, &target.password)
            .await?;
        if !authenticated {
            return Err(TransportError::AuthRejected(target.user.clone()));
        }

        Ok(session)
    }

    async fn run_in_shell(
        &self,
        session: &client::Handle<ClientHandler>,
        script: &str,
    ) -> Result<String, TransportError> {
        let mut channel = session.channel_open_session().await?;
        let result = self.drive_shell(&mut channel, script).await;
        if let Err(e) = channel.close().await {
            debug!(error = %e, "channel close failed");
        }
        result
    }

    async fn drive_shell(
        &self,
        channel: &mut Channel<client::Msg>,
        script: &str,
    ) -> Result<String, TransportError> {
        channel
            .request_pty(false, "xterm", 200, 24, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        channel.data(script.as_bytes()).await?;

        // No reliable completion signal from an interactive shell, so wait it out.
        tokio::time::sleep(self.settle).await;

        let output = read_bounded(channel, self.read_chunk_bytes).await;
        Ok(String::from_utf8_lossy(&output).to_string())
    }
}

#[async_trait]
impl FactTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Posix
    }

    async fn run_script(&self, target: &HostTarget) -> Result<String, TransportError> {
        let session = self.connect(target).await?;
        let result = self.run_in_shell(&session, Dialect::Posix.script()).await;
        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(host = %target.label(), error = %e, "disconnect failed");
        }
        result
    }
}

/// Drain whatever the shell has produced, up to `limit` bytes.
///
/// Anything past `limit` is dropped; a cut-off END marker surfaces later as a
/// truncation error.
async fn read_bounded(channel: &mut Channel<client::Msg>, limit: usize) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(limit);
    while buffer.len() < limit {
        match tokio::time::timeout(DRAIN_POLL, channel.wait()).await {
            Ok(Some(ChannelMsg::Data { data })) => buffer.extend_from_slice(&data),
            Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
            Ok(Some(_)) => {}
            Err(_) => break,
        }
    }
    buffer.truncate(limit);
    buffer
}
