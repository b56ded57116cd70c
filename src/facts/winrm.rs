//! WinRM fallback transport (WS-Management over HTTP).
//!
//! Authenticates with NTLM by default and seals every envelope, so hosts that
//! keep `AllowUnencrypted=false` still answer over plain http. Basic auth is
//! an opt-in. Opens a remote shell, runs the PowerShell composite script
//! through `powershell -EncodedCommand`, polls for output, then deletes the shell.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::{CollectorConfig, WinRmAuth};
use crate::error::TransportError;
use crate::facts::ntlm::{challenge_token, is_sealed, NtlmContext, ENCRYPTED_CONTENT_TYPE};
use crate::facts::script::Dialect;
use crate::facts::{FactTransport, HostTarget};

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const STATE_DONE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";

// Upper bound on Receive round-trips for a single command.
const MAX_RECEIVE_POLLS: usize = 20;

pub struct WinRmTransport {
    client: reqwest::Client,
    port: u16,
    auth: WinRmAuth,
    connect_timeout: Duration,
    request_timeout: Duration,
    operation_timeout_secs: u64,
}

/// An authenticated conversation with one host.
struct Session<'a> {
    target: &'a HostTarget,
    endpoint: String,
    client: reqwest::Client,
    ntlm: Option<NtlmContext>,
}

fn http_client(connect_timeout: Duration, timeout: Duration) -> Result<reqwest::Client, TransportError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()?)
}

impl WinRmTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self, TransportError> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let request_timeout = Duration::from_secs(config.session_timeout_secs);
        Ok(Self {
            client: http_client(connect_timeout, request_timeout)?,
            port: config.winrm_port,
            auth: config.winrm_auth,
            connect_timeout,
            request_timeout,
            operation_timeout_secs: config.connect_timeout_secs.max(1),
        })
    }

    fn endpoint(&self, target: &HostTarget) -> String {
        format!("http://{}:{}/wsman", target.ip, self.port)
    }

    async fn open<'a>(&self, target: &'a HostTarget) -> Result<Session<'a>, TransportError> {
        let endpoint = self.endpoint(target);
        if self.auth == WinRmAuth::Basic {
            return Ok(Session {
                target,
                endpoint,
                client: self.client.clone(),
                ntlm: None,
            });
        }

        // NTLM authenticates the connection itself, so the pool is per session.
        let client = http_client(self.connect_timeout, self.request_timeout)?;
        let mut context = NtlmContext::new(&target.user, &target.password, &target.ip)?;

        let response = client
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Negotiate {}", context.negotiate()?))
            .body("")
            .send()
            .await?;
        let status = response.status();
        let challenge = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(challenge_token)
            .map(str::to_string);
        response.bytes().await?;
        let challenge = match challenge {
            Some(challenge) if status == StatusCode::UNAUTHORIZED => challenge,
            _ if status == StatusCode::UNAUTHORIZED => {
                return Err(TransportError::AuthRejected(target.user.clone()));
            }
            _ => {
                return Err(TransportError::WinRm(format!(
                    "expected an NTLM challenge, got {status}"
                )));
            }
        };

        let response = client
            .post(&endpoint)
            .header(AUTHORIZATION, format!("Negotiate {}", context.authenticate(&challenge)?))
            .body("")
            .send()
            .await?;
        let status = response.status();
        response.bytes().await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthRejected(target.user.clone()));
        }
        if !status.is_success() {
            return Err(TransportError::WinRm(format!("NTLM handshake ended with {status}")));
        }
        debug!(host = %target.label(), "NTLM session established");

        Ok(Session {
            target,
            endpoint,
            client,
            ntlm: Some(context),
        })
    }

    async fn create_shell(&self, session: &mut Session<'_>) -> Result<String, TransportError> {
        let options = concat!(
            "<w:OptionSet>",
            "<w:Option Name=\"WINRS_NOPROFILE\">FALSE</w:Option>",
            "<w:Option Name=\"WINRS_CODEPAGE\">65001</w:Option>",
            "</w:OptionSet>"
        );
        let body = concat!(
            "<rsp:Shell>",
            "<rsp:InputStreams>stdin</rsp:InputStreams>",
            "<rsp:OutputStreams>stdout stderr</rsp:OutputStreams>",
            "</rsp:Shell>"
        );
        let envelope = self.envelope(&session.endpoint, ACTION_CREATE, None, options, body);
        let response = session.post(envelope).await?;
        capture(shell_id_regex(), &response)
            .ok_or_else(|| TransportError::WinRm("create response carried no ShellId".to_string()))
    }

    async fn run_command(
        &self,
        session: &mut Session<'_>,
        shell_id: &str,
        script: &str,
    ) -> Result<String, TransportError> {
        let options = concat!(
            "<w:OptionSet>",
            "<w:Option Name=\"WINRS_CONSOLEMODE_STDIN\">TRUE</w:Option>",
            "<w:Option Name=\"WINRS_SKIP_CMD_SHELL\">FALSE</w:Option>",
            "</w:OptionSet>"
        );
        let body = format!(
            "<rsp:CommandLine><rsp:Command>powershell</rsp:Command>\
             <rsp:Arguments>-NoProfile -NonInteractive -EncodedCommand {}</rsp:Arguments>\
             </rsp:CommandLine>",
            encode_powershell(script)
        );
        let envelope = self.envelope(&session.endpoint, ACTION_COMMAND, Some(shell_id), options, &body);
        let response = session.post(envelope).await?;
        let command_id = capture(command_id_regex(), &response)
            .ok_or_else(|| TransportError::WinRm("command response carried no CommandId".to_string()))?;

        let output = self.receive(session, shell_id, &command_id).await;

        let signal = format!(
            "<rsp:Signal CommandId=\"{command_id}\"><rsp:Code>{SIGNAL_TERMINATE}</rsp:Code></rsp:Signal>"
        );
        let envelope = self.envelope(&session.endpoint, ACTION_SIGNAL, Some(shell_id), "", &signal);
        if let Err(e) = session.post(envelope).await {
            debug!(host = %session.target.label(), error = %e, "terminate signal failed");
        }

        output
    }

    async fn receive(
        &self,
        session: &mut Session<'_>,
        shell_id: &str,
        command_id: &str,
    ) -> Result<String, TransportError> {
        let body = format!(
            "<rsp:Receive><rsp:DesiredStream CommandId=\"{command_id}\">stdout stderr</rsp:DesiredStream></rsp:Receive>"
        );
        let mut stdout = Vec::new();
        for _ in 0..MAX_RECEIVE_POLLS {
            let envelope = self.envelope(&session.endpoint, ACTION_RECEIVE, Some(shell_id), "", &body);
            let response = session.post(envelope).await?;
            stdout.extend(decode_streams(&response, "stdout"));
            if response.contains(STATE_DONE) {
                return Ok(String::from_utf8_lossy(&stdout).to_string());
            }
        }
        Err(TransportError::WinRm(format!(
            "command did not finish after {MAX_RECEIVE_POLLS} polls"
        )))
    }

    async fn delete_shell(&self, session: &mut Session<'_>, shell_id: &str) {
        let envelope = self.envelope(&session.endpoint, ACTION_DELETE, Some(shell_id), "", "");
        if let Err(e) = session.post(envelope).await {
            debug!(host = %session.target.label(), error = %e, "shell delete failed");
        }
    }

    fn envelope(
        &self,
        endpoint: &str,
        action: &str,
        shell_id: Option<&str>,
        options: &str,
        body: &str,
    ) -> String {
        let selector = shell_id
            .map(|id| {
                format!("<w:SelectorSet><w:Selector Name=\"ShellId\">{id}</w:Selector></w:SelectorSet>")
            })
            .unwrap_or_default();
        format!(
            concat!(
                "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" ",
                "xmlns:a=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" ",
                "xmlns:w=\"http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd\" ",
                "xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\">",
                "<s:Header>",
                "<a:To>{endpoint}</a:To>",
                "<w:ResourceURI s:mustUnderstand=\"true\">{resource}</w:ResourceURI>",
                "<a:ReplyTo><a:Address s:mustUnderstand=\"true\">",
                "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous",
                "</a:Address></a:ReplyTo>",
                "<a:Action s:mustUnderstand=\"true\">{action}</a:Action>",
                "<w:MaxEnvelopeSize s:mustUnderstand=\"true\">153600</w:MaxEnvelopeSize>",
                "<a:MessageID>uuid:{message_id}</a:MessageID>",
                "<w:Locale xml:lang=\"en-US\" s:mustUnderstand=\"false\"/>",
                "<w:OperationTimeout>PT{timeout}S</w:OperationTimeout>",
                "{selector}{options}",
                "</s:Header>",
                "<s:Body>{body}</s:Body>",
                "</s:Envelope>"
            ),
            endpoint = endpoint,
            resource = RESOURCE_URI,
            action = action,
            message_id = uuid::Uuid::new_v4(),
            timeout = self.operation_timeout_secs,
            selector = selector,
            options = options,
            body = body,
        )
    }
}

impl Session<'_> {
    async fn post(&mut self, envelope: String) -> Result<String, TransportError> {
        let request = self.client.post(&self.endpoint);
        let request = match self.ntlm.as_mut() {
            Some(context) => request
                .header(CONTENT_TYPE, ENCRYPTED_CONTENT_TYPE)
                .body(context.seal(&envelope)?),
            None => request
                .basic_auth(&self.target.user, Some(&self.target.password))
                .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
                .body(envelope),
        };
        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::AuthRejected(self.target.user.clone()));
        }
        let sealed = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(is_sealed);
        let bytes = response.bytes().await?;
        let body = match self.ntlm.as_mut() {
            Some(context) if sealed => context.unseal(&bytes)?,
            _ => String::from_utf8_lossy(&bytes).to_string(),
        };
        if !status.is_success() {
            let reason = capture(fault_regex(), &body).unwrap_or_else(|| status.to_string());
            return Err(TransportError::WinRm(reason));
        }
        Ok(body)
    }
}

#[async_trait]
impl FactTransport for WinRmTransport {
    fn name(&self) -> &'static str {
        "winrm"
    }

    fn dialect(&self) -> Dialect {
        Dialect::PowerShell
    }

    async fn run_script(&self, target: &HostTarget) -> Result<String, TransportError> {
        let mut session = self.open(target).await?;
        let shell_id = self.create_shell(&mut session).await?;
        let result = self
            .run_command(&mut session, &shell_id, Dialect::PowerShell.script())
            .await;
        self.delete_shell(&mut session, &shell_id).await;
        result
    }
}

/// `-EncodedCommand` takes base64 over UTF-16LE.
fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    STANDARD.encode(utf16)
}

fn decode_streams(response: &str, name: &str) -> Vec<u8> {
    stream_regex()
        .captures_iter(response)
        .filter(|c| &c[1] == name)
        .filter_map(|c| STANDARD.decode(c[2].trim()).ok())
        .flatten()
        .collect()
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn shell_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:<(?:\w+:)?ShellId>|Name="ShellId">)([^<]+)<"#).expect("valid regex")
    })
}

fn command_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?:\w+:)?CommandId>([^<]+)<").expect("valid regex"))
}

fn stream_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(?:\w+:)?Stream Name="(\w+)"[^>]*>([^<]*)</(?:\w+:)?Stream>"#)
            .expect("valid regex")
    })
}

fn fault_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(?:\w+:)?Text[^>]*>([^<]+)<").expect("valid regex"))
}
