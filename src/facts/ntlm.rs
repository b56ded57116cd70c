//! NTLM for the WinRM fallback: the `Negotiate` handshake and the
//! `multipart/encrypted` framing WinRM expects for sealed messages over http.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::bytes::Regex;
use sspi::{
    AuthIdentity, BufferType, ClientRequestFlags, CredentialUse, DataRepresentation, EncryptionFlags,
    Ntlm, SecurityBuffer, SecurityBufferRef, SecurityStatus, Sspi, SspiImpl, Username,
};

use crate::error::TransportError;

pub const PROTOCOL: &str = "application/HTTP-SPNEGO-session-encrypted";
pub const ENCRYPTED_CONTENT_TYPE: &str = concat!(
    "multipart/encrypted;",
    "protocol=\"application/HTTP-SPNEGO-session-encrypted\";",
    "boundary=\"Encrypted Boundary\""
);

const BOUNDARY: &[u8] = b"--Encrypted Boundary";
const OCTET_STREAM: &[u8] = b"\tContent-Type: application/octet-stream\r\n";
const SIGNATURE_LEN: usize = 16;

/// Client side of one NTLM security context, bound to a single HTTP connection.
pub struct NtlmContext {
    ntlm: Ntlm,
    credentials: <Ntlm as SspiImpl>::CredentialsHandle,
    target_name: String,
}

impl NtlmContext {
    /// `user` may carry a domain as `DOMAIN\user` or `user@domain`.
    pub fn new(user: &str, password: &str, host: &str) -> Result<Self, TransportError> {
        let identity = AuthIdentity {
            username: Username::parse(user).map_err(|e| TransportError::Ntlm(e.to_string()))?,
            password: password.to_string().into(),
        };
        let mut ntlm = Ntlm::new();
        let acquired = ntlm
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&identity)
            .execute(&mut ntlm)?;
        Ok(Self {
            ntlm,
            credentials: acquired.credentials_handle,
            target_name: format!("HTTP/{host}"),
        })
    }

    /// Base64 NEGOTIATE message for the first `Authorization: Negotiate` header.
    pub fn negotiate(&mut self) -> Result<String, TransportError> {
        let (_, token) = self.step(Vec::new())?;
        Ok(STANDARD.encode(token))
    }

    /// Answers the server challenge with a base64 AUTHENTICATE message.
    pub fn authenticate(&mut self, challenge: &str) -> Result<String, TransportError> {
        let challenge = STANDARD
            .decode(challenge.trim())
            .map_err(|e| TransportError::Ntlm(format!("challenge is not base64: {e}")))?;
        let (status, token) = self.step(challenge)?;
        if status != SecurityStatus::Ok {
            return Err(TransportError::Ntlm(format!("handshake stopped at {status:?}")));
        }
        Ok(STANDARD.encode(token))
    }

    fn step(&mut self, input: Vec<u8>) -> Result<(SecurityStatus, Vec<u8>), TransportError> {
        let mut input = vec![SecurityBuffer::new(input, BufferType::Token)];
        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];

        let mut builder = self
            .ntlm
            .initialize_security_context()
            .with_credentials_handle(&mut self.credentials)
            .with_context_requirements(
                ClientRequestFlags::CONFIDENTIALITY
                    | ClientRequestFlags::INTEGRITY
                    | ClientRequestFlags::ALLOCATE_MEMORY,
            )
            .with_target_data_representation(DataRepresentation::Native)
            .with_target_name(&self.target_name)
            .with_input(&mut input)
            .with_output(&mut output);
        let result = self
            .ntlm
            .initialize_security_context_impl(&mut builder)?
            .resolve_to_result()?;

        if matches!(
            result.status,
            SecurityStatus::CompleteNeeded | SecurityStatus::CompleteAndContinue
        ) {
            self.ntlm.complete_auth_token(&mut output)?;
        }
        Ok((result.status, std::mem::take(&mut output[0].buffer)))
    }

    /// Seals a SOAP envelope into a `multipart/encrypted` request body.
    pub fn seal(&mut self, envelope: &str) -> Result<Vec<u8>, TransportError> {
        let (signature, sealed) = encrypt(&mut self.ntlm, envelope)?;
        Ok(frame(&signature, &sealed, envelope.len()))
    }

    /// Opens a `multipart/encrypted` response body.
    pub fn unseal(&mut self, body: &[u8]) -> Result<String, TransportError> {
        decrypt(&mut self.ntlm, body)
    }
}

/// Token of a `WWW-Authenticate: Negotiate <token>` header, if it carries one.
pub fn challenge_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("Negotiate") && !token.is_empty()).then_some(token)
}

pub fn is_sealed(content_type: &str) -> bool {
    content_type.contains(PROTOCOL)
}

fn encrypt(ntlm: &mut Ntlm, message: &str) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let mut signature = [0u8; SIGNATURE_LEN];
    let mut data = message.as_bytes().to_vec();
    let mut buffers = [
        SecurityBufferRef::token_buf(&mut signature),
        SecurityBufferRef::data_buf(&mut data),
    ];
    ntlm.encrypt_message(EncryptionFlags::empty(), &mut buffers)?;
    Ok((buffers[0].data().to_vec(), buffers[1].data().to_vec()))
}

fn decrypt(ntlm: &mut Ntlm, body: &[u8]) -> Result<String, TransportError> {
    let (mut signature, mut sealed) = split_frame(body)?;
    let mut buffers = [
        SecurityBufferRef::token_buf(&mut signature),
        SecurityBufferRef::data_buf(&mut sealed),
    ];
    ntlm.decrypt_message(&mut buffers)?;
    Ok(String::from_utf8_lossy(buffers[1].data()).to_string())
}

fn frame(signature: &[u8], sealed: &[u8], length: usize) -> Vec<u8> {
    let mut body = Vec::with_capacity(sealed.len() + 256);
    body.extend_from_slice(BOUNDARY);
    body.extend_from_slice(format!("\r\n\tContent-Type: {PROTOCOL}\r\n").as_bytes());
    body.extend_from_slice(
        format!("\tOriginalContent: type=application/soap+xml;charset=UTF-8;Length={length}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(BOUNDARY);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(OCTET_STREAM);
    body.extend_from_slice(&(signature.len() as u32).to_le_bytes());
    body.extend_from_slice(signature);
    body.extend_from_slice(sealed);
    body.extend_from_slice(BOUNDARY);
    body.extend_from_slice(b"--\r\n");
    body
}

// Returns (signature, sealed payload). RC4 sealing keeps the plaintext length.
fn split_frame(body: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let malformed = |what: &str| TransportError::Ntlm(format!("encrypted body {what}"));

    let length = length_regex()
        .captures(body)
        .and_then(|c| std::str::from_utf8(&c[1]).ok()?.parse::<usize>().ok())
        .ok_or_else(|| malformed("carried no Length"))?;
    let start = find(body, OCTET_STREAM).ok_or_else(|| malformed("carried no payload"))?
        + OCTET_STREAM.len();

    let payload = &body[start..];
    let Some(header) = payload.get(..4) else {
        return Err(malformed("was truncated"));
    };
    let signature_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let end = 4 + signature_len + length;
    if signature_len != SIGNATURE_LEN || payload.len() < end {
        return Err(malformed("was truncated"));
    }
    Ok((
        payload[4..4 + signature_len].to_vec(),
        payload[4 + signature_len..end].to_vec(),
    ))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn length_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"OriginalContent: [^\r\n]*Length=(\d+)").expect("valid regex"))
}

/// Accepting side of the handshake, standing in for a Windows host in tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use sspi::ServerRequestFlags;

    pub struct AcceptingHost {
        ntlm: Ntlm,
        credentials: <Ntlm as SspiImpl>::CredentialsHandle,
    }

    impl AcceptingHost {
        pub fn new(user: &str, password: &str) -> Self {
            let identity = AuthIdentity {
                username: Username::parse(user).unwrap(),
                password: password.to_string().into(),
            };
            let mut ntlm = Ntlm::new();
            let acquired = ntlm
                .acquire_credentials_handle()
                .with_credential_use(CredentialUse::Inbound)
                .with_auth_data(&identity)
                .execute(&mut ntlm)
                .unwrap();
            Self {
                ntlm,
                credentials: acquired.credentials_handle,
            }
        }

        /// Feeds one base64 client token; returns the base64 reply (empty once done).
        pub fn accept(&mut self, token: &str) -> String {
            let mut input = vec![SecurityBuffer::new(STANDARD.decode(token).unwrap(), BufferType::Token)];
            let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
            let builder = self
                .ntlm
                .accept_security_context()
                .with_credentials_handle(&mut self.credentials)
                .with_context_requirements(ServerRequestFlags::ALLOCATE_MEMORY)
                .with_target_data_representation(DataRepresentation::Native)
                .with_input(&mut input)
                .with_output(&mut output);
            let result = self
                .ntlm
                .accept_security_context_impl(builder)
                .unwrap()
                .resolve_to_result()
                .unwrap();
            if matches!(
                result.status,
                SecurityStatus::CompleteNeeded | SecurityStatus::CompleteAndContinue
            ) {
                self.ntlm.complete_auth_token(&mut output).unwrap();
            }
            STANDARD.encode(&output[0].buffer)
        }

        pub fn seal(&mut self, message: &str) -> Vec<u8> {
            let (signature, sealed) = encrypt(&mut self.ntlm, message).unwrap();
            frame(&signature, &sealed, message.len())
        }

        pub fn unseal(&mut self, body: &[u8]) -> String {
            decrypt(&mut self.ntlm, body).unwrap()
        }
    }

    /// A CHALLENGE token as a host would put in its 401 reply.
    pub fn challenge(user: &str, password: &str) -> String {
        let mut client = NtlmContext::new(user, password, "127.0.0.1").unwrap();
        let mut host = AcceptingHost::new(user, password);
        host.accept(&client.negotiate().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::AcceptingHost;
    use super::*;

    fn handshake() -> (NtlmContext, AcceptingHost) {
        let mut client = NtlmContext::new("Administrator", "secret", "10.0.2.15").unwrap();
        let mut host = AcceptingHost::new("Administrator", "secret");

        let negotiate = client.negotiate().unwrap();
        assert!(negotiate.starts_with("TlRMTVNTUAAB"));
        let challenge = host.accept(&negotiate);
        assert!(challenge.starts_with("TlRMTVNTUAAC"));
        let authenticate = client.authenticate(&challenge).unwrap();
        assert!(authenticate.starts_with("TlRMTVNTUAAD"));
        host.accept(&authenticate);
        (client, host)
    }

    #[test]
    fn test_sealed_exchange_both_directions() {
        let (mut client, mut host) = handshake();
        let envelope = "<s:Envelope><s:Body>hello</s:Body></s:Envelope>";

        let request = client.seal(envelope).unwrap();
        let text = String::from_utf8_lossy(&request);
        assert!(text.starts_with("--Encrypted Boundary\r\n"));
        assert!(text.contains(&format!("Length={}\r\n", envelope.len())));
        assert!(text.ends_with("--Encrypted Boundary--\r\n"));
        assert!(!text.contains("hello"));
        assert_eq!(host.unseal(&request), envelope);

        let reply = "<s:Envelope><rsp:ShellId>S-1</rsp:ShellId></s:Envelope>";
        assert_eq!(client.unseal(&host.seal(reply)).unwrap(), reply);
        // Sequence numbers advance per message.
        let second = client.seal(envelope).unwrap();
        assert_ne!(second, request);
        assert_eq!(host.unseal(&second), envelope);
    }

    #[test]
    fn test_unseal_rejects_malformed_bodies() {
        let (mut client, mut host) = handshake();
        let sealed = host.seal("payload");

        assert!(matches!(client.unseal(b"<plain/>"), Err(TransportError::Ntlm(_))));
        let cut = &sealed[..sealed.len() - 40];
        assert!(matches!(client.unseal(cut), Err(TransportError::Ntlm(_))));
    }

    #[test]
    fn test_challenge_token() {
        assert_eq!(challenge_token("Negotiate TlRMTVNTUAAC"), Some("TlRMTVNTUAAC"));
        assert_eq!(challenge_token("negotiate  abc "), Some("abc"));
        assert_eq!(challenge_token("Negotiate"), None);
        assert_eq!(challenge_token("Basic realm=\"WSMAN\""), None);
        assert!(is_sealed(ENCRYPTED_CONTENT_TYPE));
        assert!(!is_sealed("application/soap+xml;charset=UTF-8"));
    }
}
