//! Authentication mechanisms for SMTP.
//!
//! Supports two SASL mechanisms:
//! - PLAIN (RFC 4616), a single round
//! - LOGIN (obsolete but widely used), prompted username then password
//!
//! Mechanisms work on raw bytes. Base64 framing on the wire is the session's
//! job, see [`SmtpSession::authenticate`](crate::session::SmtpSession::authenticate).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpResult};

/// Authentication methods supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    #[default]
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }

    /// Parses from SMTP capability string.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            _ => None,
        }
    }

    /// Creates the authenticator for this mechanism.
    pub fn authenticator(&self, credentials: Credentials) -> Box<dyn SmtpAuthenticator> {
        match self {
            AuthMethod::Plain => Box::new(PlainAuthenticator::new(credentials)),
            AuthMethod::Login => Box::new(LoginAuthenticator::new(credentials)),
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Creates credentials from a plain password string.
    pub fn plain(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username, SecretString::new(password.into()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What the session knows about the server when authentication starts.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server name, as used for TLS verification.
    pub name: String,
    /// Whether the connection is encrypted.
    pub tls: bool,
    /// Mechanisms advertised in the EHLO `AUTH` line.
    pub mechanisms: Vec<String>,
}

impl ServerInfo {
    fn is_loopback(&self) -> bool {
        matches!(self.name.as_str(), "localhost" | "127.0.0.1" | "::1")
    }
}

/// A SASL client mechanism.
pub trait SmtpAuthenticator: Send + Sync {
    /// Starts the exchange, returning the mechanism name and the initial
    /// response. An empty initial response is left off the `AUTH` line.
    fn begin(&self, server: &ServerInfo) -> SmtpResult<(&'static str, Vec<u8>)>;

    /// Answers a server challenge.
    ///
    /// `more` is true while the server is still challenging (334) and false
    /// once it has accepted (235). `None` means nothing more to send.
    fn respond(&self, challenge: &[u8], more: bool) -> SmtpResult<Option<Vec<u8>>>;
}

/// PLAIN mechanism.
#[derive(Debug, Clone)]
pub struct PlainAuthenticator {
    identity: String,
    credentials: Credentials,
}

impl PlainAuthenticator {
    /// Creates a PLAIN authenticator with an empty authorization identity.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            identity: String::new(),
            credentials,
        }
    }

    /// Sets the authorization identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Generates the PLAIN initial response: `identity\0username\0password`.
    pub fn initial_response(&self) -> Vec<u8> {
        format!(
            "{}\0{}\0{}",
            self.identity,
            self.credentials.username,
            self.credentials.password.expose_secret()
        )
        .into_bytes()
    }
}

impl SmtpAuthenticator for PlainAuthenticator {
    fn begin(&self, server: &ServerInfo) -> SmtpResult<(&'static str, Vec<u8>)> {
        // Credentials only leave in cleartext towards the local machine.
        if !server.tls && !server.is_loopback() {
            return Err(SmtpError::auth_protocol("unencrypted connection"));
        }
        Ok((AuthMethod::Plain.mechanism_name(), self.initial_response()))
    }

    fn respond(&self, _challenge: &[u8], more: bool) -> SmtpResult<Option<Vec<u8>>> {
        if more {
            return Err(SmtpError::auth_protocol("unexpected server challenge"));
        }
        Ok(None)
    }
}

/// LOGIN mechanism.
#[derive(Debug, Clone)]
pub struct LoginAuthenticator {
    credentials: Credentials,
}

impl LoginAuthenticator {
    /// Creates a LOGIN authenticator.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl SmtpAuthenticator for LoginAuthenticator {
    fn begin(&self, _server: &ServerInfo) -> SmtpResult<(&'static str, Vec<u8>)> {
        Ok((AuthMethod::Login.mechanism_name(), Vec::new()))
    }

    fn respond(&self, challenge: &[u8], more: bool) -> SmtpResult<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        match challenge {
            b"Username:" => Ok(Some(self.credentials.username.as_bytes().to_vec())),
            b"Password:" => Ok(Some(
                self.credentials.password.expose_secret().as_bytes().to_vec(),
            )),
            _ => Err(SmtpError::auth_protocol("unknown prompt from server")),
        }
    }
}

/// Encodes an AUTH payload for the wire.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes a 334 challenge from the wire.
pub fn decode_challenge(text: &str) -> SmtpResult<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| SmtpError::auth_protocol(format!("malformed server challenge: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmtpErrorKind;

    fn creds() -> Credentials {
        Credentials::plain("login@localhost", "password")
    }

    fn server(name: &str, tls: bool) -> ServerInfo {
        ServerInfo {
            name: name.to_string(),
            tls,
            mechanisms: vec!["PLAIN".to_string(), "LOGIN".to_string()],
        }
    }

    #[test]
    fn test_auth_method_from_capability() {
        assert_eq!(AuthMethod::from_capability("PLAIN"), Some(AuthMethod::Plain));
        assert_eq!(AuthMethod::from_capability("login"), Some(AuthMethod::Login));
        assert_eq!(AuthMethod::from_capability("CRAM-MD5"), None);
    }

    #[test]
    fn test_plain_initial_response() {
        let auth = PlainAuthenticator::new(creds());
        let (mechanism, ir) = auth.begin(&server("smtp.example.com", true)).unwrap();
        assert_eq!(mechanism, "PLAIN");
        assert_eq!(ir, b"\0login@localhost\0password");

        let auth = PlainAuthenticator::new(creds()).with_identity("admin");
        assert_eq!(auth.initial_response(), b"admin\0login@localhost\0password");
    }

    #[test]
    fn test_plain_refuses_cleartext_to_remote_host() {
        let auth = PlainAuthenticator::new(creds());
        let err = auth.begin(&server("smtp.example.com", false)).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthProtocol);
        assert!(err.message().contains("unencrypted connection"));

        for name in ["localhost", "127.0.0.1", "::1"] {
            assert!(auth.begin(&server(name, false)).is_ok());
        }
    }

    #[test]
    fn test_plain_rejects_further_challenge() {
        let auth = PlainAuthenticator::new(creds());
        let err = auth.respond(b"more?", true).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthProtocol);
        assert_eq!(auth.respond(b"2.7.0 Accepted", false).unwrap(), None);
    }

    #[test]
    fn test_login_exchange() {
        let auth = LoginAuthenticator::new(creds());
        let (mechanism, ir) = auth.begin(&server("smtp.example.com", false)).unwrap();
        assert_eq!(mechanism, "LOGIN");
        assert!(ir.is_empty());

        assert_eq!(
            auth.respond(b"Username:", true).unwrap(),
            Some(b"login@localhost".to_vec())
        );
        assert_eq!(
            auth.respond(b"Password:", true).unwrap(),
            Some(b"password".to_vec())
        );
        assert_eq!(auth.respond(b"anything", false).unwrap(), None);
    }

    #[test]
    fn test_login_unknown_prompt() {
        let auth = LoginAuthenticator::new(creds());
        let err = auth.respond(b"Passcode:", true).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthProtocol);
        assert!(err.message().contains("unknown prompt from server"));

        // Prompts are compared literally.
        assert!(auth.respond(b"username:", true).is_err());
    }

    #[test]
    fn test_payload_encoding() {
        assert_eq!(encode_payload(b"Username:"), "VXNlcm5hbWU6");
        assert_eq!(decode_challenge("UGFzc3dvcmQ6").unwrap(), b"Password:");
        assert!(decode_challenge("not base64!").is_err());
    }

    #[test]
    fn test_credentials_debug() {
        let creds = Credentials::plain("user", "secret_password");
        let debug_str = format!("{:?}", creds);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("secret_password"));
    }
}
