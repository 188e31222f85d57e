//! Delivery configuration.
//!
//! A [`SmtpConfig`] names the relay as a `host:port` pair, the login used for
//! authentication, and how the connection is secured. The authentication
//! mechanism follows from the transport-security mode unless overridden:
//! - plaintext: PLAIN
//! - STARTTLS: LOGIN
//! - implicit TLS: PLAIN

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{AuthMethod, Credentials};
use crate::errors::{SmtpError, SmtpResult};

/// Default EHLO client identity.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Transport-security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plaintext for the whole session.
    #[default]
    None,
    /// Plaintext connect, upgraded with STARTTLS after the greeting.
    StartTls,
    /// TLS handshake immediately after connect (port 465).
    Implicit,
}

impl TlsMode {
    /// Authentication mechanism used with this mode when none is set.
    pub fn default_auth_method(&self) -> AuthMethod {
        match self {
            TlsMode::None | TlsMode::Implicit => AuthMethod::Plain,
            TlsMode::StartTls => AuthMethod::Login,
        }
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// TLS mode.
    #[serde(default)]
    pub mode: TlsMode,
    /// Extra PEM file with CA certificates trusted in addition to the
    /// bundled web roots.
    pub ca_cert_path: Option<PathBuf>,
}

/// Mail delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay address as `host:port`.
    pub host: String,
    /// Login for authentication, also the default From address.
    #[serde(default)]
    pub login: String,
    /// Password (serialization skipped for security).
    #[serde(skip, default = "empty_secret")]
    pub password: SecretString,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Authentication mechanism.
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Client identifier for EHLO.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Bound on dial plus TLS handshake. `None` waits indefinitely.
    #[serde(default, with = "humantime_serde::option")]
    pub connect_timeout: Option<Duration>,
    /// Bound on each command round trip. `None` waits indefinitely.
    #[serde(default, with = "humantime_serde::option")]
    pub command_timeout: Option<Duration>,
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SmtpResult<()> {
        split_host_port(&self.host)?;
        Ok(())
    }

    /// Returns the full server address to dial.
    pub fn address(&self) -> &str {
        &self.host
    }

    /// Returns the host part of the address, without port or brackets.
    pub fn hostname(&self) -> &str {
        split_host_port(&self.host)
            .map(|(host, _)| host)
            .unwrap_or(&self.host)
    }

    /// Returns the name presented for TLS verification and SNI.
    ///
    /// This is always the bare hostname, for STARTTLS and implicit TLS alike.
    pub fn tls_server_name(&self) -> &str {
        self.hostname()
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        if self.client_id.is_empty() {
            DEFAULT_CLIENT_ID
        } else {
            &self.client_id
        }
    }

    /// Returns the credentials used for authentication.
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.login.clone(),
            SecretString::new(self.password.expose_secret().clone()),
        )
    }
}

/// Splits `host:port`, accepting `[v6]:port` for IPv6 literals.
pub fn split_host_port(address: &str) -> SmtpResult<(&str, u16)> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| {
            SmtpError::configuration(format!("address {}: missing ']' in address", address))
        })?;
        let port = rest[end + 1..].strip_prefix(':').ok_or_else(|| {
            SmtpError::configuration(format!("address {}: missing port in address", address))
        })?;
        (&rest[..end], port)
    } else {
        let idx = address.rfind(':').ok_or_else(|| {
            SmtpError::configuration(format!("address {}: missing port in address", address))
        })?;
        let host = &address[..idx];
        if host.contains(':') {
            return Err(SmtpError::configuration(format!(
                "address {}: too many colons in address",
                address
            )));
        }
        (host, &address[idx + 1..])
    };

    let port = port.parse::<u16>().map_err(|e| {
        SmtpError::configuration(format!("address {}: invalid port {:?}", address, port))
            .with_cause(e)
    })?;

    Ok((host, port))
}

/// Builder for mail delivery configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    login: Option<String>,
    password: Option<SecretString>,
    tls: bool,
    ssl: bool,
    tls_mode: Option<TlsMode>,
    ca_cert_path: Option<PathBuf>,
    auth_method: Option<AuthMethod>,
    client_id: Option<String>,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
}

impl SmtpConfigBuilder {
    /// Sets the relay address (`host:port`).
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the login.
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Sets the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Selects STARTTLS. Takes precedence over [`ssl`](Self::ssl).
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Selects implicit TLS, unless STARTTLS is also selected.
    pub fn ssl(mut self, enabled: bool) -> Self {
        self.ssl = enabled;
        self
    }

    /// Sets the TLS mode directly, overriding the `tls`/`ssl` flags.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = Some(mode);
        self
    }

    /// Trusts the CA certificates in the given PEM file.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Overrides the authentication mechanism implied by the TLS mode.
    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    fn resolved_mode(&self) -> TlsMode {
        if let Some(mode) = self.tls_mode {
            mode
        } else if self.tls {
            TlsMode::StartTls
        } else if self.ssl {
            TlsMode::Implicit
        } else {
            TlsMode::None
        }
    }

    /// Builds the configuration.
    pub fn build(self) -> SmtpResult<SmtpConfig> {
        let mode = self.resolved_mode();
        let config = SmtpConfig {
            host: self.host.unwrap_or_default(),
            login: self.login.unwrap_or_default(),
            password: self.password.unwrap_or_else(empty_secret),
            tls: TlsConfig {
                mode,
                ca_cert_path: self.ca_cert_path,
            },
            auth_method: self
                .auth_method
                .unwrap_or_else(|| mode.default_auth_method()),
            client_id: self.client_id.unwrap_or_else(default_client_id),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
