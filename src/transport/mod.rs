//! Transport layer for SMTP connections.
//!
//! Provides the [`SmtpTransport`] abstraction the session drives, and
//! [`TcpTransport`], a TCP connection that is either plaintext, upgraded in
//! place by STARTTLS, or wrapped in TLS right after connect.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{SmtpConfig, TlsConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse, TransactionState};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse>;

    /// Sends raw data (for DATA command body).
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse>;

    /// Upgrades the connection to TLS, verifying against `server_name`.
    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Shuts the connection down without a QUIT.
    async fn close(&mut self) -> SmtpResult<()>;

    /// Returns the current transaction state.
    fn state(&self) -> TransactionState;

    /// Sets the transaction state.
    fn set_state(&mut self, state: TransactionState);

    /// Returns the server capabilities.
    fn capabilities(&self) -> Option<&EsmtpCapabilities>;

    /// Sets the server capabilities.
    fn set_capabilities(&mut self, caps: EsmtpCapabilities);
}

/// Longest reply line accepted, CRLF included. RFC 5321 allows 512.
const MAX_REPLY_LINE_LEN: usize = 8192;

/// Most lines accepted in one multiline reply.
const MAX_REPLY_LINES: usize = 512;

trait SmtpIo: AsyncBufRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> SmtpIo for T {}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    #[cfg(feature = "native-tls")]
    NativeTls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
    /// Placeholder while the socket is moved into a TLS session, and after
    /// shutdown.
    Closed,
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream.
    stream: TransportStream,
    /// Bound on each read or write, if any.
    command_timeout: Option<Duration>,
    /// Bound on the TLS handshake, if any.
    connect_timeout: Option<Duration>,
    /// Transaction state.
    state: TransactionState,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Server address.
    address: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.address)
            .field("tls_enabled", &self.tls_enabled)
            .field("state", &self.state)
            .finish()
    }
}

/// Runs `fut`, bounded by `limit` when one is configured.
async fn bounded<T, F>(
    limit: Option<Duration>,
    kind: SmtpErrorKind,
    what: &str,
    fut: F,
) -> SmtpResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| SmtpError::new(kind, format!("{} timed out after {:?}", what, limit)))?,
        None => fut.await,
    };
    result.map_err(|e| SmtpError::from_io(e, what))
}

impl TcpTransport {
    /// Connects to the configured server and reads the 220 greeting.
    ///
    /// With implicit TLS the handshake happens before the greeting is read.
    pub async fn connect(config: &SmtpConfig) -> SmtpResult<Self> {
        let address = config.address().to_string();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            address = %address,
            mode = ?config.tls.mode,
            "Connecting to SMTP server"
        );

        let stream = bounded(
            config.connect_timeout,
            SmtpErrorKind::ConnectTimeout,
            &format!("dial {}", address),
            TcpStream::connect(&address),
        )
        .await?;

        stream.set_nodelay(true).ok();

        let mut transport = Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            command_timeout: config.command_timeout,
            connect_timeout: config.connect_timeout,
            state: TransactionState::Connected,
            capabilities: None,
            tls_enabled: false,
            address,
        };

        if config.tls.mode == TlsMode::Implicit {
            transport
                .upgrade_tls(&config.tls, config.tls_server_name())
                .await?;
        }

        let greeting = transport.read_response().await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error());
        }

        transport.state = TransactionState::Connected;
        Ok(transport)
    }

    fn io(&mut self) -> SmtpResult<&mut dyn SmtpIo> {
        match &mut self.stream {
            TransportStream::Plain(stream) => Ok(stream),
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Ok(stream),
            #[cfg(feature = "native-tls")]
            TransportStream::NativeTls(stream) => Ok(stream),
            TransportStream::Closed => Err(SmtpError::new(
                SmtpErrorKind::ConnectionReset,
                "Connection is closed",
            )),
        }
    }

    /// Reads lines until we have a complete response.
    ///
    /// Reply text is decoded leniently; bytes that are not UTF-8 become
    /// U+FFFD.
    async fn read_response_inner(
        reader: &mut dyn SmtpIo,
        timeout_duration: Option<Duration>,
    ) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            if lines.len() == MAX_REPLY_LINES {
                return Err(SmtpError::protocol(format!(
                    "Reply exceeds {} lines",
                    MAX_REPLY_LINES
                )));
            }

            let mut buf = Vec::new();
            let mut limited = (&mut *reader).take(MAX_REPLY_LINE_LEN as u64);

            let read = bounded(
                timeout_duration,
                SmtpErrorKind::ReadTimeout,
                "read response",
                limited.read_until(b'\n', &mut buf),
            )
            .await?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }
            if !buf.ends_with(b"\n") && read == MAX_REPLY_LINE_LEN {
                return Err(SmtpError::protocol(format!(
                    "Reply line exceeds {} bytes",
                    MAX_REPLY_LINE_LEN
                )));
            }

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();

            // Continuation lines carry a hyphen after the code
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all(
        writer: &mut dyn SmtpIo,
        data: &[u8],
        timeout_duration: Option<Duration>,
    ) -> SmtpResult<()> {
        bounded(
            timeout_duration,
            SmtpErrorKind::WriteTimeout,
            "write",
            writer.write_all(data),
        )
        .await?;

        bounded(
            timeout_duration,
            SmtpErrorKind::WriteTimeout,
            "flush",
            writer.flush(),
        )
        .await
    }

    fn take_plain(&mut self) -> SmtpResult<TcpStream> {
        match std::mem::replace(&mut self.stream, TransportStream::Closed) {
            TransportStream::Plain(reader) => {
                if !reader.buffer().is_empty() {
                    return Err(SmtpError::tls(
                        "Server sent data before the TLS handshake",
                    ));
                }
                Ok(reader.into_inner())
            }
            TransportStream::Closed => Err(SmtpError::new(
                SmtpErrorKind::ConnectionReset,
                "Connection is closed",
            )),
            #[allow(unreachable_patterns)]
            other => {
                self.stream = other;
                Err(SmtpError::tls("Already using TLS"))
            }
        }
    }
}

#[cfg(feature = "rustls-tls")]
async fn rustls_connector(config: &TlsConfig) -> SmtpResult<tokio_rustls::TlsConnector> {
    use std::sync::Arc;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &config.ca_cert_path {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            SmtpError::configuration(format!("read CA file {}: {}", path.display(), e))
                .with_cause(e)
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                SmtpError::configuration(format!("parse CA file {}: {}", path.display(), e))
            })?;
            root_store.add(cert).map_err(|e| {
                SmtpError::configuration(format!("add CA certificate: {}", e))
            })?;
        }
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(tokio_rustls::TlsConnector::from(Arc::new(tls_config)))
}

#[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
async fn native_connector(config: &TlsConfig) -> SmtpResult<tokio_native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(path) = &config.ca_cert_path {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            SmtpError::configuration(format!("read CA file {}: {}", path.display(), e))
                .with_cause(e)
        })?;
        let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
            SmtpError::configuration(format!("parse CA file {}: {}", path.display(), e))
        })?;
        builder.add_root_certificate(cert);
    }

    let connector = builder
        .build()
        .map_err(|e| SmtpError::tls(format!("Failed to build TLS connector: {}", e)))?;

    Ok(tokio_native_tls::TlsConnector::from(connector))
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        let cmd_str = format!("{}\r\n", command.to_smtp_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        let timeout = self.command_timeout;
        Self::write_all(self.io()?, cmd_str.as_bytes(), timeout).await?;

        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(bytes = data.len(), "Sending message data");

        let timeout = self.command_timeout;
        Self::write_all(self.io()?, data, timeout).await
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let timeout = self.command_timeout;
        let response = Self::read_response_inner(self.io()?, timeout).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            code = response.code,
            message = %response.first_message(),
            "Received SMTP response"
        );

        Ok(response)
    }

    async fn upgrade_tls(&mut self, config: &TlsConfig, server_name: &str) -> SmtpResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(server_name = %server_name, "Starting TLS handshake");

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;

            let connector = rustls_connector(config).await?;
            let name = ServerName::try_from(server_name)
                .map(|n| n.to_owned())
                .map_err(|_| SmtpError::tls(format!("Invalid server name: {}", server_name)))?;

            let tcp_stream = self.take_plain()?;
            let tls_stream = bounded(
                self.connect_timeout,
                SmtpErrorKind::ConnectTimeout,
                "TLS handshake",
                connector.connect(name, tcp_stream),
            )
            .await
            .map_err(|e| match e.kind() {
                SmtpErrorKind::ConnectTimeout => e,
                _ => e.with_kind(SmtpErrorKind::TlsHandshakeFailed),
            })?;

            self.stream = TransportStream::Tls(BufReader::new(tls_stream));
            self.tls_enabled = true;
            self.state = TransactionState::TlsEstablished;

            Ok(())
        }

        #[cfg(all(feature = "native-tls", not(feature = "rustls-tls")))]
        {
            let connector = native_connector(config).await?;
            let tcp_stream = self.take_plain()?;

            let handshake = async {
                connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            };
            let tls_stream = bounded(
                self.connect_timeout,
                SmtpErrorKind::ConnectTimeout,
                "TLS handshake",
                handshake,
            )
            .await
            .map_err(|e| match e.kind() {
                SmtpErrorKind::ConnectTimeout => e,
                _ => e.with_kind(SmtpErrorKind::TlsHandshakeFailed),
            })?;

            self.stream = TransportStream::NativeTls(BufReader::new(tls_stream));
            self.tls_enabled = true;
            self.state = TransactionState::TlsEstablished;

            Ok(())
        }

        #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
        {
            let _ = (config, server_name);
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        let result = match self.io() {
            Ok(io) => io
                .shutdown()
                .await
                .map_err(|e| SmtpError::from_io(e, "shutdown")),
            Err(_) => Ok(()),
        };
        self.stream = TransportStream::Closed;
        self.state = TransactionState::Closed;
        result
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    fn set_capabilities(&mut self, caps: EsmtpCapabilities) {
        self.capabilities = Some(caps);
    }
}
