//! Error types for the mail sender.
//!
//! Every failure surfaced by [`SmtpClient::send`](crate::client::SmtpClient::send)
//! or [`SmtpConfigBuilder::build`](crate::config::SmtpConfigBuilder::build) is an
//! [`SmtpError`] carrying a typed [`SmtpErrorKind`], so callers branch on the kind
//! instead of on message text.

use std::fmt;
use thiserror::Error;

/// Result type for mail sender operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Error kinds categorizing the different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Configuration errors
    /// Configuration is invalid (e.g. host without a port).
    ConfigurationInvalid,

    // Validation errors (pre-network)
    /// No SMTP host is configured.
    EmptyHost,
    /// The email has no To recipients.
    NeedRecipient,
    /// A To recipient is an empty string.
    EmptyRecipient,
    /// The email has no subject, body or attachments.
    EmptyData,
    /// An attachment has no filename.
    EmptyAttachFilename,
    /// An attachment with inline data or a stream has no content type.
    EmptyAttachContentType,
    /// The envelope lacks a sender or any recipient after resolution.
    MissingEnvelope,
    /// An attachment source could not be read.
    AttachmentError,
    /// Message serialization failed.
    EncodingFailed,
    /// A header name or value is not representable.
    InvalidHeader,

    // Address errors
    /// A mailbox string could not be parsed.
    MalformedAddress,

    // Authentication exchange errors
    /// The server sent a challenge the authenticator cannot answer.
    AuthProtocol,

    // Network errors
    /// Connection was refused.
    ConnectionRefused,
    /// Connection was reset or closed by the server.
    ConnectionReset,
    /// Network is unreachable.
    NetworkUnreachable,
    /// Connect timed out.
    ConnectTimeout,
    /// Read timed out.
    ReadTimeout,
    /// Write timed out.
    WriteTimeout,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Other socket level failure.
    Io,

    // Protocol errors
    /// Malformed response from server.
    InvalidResponse,
    /// Unexpected response code.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// STARTTLS not supported by server.
    StarttlsNotSupported,
    /// Server does not offer AUTH.
    AuthMethodNotSupported,
    /// Authentication is required (530).
    AuthenticationRequired,
    /// Credentials were rejected (535).
    CredentialsInvalid,
    /// MAIL FROM was rejected.
    SenderRejected,
    /// RCPT TO was rejected.
    RecipientRejected,
    /// Message exceeds the server's size limit (552).
    MessageTooLarge,
    /// The message body was rejected after DATA.
    DataRejected,
}

/// Coarse classification of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed configuration, detected before any network I/O.
    Configuration,
    /// Policy violation on the email, detected before any network I/O.
    Validation,
    /// Unparseable mailbox syntax.
    Address,
    /// Unexpected challenge during the AUTH exchange.
    AuthProtocol,
    /// Dial, TLS or socket failure.
    Network,
    /// The server rejected a command.
    Protocol,
}

impl SmtpErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SmtpErrorKind::ConfigurationInvalid => ErrorCategory::Configuration,

            SmtpErrorKind::EmptyHost
            | SmtpErrorKind::NeedRecipient
            | SmtpErrorKind::EmptyRecipient
            | SmtpErrorKind::EmptyData
            | SmtpErrorKind::EmptyAttachFilename
            | SmtpErrorKind::EmptyAttachContentType
            | SmtpErrorKind::MissingEnvelope
            | SmtpErrorKind::AttachmentError
            | SmtpErrorKind::EncodingFailed
            | SmtpErrorKind::InvalidHeader => ErrorCategory::Validation,

            SmtpErrorKind::MalformedAddress => ErrorCategory::Address,

            SmtpErrorKind::AuthProtocol => ErrorCategory::AuthProtocol,

            SmtpErrorKind::ConnectionRefused
            | SmtpErrorKind::ConnectionReset
            | SmtpErrorKind::NetworkUnreachable
            | SmtpErrorKind::ConnectTimeout
            | SmtpErrorKind::ReadTimeout
            | SmtpErrorKind::WriteTimeout
            | SmtpErrorKind::TlsHandshakeFailed
            | SmtpErrorKind::Io => ErrorCategory::Network,

            SmtpErrorKind::InvalidResponse
            | SmtpErrorKind::UnexpectedResponse
            | SmtpErrorKind::ServerShutdown
            | SmtpErrorKind::StarttlsNotSupported
            | SmtpErrorKind::AuthMethodNotSupported
            | SmtpErrorKind::AuthenticationRequired
            | SmtpErrorKind::CredentialsInvalid
            | SmtpErrorKind::SenderRejected
            | SmtpErrorKind::RecipientRejected
            | SmtpErrorKind::MessageTooLarge
            | SmtpErrorKind::DataRejected => ErrorCategory::Protocol,
        }
    }

    /// Returns true if the failure happened before any network I/O.
    pub fn is_pre_flight(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Address
        )
    }

    /// Returns true if this error kind is typically transient.
    ///
    /// The crate never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::ConnectTimeout
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
                | SmtpErrorKind::ServerShutdown
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SmtpErrorKind::EmptyHost => write!(f, "Empty host"),
            SmtpErrorKind::NeedRecipient => write!(f, "Need recipient"),
            SmtpErrorKind::EmptyRecipient => write!(f, "Empty recipient"),
            SmtpErrorKind::EmptyData => write!(f, "Empty data"),
            SmtpErrorKind::EmptyAttachFilename => write!(f, "Empty attachment filename"),
            SmtpErrorKind::EmptyAttachContentType => write!(f, "Empty attachment content-type"),
            SmtpErrorKind::MissingEnvelope => write!(f, "Incomplete envelope"),
            SmtpErrorKind::AttachmentError => write!(f, "Attachment error"),
            SmtpErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::MalformedAddress => write!(f, "Malformed address"),
            SmtpErrorKind::AuthProtocol => write!(f, "Authentication protocol error"),
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::NetworkUnreachable => write!(f, "Network unreachable"),
            SmtpErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::Io => write!(f, "I/O error"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth not supported"),
            SmtpErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::SenderRejected => write!(f, "Sender rejected"),
            SmtpErrorKind::RecipientRejected => write!(f, "Recipient rejected"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::DataRejected => write!(f, "Message data rejected"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    pub fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self { class, subject, detail }
    }

    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }

    /// Returns true if this is a temporary failure.
    pub fn is_temporary(&self) -> bool {
        self.class == 4
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// Mail sender error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    /// Error kind.
    kind: SmtpErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP reply code if the server produced this error.
    smtp_code: Option<u16>,
    /// Enhanced status code if available.
    enhanced_code: Option<EnhancedStatusCode>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Replaces the kind, keeping code, message and cause.
    pub(crate) fn with_kind(mut self, kind: SmtpErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if retrying the whole send might succeed.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return (400..500).contains(&code);
        }
        self.kind.is_retryable()
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a validation error of the given kind.
    pub fn validation(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a malformed address error.
    pub fn malformed_address(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::MalformedAddress, message)
    }

    /// Creates an authentication exchange error.
    pub fn auth_protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::AuthProtocol, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates an attachment error.
    pub fn attachment(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::AttachmentError, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            500..=504 => SmtpErrorKind::InvalidResponse,
            530 => SmtpErrorKind::AuthenticationRequired,
            535 => SmtpErrorKind::CredentialsInvalid,
            552 => SmtpErrorKind::MessageTooLarge,
            _ => SmtpErrorKind::UnexpectedResponse,
        };
        Self::new(kind, message).with_smtp_code(code)
    }

    /// Maps an I/O error to a network error kind.
    pub fn from_io(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        let kind = match error.kind() {
            ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => SmtpErrorKind::ConnectionReset,
            ErrorKind::TimedOut => SmtpErrorKind::ConnectTimeout,
            ErrorKind::AddrNotAvailable => SmtpErrorKind::NetworkUnreachable,
            _ => SmtpErrorKind::Io,
        };
        Self::new(kind, format!("{}: {}", context, error)).with_cause(error)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            SmtpErrorKind::ConfigurationInvalid.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(SmtpErrorKind::NeedRecipient.category(), ErrorCategory::Validation);
        assert_eq!(SmtpErrorKind::MalformedAddress.category(), ErrorCategory::Address);
        assert_eq!(SmtpErrorKind::AuthProtocol.category(), ErrorCategory::AuthProtocol);
        assert_eq!(SmtpErrorKind::TlsHandshakeFailed.category(), ErrorCategory::Network);
        assert_eq!(SmtpErrorKind::RecipientRejected.category(), ErrorCategory::Protocol);

        assert!(SmtpErrorKind::EmptyData.is_pre_flight());
        assert!(!SmtpErrorKind::ConnectionRefused.is_pre_flight());
    }

    #[test]
    fn test_enhanced_status_code_parse() {
        let code = EnhancedStatusCode::parse("5.1.1").unwrap();
        assert_eq!(code, EnhancedStatusCode::new(5, 1, 1));
        assert!(code.is_permanent());
        assert!(!code.is_temporary());

        assert!(EnhancedStatusCode::parse("250").is_none());
        assert!(EnhancedStatusCode::parse("1.2.3").is_none());
        assert!(EnhancedStatusCode::parse("4.2.2.1").is_none());
    }

    #[test]
    fn test_smtp_error_from_response() {
        let err = SmtpError::from_smtp_response(535, "Authentication failed");
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
        assert_eq!(err.smtp_code(), Some(535));
        assert!(!err.is_retryable());

        let err = SmtpError::from_smtp_response(451, "Try again later");
        assert_eq!(err.kind(), SmtpErrorKind::UnexpectedResponse);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        let err = SmtpError::from_io(io, "connect to localhost:25");
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);
        assert!(err.message().contains("localhost:25"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display() {
        let err = SmtpError::from_smtp_response(550, "User unknown")
            .with_kind(SmtpErrorKind::RecipientRejected)
            .with_enhanced_code(EnhancedStatusCode::new(5, 1, 1));
        assert_eq!(
            err.to_string(),
            "Recipient rejected: User unknown (SMTP 550) [5.1.1]"
        );
    }
}
