//! # Mail Sender
//!
//! An email builder plus SMTP delivery:
//! - RFC 5322 messages with text, HTML and attachments
//! - Plaintext, STARTTLS and implicit TLS transports
//! - PLAIN and LOGIN authentication
//! - One connection per send, closed with QUIT on success and failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mailsender::{Mailsender, SmtpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mailsender = Mailsender::new();
//!
//!     let config = mailsender
//!         .smtp_client()
//!         .host("smtp.example.com:587")
//!         .login("user@example.com")
//!         .password("password")
//!         .tls(true)
//!         .build()?;
//!
//!     let email = mailsender
//!         .email()
//!         .to(["recipient@example.com"])
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.")
//!         .attach("hello.txt", "text/plain", "attached")
//!         .build();
//!
//!     let result = SmtpClient::new(config).send(email).await?;
//!     println!("Message sent with ID: {}", result.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Addressing
pub mod address;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Session driver
pub mod session;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use address::{Address, Envelope};
pub use auth::{AuthMethod, Credentials, SmtpAuthenticator};
pub use client::SmtpClient;
pub use config::{SmtpConfig, SmtpConfigBuilder, TlsConfig, TlsMode};
pub use errors::{SmtpError, SmtpErrorKind, SmtpResult};
pub use mime::{MimeEncoder, OutgoingMessage};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use session::SmtpSession;
pub use transport::{SmtpTransport, TcpTransport};
pub use types::{Attachment, AttachmentSource, Email, EmailBuilder, SendResult};

/// Entry point handing out email and client builders.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mailsender;

impl Mailsender {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }

    /// Starts building an email.
    pub fn email(&self) -> EmailBuilder {
        Email::builder()
    }

    /// Starts building an SMTP client configuration.
    pub fn smtp_client(&self) -> SmtpConfigBuilder {
        SmtpConfig::builder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builders() {
        let mailsender = Mailsender::new();

        let email = mailsender.email().subject("subj").build();
        assert_eq!(email.subject, "subj");

        let config = mailsender
            .smtp_client()
            .host("localhost:25")
            .build()
            .unwrap();
        assert_eq!(config.address(), "localhost:25");
        assert_eq!(config.tls.mode, TlsMode::None);
    }
}
