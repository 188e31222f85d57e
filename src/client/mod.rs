//! Main SMTP client implementation.
//!
//! Provides a high-level interface for sending emails with:
//! - Validation before any network I/O
//! - Envelope resolution from header mailboxes
//! - TLS negotiation and authentication per configuration
//!
//! Each [`SmtpClient::send`] opens its own connection and closes it
//! before returning.

use std::sync::Arc;
use std::time::Instant;

use crate::address::Envelope;
use crate::config::SmtpConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::OutgoingMessage;
use crate::observability::{SmtpMetrics, Timer};
use crate::session::SmtpSession;
use crate::transport::TcpTransport;
use crate::types::{AttachmentSource, Email, SendResult};

/// High-level SMTP client.
#[derive(Debug)]
pub struct SmtpClient {
    /// Configuration.
    config: Arc<SmtpConfig>,
    /// Metrics collector.
    metrics: Arc<SmtpMetrics>,
}

impl SmtpClient {
    /// Creates a new SMTP client.
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(SmtpMetrics::new()),
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns a reference to the metrics collector.
    pub fn metrics(&self) -> &SmtpMetrics {
        &self.metrics
    }

    /// Sends an email.
    ///
    /// The email is checked before connecting; see [`validate_email`].
    pub async fn send(&self, email: Email) -> SmtpResult<SendResult> {
        let start = Instant::now();

        if let Err(err) = self.validate(&email) {
            self.metrics.record_rejected();
            return Err(err);
        }

        let result = self.send_inner(email).await;
        match &result {
            Ok(sent) => self
                .metrics
                .record_send_success(sent.recipients.len(), sent.size),
            Err(_) => self.metrics.record_send_failure(),
        }

        result.map(|sent| SendResult {
            message_id: sent.message_id,
            sender: sent.sender,
            recipients: sent.recipients,
            response: sent.response,
            duration: start.elapsed(),
        })
    }

    fn validate(&self, email: &Email) -> SmtpResult<()> {
        if self.config.host.is_empty() {
            return Err(SmtpError::validation(
                SmtpErrorKind::EmptyHost,
                "no SMTP host configured",
            ));
        }
        validate_email(email)
    }

    async fn send_inner(&self, email: Email) -> SmtpResult<Delivered> {
        let mut message = build_message(email, &self.config.login).await?;

        let recipients: Vec<&String> = message
            .to
            .iter()
            .chain(message.cc.iter())
            .chain(message.bcc.iter())
            .collect();
        let envelope = Envelope::resolve(message.sender.as_deref(), &message.from, &recipients)?;

        let bytes = message.serialize()?;
        let message_id = message.message_id().to_string();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            message_id = %message_id,
            recipients = envelope.recipients.len(),
            size = bytes.len(),
            "Message prepared"
        );

        let timer = Timer::start("smtp.deliver");
        let transport = match TcpTransport::connect(&self.config).await {
            Ok(transport) => {
                self.metrics.record_connection_attempt(true);
                transport
            }
            Err(err) => {
                self.metrics.record_connection_attempt(false);
                return Err(err);
            }
        };

        let authenticator = self
            .config
            .auth_method
            .authenticator(self.config.credentials());
        let mut session = SmtpSession::new(
            transport,
            self.config.client_id(),
            self.config.tls_server_name(),
        );
        let response = session
            .deliver(
                self.config.tls.mode,
                &self.config.tls,
                authenticator.as_ref(),
                &envelope,
                &bytes,
            )
            .await?;
        let _elapsed = timer.stop();

        #[cfg(feature = "tracing")]
        tracing::info!(
            message_id = %message_id,
            host = %self.config.host,
            recipients = envelope.recipients.len(),
            duration_ms = _elapsed.as_millis() as u64,
            "Email sent"
        );

        Ok(Delivered {
            message_id,
            sender: envelope.sender,
            recipients: envelope.recipients,
            response: response.full_message(),
            size: bytes.len(),
        })
    }
}

struct Delivered {
    message_id: String,
    sender: String,
    recipients: Vec<String>,
    response: String,
    size: usize,
}

/// Checks an email against the sending policy.
///
/// Order matters: an entirely empty email is `EmptyData` even though it
/// also lacks recipients.
pub fn validate_email(email: &Email) -> SmtpResult<()> {
    if email.to.is_empty() && email.has_no_content() {
        return Err(SmtpError::validation(
            SmtpErrorKind::EmptyData,
            "email has no recipients, subject, body or attachments",
        ));
    }
    if email.to.is_empty() {
        return Err(SmtpError::validation(
            SmtpErrorKind::NeedRecipient,
            "email needs at least one To recipient",
        ));
    }
    if email.to.iter().any(|to| to.is_empty()) {
        return Err(SmtpError::validation(
            SmtpErrorKind::EmptyRecipient,
            "To recipient is empty",
        ));
    }
    if email.has_no_content() {
        return Err(SmtpError::validation(
            SmtpErrorKind::EmptyData,
            "email has no subject, body or attachments",
        ));
    }
    Ok(())
}

/// Copies the email into an outgoing message and loads its attachments.
async fn build_message(email: Email, login: &str) -> SmtpResult<OutgoingMessage> {
    let mut message = OutgoingMessage::new();
    message.from = if email.from.is_empty() {
        login.to_string()
    } else {
        email.from
    };
    message.sender = email.sender;
    message.to = email.to;
    message.cc = email.cc;
    message.bcc = email.bcc;
    message.subject = email.subject;
    message.text = email.text;
    message.html = email.html;

    for attachment in email.attachments {
        if attachment.filename.is_empty() {
            return Err(SmtpError::validation(
                SmtpErrorKind::EmptyAttachFilename,
                "attachment filename is empty",
            ));
        }
        if attachment.requires_content_type() && attachment.content_type.is_empty() {
            return Err(SmtpError::validation(
                SmtpErrorKind::EmptyAttachContentType,
                format!("attachment {} has no content type", attachment.filename),
            ));
        }

        match attachment.source {
            AttachmentSource::Reader(reader) => {
                message
                    .attach_stream(attachment.filename, attachment.content_type, reader)
                    .await?
            }
            AttachmentSource::Bytes(data) if !data.is_empty() => {
                message.attach_bytes(attachment.filename, attachment.content_type, data)?
            }
            // Empty inline data falls back to reading the named file.
            AttachmentSource::Bytes(_) | AttachmentSource::File => {
                message.attach_file(&attachment.filename).await?
            }
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attachment, AttachmentSource};
    use rstest::rstest;
    use tokio_test::assert_err;

    // Nothing listens here; validation must fail before dialing.
    fn client() -> SmtpClient {
        SmtpClient::new(
            SmtpConfig::builder()
                .host("127.0.0.1:1")
                .login("login@localhost")
                .password("password")
                .build()
                .unwrap(),
        )
    }

    fn valid() -> Email {
        Email::builder()
            .to(["test@localhost"])
            .subject("subj")
            .text("text")
            .build()
    }

    #[rstest]
    #[case::fully_empty(Email::default(), SmtpErrorKind::EmptyData)]
    #[case::no_to(
        Email::builder().subject("s").blind_carbon_copy(["b@localhost"]).build(),
        SmtpErrorKind::NeedRecipient
    )]
    #[case::blank_to(
        Email::builder().to(["a@localhost", ""]).subject("s").build(),
        SmtpErrorKind::EmptyRecipient
    )]
    #[case::no_content(Email::builder().to(["a@localhost"]).build(), SmtpErrorKind::EmptyData)]
    fn test_validate_email(#[case] email: Email, #[case] kind: SmtpErrorKind) {
        let err = validate_email(&email).unwrap_err();
        assert_eq!(err.kind(), kind);
        assert!(err.kind().is_pre_flight());
    }

    #[test]
    fn test_validate_accepts_attachment_only() {
        let email = Email::builder()
            .to(["a@localhost"])
            .attach("a.txt", "text/plain", b"x".to_vec())
            .build();
        assert!(validate_email(&email).is_ok());
    }

    #[tokio::test]
    async fn test_empty_host_checked_first() {
        let mut config = client().config().clone();
        config.host = String::new();
        let client = SmtpClient::new(config);

        let err = client.send(Email::default()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::EmptyHost);
        assert_eq!(client.metrics().snapshot().emails_rejected, 1);
        assert_eq!(client.metrics().snapshot().connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_need_recipient_does_not_connect() {
        let client = client();
        let mut email = valid();
        email.to.clear();

        let err = assert_err!(client.send(email).await);
        assert_eq!(err.kind(), SmtpErrorKind::NeedRecipient);
        assert_eq!(client.metrics().snapshot().connection_attempts, 0);
    }

    #[rstest]
    #[case::bytes(Attachment::new("a.bin", "", b"data".to_vec()))]
    #[case::empty_bytes(Attachment::new("a.bin", "", Vec::new()))]
    #[case::reader(Attachment::from_reader("a.bin", "", &b"data"[..]))]
    #[tokio::test]
    async fn test_missing_content_type_fails_before_connect(#[case] attachment: Attachment) {
        let client = client();
        let mut email = valid();
        email.attachments.push(attachment);

        let err = client.send(email).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::EmptyAttachContentType);
        assert_eq!(client.metrics().snapshot().connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_missing_filename_fails_before_connect() {
        let client = client();
        let mut email = valid();
        email.attachments.push(Attachment::new("", "text/plain", b"x".to_vec()));

        let err = client.send(email).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::EmptyAttachFilename);
    }

    #[tokio::test]
    async fn test_missing_file_is_attachment_error() {
        let client = client();
        let mut email = valid();
        email
            .attachments
            .push(Attachment::from_file("/no/such/dir/missing.txt"));

        let err = client.send(email).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AttachmentError);
        assert_eq!(client.metrics().snapshot().emails_failed, 1);
    }

    #[tokio::test]
    async fn test_unparseable_recipient_fails_before_connect() {
        let client = client();
        let mut email = valid();
        email.to = vec!["not an address".to_string()];

        let err = client.send(email).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::MalformedAddress);
        assert_eq!(client.metrics().snapshot().connection_attempts, 0);
    }

    #[tokio::test]
    async fn test_build_message_defaults_from_and_loads_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"from disk").await.unwrap();

        let mut email = valid();
        email.attachments = vec![
            Attachment::new("inline.txt", "text/plain", b"inline".to_vec()),
            Attachment::from_reader("stream.txt", "text/plain", &b"streamed"[..]),
            Attachment {
                filename: path.to_string_lossy().into_owned(),
                content_type: "text/plain".to_string(),
                source: AttachmentSource::Bytes(Vec::new()),
            },
        ];

        let message = build_message(email, "login@localhost").await.unwrap();
        assert_eq!(message.from, "login@localhost");

        let names: Vec<_> = message
            .attachments()
            .iter()
            .map(|a| (a.filename.as_str(), a.data.as_slice()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("inline.txt", &b"inline"[..]),
                ("stream.txt", &b"streamed"[..]),
                ("notes.txt", &b"from disk"[..]),
            ]
        );
    }
}
