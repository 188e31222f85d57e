//! Core types for the mail sender.
//!
//! This module provides:
//! - The [`Email`] value and its fluent [`EmailBuilder`]
//! - Attachments with their three possible data sources
//! - The [`SendResult`] of a successful delivery

use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Readable attachment source.
pub type AttachmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Where the bytes of an attachment come from.
pub enum AttachmentSource {
    /// Inline data.
    Bytes(Vec<u8>),
    /// Stream, read to the end at send time.
    Reader(AttachmentReader),
    /// Local file named by the attachment's filename.
    File,
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSource::Bytes(data) => f.debug_tuple("Bytes").field(&data.len()).finish(),
            AttachmentSource::Reader(_) => f.write_str("Reader"),
            AttachmentSource::File => f.write_str("File"),
        }
    }
}

/// File attachment.
#[derive(Debug)]
pub struct Attachment {
    /// Filename, or the path to read for [`AttachmentSource::File`].
    pub filename: String,
    /// Declared MIME content type, empty when not declared.
    pub content_type: String,
    /// Data source.
    pub source: AttachmentSource,
}

impl Attachment {
    /// Creates an attachment from inline data.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            source: AttachmentSource::Bytes(data),
        }
    }

    /// Creates an attachment read from a stream at send time.
    pub fn from_reader(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            source: AttachmentSource::Reader(Box::new(reader)),
        }
    }

    /// Creates an attachment read from a local file at send time.
    ///
    /// The content type is guessed from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self {
            filename: path.as_ref().to_string_lossy().into_owned(),
            content_type: String::new(),
            source: AttachmentSource::File,
        }
    }

    /// Returns true if the data is inline or streamed, which requires a
    /// declared content type.
    pub fn requires_content_type(&self) -> bool {
        !matches!(self.source, AttachmentSource::File)
    }
}

/// An email to deliver.
///
/// Addresses are RFC 5322 mailbox strings (`"Jane <jane@example.com>"`);
/// they are parsed when the email is sent.
#[derive(Debug, Default)]
pub struct Email {
    /// Subject.
    pub subject: String,
    /// From mailbox. Defaults to the client login when empty.
    pub from: String,
    /// Sender mailbox, used as envelope sender instead of From.
    pub sender: Option<String>,
    /// Primary recipients.
    pub to: Vec<String>,
    /// CC recipients.
    pub cc: Vec<String>,
    /// BCC recipients.
    pub bcc: Vec<String>,
    /// Plain text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// Attachments, in order.
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Creates a new email builder.
    pub fn builder() -> EmailBuilder {
        EmailBuilder::default()
    }

    /// Appends primary recipients.
    pub fn with_to<I, S>(&mut self, recipients: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Appends CC recipients.
    pub fn with_carbon_copy<I, S>(&mut self, recipients: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc.extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Appends BCC recipients.
    pub fn with_blind_carbon_copy<I, S>(&mut self, recipients: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bcc.extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Returns all recipients (to + cc + bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns true if the text body is present and non-empty.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().map_or(false, |t| !t.is_empty())
    }

    /// Returns true if the HTML body is present and non-empty.
    pub fn has_html(&self) -> bool {
        self.html.as_deref().map_or(false, |h| !h.is_empty())
    }

    /// Returns true if there is nothing to send besides addresses.
    pub fn has_no_content(&self) -> bool {
        self.subject.is_empty()
            && !self.has_text()
            && !self.has_html()
            && self.attachments.is_empty()
    }
}

/// Builder for Email messages.
///
/// Each setter overwrites the previous value of its field; the recipient
/// setters replace the whole list. Attachments accumulate.
#[derive(Debug, Default)]
pub struct EmailBuilder {
    email: Email,
}

impl EmailBuilder {
    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.email.subject = subject.into();
        self
    }

    /// Sets the From mailbox.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.email.from = from.into();
        self
    }

    /// Sets the Sender mailbox.
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.email.sender = Some(sender.into());
        self
    }

    /// Sets the primary recipients.
    pub fn to<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email.to = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the CC recipients.
    pub fn carbon_copy<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email.cc = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the BCC recipients.
    pub fn blind_carbon_copy<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email.bcc = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the plain text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.email.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.email.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.email.attachments.push(attachment);
        self
    }

    /// Attaches inline data.
    pub fn attach(
        self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        self.attachment(Attachment::new(filename, content_type, data.into()))
    }

    /// Attaches data read from a stream at send time.
    pub fn attach_from_reader(
        self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        self.attachment(Attachment::from_reader(filename, content_type, reader))
    }

    /// Attaches a local file, read at send time.
    pub fn attach_from_file(self, path: impl AsRef<Path>) -> Self {
        self.attachment(Attachment::from_file(path))
    }

    /// Builds the email.
    ///
    /// Nothing is validated here; [`SmtpClient::send`](crate::client::SmtpClient::send)
    /// checks the email before connecting.
    pub fn build(self) -> Email {
        self.email
    }
}

/// Result of sending a single email.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Message-ID header of the sent message, without angle brackets.
    pub message_id: String,
    /// Envelope sender.
    pub sender: String,
    /// Envelope recipients, all of which were accepted.
    pub recipients: Vec<String>,
    /// Server reply to the message data.
    pub response: String,
    /// Send duration.
    pub duration: Duration,
}
