//! MIME encoding for outgoing messages.
//!
//! [`OutgoingMessage`] collects headers, bodies and attachment data and
//! serializes them to RFC 5322 with MIME:
//! - `text/plain` or `text/html` alone
//! - `multipart/alternative` for text + HTML
//! - `multipart/mixed` once attachments are present
//!
//! Header values are RFC 2047 encoded when not plain ASCII, bodies are
//! quoted-printable and attachments base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::address::Address;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const QUOTED_PRINTABLE: &str = "quoted-printable";
const BASE64_ENCODING: &str = "base64";
/// Raw bytes per RFC 2047 encoded word; 45 bytes encode to 60 base64 chars.
const ENCODED_WORD_BYTES: usize = 45;

/// Attachment data ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFile {
    /// Name shown to the recipient.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

/// Message being assembled for one delivery.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// From mailbox.
    pub from: String,
    /// Sender mailbox.
    pub sender: Option<String>,
    /// To mailboxes.
    pub to: Vec<String>,
    /// Cc mailboxes.
    pub cc: Vec<String>,
    /// Bcc mailboxes, never written to the headers.
    pub bcc: Vec<String>,
    /// Subject.
    pub subject: String,
    /// Plain text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    attachments: Vec<AttachedFile>,
    date: DateTime<Utc>,
    message_id: String,
}

impl Default for OutgoingMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl OutgoingMessage {
    /// Creates an empty message with a fresh Message-ID and Date.
    pub fn new() -> Self {
        Self {
            from: String::new(),
            sender: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            text: None,
            html: None,
            attachments: Vec::new(),
            date: Utc::now(),
            message_id: String::new(),
        }
    }

    /// Returns the Message-ID, without angle brackets.
    ///
    /// Generated on first use from the From domain.
    pub fn message_id(&mut self) -> &str {
        if self.message_id.is_empty() {
            let domain = Address::parse(&self.from)
                .ok()
                .and_then(|a| a.email.rsplit_once('@').map(|(_, d)| d.to_string()))
                .unwrap_or_else(|| "localhost".to_string());
            self.message_id = format!(
                "{}.{}@{}",
                Uuid::new_v4().simple(),
                self.date.timestamp(),
                domain
            );
        }
        &self.message_id
    }

    /// Returns the attachments added so far.
    pub fn attachments(&self) -> &[AttachedFile] {
        &self.attachments
    }

    /// Attaches inline data.
    pub fn attach_bytes(
        &mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> SmtpResult<()> {
        let content_type = content_type.into();
        validate_content_type(&content_type)?;
        self.attachments.push(AttachedFile {
            filename: filename.into(),
            content_type,
            data,
        });
        Ok(())
    }

    /// Attaches everything `reader` yields until end of stream.
    pub async fn attach_stream<R>(
        &mut self,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        mut reader: R,
    ) -> SmtpResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let filename = filename.into();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.map_err(|e| {
            SmtpError::attachment(format!("read attachment {}: {}", filename, e)).with_cause(e)
        })?;
        self.attach_bytes(filename, content_type, data)
    }

    /// Attaches a local file under its base name, guessing the content type.
    pub async fn attach_file(&mut self, path: impl AsRef<Path>) -> SmtpResult<()> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| {
            SmtpError::attachment(format!("open {}: {}", path.display(), e)).with_cause(e)
        })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SmtpError::attachment(format!("{} does not name a file", path.display()))
            })?;
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        self.attach_bytes(filename, content_type, data)
    }

    /// Serializes headers, bodies and attachments.
    pub fn serialize(&mut self) -> SmtpResult<Vec<u8>> {
        let message_id = self.message_id().to_string();
        let encoder = MimeEncoder::new(self.date);
        let mut output = Vec::new();

        encoder.write_header(&mut output, "From", &encoder.encode_mailbox(&self.from)?)?;
        if let Some(sender) = self.sender.as_deref().filter(|s| !s.is_empty()) {
            encoder.write_header(&mut output, "Sender", &encoder.encode_mailbox(sender)?)?;
        }
        if !self.to.is_empty() {
            encoder.write_header(&mut output, "To", &encoder.encode_mailbox_list(&self.to)?)?;
        }
        if !self.cc.is_empty() {
            encoder.write_header(&mut output, "Cc", &encoder.encode_mailbox_list(&self.cc)?)?;
        }
        encoder.write_header(&mut output, "Subject", &encoder.encode_header(&self.subject))?;
        encoder.write_header(&mut output, "Date", &encoder.format_date())?;
        encoder.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        encoder.write_header(&mut output, "MIME-Version", "1.0")?;

        let text = self.text.as_deref().filter(|t| !t.is_empty());
        let html = self.html.as_deref().filter(|h| !h.is_empty());

        if self.attachments.is_empty() {
            encoder.write_body(&mut output, text, html)?;
            return Ok(output);
        }

        let boundary = MimeEncoder::generate_boundary();
        encoder.write_header(
            &mut output,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{}\"", boundary),
        )?;
        output.extend_from_slice(b"\r\n");

        if text.is_some() || html.is_some() {
            output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            encoder.write_body(&mut output, text, html)?;
            output.extend_from_slice(b"\r\n");
        }

        for attachment in &self.attachments {
            output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            encoder.write_attachment(&mut output, attachment)?;
        }

        output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        Ok(output)
    }
}

fn validate_content_type(content_type: &str) -> SmtpResult<()> {
    content_type.parse::<mime::Mime>().map(|_| ()).map_err(|e| {
        SmtpError::new(
            SmtpErrorKind::InvalidHeader,
            format!("invalid content type {:?}: {}", content_type, e),
        )
    })
}

/// Low level MIME writer.
#[derive(Debug, Clone)]
pub struct MimeEncoder {
    date: DateTime<Utc>,
}

impl MimeEncoder {
    /// Creates an encoder stamping messages with `date`.
    pub fn new(date: DateTime<Utc>) -> Self {
        Self { date }
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
        if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':' || c == ' ') {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            ));
        }
        if value.contains(['\r', '\n']) {
            return Err(SmtpError::new(
                SmtpErrorKind::InvalidHeader,
                format!("Line break in {} header", name),
            ));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(Self::fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Folds a header line at 78 characters.
    fn fold_header(header: &str) -> String {
        if header.len() <= 78 {
            return header.to_string();
        }

        let mut result = String::with_capacity(header.len() + 8);
        let mut line_len = 0;

        for (i, word) in header.split(' ').enumerate() {
            if i == 0 {
                result.push_str(word);
                line_len = word.len();
            } else if line_len + 1 + word.len() <= 76 {
                result.push(' ');
                result.push_str(word);
                line_len += 1 + word.len();
            } else {
                result.push_str("\r\n ");
                result.push_str(word);
                line_len = 1 + word.len();
            }
        }

        result
    }

    /// Encodes a header value using RFC 2047.
    ///
    /// Long values become several space-separated encoded words, each within
    /// the 75 character limit, so that `fold_header` can break between them.
    /// Words never split a UTF-8 sequence.
    fn encode_header(&self, value: &str) -> String {
        if value.is_ascii() {
            return value.to_string();
        }

        let mut words = Vec::new();
        let mut start = 0;
        for (idx, ch) in value.char_indices() {
            if idx + ch.len_utf8() - start > ENCODED_WORD_BYTES {
                words.push(&value[start..idx]);
                start = idx;
            }
        }
        words.push(&value[start..]);

        words
            .iter()
            .map(|chunk| format!("=?UTF-8?B?{}?=", BASE64.encode(chunk.as_bytes())))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Formats a mailbox for a header, encoding a non-ASCII display name.
    fn encode_mailbox(&self, mailbox: &str) -> SmtpResult<String> {
        let address = Address::parse(mailbox)?;
        Ok(match address.name() {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", self.encode_header(name), address.email())
            }
            _ => address.to_header(),
        })
    }

    fn encode_mailbox_list(&self, mailboxes: &[String]) -> SmtpResult<String> {
        let encoded = mailboxes
            .iter()
            .map(|m| self.encode_mailbox(m))
            .collect::<SmtpResult<Vec<_>>>()?;
        Ok(encoded.join(", "))
    }

    /// Encodes text using quoted-printable, with CRLF line endings.
    fn encode_quoted_printable(text: &str) -> Vec<u8> {
        let normalized = text.replace("\r\n", "\n").replace('\n', "\r\n");
        quoted_printable::encode(normalized.as_bytes())
    }

    /// Generates a unique boundary.
    fn generate_boundary() -> String {
        format!("----=_Part_{}", Uuid::new_v4().simple())
    }

    /// Formats the date for the Date header.
    fn format_date(&self) -> String {
        self.date.to_rfc2822()
    }

    fn write_text_part(
        &self,
        output: &mut Vec<u8>,
        content_type: &str,
        body: &str,
    ) -> SmtpResult<()> {
        self.write_header(output, "Content-Type", content_type)?;
        self.write_header(output, "Content-Transfer-Encoding", QUOTED_PRINTABLE)?;
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&Self::encode_quoted_printable(body));
        Ok(())
    }

    /// Writes the body entity: one text part, or both as alternatives.
    fn write_body(
        &self,
        output: &mut Vec<u8>,
        text: Option<&str>,
        html: Option<&str>,
    ) -> SmtpResult<()> {
        match (text, html) {
            (Some(text), Some(html)) => {
                let boundary = Self::generate_boundary();
                self.write_header(
                    output,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{}\"", boundary),
                )?;
                output.extend_from_slice(b"\r\n");

                output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
                self.write_text_part(output, TEXT_PLAIN, text)?;
                output.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
                self.write_text_part(output, TEXT_HTML, html)?;
                output.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
                Ok(())
            }
            (None, Some(html)) => self.write_text_part(output, TEXT_HTML, html),
            (text, None) => self.write_text_part(output, TEXT_PLAIN, text.unwrap_or("")),
        }
    }

    /// Writes an attachment.
    fn write_attachment(
        &self,
        output: &mut Vec<u8>,
        attachment: &AttachedFile,
    ) -> SmtpResult<()> {
        let name = self.encode_header(&attachment.filename).replace('"', "\\\"");
        self.write_header(
            output,
            "Content-Type",
            &format!("{}; name=\"{}\"", attachment.content_type, name),
        )?;
        self.write_header(output, "Content-Transfer-Encoding", BASE64_ENCODING)?;
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", name),
        )?;
        output.extend_from_slice(b"\r\n");

        let encoded = BASE64.encode(&attachment.data);
        for chunk in encoded.as_bytes().chunks(76) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }

    /// Prepares the DATA content with dot-stuffing.
    ///
    /// Bare LF line endings become CRLF, and the result ends with the
    /// `<CRLF>.<CRLF>` terminator.
    pub fn prepare_data_content(message: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(message.len() + message.len() / 64 + 5);
        let mut at_line_start = true;
        let mut previous = 0u8;

        for &byte in message {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }
            if byte == b'\n' && previous != b'\r' {
                output.push(b'\r');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
            previous = byte;
        }

        if !output.is_empty() && !output.ends_with(b"\r\n") {
            output.extend_from_slice(b"\r\n");
        }
        output.extend_from_slice(b".\r\n");

        output
    }
}
