//! Mailbox parsing and envelope resolution.
//!
//! Header fields hold RFC 5322 mailboxes (`"Jane Doe" <jane@example.com>`),
//! the SMTP envelope holds bare addresses. Everything in this module turns the
//! former into the latter.

use mailparse::{MailAddr, SingleInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Maximum length of an address (RFC 5321 path limit minus brackets).
pub const MAX_ADDRESS_LEN: usize = 254;

/// Maximum length of the local part.
pub const MAX_LOCAL_PART_LEN: usize = 64;

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
    /// Bare address (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Parses a single RFC 5322 mailbox.
    ///
    /// Accepts a bare addr-spec (`jane@example.com`) or a name-addr
    /// (`Jane <jane@example.com>`). Groups and lists of several mailboxes
    /// are rejected.
    pub fn parse(s: &str) -> SmtpResult<Self> {
        let s = s.trim();
        let Some((open, close)) = find_angle_addr(s)? else {
            validate_addr_spec(s)?;
            return Ok(Self {
                name: None,
                email: s.to_string(),
            });
        };

        if !s[close + 1..].trim().is_empty() {
            return Err(SmtpError::malformed_address(
                "mail: unexpected text after address",
            ));
        }
        let email = &s[open + 1..close];
        validate_addr_spec(email)?;

        // The addr-spec is already checked; only the display name goes
        // through mailparse, which also rejects lists and groups.
        let name_only = format!("{}<mailbox@invalid>", &s[..open]);
        let list = mailparse::addrparse(&name_only).map_err(|e| {
            SmtpError::malformed_address(format!("mail: {}", e)).with_cause(e)
        })?;

        let single = match &list[..] {
            [MailAddr::Single(single)] => single,
            [MailAddr::Group(_)] => {
                return Err(SmtpError::malformed_address(
                    "mail: expected single address, found group",
                ))
            }
            [] => return Err(SmtpError::malformed_address("mail: no address")),
            _ => {
                return Err(SmtpError::malformed_address(
                    "mail: expected single address",
                ))
            }
        };

        Ok(Self {
            name: display_name(single),
            email: email.to_string(),
        })
    }

    /// Returns the bare address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for email headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => {
                // Quote name if it contains special characters
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name.replace('"', "\\\""), self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            None => format!("<{}>", self.email),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

fn display_name(single: &SingleInfo) -> Option<String> {
    single
        .display_name
        .as_ref()
        .filter(|name| !name.is_empty())
        .cloned()
}

/// Locates the `<...>` of a name-addr, skipping quoted display names.
///
/// Returns the byte offsets of the brackets, or `None` for a bare addr-spec.
fn find_angle_addr(s: &str) -> SmtpResult<Option<(usize, usize)>> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut open = None;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes && open.is_none() => open = Some(i),
            '>' if !in_quotes => {
                return match open {
                    Some(open) => Ok(Some((open, i))),
                    None => Err(SmtpError::malformed_address("mail: unmatched '>'")),
                }
            }
            _ => {}
        }
    }

    match open {
        Some(_) => Err(SmtpError::malformed_address("mail: unclosed angle-addr")),
        None => Ok(None),
    }
}

/// RFC 5322 atext; UTF-8 is allowed as in RFC 6532.
fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c) || !c.is_ascii()
}

fn is_dot_atom(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
}

fn is_quoted_string(s: &str) -> bool {
    let Some(inner) = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return false;
    };

    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(quoted) if quoted == ' ' || quoted == '\t' || quoted.is_ascii_graphic() => {}
                Some(quoted) if !quoted.is_ascii() => {}
                _ => return false,
            },
            '"' => return false,
            ' ' | '\t' => {}
            c if c.is_ascii_graphic() || !c.is_ascii() => {}
            _ => return false,
        }
    }
    true
}

fn is_domain_literal(s: &str) -> bool {
    s.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map_or(false, |inner| {
            inner
                .chars()
                .all(|c| c.is_ascii_graphic() && !matches!(c, '[' | ']' | '\\'))
        })
}

/// Checks a bare address against the RFC 5322 addr-spec grammar and the
/// RFC 5321 length limits.
fn validate_addr_spec(email: &str) -> SmtpResult<()> {
    if email.is_empty() {
        return Err(SmtpError::malformed_address("mail: no address"));
    }

    if email.len() > MAX_ADDRESS_LEN {
        return Err(SmtpError::malformed_address(format!(
            "mail: address too long (max {} characters)",
            MAX_ADDRESS_LEN
        )));
    }

    if email.chars().any(|c| c.is_control()) {
        return Err(SmtpError::malformed_address(
            "mail: address contains control characters",
        ));
    }

    // A quoted local part may itself contain '@'.
    let (local, domain) = email
        .rsplit_once('@')
        .ok_or_else(|| SmtpError::malformed_address("mail: missing @ in addr-spec"))?;

    if local.is_empty() || local.len() > MAX_LOCAL_PART_LEN {
        return Err(SmtpError::malformed_address(format!(
            "mail: local part must be 1-{} characters",
            MAX_LOCAL_PART_LEN
        )));
    }

    if !is_dot_atom(local) && !is_quoted_string(local) {
        return Err(SmtpError::malformed_address(format!(
            "mail: invalid local part {:?}",
            local
        )));
    }

    if domain.is_empty() {
        return Err(SmtpError::malformed_address("mail: missing domain"));
    }

    if !is_dot_atom(domain) && !is_domain_literal(domain) {
        return Err(SmtpError::malformed_address(format!(
            "mail: invalid domain {:?}",
            domain
        )));
    }

    Ok(())
}

/// Resolves a batch of mailboxes to bare addresses, preserving order.
///
/// One bad entry fails the whole batch.
pub fn resolve_addresses<S: AsRef<str>>(mailboxes: &[S]) -> SmtpResult<Vec<String>> {
    mailboxes
        .iter()
        .map(|m| Address::parse(m.as_ref()).map(|a| a.email))
        .collect()
}

/// Resolves the envelope sender: the Sender override when set, else From.
pub fn resolve_sender(sender: Option<&str>, from: &str) -> SmtpResult<String> {
    match sender.filter(|s| !s.is_empty()) {
        Some(sender) => Address::parse(sender).map(|a| a.email),
        None => Address::parse(from).map(|a| a.email),
    }
}

/// Envelope of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path for MAIL FROM.
    pub sender: String,
    /// Forward paths for RCPT TO, To then Cc then Bcc.
    pub recipients: Vec<String>,
}

impl Envelope {
    /// Resolves the envelope from header mailboxes.
    ///
    /// `recipients` is the merged To, Cc and Bcc list.
    pub fn resolve<S: AsRef<str>>(
        sender: Option<&str>,
        from: &str,
        recipients: &[S],
    ) -> SmtpResult<Self> {
        let recipients = resolve_addresses(recipients)?;
        if from.is_empty() || recipients.is_empty() {
            return Err(SmtpError::validation(
                SmtpErrorKind::MissingEnvelope,
                "must specify at least one From address and one To address",
            ));
        }
        let sender = resolve_sender(sender, from)?;
        Ok(Self { sender, recipients })
    }
}
