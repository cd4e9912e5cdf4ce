//! Captured message types and the typed MIME-to-message step.
//!
//! The capture listener hands the raw DATA payload and the SMTP envelope to
//! [`ParsedMessage::parse`], which validates the header block, lets
//! `mailparse` decode the MIME structure, and maps the result onto a strict
//! shape. Recipients come from [`resolve_recipients`].

use std::{collections::BTreeMap, sync::LazyLock};

use chrono::{DateTime, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::MessageParseError;

static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

/// Identifier of a captured message.
///
/// ULIDs sort by creation time, and ids are drawn from a monotonic generator
/// so two messages created in the same millisecond still order correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    #[must_use]
    pub fn generate() -> Self {
        let id = GENERATOR
            .lock()
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());
        Self { id }
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Parse an id from a filename such as `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`.
    ///
    /// Anything containing path separators or traversal sequences is rejected.
    #[must_use]
    pub fn from_filename(filename: &str, extension: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(extension)?.strip_suffix('.')?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim()).map(Self::new)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Protocol-level sender and recipients, as given by `MAIL FROM`/`RCPT TO`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// `None` for the null reverse-path `<>`.
    pub sender: Option<String>,
    pub recipients: Vec<String>,
}

/// A message received by the capture listener that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
    pub size: usize,
}

/// A stored captured message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedMessage {
    pub id: MessageId,
    pub from: String,
    /// Never empty.
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    /// Header names are lower-cased. Repeated headers are joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub size: usize,
}

impl CapturedMessage {
    #[must_use]
    pub fn from_parsed(id: MessageId, parsed: ParsedMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            from: parsed.from,
            to: parsed.to,
            subject: parsed.subject,
            text: parsed.text,
            html: parsed.html,
            headers: parsed.headers,
            received_at: parsed.received_at,
            created_at,
            size: parsed.size,
        }
    }

    /// Case-insensitive recipient match.
    #[must_use]
    pub fn is_addressed_to(&self, address: &str) -> bool {
        let address = address.trim();
        self.to.iter().any(|to| to.eq_ignore_ascii_case(address))
    }
}

/// Decide the recipient list of a captured message.
///
/// The `To` header wins when it parses to at least one address. Otherwise
/// the envelope recipients are used. Addresses are de-duplicated
/// case-insensitively, keeping the first spelling.
#[must_use]
pub fn resolve_recipients(header: Option<&str>, envelope: &[String]) -> Vec<String> {
    let from_header = header
        .and_then(|value| mailparse::addrparse(value).ok())
        .map(|list| {
            list.iter()
                .flat_map(|addr| match addr {
                    MailAddr::Single(single) => vec![single.addr.clone()],
                    MailAddr::Group(group) => {
                        group.addrs.iter().map(|single| single.addr.clone()).collect()
                    }
                })
                .collect::<Vec<_>>()
        })
        .map(dedup)
        .unwrap_or_default();

    if from_header.is_empty() {
        dedup(envelope.to_vec())
    } else {
        from_header
    }
}

fn dedup(addresses: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(addresses.len());
    for address in addresses {
        let address = address.trim();
        if address.is_empty() || unique.iter().any(|seen| seen.eq_ignore_ascii_case(address)) {
            continue;
        }
        unique.push(address.to_string());
    }
    unique
}

/// Reject payloads whose header block is not a sequence of `name: value`
/// lines (with folded continuations).
fn check_header_block(raw: &[u8]) -> Result<(), MessageParseError> {
    let mut headers = 0usize;

    for (index, line) in raw.split(|b| *b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }

        let number = index + 1;
        if matches!(line.first(), Some(b' ' | b'\t')) {
            if headers == 0 {
                return Err(MessageParseError::MalformedHeader {
                    line: number,
                    reason: "continuation line before any header",
                });
            }
            continue;
        }

        let Some(colon) = line.iter().position(|b| *b == b':') else {
            return Err(MessageParseError::MalformedHeader {
                line: number,
                reason: "missing ':' separator",
            });
        };

        let name = &line[..colon];
        if name.is_empty() || !name.iter().all(|b| (33..=126).contains(b)) {
            return Err(MessageParseError::MalformedHeader {
                line: number,
                reason: "invalid header name",
            });
        }

        headers += 1;
    }

    if headers == 0 {
        return Err(MessageParseError::MissingHeaders);
    }

    Ok(())
}

#[derive(Default)]
struct Bodies {
    text: Option<String>,
    html: Option<String>,
}

fn collect_bodies(part: &ParsedMail<'_>, bodies: &mut Bodies) -> Result<(), MessageParseError> {
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect_bodies(sub, bodies)?;
        }
        return Ok(());
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(());
    }

    let slot = match mimetype.as_str() {
        "text/plain" => &mut bodies.text,
        "text/html" => &mut bodies.html,
        _ => return Ok(()),
    };

    if slot.is_none() {
        let body = part
            .get_body()
            .map_err(|err| MessageParseError::Body(err.to_string()))?;
        *slot = Some(body);
    }

    Ok(())
}

impl ParsedMessage {
    /// Map a raw DATA payload and its envelope onto a [`ParsedMessage`].
    pub fn parse(raw: &[u8], envelope: &Envelope) -> Result<Self, MessageParseError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(MessageParseError::Empty);
        }

        check_header_block(raw)?;

        let mail =
            mailparse::parse_mail(raw).map_err(|err| MessageParseError::Mime(err.to_string()))?;

        let mut headers = BTreeMap::<String, String>::new();
        for header in &mail.headers {
            let key = header.get_key().to_ascii_lowercase();
            let value = header.get_value();
            headers
                .entry(key)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let from = mail
            .headers
            .get_first_value("From")
            .map(|from| from.trim().to_string())
            .filter(|from| !from.is_empty())
            .or_else(|| envelope.sender.clone())
            .unwrap_or_default();

        let to = resolve_recipients(
            mail.headers.get_first_value("To").as_deref(),
            &envelope.recipients,
        );
        if to.is_empty() {
            return Err(MessageParseError::NoRecipients);
        }

        let mut bodies = Bodies::default();
        collect_bodies(&mail, &mut bodies)?;

        Ok(Self {
            from,
            to,
            subject: mail
                .headers
                .get_first_value("Subject")
                .unwrap_or_default(),
            text: bodies.text,
            html: bodies.html,
            headers,
            received_at: Utc::now(),
            size: raw.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn envelope(recipients: &[&str]) -> Envelope {
        Envelope {
            sender: Some("bounce@example.com".to_string()),
            recipients: recipients.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn header_recipients_win_when_present() {
        let to = resolve_recipients(
            Some("Alice <a@example.com>, b@example.com"),
            &["envelope@example.com".to_string()],
        );
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn envelope_used_when_header_absent() {
        let envelope = vec!["x@example.com".to_string(), "y@example.com".to_string()];
        assert_eq!(resolve_recipients(None, &envelope), envelope);
    }

    #[test]
    fn envelope_used_when_header_empty_or_unparsable() {
        let envelope = vec!["x@example.com".to_string()];
        assert_eq!(resolve_recipients(Some(""), &envelope), envelope);
        assert_eq!(resolve_recipients(Some("   "), &envelope), envelope);
        assert_eq!(resolve_recipients(Some("undisclosed-recipients:;"), &envelope), envelope);
    }

    #[test]
    fn recipients_are_deduplicated_case_insensitively() {
        let to = resolve_recipients(Some("A@Example.com, a@example.com, b@example.com"), &[]);
        assert_eq!(to, vec!["A@Example.com", "b@example.com"]);
    }

    #[test]
    fn group_members_are_flattened() {
        let to = resolve_recipients(Some("Team: a@example.com, b@example.com;"), &[]);
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn parses_multipart_alternative() {
        let raw = concat!(
            "From: IT Support <it@example.com>\r\n",
            "To: a@example.com, b@example.com\r\n",
            "Subject: Password expiry\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/alternative; boundary=\"xyz\"\r\n",
            "\r\n",
            "--xyz\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "Click the link\r\n",
            "--xyz\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Click the <a href=\"#\">link</a></p>\r\n",
            "--xyz--\r\n",
        );

        let parsed = ParsedMessage::parse(raw.as_bytes(), &envelope(&["c@example.com"])).unwrap();

        assert_eq!(parsed.from, "IT Support <it@example.com>");
        assert_eq!(parsed.to, vec!["a@example.com", "b@example.com"]);
        assert_eq!(parsed.subject, "Password expiry");
        assert_eq!(parsed.text.as_deref().map(str::trim), Some("Click the link"));
        assert!(parsed.html.as_deref().is_some_and(|h| h.contains("<a href")));
        assert_eq!(parsed.headers.get("mime-version").map(String::as_str), Some("1.0"));
        assert_eq!(parsed.size, raw.len());
    }

    #[test]
    fn falls_back_to_envelope_for_sender_and_recipients() {
        let raw = b"Subject: No addressing\r\n\r\nbody\r\n";
        let parsed =
            ParsedMessage::parse(raw, &envelope(&["x@example.com", "y@example.com"])).unwrap();

        assert_eq!(parsed.from, "bounce@example.com");
        assert_eq!(parsed.to, vec!["x@example.com", "y@example.com"]);
        assert_eq!(parsed.text.as_deref().map(str::trim), Some("body"));
        assert!(parsed.html.is_none());
    }

    #[test]
    fn attachments_are_not_bodies() {
        let raw = concat!(
            "To: a@example.com\r\n",
            "Content-Type: multipart/mixed; boundary=b\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Disposition: attachment; filename=notes.txt\r\n",
            "\r\n",
            "attached\r\n",
            "--b--\r\n",
        );
        let parsed = ParsedMessage::parse(raw.as_bytes(), &envelope(&[])).unwrap();
        assert!(parsed.text.is_none());
    }

    #[test]
    fn repeated_headers_are_joined() {
        let raw = b"Received: one\r\nReceived: two\r\nTo: a@example.com\r\n\r\n";
        let parsed = ParsedMessage::parse(raw, &envelope(&[])).unwrap();
        assert_eq!(parsed.headers["received"], "one, two");
    }

    #[test]
    fn rejects_malformed_payloads() {
        let env = envelope(&["a@example.com"]);

        assert_eq!(ParsedMessage::parse(b"", &env), Err(MessageParseError::Empty));
        assert_eq!(ParsedMessage::parse(b"\r\n\r\n", &env), Err(MessageParseError::Empty));
        assert!(matches!(
            ParsedMessage::parse(b"this is not a header\r\n\r\nbody\r\n", &env),
            Err(MessageParseError::MalformedHeader { line: 1, .. })
        ));
        assert!(matches!(
            ParsedMessage::parse(b" folded first\r\nSubject: x\r\n\r\n", &env),
            Err(MessageParseError::MalformedHeader { line: 1, .. })
        ));
        assert!(matches!(
            ParsedMessage::parse(b"Subject: ok\r\nBad Name: x\r\n\r\n", &env),
            Err(MessageParseError::MalformedHeader { line: 2, .. })
        ));
        assert_eq!(
            ParsedMessage::parse(b"\r\nbody only\r\n", &env),
            Err(MessageParseError::MissingHeaders)
        );
    }

    #[test]
    fn requires_some_recipient() {
        let raw = b"Subject: nobody\r\n\r\nhello\r\n";
        assert_eq!(
            ParsedMessage::parse(raw, &Envelope::default()),
            Err(MessageParseError::NoRecipients)
        );
    }

    #[test]
    fn message_ids_are_monotonic_and_filename_safe() {
        let first = MessageId::generate();
        let second = MessageId::generate();
        assert!(second > first);

        let name = format!("{first}.bin");
        assert_eq!(MessageId::from_filename(&name, "bin"), Some(first));
        assert_eq!(MessageId::from_filename(&name, "eml"), None);
        assert_eq!(MessageId::from_filename("../x.bin", "bin"), None);
        assert_eq!(MessageId::from_filename("not-a-ulid.bin", "bin"), None);
        assert_eq!(first.to_string().parse::<MessageId>().ok(), Some(first));
    }
}
