//! Composition of outbound messages.
//!
//! [`OutgoingMail`] is what callers hand to the mail subsystem. Composing
//! it yields an RFC 5322 message with a fresh `Message-ID`, ready for the
//! DATA phase.

use core::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

const FALLBACK_DOMAIN: &str = "lure.localhost";

/// A message to send. `from` falls back to the configured sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub from: Option<String>,
    /// Extra headers, written after the standard ones.
    pub headers: Vec<(String, String)>,
}

/// A composed message and the envelope to send it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composed {
    /// `Message-ID` value including the angle brackets.
    pub message_id: String,
    pub from: String,
    pub recipients: Vec<String>,
    pub data: String,
}

impl OutgoingMail {
    #[must_use]
    pub fn new<I, S>(to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: to.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Build the message text, sending as `default_from` unless the mail
    /// names its own sender.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::NoRecipients`] for an empty recipient list
    /// and [`DeliveryError::InvalidAddress`] for anything that is not a bare
    /// `local@domain` address.
    pub fn compose(&self, default_from: &str) -> Result<Composed, DeliveryError> {
        let from = self.from.as_deref().unwrap_or(default_from).trim();
        validate_address(from)?;

        let recipients = self
            .to
            .iter()
            .map(|address| address.trim())
            .filter(|address| !address.is_empty())
            .map(|address| validate_address(address).map(|()| address.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let domain = from
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
            .unwrap_or(FALLBACK_DOMAIN);
        let message_id = format!("<{}@{domain}>", ulid::Ulid::new());

        let mut data = String::new();
        let _ = write!(data, "Date: {}\r\n", Utc::now().to_rfc2822());
        let _ = write!(data, "From: {from}\r\n");
        let _ = write!(data, "To: {}\r\n", recipients.join(", "));
        let _ = write!(data, "Subject: {}\r\n", encode_header(&self.subject));
        let _ = write!(data, "Message-ID: {message_id}\r\n");
        for (name, value) in &self.headers {
            let name = name.trim();
            if name.is_empty() || name.contains(|c: char| c == ':' || c.is_whitespace()) {
                continue;
            }
            let _ = write!(data, "{name}: {}\r\n", encode_header(value));
        }
        data.push_str("MIME-Version: 1.0\r\n");
        self.write_body(&mut data);

        Ok(Composed {
            message_id,
            from: from.to_string(),
            recipients,
            data,
        })
    }

    fn write_body(&self, data: &mut String) {
        match (self.text.as_deref(), self.html.as_deref()) {
            (Some(text), Some(html)) => {
                let boundary = format!("lure-{}", ulid::Ulid::new());
                let _ = write!(
                    data,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );
                let _ = write!(data, "--{boundary}\r\n");
                write_part(data, "text/plain", text);
                let _ = write!(data, "\r\n--{boundary}\r\n");
                write_part(data, "text/html", html);
                let _ = write!(data, "\r\n--{boundary}--\r\n");
            }
            (None, Some(html)) => write_part(data, "text/html", html),
            (text, None) => write_part(data, "text/plain", text.unwrap_or_default()),
        }
    }
}

fn write_part(data: &mut String, content_type: &str, body: &str) {
    let _ = write!(
        data,
        "Content-Type: {content_type}; charset=utf-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n"
    );
    for line in body.lines() {
        data.push_str(line);
        data.push_str("\r\n");
    }
}

/// Header values cannot carry line breaks; non-ASCII text is sent as an
/// RFC 2047 encoded word.
fn encode_header(value: &str) -> String {
    let value = value.replace(['\r', '\n'], " ");
    if value.is_ascii() {
        value
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn validate_address(address: &str) -> Result<(), DeliveryError> {
    let valid = address
        .rsplit_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
        && !address.contains(|c: char| c.is_whitespace() || c.is_control() || "<>,;".contains(c));

    if valid {
        Ok(())
    } else {
        Err(DeliveryError::InvalidAddress(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use mailparse::MailHeaderMap;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_message_has_standard_headers() {
        let composed = OutgoingMail::new(["a@example.com", " b@example.com "])
            .subject("Quarterly review")
            .text("Hello\n.leading dot")
            .compose("security@example.com")
            .unwrap();

        assert_eq!(composed.from, "security@example.com");
        assert_eq!(composed.recipients, vec!["a@example.com", "b@example.com"]);
        assert!(composed.message_id.starts_with('<'));
        assert!(composed.message_id.ends_with("@example.com>"));

        let parsed = mailparse::parse_mail(composed.data.as_bytes()).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("To").as_deref(),
            Some("a@example.com, b@example.com")
        );
        assert_eq!(
            parsed.headers.get_first_value("Message-ID"),
            Some(composed.message_id.clone())
        );
        assert_eq!(parsed.get_body().unwrap(), "Hello\r\n.leading dot\r\n");
    }

    #[test]
    fn text_and_html_become_alternatives() {
        let composed = OutgoingMail::new(["a@example.com"])
            .subject("Héllo")
            .text("plain")
            .html("<p>rich</p>")
            .compose("security@example.com")
            .unwrap();

        let parsed = mailparse::parse_mail(composed.data.as_bytes()).unwrap();
        assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[1].ctype.mimetype, "text/html");
        assert_eq!(
            parsed.headers.get_first_value("Subject").as_deref(),
            Some("Héllo")
        );
    }

    #[test]
    fn header_injection_is_flattened() {
        let composed = OutgoingMail::new(["a@example.com"])
            .subject("Hi\r\nBcc: victim@example.com")
            .header("X-Campaign", "42")
            .header("Bad Name", "dropped")
            .compose("security@example.com")
            .unwrap();

        assert!(!composed.data.contains("\r\nBcc:"));
        assert!(composed.data.contains("X-Campaign: 42\r\n"));
        assert!(!composed.data.contains("dropped"));
    }

    #[test]
    fn explicit_sender_wins() {
        let composed = OutgoingMail::new(["a@example.com"])
            .from("it@example.org")
            .compose("security@example.com")
            .unwrap();

        assert_eq!(composed.from, "it@example.org");
    }

    #[test]
    fn bad_addresses_are_rejected() {
        assert!(matches!(
            OutgoingMail::new(Vec::<String>::new()).compose("security@example.com"),
            Err(DeliveryError::NoRecipients)
        ));
        assert!(matches!(
            OutgoingMail::new(["not-an-address"]).compose("security@example.com"),
            Err(DeliveryError::InvalidAddress(address)) if address == "not-an-address"
        ));
        assert!(matches!(
            OutgoingMail::new(["a@example.com"]).compose("a b@example.com"),
            Err(DeliveryError::InvalidAddress(_))
        ));
    }
}
