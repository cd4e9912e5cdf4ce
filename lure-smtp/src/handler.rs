//! Accept/reject policy for capture sessions.
//!
//! The session state machine decides what is *allowed* next; the
//! [`TransactionHandler`] decides whether an allowed step is *accepted*.
//! Each protocol hook is a plain function returning a [`Verdict`], so the
//! whole policy of a listener reads as one table.
//!
//! The capture policy is:
//!
//! | step       | verdict                                          |
//! |------------|--------------------------------------------------|
//! | connect    | accept                                           |
//! | MAIL FROM  | accept any sender, including the null sender     |
//! | RCPT TO    | accept any recipient                             |
//! | DATA body  | parse, then store; `451` if either step fails    |

use std::{borrow::Cow, fmt::Debug, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use lure_common::{
    internal,
    message::{Envelope, ParsedMessage},
    status::Status,
};
use lure_store::MessageStore;

/// A complete reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub lines: Vec<Cow<'static, str>>,
}

impl Reply {
    #[must_use]
    pub fn new(status: Status, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            lines: vec![message.into()],
        }
    }

    #[must_use]
    pub const fn multiline(status: Status, lines: Vec<Cow<'static, str>>) -> Self {
        Self { status, lines }
    }

    /// Wire form, with `-` continuation markers on all but the last line.
    #[must_use]
    pub fn render(&self) -> String {
        let last = self.lines.len().saturating_sub(1);
        let mut rendered = String::new();

        if self.lines.is_empty() {
            rendered.push_str(&format!("{}\r\n", self.status));
        }

        for (index, line) in self.lines.iter().enumerate() {
            let separator = if index == last { ' ' } else { '-' };
            rendered.push_str(&format!("{}{separator}{line}\r\n", self.status));
        }

        rendered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Reply),
}

#[async_trait]
pub trait TransactionHandler: Send + Sync + Debug {
    /// Called when a client connects, before the greeting.
    fn validate_connect(&self, _peer: SocketAddr) -> Verdict {
        Verdict::Accept
    }

    /// Called after `MAIL FROM`. `None` is the null sender.
    fn validate_mail_from(&self, _sender: Option<&str>) -> Verdict {
        Verdict::Accept
    }

    /// Called after each `RCPT TO`.
    fn validate_rcpt_to(&self, _recipient: &str) -> Verdict {
        Verdict::Accept
    }

    /// Called with the un-dot-stuffed body once the end-of-data marker is
    /// read. The returned reply is sent as-is.
    async fn handle_message(&self, envelope: &Envelope, raw: &[u8]) -> Reply;
}

/// The capture policy: accept everything, parse, store.
#[derive(Debug, Clone)]
pub struct CaptureHandler {
    store: Arc<dyn MessageStore>,
}

impl CaptureHandler {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TransactionHandler for CaptureHandler {
    async fn handle_message(&self, envelope: &Envelope, raw: &[u8]) -> Reply {
        let parsed = match ParsedMessage::parse(raw, envelope) {
            Ok(parsed) => parsed,
            Err(err) => {
                internal!(
                    level = WARN,
                    "Rejecting unparsable message from {:?} ({} bytes): {err}",
                    envelope.sender,
                    raw.len()
                );
                return Reply::new(
                    Status::ActionUnavailable,
                    format!("4.6.0 Message could not be parsed: {err}"),
                );
            }
        };

        match self.store.insert(parsed).await {
            Ok(stored) => {
                internal!(
                    level = INFO,
                    "Captured message {} for {}",
                    stored.id,
                    stored.to.join(", ")
                );
                Reply::new(Status::Ok, format!("2.0.0 Ok: queued as {}", stored.id))
            }
            Err(err) => {
                internal!(level = ERROR, "Failed to store captured message: {err}");
                Reply::new(
                    Status::ActionUnavailable,
                    "4.3.0 Unable to store message, try again later",
                )
            }
        }
    }
}

#[cfg(test)]
mod test {
    use lure_store::MemoryMessageStore;
    use pretty_assertions::assert_eq;

    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            sender: Some("it@example.com".into()),
            recipients: vec!["a@example.com".into()],
        }
    }

    #[test]
    fn render_single_and_multiline() {
        assert_eq!(Reply::new(Status::Ok, "Ok").render(), "250 Ok\r\n");
        assert_eq!(
            Reply::multiline(
                Status::Ok,
                vec!["capture".into(), "SIZE 10".into(), "HELP".into()]
            )
            .render(),
            "250-capture\r\n250-SIZE 10\r\n250 HELP\r\n"
        );
    }

    #[test]
    fn capture_accepts_every_envelope_step() {
        let handler = CaptureHandler::new(Arc::new(MemoryMessageStore::new()));

        assert_eq!(
            handler.validate_connect("203.0.113.9:4000".parse().unwrap()),
            Verdict::Accept
        );
        assert_eq!(handler.validate_mail_from(None), Verdict::Accept);
        assert_eq!(handler.validate_mail_from(Some("x@y")), Verdict::Accept);
        assert_eq!(handler.validate_rcpt_to("not an address"), Verdict::Accept);
    }

    #[tokio::test]
    async fn capture_stores_parsed_message() {
        let store = MemoryMessageStore::new();
        let handler = CaptureHandler::new(Arc::new(store.clone()));

        let reply = handler
            .handle_message(
                &envelope(),
                b"From: it@example.com\r\nTo: a@example.com\r\nSubject: Hi\r\n\r\nBody\r\n",
            )
            .await;

        assert_eq!(reply.status, Status::Ok);
        assert!(reply.lines[0].starts_with("2.0.0 Ok: queued as "));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn capture_rejects_unparsable_with_transient_error() {
        let store = MemoryMessageStore::new();
        let handler = CaptureHandler::new(Arc::new(store.clone()));

        let reply = handler
            .handle_message(&envelope(), b"this is not a header block\r\n")
            .await;

        assert_eq!(reply.status, Status::ActionUnavailable);
        assert!(reply.status.is_temporary());
        assert!(store.is_empty());
    }
}
