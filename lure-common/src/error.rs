//! Error types shared across the lure crates.
//!
//! Messages are written for the operator who has to fix the problem: they
//! name the environment variable and the stored field involved, and never
//! include secret values.

use core::fmt::{self, Display, Formatter};

use thiserror::Error;

use crate::config::env;

/// Which configuration layer a value was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    Environment,
    Stored,
    Default,
}

impl Display for ConfigLayer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment",
            Self::Stored => "stored configuration",
            Self::Default => "built-in default",
        })
    }
}

/// Raised by the resolver before any network activity takes place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(
        "No SMTP host configured for external delivery: set {var} or the stored `host` field, or enable capture mode",
        var = env::HOST
    )]
    MissingHost,

    #[error(
        "No sender address configured for external delivery: set {var} or the stored `from_address` field",
        var = env::FROM
    )]
    MissingFrom,

    #[error(
        "Invalid SMTP port {value:?} from the {layer} ({var}/`port`): expected an integer between 1 and 65535",
        var = env::PORT
    )]
    InvalidPort { value: String, layer: ConfigLayer },

    #[error("Invalid user id {0:?}: expected 1-64 ASCII letters, digits, '-', '_' or '.'")]
    InvalidUserId(String),
}

/// Raised while turning a received DATA payload into a captured message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
    #[error("Message is empty")]
    Empty,

    #[error("Message has no header section")]
    MissingHeaders,

    #[error("Malformed header on line {line}: {reason}")]
    MalformedHeader { line: usize, reason: &'static str },

    #[error("Unable to parse MIME structure: {0}")]
    Mime(String),

    #[error("Unable to decode message body: {0}")]
    Body(String),

    #[error("Message has no recipients in either the headers or the envelope")]
    NoRecipients,
}
