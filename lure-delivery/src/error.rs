//! Errors raised while building, verifying or using an outbound transport.

use lure_common::config::env;
use lure_smtp::client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A freshly built external transport could not connect or
    /// authenticate. Nothing is cached.
    #[error(
        "Could not verify SMTP transport {host}:{port}: {reason}. Check {host_var}, {port_var}, {secure_var} and the credentials in {user_var}/{pass_var} or the stored configuration",
        host_var = env::HOST,
        port_var = env::PORT,
        secure_var = env::SECURE,
        user_var = env::USER,
        pass_var = env::PASS
    )]
    VerifyFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The server refused the transaction at `stage`.
    #[error("Server rejected {stage}: {code} {message}")]
    Rejected {
        stage: &'static str,
        code: u16,
        message: String,
    },

    #[error("Every recipient was rejected: {}", .rejected.join(", "))]
    AllRecipientsRejected { rejected: Vec<String> },

    #[error("Message has no recipients")]
    NoRecipients,

    #[error("Invalid email address {0:?}")]
    InvalidAddress(String),
}

impl DeliveryError {
    /// Whether the underlying connection is gone, as opposed to the server
    /// refusing something on a healthy connection.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        match self {
            Self::Client(err) => err.is_connection_error(),
            _ => false,
        }
    }
}
