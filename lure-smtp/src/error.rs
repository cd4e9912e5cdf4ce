//! Error types for the capture listener.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that end a single capture session.
///
/// None of these reach the listener itself: a failed session is logged and
/// the server keeps accepting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),

    /// The peer was idle, or connected, longer than allowed.
    #[error("Session timed out after {0} seconds")]
    Timeout(u64),

    #[error("Shutdown requested")]
    Shutdown,
}

impl SessionError {
    /// Returns `true` if the error indicates a graceful shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Errors from starting or stopping the capture server.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Unable to bind capture listener on {address}: {source}")]
    ListenerBindFailed {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Unable to read capture listener address: {0}")]
    LocalAddr(#[source] io::Error),
}
