//! Error types for the lure-store crate.

use std::{io, path::PathBuf};

use lure_common::message::MessageId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Message not found: {0}")]
    NotFound(MessageId),

    #[error("Invalid store path {}: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("RON error: {0}")]
    Ron(String),
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Serialization(err.into())
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Serialization(err.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
