//! The error type of the management surface.

use lure_common::error::ConfigError;
use lure_delivery::DeliveryError;
use lure_smtp::CaptureError;
use lure_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid message id {0:?}")]
    InvalidMessageId(String),
}

impl MailError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_not_found())
    }

    /// Errors the operator can fix by changing configuration.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Delivery(DeliveryError::VerifyFailed { .. })
        )
    }
}
