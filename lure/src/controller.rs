use std::sync::Arc;

use lure_common::{internal, logging, tracing};
use lure_store::{FileConfigStore, FileMessageStore};
use serde::Deserialize;

use crate::{
    MailSubsystem,
    error::MailError,
    settings::{CaptureSettings, DeliverySettings, StorageSettings},
};

/// Process configuration, as read from `lure.config.ron`.
///
/// ```ron
/// (
///     capture: (port: 1025, banner: "capture.example.com"),
///     storage: (path: "/var/lib/lure"),
///     delivery: (helo_name: "mailer.example.com"),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Lure {
    pub capture: CaptureSettings,
    pub storage: StorageSettings,
    pub delivery: DeliverySettings,
}

impl Lure {
    /// Build the mail subsystem over the file stores under
    /// `storage.path`, starting the capture listener if `capture.autostart`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage path is unusable or an autostarted
    /// listener cannot bind.
    pub async fn subsystem(&self) -> Result<MailSubsystem, MailError> {
        let messages = FileMessageStore::new(self.storage.messages_path())?;
        let configs = FileConfigStore::new(self.storage.config_path())?;

        let mail = MailSubsystem::builder(Arc::new(messages), Arc::new(configs))
            .capture_port(self.capture.port)
            .session_config(self.capture.session_config())
            .client_options(self.delivery.client_options())
            .build()
            .await?;

        if self.capture.autostart {
            mail.start_capture(self.capture.port).await?;
        }

        Ok(mail)
    }

    /// Run the capture listener until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the subsystem cannot be built, the listener
    /// cannot bind, or the signal handlers cannot be installed.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let mail = self.subsystem().await?;
        let address = mail.start_capture(self.capture.port).await?;
        internal!(level = INFO, "Capture listener running on {address}");

        shutdown().await?;

        internal!(level = INFO, "Shutting down...");
        mail.shutdown().await;

        Ok(())
    }
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    }

    Ok(())
}
