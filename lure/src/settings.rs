//! Runtime settings read from `lure.config.ron`.
//!
//! Every field has a default, so an empty `()` document is a valid config.

use std::path::PathBuf;

use lure_common::config::{ClientTimeouts, DEFAULT_CAPTURE_PORT, ServerTimeouts};
use lure_smtp::{SessionConfig, client::ClientOptions};
use serde::Deserialize;

/// The embedded capture listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Port to listen on, on all interfaces.
    ///
    /// Default: 1025
    pub port: u16,
    /// Start listening as soon as the subsystem is built.
    pub autostart: bool,
    /// Host name announced in the greeting.
    pub banner: String,
    /// Largest accepted message in bytes. `0` means unlimited.
    ///
    /// Default: 25 MiB
    pub max_message_size: usize,
    pub timeouts: ServerTimeouts,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            port: DEFAULT_CAPTURE_PORT,
            autostart: false,
            banner: "lure.localhost".to_string(),
            max_message_size: session.max_message_size,
            timeouts: session.timeouts,
        }
    }
}

impl CaptureSettings {
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_banner(self.banner.clone())
            .with_max_message_size(self.max_message_size)
            .with_timeouts(self.timeouts.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root directory. Messages go under `messages/`, stored
    /// configuration under `config/`.
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/lure"),
        }
    }
}

impl StorageSettings {
    #[must_use]
    pub fn messages_path(&self) -> PathBuf {
        self.path.join("messages")
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config")
    }
}

/// Outbound SMTP client behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Name sent with `EHLO`.
    pub helo_name: String,
    /// Accept any TLS certificate. Only for self-signed test relays.
    pub accept_invalid_certs: bool,
    pub timeouts: ClientTimeouts,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            helo_name: "localhost".to_string(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }
}

impl DeliverySettings {
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            helo_name: self.helo_name.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
            timeouts: self.timeouts.clone(),
        }
    }
}
