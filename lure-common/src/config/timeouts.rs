//! Timeout configuration for both sides of the wire.
//!
//! The capture listener uses [`ServerTimeouts`] so a stalled client cannot
//! hold a session open forever. Outbound transports use [`ClientTimeouts`]
//! to bound connect, verify and each command exchange.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capture listener timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Idle time allowed between client commands, and between lines of a
    /// message body.
    ///
    /// Default: 300 seconds (5 minutes, per RFC 5321)
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Maximum total session duration.
    ///
    /// Default: 1800 seconds (30 minutes)
    #[serde(default = "defaults::server_connection_secs")]
    pub connection_secs: u64,

    /// How long `stop` waits for open sessions before aborting them.
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::server_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            connection_secs: defaults::server_connection_secs(),
            shutdown_grace_secs: defaults::server_shutdown_grace_secs(),
        }
    }
}

impl ServerTimeouts {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Outbound transport timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP (and implicit TLS) connection.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_connect_secs")]
    pub connect_secs: u64,

    /// Timeout for a single command/reply exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::client_command_secs")]
    pub command_secs: u64,

    /// Timeout for transferring the message body and reading the final reply.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::client_data_secs")]
    pub data_secs: u64,

    /// Overall budget for verifying a freshly built transport.
    ///
    /// Default: 60 seconds
    #[serde(default = "defaults::client_verify_secs")]
    pub verify_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::client_connect_secs(),
            command_secs: defaults::client_command_secs(),
            data_secs: defaults::client_data_secs(),
            verify_secs: defaults::client_verify_secs(),
        }
    }
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_secs)
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300
    }
    pub const fn server_connection_secs() -> u64 {
        1800
    }
    pub const fn server_shutdown_grace_secs() -> u64 {
        5
    }

    pub const fn client_connect_secs() -> u64 {
        30
    }
    pub const fn client_command_secs() -> u64 {
        30
    }
    pub const fn client_data_secs() -> u64 {
        120
    }
    pub const fn client_verify_secs() -> u64 {
        60
    }
}
