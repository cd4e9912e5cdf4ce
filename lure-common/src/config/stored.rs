use core::fmt::{self, Debug, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The record an operator saves, optionally scoped to a user.
///
/// Every field is optional so that absent values fall through to the
/// defaults during resolution.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub use_capture: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredConfig {
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl Debug for StoredConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("has_password", &self.has_password())
            .field("from_address", &self.from_address)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("use_capture", &self.use_capture)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// A partial update to a [`StoredConfig`].
///
/// `None` keeps the existing value. For the text fields an empty string
/// clears the stored value, which is how a saved password is removed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub username: Option<String>,
    #[serde(alias = "pass")]
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub rate_limit_per_minute: Option<u32>,
    pub use_capture: Option<bool>,
}

impl StoredConfigPatch {
    /// Apply this patch on top of `config`.
    pub fn apply_to(self, config: &mut StoredConfig) {
        fn text(slot: &mut Option<String>, value: Option<String>) {
            match value {
                None => {}
                Some(value) if value.is_empty() => *slot = None,
                Some(value) => *slot = Some(value),
            }
        }

        text(&mut config.host, self.host);
        text(&mut config.username, self.username);
        text(&mut config.password, self.password);
        text(&mut config.from_address, self.from_address);

        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(secure) = self.secure {
            config.secure = Some(secure);
        }
        if let Some(rate) = self.rate_limit_per_minute {
            config.rate_limit_per_minute = Some(rate);
        }
        if let Some(use_capture) = self.use_capture {
            config.use_capture = use_capture;
        }
    }
}

impl Debug for StoredConfigPatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredConfigPatch")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field(
                "password",
                &self
                    .password
                    .as_ref()
                    .map(|p| if p.is_empty() { "<clear>" } else { "<redacted>" }),
            )
            .field("from_address", &self.from_address)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("use_capture", &self.use_capture)
            .finish()
    }
}

/// Identifier of the user a stored configuration belongs to.
///
/// Restricted to a filename-safe alphabet since stores may key files by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub const MAX_LEN: usize = 64;

    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LEN
            && !id.starts_with('.')
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));

        if valid {
            Ok(Self(id))
        } else {
            Err(ConfigError::InvalidUserId(id))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for UserId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
