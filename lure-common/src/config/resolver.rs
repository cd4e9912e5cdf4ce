use core::fmt::{self, Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    config::{
        env::{self, EnvOverrides},
        stored::StoredConfig,
    },
    error::{ConfigError, ConfigLayer},
    internal,
};

pub const DEFAULT_PORT: u16 = 587;
pub const IMPLICIT_TLS_PORT: u16 = 465;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;
pub const DEFAULT_CAPTURE_PORT: u16 = 1025;
pub const LOOPBACK: &str = "127.0.0.1";
pub const CAPTURE_FROM_PLACEHOLDER: &str = "noreply@lure.localhost";

/// Where outbound mail goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Relay through the configured SMTP host.
    External,
    /// Hand to the embedded capture listener on loopback.
    Capture,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::External => "external",
            Self::Capture => "capture",
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The resolved configuration for one send attempt.
///
/// In capture mode `host` is loopback, `secure` is false and `port` is the
/// capture listener's port, whatever the stored record says.
#[derive(Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub rate_limit_per_minute: u32,
    pub mode: Mode,
}

impl EffectiveConfig {
    /// Credentials are only used when both halves are present.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    /// Point a capture-mode config at the port the listener actually bound.
    #[must_use]
    pub fn with_capture_port(mut self, port: u16) -> Self {
        if self.mode == Mode::Capture {
            self.port = port;
        }
        self
    }
}

impl Debug for EffectiveConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Operator-facing view of the configuration. The password is reduced to
/// `has_password`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub has_password: bool,
    pub from_address: String,
    pub rate_limit_per_minute: u32,
    pub mode: Mode,
    /// Environment variables currently overriding stored values.
    pub env_overrides: Vec<&'static str>,
    /// The error an external send would raise right now, if any.
    pub problem: Option<String>,
}

/// Per-field merge of the three layers, before mode forcing and validation.
#[derive(Debug, Clone)]
struct Layered {
    host: String,
    port: Result<u16, ConfigError>,
    secure: Option<bool>,
    username: Option<String>,
    password: Option<String>,
    from_address: String,
    rate_limit_per_minute: u32,
    use_capture: bool,
}

impl Layered {
    fn merge(stored: Option<&StoredConfig>, env: &EnvOverrides) -> Self {
        let port = match (env.port.as_deref(), stored.and_then(|s| s.port)) {
            (Some(raw), _) => parse_port(raw),
            (None, Some(0)) => Err(ConfigError::InvalidPort {
                value: "0".to_string(),
                layer: ConfigLayer::Stored,
            }),
            (None, Some(port)) => Ok(port),
            (None, None) => Ok(DEFAULT_PORT),
        };

        let rate_limit_per_minute = env
            .rate_limit
            .as_deref()
            .and_then(|raw| match raw.trim().parse::<u32>() {
                Ok(rate) if rate > 0 => Some(rate),
                _ => {
                    internal!(
                        level = WARN,
                        "Ignoring {}={raw:?}: expected a positive integer",
                        env::RATE_LIMIT
                    );
                    None
                }
            })
            .or_else(|| stored.and_then(|s| s.rate_limit_per_minute).filter(|r| *r > 0))
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);

        Self {
            host: pick(env.host.as_ref(), stored.and_then(|s| s.host.as_ref())).unwrap_or_default(),
            port,
            secure: env
                .secure
                .as_deref()
                .map(env::flag)
                .or_else(|| stored.and_then(|s| s.secure)),
            username: pick(env.username.as_ref(), stored.and_then(|s| s.username.as_ref())),
            password: pick(env.password.as_ref(), stored.and_then(|s| s.password.as_ref())),
            from_address: pick(
                env.from_address.as_ref(),
                stored.and_then(|s| s.from_address.as_ref()),
            )
            .unwrap_or_default(),
            rate_limit_per_minute,
            use_capture: env
                .use_capture
                .as_deref()
                .map_or_else(|| stored.is_some_and(|s| s.use_capture), env::flag),
        }
    }
}

fn pick(env: Option<&String>, stored: Option<&String>) -> Option<String> {
    env.cloned()
        .or_else(|| stored.filter(|value| !value.trim().is_empty()).cloned())
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::InvalidPort {
        value: raw.to_string(),
        layer: ConfigLayer::Environment,
    };

    let port = raw.trim().parse::<i64>().map_err(|_| invalid())?;
    u16::try_from(port)
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(invalid)
}

/// Merges stored configuration, environment overrides and defaults.
///
/// Precedence per field is environment, then stored, then default. The
/// environment's capture flag likewise beats the stored `use_capture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigResolver {
    capture_port: u16,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_PORT)
    }
}

impl ConfigResolver {
    #[must_use]
    pub const fn new(capture_port: u16) -> Self {
        Self { capture_port }
    }

    #[must_use]
    pub const fn capture_port(&self) -> u16 {
        self.capture_port
    }

    /// Resolve the configuration for one send.
    ///
    /// Capture mode never fails. External mode requires a host, a sender
    /// address and a valid port.
    pub fn resolve(
        &self,
        stored: Option<&StoredConfig>,
        env: &EnvOverrides,
    ) -> Result<EffectiveConfig, ConfigError> {
        self.finish(Layered::merge(stored, env))
    }

    /// Resolve for display. Never fails and never exposes the password.
    #[must_use]
    pub fn display(&self, stored: Option<&StoredConfig>, env: &EnvOverrides) -> DisplayConfig {
        let layered = Layered::merge(stored, env);
        let has_password = layered.password.as_deref().is_some_and(|p| !p.is_empty());
        let username = layered.username.clone();
        let env_overrides = env.active();

        match self.finish(layered.clone()) {
            Ok(effective) => DisplayConfig {
                host: effective.host,
                port: effective.port,
                secure: effective.secure,
                username,
                has_password,
                from_address: effective.from_address,
                rate_limit_per_minute: effective.rate_limit_per_minute,
                mode: effective.mode,
                env_overrides,
                problem: None,
            },
            Err(err) => {
                let port = layered.port.clone().unwrap_or(DEFAULT_PORT);
                DisplayConfig {
                    host: layered.host,
                    port,
                    secure: layered.secure.unwrap_or(port == IMPLICIT_TLS_PORT),
                    username,
                    has_password,
                    from_address: layered.from_address,
                    rate_limit_per_minute: layered.rate_limit_per_minute,
                    mode: Mode::External,
                    env_overrides,
                    problem: Some(err.to_string()),
                }
            }
        }
    }

    fn finish(&self, layered: Layered) -> Result<EffectiveConfig, ConfigError> {
        if layered.use_capture {
            // The capture listener has no AUTH, so credentials are dropped.
            return Ok(EffectiveConfig {
                host: LOOPBACK.to_string(),
                port: self.capture_port,
                secure: false,
                username: None,
                password: None,
                from_address: if layered.from_address.is_empty() {
                    CAPTURE_FROM_PLACEHOLDER.to_string()
                } else {
                    layered.from_address
                },
                rate_limit_per_minute: layered.rate_limit_per_minute,
                mode: Mode::Capture,
            });
        }

        if layered.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        let port = layered.port?;
        if layered.from_address.trim().is_empty() {
            return Err(ConfigError::MissingFrom);
        }

        Ok(EffectiveConfig {
            host: layered.host.trim().to_string(),
            port,
            secure: layered.secure.unwrap_or(port == IMPLICIT_TLS_PORT),
            username: layered.username,
            password: layered.password,
            from_address: layered.from_address.trim().to_string(),
            rate_limit_per_minute: layered.rate_limit_per_minute,
            mode: Mode::External,
        })
    }
}
