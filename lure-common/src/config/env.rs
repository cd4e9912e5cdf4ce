//! Snapshot of the environment variables that override stored configuration.

use core::fmt::{self, Debug, Formatter};

pub const HOST: &str = "SMTP_HOST";
pub const PORT: &str = "SMTP_PORT";
pub const SECURE: &str = "SMTP_SECURE";
pub const USER: &str = "SMTP_USER";
pub const PASS: &str = "SMTP_PASS";
pub const FROM: &str = "SMTP_FROM";
pub const RATE_LIMIT: &str = "SMTP_RATE_LIMIT";
pub const USE_CAPTURE: &str = "SMTP_USE_CAPTURE";

/// Environment overrides, captured once so resolution stays a pure function.
///
/// Empty values are treated as unset.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub host: Option<String>,
    pub port: Option<String>,
    pub secure: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub rate_limit: Option<String>,
    pub use_capture: Option<String>,
}

impl EnvOverrides {
    /// Snapshot the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build a snapshot from arbitrary key/value pairs. Unrelated keys are ignored.
    #[must_use]
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = Self::default();

        for (key, value) in vars {
            let value: String = value.into();
            if value.trim().is_empty() {
                continue;
            }

            let slot = match key.as_ref() {
                HOST => &mut overrides.host,
                PORT => &mut overrides.port,
                SECURE => &mut overrides.secure,
                USER => &mut overrides.username,
                PASS => &mut overrides.password,
                FROM => &mut overrides.from_address,
                RATE_LIMIT => &mut overrides.rate_limit,
                USE_CAPTURE => &mut overrides.use_capture,
                _ => continue,
            };
            *slot = Some(value);
        }

        overrides
    }

    /// Names of the variables that are currently set.
    #[must_use]
    pub fn active(&self) -> Vec<&'static str> {
        [
            (HOST, self.host.is_some()),
            (PORT, self.port.is_some()),
            (SECURE, self.secure.is_some()),
            (USER, self.username.is_some()),
            (PASS, self.password.is_some()),
            (FROM, self.from_address.is_some()),
            (RATE_LIMIT, self.rate_limit.is_some()),
            (USE_CAPTURE, self.use_capture.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

impl Debug for EnvOverrides {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvOverrides")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from_address", &self.from_address)
            .field("rate_limit", &self.rate_limit)
            .field("use_capture", &self.use_capture)
            .finish()
    }
}

/// Interpret an environment flag. `1`, `true`, `yes` and `on` are true.
#[must_use]
pub fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_unrelated_and_empty_values() {
        let env = EnvOverrides::from_vars([
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PASS", "   "),
            ("HOME", "/root"),
        ]);

        assert_eq!(env.host.as_deref(), Some("smtp.example.com"));
        assert!(env.password.is_none());
        assert_eq!(env.active(), vec![HOST]);
    }

    #[test]
    fn debug_output_hides_password() {
        let env = EnvOverrides::from_vars([("SMTP_PASS", "hunter2")]);
        let rendered = format!("{env:?}");

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn flags() {
        for truthy in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(flag(truthy), "{truthy}");
        }
        for falsy in ["0", "false", "no", "off", "maybe"] {
            assert!(!flag(falsy), "{falsy}");
        }
    }
}
