use core::fmt::{self, Display, Formatter};

use hex::encode;
use lure_common::config::EffectiveConfig;
use sha2::{Digest, Sha256};

/// SHA-256 digest over the fields of an [`EffectiveConfig`] that decide
/// whether a cached transport can be reused: host, port, `secure`, whether
/// credentials are present, and mode.
///
/// The credentials themselves are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(config: &EffectiveConfig) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(config.host.to_ascii_lowercase().as_bytes());
        hasher.update([0]);
        hasher.update(config.port.to_be_bytes());
        hasher.update([
            u8::from(config.secure),
            u8::from(config.has_credentials()),
        ]);
        hasher.update(config.mode.to_string().as_bytes());

        Self(encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
