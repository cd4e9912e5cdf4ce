//! Outbound mail configuration.
//!
//! Three layers feed every send: values from the environment, the stored
//! record an operator saved, and built-in defaults. [`ConfigResolver`] merges
//! them into an [`EffectiveConfig`] and [`DisplayConfig`] is the masked view
//! handed back to operators.

pub mod env;
mod resolver;
mod stored;
pub mod timeouts;

pub use env::EnvOverrides;
pub use resolver::{
    CAPTURE_FROM_PLACEHOLDER, ConfigResolver, Credentials, DEFAULT_CAPTURE_PORT, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_PER_MINUTE, DisplayConfig, EffectiveConfig, IMPLICIT_TLS_PORT, LOOPBACK,
    Mode,
};
pub use stored::{StoredConfig, StoredConfigPatch, UserId};
pub use timeouts::{ClientTimeouts, ServerTimeouts};
