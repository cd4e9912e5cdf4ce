//! Outbound delivery for the lure mail core.
//!
//! A [`Transport`] is one live SMTP session to the host an
//! [`EffectiveConfig`](lure_common::config::EffectiveConfig) points at.
//! [`TransportCache`] keeps a single transport alive across sends and only
//! rebuilds it when the config's [`Fingerprint`] changes. [`RateLimiter`]
//! paces sends and [`OutgoingMail`] composes the RFC 5322 message.

mod cache;
pub mod error;
mod fingerprint;
pub mod mail;
mod rate_limiter;
mod transport;

pub use cache::TransportCache;
pub use error::DeliveryError;
pub use fingerprint::Fingerprint;
pub use mail::{Composed, OutgoingMail};
pub use rate_limiter::RateLimiter;
pub use transport::{SendReport, Transport};
