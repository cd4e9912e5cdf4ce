//! The mail delivery core of the lure phishing-awareness platform.
//!
//! [`MailSubsystem`] is the one object the rest of the application talks
//! to. It owns the capture listener, the outbound transport cache, the rate
//! limiter and the stores, and exposes the management operations an HTTP
//! layer or the `lure` binary needs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lure::MailSubsystem;
//! use lure_store::{MemoryConfigStore, MemoryMessageStore};
//!
//! # async fn example() -> Result<(), lure::MailError> {
//! let mail = MailSubsystem::builder(
//!     Arc::new(MemoryMessageStore::new()),
//!     Arc::new(MemoryConfigStore::new()),
//! )
//! .build()
//! .await?;
//!
//! mail.start_capture(1025).await?;
//! let report = mail.send_test_message("alice@example.com", None, None).await?;
//! println!("sent {}", report.message_id);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod error;
pub mod settings;
mod subsystem;

pub use error::MailError;
pub use subsystem::{DEFAULT_TEST_BODY, DEFAULT_TEST_SUBJECT, MailSubsystem, MailSubsystemBuilder};
