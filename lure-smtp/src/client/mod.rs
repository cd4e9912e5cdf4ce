//! Outbound SMTP client.
//!
//! Used by the delivery transport for both external relays and the local
//! capture listener. It supports:
//!
//! - plain TCP, implicit TLS and `STARTTLS`
//! - `AUTH PLAIN` and `AUTH LOGIN`
//! - per-step time limits from [`ClientTimeouts`](lure_common::config::ClientTimeouts)
//!
//! ```no_run
//! use lure_smtp::client::{ClientOptions, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost", 1025, false, ClientOptions::default()).await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data("Subject: Test\r\n\r\nHello World").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{ClientOptions, SmtpClient};
