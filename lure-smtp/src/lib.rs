//! SMTP for the lure mail core: the capture listener that accepts and
//! stores every submitted message, and the client used for outbound
//! delivery.

pub mod client;
pub mod command;
pub mod error;
pub mod extensions;
pub mod handler;
pub mod server;
pub mod session;
pub mod state;

pub use error::{CaptureError, SessionError};
pub use handler::{CaptureHandler, Reply, TransactionHandler, Verdict};
pub use server::{CaptureServer, CaptureState};
pub use session::SessionConfig;
pub use state::State;
