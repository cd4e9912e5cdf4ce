pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod status;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
