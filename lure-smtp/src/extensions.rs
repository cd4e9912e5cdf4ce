use core::fmt::{self, Display};

/// ESMTP extensions advertised in the EHLO reply.
///
/// The capture listener deliberately has no `STARTTLS` or `AUTH` variant:
/// clients must never be invited to negotiate either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// Maximum accepted message size in bytes. `0` means unlimited.
    Size(usize),
    EightBitMime,
    SmtpUtf8,
    Pipelining,
    Help,
}

impl Extension {
    /// The full set advertised by the capture listener.
    #[must_use]
    pub fn advertised(max_message_size: usize) -> Vec<Self> {
        vec![
            Self::Size(max_message_size),
            Self::EightBitMime,
            Self::SmtpUtf8,
            Self::Pipelining,
            Self::Help,
        ]
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Size(0) => fmt.write_str("SIZE"),
            Self::Size(max) => write!(fmt, "SIZE {max}"),
            Self::EightBitMime => fmt.write_str("8BITMIME"),
            Self::SmtpUtf8 => fmt.write_str("SMTPUTF8"),
            Self::Pipelining => fmt.write_str("PIPELINING"),
            Self::Help => fmt.write_str("HELP"),
        }
    }
}
