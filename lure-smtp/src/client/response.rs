//! SMTP reply parsing.

use super::error::{ClientError, Result};

/// One line of a reply: `250-text` or `250 text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for `-` continuation lines.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All text lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// The reply as the server sent it, one `code text` line per line.
    #[must_use]
    pub fn raw(&self) -> String {
        self.lines
            .iter()
            .map(|line| format!("{} {line}", self.code))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// Convert a 4xx/5xx reply into [`ClientError::SmtpError`].
    ///
    /// # Errors
    ///
    /// Returns the error when the reply is a 4xx or 5xx.
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            Err(ClientError::SmtpError {
                code: self.code,
                message: self.message(),
            })
        } else {
            Ok(self)
        }
    }

    /// Require an exact status code.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SmtpError`] for 4xx/5xx replies and
    /// [`ClientError::UnexpectedResponse`] for any other mismatch.
    pub fn expect_code(self, code: u16) -> Result<Self> {
        if self.code == code {
            return Ok(self);
        }

        let response = self.into_result()?;
        Err(ClientError::UnexpectedResponse {
            code: response.code,
            message: response.message(),
        })
    }

    /// Parse one reply line, without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ParseError`] if the line has no three-digit
    /// code or an unknown separator.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status code in '{line}'")))?;

        let rest = &line[3..];
        let (is_last, message) = match rest.as_bytes().first() {
            None => (true, ""),
            Some(b' ') => (true, &rest[1..]),
            Some(b'-') => (false, &rest[1..]),
            Some(other) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*other)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: message.to_string(),
        })
    }

    /// Parse the first complete reply at the start of `buffer`.
    ///
    /// Returns the reply and the number of bytes it used, or `None` if more
    /// data is needed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ParseError`] for malformed lines, or when the
    /// lines of a multi-line reply disagree on the code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(newline) = buffer[consumed..].iter().position(|b| *b == b'\n') {
            let raw = &buffer[consumed..consumed + newline];
            consumed += newline + 1;

            let raw = std::str::from_utf8(raw.strip_suffix(b"\r").unwrap_or(raw))?;
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(raw)?;
            match code {
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {expected}, got {}",
                        line.code
                    )));
                }
                _ => code = Some(line.code),
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}
