use core::fmt::{self, Display, Formatter};

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ehlo(_) => "EHLO",
            Self::Helo(_) => "HELO",
        })
    }
}

/// One command line received from a client.
///
/// Addresses are kept as the raw text between the angle brackets. The
/// capture listener accepts any declared address, so nothing here tries to
/// validate them beyond stripping the path syntax.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// `None` is the null reverse-path (`MAIL FROM:<>`).
    MailFrom(Option<String>),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Help,
    Vrfy(String),
    Quit,
    StartTls,
    Auth,
    Invalid(String),
}

impl Command {
    /// Whether this command is handled without touching the session state.
    #[must_use]
    pub const fn is_stateless(&self) -> bool {
        matches!(
            self,
            Self::Noop | Self::Help | Self::Vrfy(_) | Self::StartTls | Self::Auth | Self::Invalid(_)
        )
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(variant @ (HeloVariant::Ehlo(id) | HeloVariant::Helo(id))) => {
                write!(fmt, "{variant} {id}")
            }
            Self::MailFrom(sender) => {
                write!(fmt, "MAIL FROM:<{}>", sender.as_deref().unwrap_or_default())
            }
            Self::RcptTo(rcpt) => write!(fmt, "RCPT TO:<{rcpt}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Help => fmt.write_str("HELP"),
            Self::Vrfy(arg) => write!(fmt, "VRFY {arg}"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            Self::Auth => fmt.write_str("AUTH"),
            Self::Invalid(s) => fmt.write_str(s),
        }
    }
}

/// Pull the address out of a `<path>` argument, dropping any ESMTP
/// parameters that follow it.
fn path_argument(rest: &str) -> Option<String> {
    let rest = rest.trim_start();

    if let Some(stripped) = rest.strip_prefix('<') {
        let end = stripped.find('>')?;
        return Some(stripped[..end].trim().to_string());
    }

    rest.split_whitespace().next().map(ToString::to_string)
}

fn has_prefix(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();

        if has_prefix(trimmed, "MAIL FROM:") {
            return match path_argument(&trimmed[10..]) {
                Some(sender) if sender.is_empty() => Ok(Self::MailFrom(None)),
                Some(sender) => Ok(Self::MailFrom(Some(sender))),
                None => Err(Self::Invalid(command.to_owned())),
            };
        }

        if has_prefix(trimmed, "RCPT TO:") {
            return match path_argument(&trimmed[8..]) {
                Some(rcpt) if !rcpt.is_empty() => Ok(Self::RcptTo(rcpt)),
                _ => Err(Self::Invalid(command.to_owned())),
            };
        }

        let (verb, argument) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => Err(Self::Invalid(command.to_owned())),
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "HELP" => Ok(Self::Help),
            "VRFY" => Ok(Self::Vrfy(argument.to_string())),
            "QUIT" => Ok(Self::Quit),
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" => Ok(Self::Auth),
            _ => Err(Self::Invalid(command.to_owned())),
        }
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Self;

    fn try_from(command: &[u8]) -> Result<Self, Self::Error> {
        std::str::from_utf8(command).map_or_else(
            |_| Err(Self::Invalid("Unable to interpret command".to_string())),
            Self::try_from,
        )
    }
}
