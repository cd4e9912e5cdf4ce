use core::fmt::{self, Display, Formatter};

use lure_common::message::Envelope;

use crate::command::{Command, HeloVariant};

/// Client has greeted with `HELO` or `EHLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeted {
    pub id: String,
    pub extended: bool,
}

/// A transaction is open: `MAIL FROM` accepted, maybe some recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub greeted: Greeted,
    pub envelope: Envelope,
}

/// Session state for one capture connection.
///
/// The transitions form the whole protocol table: anything not listed is an
/// out-of-sequence command, which leaves the state untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Connect,
    Greeted(Greeted),
    MailFrom(Transaction),
    RcptTo(Transaction),
    /// `DATA` accepted; the next lines are the message body.
    Data(Transaction),
    Quit,
}

impl Display for State {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Connect => "Connect",
            Self::Greeted(Greeted { extended: true, .. }) => "EHLO",
            Self::Greeted(_) => "HELO",
            Self::MailFrom(_) => "MAIL",
            Self::RcptTo(_) => "RCPT",
            Self::Data(_) => "DATA",
            Self::Quit => "QUIT",
        })
    }
}

/// A command that is not valid in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfSequence {
    pub state: State,
    pub reason: &'static str,
}

impl State {
    /// Apply a command, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfSequence`] holding the unchanged state when the command
    /// is not allowed here.
    pub fn transition(self, command: &Command) -> Result<Self, OutOfSequence> {
        match (self, command) {
            (_, Command::Quit) => Ok(Self::Quit),

            // Body lines are consumed by the session, never parsed as commands
            (state @ (Self::Data(_) | Self::Quit), _) => Ok(state),

            // A new greeting always resets any open transaction
            (_, Command::Helo(variant)) => Ok(Self::Greeted(match variant {
                HeloVariant::Ehlo(id) => Greeted {
                    id: id.clone(),
                    extended: true,
                },
                HeloVariant::Helo(id) => Greeted {
                    id: id.clone(),
                    extended: false,
                },
            })),

            (Self::Greeted(greeted), Command::MailFrom(sender)) => {
                Ok(Self::MailFrom(Transaction {
                    greeted,
                    envelope: Envelope {
                        sender: sender.clone(),
                        recipients: Vec::new(),
                    },
                }))
            }
            (state @ Self::Connect, Command::MailFrom(_) | Command::RcptTo(_) | Command::Data) => {
                Err(OutOfSequence {
                    state,
                    reason: "Send HELO/EHLO first",
                })
            }
            (state @ (Self::MailFrom(_) | Self::RcptTo(_)), Command::MailFrom(_)) => {
                Err(OutOfSequence {
                    state,
                    reason: "Nested MAIL command",
                })
            }

            (Self::MailFrom(mut transaction) | Self::RcptTo(mut transaction), Command::RcptTo(rcpt)) => {
                transaction.envelope.recipients.push(rcpt.clone());
                Ok(Self::RcptTo(transaction))
            }
            (state @ Self::Greeted(_), Command::RcptTo(_)) => Err(OutOfSequence {
                state,
                reason: "Need MAIL command before RCPT",
            }),

            (Self::RcptTo(transaction), Command::Data) => Ok(Self::Data(transaction)),
            (state @ Self::MailFrom(_), Command::Data) => Err(OutOfSequence {
                state,
                reason: "Need RCPT command before DATA",
            }),
            (state @ Self::Greeted(_), Command::Data) => Err(OutOfSequence {
                state,
                reason: "Need MAIL command before DATA",
            }),

            (Self::Connect, Command::Rset) => Ok(Self::Connect),
            (Self::Greeted(greeted), Command::Rset) => Ok(Self::Greeted(greeted)),
            (Self::MailFrom(transaction) | Self::RcptTo(transaction), Command::Rset) => {
                Ok(Self::Greeted(transaction.greeted))
            }

            (state, _) => Ok(state),
        }
    }

    /// The envelope of the open transaction, if any.
    #[must_use]
    pub const fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::MailFrom(transaction) | Self::RcptTo(transaction) | Self::Data(transaction) => {
                Some(&transaction.envelope)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.envelope().is_some()
    }

    #[must_use]
    pub const fn should_close(&self) -> bool {
        matches!(self, Self::Quit)
    }
}
