use std::{borrow::Cow, net::SocketAddr, sync::Arc, time::Instant};

use lure_common::{
    Signal, config::ServerTimeouts, incoming, internal, outgoing, status::Status, tracing,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{
    command::{Command, HeloVariant},
    error::SessionError,
    extensions::Extension,
    handler::{Reply, TransactionHandler, Verdict},
    state::{OutOfSequence, State},
};

/// Upper bound on a single line read from a client, command or body.
const MAX_LINE_LENGTH: u64 = 64 * 1024;

const KNOWN_VERBS: [&str; 12] = [
    "EHLO", "HELO", "MAIL", "RCPT", "DATA", "RSET", "NOOP", "HELP", "VRFY", "QUIT", "STARTTLS",
    "AUTH",
];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub banner: String,
    /// Largest accepted body in bytes. `0` means unlimited.
    pub max_message_size: usize,
    pub timeouts: ServerTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            banner: "localhost".to_string(),
            max_message_size: 25 * 1024 * 1024,
            timeouts: ServerTimeouts::default(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Message body collected between `DATA` and the end-of-data marker.
#[derive(Debug, Default)]
struct Body {
    data: Vec<u8>,
    oversize: bool,
}

impl Body {
    /// Append one raw line, undoing dot-stuffing. Returns `true` on the
    /// end-of-data marker.
    fn push_line(&mut self, line: &[u8], max_size: usize) -> bool {
        if line == b".\r\n" || line == b".\n" {
            return true;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);

        if self.oversize {
            return false;
        }

        if max_size > 0 && self.data.len().saturating_add(line.len()) > max_size {
            self.oversize = true;
            self.data = Vec::new();
        } else {
            self.data.extend_from_slice(line);
        }

        false
    }
}

/// What to do after a line has been handled.
enum Flow {
    Continue,
    Close,
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    peer: SocketAddr,
    stream: BufReader<Stream>,
    state: State,
    body: Option<Body>,
    handler: Arc<dyn TransactionHandler>,
    config: Arc<SessionConfig>,
    start_time: Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub fn create(
        stream: Stream,
        peer: SocketAddr,
        handler: Arc<dyn TransactionHandler>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            peer,
            stream: BufReader::new(stream),
            state: State::default(),
            body: None,
            handler,
            config,
            start_time: Instant::now(),
        }
    }

    /// Drive the session until the client quits, disconnects or times out,
    /// or until `signal` announces a shutdown.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] on I/O failure or timeout. Protocol errors
    /// are answered on the wire and never end the session.
    #[tracing::instrument(level = "debug", skip_all, fields(peer = %self.peer))]
    pub async fn run(
        mut self,
        mut signal: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        internal!("Connected");

        if let Verdict::Reject(reply) = self.handler.validate_connect(self.peer) {
            internal!(level = INFO, "Connection from {} rejected", self.peer);
            return self.send(&reply).await;
        }

        let greeting = Reply::new(
            Status::ServiceReady,
            format!("{} ESMTP lure capture ready", self.config.banner),
        );
        self.send(&greeting).await?;

        let result = self.serve(&mut signal).await;
        internal!("Connection closed");
        result
    }

    async fn serve(
        &mut self,
        signal: &mut tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        let idle = self.config.timeouts.command_timeout();
        let lifetime = self.config.timeouts.connection_timeout();

        loop {
            if self.start_time.elapsed() >= lifetime {
                tracing::warn!(
                    peer = %self.peer,
                    max_secs = lifetime.as_secs(),
                    "Connection exceeded maximum lifetime, closing"
                );
                self.send(&Reply::new(
                    Status::Unavailable,
                    "4.4.2 Connection lifetime exceeded, closing",
                ))
                .await?;
                return Err(SessionError::Timeout(lifetime.as_secs()));
            }

            let line = tokio::select! {
                _ = signal.recv() => {
                    self.send(&Reply::new(Status::Unavailable, "4.3.2 Server shutting down")).await?;
                    return Err(SessionError::Shutdown);
                }
                line = tokio::time::timeout(idle, self.read_line()) => {
                    if let Ok(line) = line {
                        line?
                    } else {
                        tracing::warn!(
                            peer = %self.peer,
                            state = %self.state,
                            timeout_secs = idle.as_secs(),
                            "Client connection timed out"
                        );
                        self.send(&Reply::new(
                            Status::Unavailable,
                            "4.4.2 Idle timeout, closing connection",
                        ))
                        .await?;
                        return Err(SessionError::Timeout(idle.as_secs()));
                    }
                }
            };

            // A zero-length read is the peer closing its side
            let Some(line) = line else {
                return Ok(());
            };

            let flow = if self.body.is_some() {
                self.receive_body_line(&line).await?
            } else {
                self.receive_command(&line).await?
            };

            if matches!(flow, Flow::Close) {
                return Ok(());
            }
        }
    }

    async fn read_line(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut line = Vec::new();
        let read = (&mut self.stream)
            .take(MAX_LINE_LENGTH)
            .read_until(b'\n', &mut line)
            .await?;

        Ok((read > 0).then_some(line))
    }

    async fn send(&mut self, reply: &Reply) -> Result<(), SessionError> {
        let rendered = reply.render();
        outgoing!("{}", rendered.trim_end());

        let stream = self.stream.get_mut();
        stream.write_all(rendered.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive_body_line(&mut self, line: &[u8]) -> Result<Flow, SessionError> {
        let max_size = self.config.max_message_size;
        let finished = self
            .body
            .as_mut()
            .is_some_and(|body| body.push_line(line, max_size));

        if !finished {
            return Ok(Flow::Continue);
        }

        let body = self.body.take().unwrap_or_default();
        let transaction = match std::mem::take(&mut self.state) {
            State::Data(transaction) => transaction,
            other => {
                self.state = other;
                return Ok(Flow::Continue);
            }
        };

        let reply = if body.oversize {
            internal!(
                level = WARN,
                "Message from {} exceeded {} bytes, rejecting",
                self.peer,
                max_size
            );
            Reply::new(
                Status::ExceededStorage,
                format!("5.3.4 Message exceeds maximum size of {max_size} bytes"),
            )
        } else {
            incoming!("<{} bytes of message data>", body.data.len());
            self.handler
                .handle_message(&transaction.envelope, &body.data)
                .await
        };

        self.state = State::Greeted(transaction.greeted);
        self.send(&reply).await?;
        Ok(Flow::Continue)
    }

    async fn receive_command(&mut self, line: &[u8]) -> Result<Flow, SessionError> {
        let command = Command::try_from(line).unwrap_or_else(|invalid| invalid);
        incoming!("{command}");

        let reply = if command.is_stateless() {
            Self::stateless_reply(&command)
        } else {
            self.transition(&command)
        };

        self.send(&reply).await?;

        if self.state.should_close() {
            return Ok(Flow::Close);
        }
        Ok(Flow::Continue)
    }

    fn stateless_reply(command: &Command) -> Reply {
        match command {
            Command::Noop => Reply::new(Status::Ok, "2.0.0 Ok"),
            Command::Help => Reply::new(
                Status::HelpMessage,
                "2.0.0 Commands: EHLO HELO MAIL RCPT DATA RSET NOOP HELP VRFY QUIT",
            ),
            Command::Vrfy(_) => Reply::new(
                Status::CannotVerify,
                "2.5.0 Cannot VRFY user, but will accept message",
            ),
            Command::StartTls | Command::Auth => {
                Reply::new(Status::NotImplemented, "5.5.1 Command not implemented")
            }
            Command::Invalid(text) => {
                let verb = text
                    .split(|c: char| c.is_whitespace() || c == ':')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_uppercase();

                if KNOWN_VERBS.contains(&verb.as_str()) {
                    Reply::new(Status::ParameterError, "5.5.4 Syntax error in parameters")
                } else {
                    Reply::new(Status::SyntaxError, "5.5.2 Command unrecognized")
                }
            }
            _ => Reply::new(Status::InvalidCommandSequence, "5.5.1 Bad sequence of commands"),
        }
    }

    fn transition(&mut self, command: &Command) -> Reply {
        let previous = self.state.clone();

        let next = match std::mem::take(&mut self.state).transition(command) {
            Ok(next) => next,
            Err(OutOfSequence { state, reason }) => {
                self.state = state;
                return Reply::new(Status::InvalidCommandSequence, format!("5.5.1 {reason}"));
            }
        };
        self.state = next;

        tracing::debug!("Transitioned from {previous} to {}", self.state);

        let verdict = match command {
            Command::MailFrom(sender) => self.handler.validate_mail_from(sender.as_deref()),
            Command::RcptTo(recipient) => self.handler.validate_rcpt_to(recipient),
            _ => Verdict::Accept,
        };

        if let Verdict::Reject(reply) = verdict {
            self.state = previous;
            return reply;
        }

        match command {
            Command::Helo(HeloVariant::Ehlo(id)) => {
                let mut lines: Vec<Cow<'static, str>> =
                    vec![format!("{} greets {id}", self.config.banner).into()];
                lines.extend(
                    Extension::advertised(self.config.max_message_size)
                        .iter()
                        .map(|ext| Cow::Owned(ext.to_string())),
                );
                Reply::multiline(Status::Ok, lines)
            }
            Command::Helo(HeloVariant::Helo(id)) => Reply::new(
                Status::Ok,
                format!("{} says hello to {id}", self.config.banner),
            ),
            Command::MailFrom(_) => Reply::new(Status::Ok, "2.1.0 Ok"),
            Command::RcptTo(_) => Reply::new(Status::Ok, "2.1.5 Ok"),
            Command::Data => {
                self.body = Some(Body::default());
                Reply::new(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            }
            Command::Quit => Reply::new(Status::GoodBye, "2.0.0 Bye"),
            _ => Reply::new(Status::Ok, "2.0.0 Ok"),
        }
    }
}
