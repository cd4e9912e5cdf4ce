//! Scriptable SMTP server for transport tests.
#![allow(dead_code)]
//!
//! Each reply can be overridden through the builder, recipients can be
//! refused one by one, AUTH can be offered and checked, and the server can
//! hang up after a message to look like an idle timeout. Every command is
//! recorded for later assertions.
//!
//! ```rust,no_run
//! # async fn example() -> std::io::Result<()> {
//! let server = MockSmtpServer::builder()
//!     .with_auth("mailer", "hunter2")
//!     .rejecting_recipient("nobody@example.com")
//!     .build()
//!     .await?;
//!
//! // point a transport at server.addr()
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashSet,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    task::JoinHandle,
};

/// A command as the mock server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message body, dot-unstuffed, without the terminator.
    MessageContent(String),
    Rset,
    Noop,
    /// Mechanism and whether the credentials matched.
    Auth(String, bool),
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: Reply,
    ehlo_supported: bool,
    extensions: Vec<String>,
    mail_from: Reply,
    data: Reply,
    data_end: Reply,
    rejected_recipients: HashSet<String>,
    credentials: Option<(String, String)>,
    mechanisms: Vec<String>,
    close_after_message: bool,
    reply_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.example.com ESMTP ready"),
            ehlo_supported: true,
            extensions: vec!["SIZE 10000000".to_string(), "8BITMIME".to_string()],
            mail_from: Reply::new(250, "2.1.0 Ok"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Ok: queued"),
            rejected_recipients: HashSet::new(),
            credentials: None,
            mechanisms: Vec::new(),
            close_after_message: false,
            reply_delay: None,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Bodies of every message received, in order.
    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of TCP connections accepted so far.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn handle_client(
        stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;
        if config.greeting.code != 220 {
            return Ok(());
        }

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }

            let command_line = line.trim_end().to_string();
            let (verb, argument) = command_line
                .split_once(' ')
                .map_or((command_line.as_str(), ""), |(verb, rest)| (verb, rest.trim()));
            let verb = verb.to_ascii_uppercase();

            let (reply, recorded) = match verb.as_str() {
                "EHLO" if config.ehlo_supported => (
                    ehlo_reply(&config),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "EHLO" => (
                    Reply::new(502, "5.5.1 EHLO not supported").to_bytes(),
                    SmtpCommand::Ehlo(argument.to_string()),
                ),
                "HELO" => (
                    Reply::new(250, "mock.example.com").to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "MAIL" => (
                    config.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(path(argument)),
                ),
                "RCPT" => {
                    let recipient = path(argument);
                    let reply = if config.rejected_recipients.contains(&recipient) {
                        Reply::new(550, "5.1.1 User unknown")
                    } else {
                        Reply::new(250, "2.1.5 Ok")
                    };
                    (reply.to_bytes(), SmtpCommand::RcptTo(recipient))
                }
                "DATA" => (config.data.to_bytes(), SmtpCommand::Data),
                "RSET" => (Reply::new(250, "2.0.0 Ok").to_bytes(), SmtpCommand::Rset),
                "NOOP" => (Reply::new(250, "2.0.0 Ok").to_bytes(), SmtpCommand::Noop),
                "AUTH" => {
                    let (mechanism, accepted) =
                        Self::authenticate(&config, argument, &mut reader, &mut writer).await?;
                    let reply = if accepted {
                        Reply::new(235, "2.7.0 Authentication successful")
                    } else {
                        Reply::new(535, "5.7.8 Authentication credentials invalid")
                    };
                    (reply.to_bytes(), SmtpCommand::Auth(mechanism, accepted))
                }
                "STARTTLS" => (
                    Reply::new(454, "4.7.0 TLS not available").to_bytes(),
                    SmtpCommand::StartTls,
                ),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&Reply::new(221, "Bye").to_bytes()).await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(500, "5.5.2 Unknown command").to_bytes(),
                    SmtpCommand::Other(command_line.clone()),
                ),
            };

            commands.write().await.push(recorded.clone());

            if let Some(delay) = config.reply_delay {
                tokio::time::sleep(delay).await;
            }
            writer.write_all(&reply).await?;

            if recorded == SmtpCommand::Data && config.data.code == 354 {
                let body = read_body(&mut reader).await?;
                commands.write().await.push(SmtpCommand::MessageContent(body));
                writer.write_all(&config.data_end.to_bytes()).await?;

                if config.close_after_message {
                    return Ok(());
                }
            }
        }
    }

    async fn authenticate(
        config: &MockServerConfig,
        argument: &str,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
    ) -> std::io::Result<(String, bool)> {
        let mut words = argument.split_whitespace();
        let mechanism = words.next().unwrap_or_default().to_ascii_uppercase();

        let supplied = match mechanism.as_str() {
            "PLAIN" => words
                .next()
                .and_then(|token| STANDARD.decode(token).ok())
                .and_then(|raw| String::from_utf8(raw).ok())
                .and_then(|raw| {
                    let mut parts = raw.split('\0').skip(1);
                    Some((parts.next()?.to_string(), parts.next()?.to_string()))
                }),
            "LOGIN" => {
                writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                let username = read_base64_line(reader).await?;
                writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                let password = read_base64_line(reader).await?;
                Some((username, password))
            }
            _ => None,
        };

        let accepted = config.mechanisms.contains(&mechanism)
            && supplied.is_some()
            && supplied == config.credentials;
        Ok((mechanism, accepted))
    }
}

fn ehlo_reply(config: &MockServerConfig) -> Vec<u8> {
    let mut lines = vec!["mock.example.com".to_string()];
    lines.extend(config.extensions.iter().cloned());
    if !config.mechanisms.is_empty() {
        lines.push(format!("AUTH {}", config.mechanisms.join(" ")));
    }

    let mut reply = String::new();
    for (index, line) in lines.iter().enumerate() {
        let separator = if index + 1 == lines.len() { ' ' } else { '-' };
        let _ = write!(reply, "250{separator}{line}\r\n");
    }
    reply.into_bytes()
}

fn path(argument: &str) -> String {
    let start = argument.find('<').map_or(0, |index| index + 1);
    let end = argument.rfind('>').unwrap_or(argument.len());
    argument.get(start..end).unwrap_or_default().to_string()
}

async fn read_base64_line(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(STANDARD
        .decode(line.trim())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .unwrap_or_default())
}

async fn read_body(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> std::io::Result<String> {
    let mut body = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(body);
        }
        if line == ".\r\n" {
            return Ok(body);
        }
        body.push_str(line.strip_prefix('.').unwrap_or(&line));
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = Reply::new(code, message);
        self
    }

    /// Answer `EHLO` with 502 so clients fall back to `HELO`.
    #[must_use]
    pub const fn without_ehlo(mut self) -> Self {
        self.config.ehlo_supported = false;
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.extensions.push(extension.into());
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn rejecting_recipient(mut self, address: impl Into<String>) -> Self {
        self.config.rejected_recipients.insert(address.into());
        self
    }

    /// Offer `AUTH PLAIN LOGIN` and accept exactly these credentials.
    #[must_use]
    pub fn with_auth(self, username: &str, password: &str) -> Self {
        self.with_auth_mechanisms(username, password, &["PLAIN", "LOGIN"])
    }

    #[must_use]
    pub fn with_auth_mechanisms(
        mut self,
        username: &str,
        password: &str,
        mechanisms: &[&str],
    ) -> Self {
        self.config.credentials = Some((username.to_string(), password.to_string()));
        self.config.mechanisms = mechanisms.iter().map(|m| (*m).to_string()).collect();
        self
    }

    /// Hang up after each message, as an idle timeout would.
    #[must_use]
    pub const fn closing_after_message(mut self) -> Self {
        self.config.close_after_message = true;
        self
    }

    #[must_use]
    pub const fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.config.reply_delay = Some(delay);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _peer)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let config = Arc::clone(&config);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        if let Err(err) =
                            MockSmtpServer::handle_client(stream, config, commands).await
                        {
                            tracing::debug!("Mock server client error: {err}");
                        }
                    });
                }
            })
        };

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            task,
        })
    }
}
