//! SMTP client with implicit TLS, STARTTLS and AUTH PLAIN/LOGIN.

use std::{future::Future, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use lure_common::{
    config::{ClientTimeouts, Credentials},
    incoming, outgoing, tracing,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// How the client connects and how long it waits.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Name sent with `EHLO`.
    pub helo_name: String,
    /// Skip certificate verification. Only for self-signed test servers.
    pub accept_invalid_certs: bool,
    pub timeouts: ClientTimeouts,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            helo_name: "localhost".to_string(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }
}

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(data).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = tls_connector(accept_invalid_certs)?;
                let server_name = ServerName::try_from(domain.to_string())
                    .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ClientError::TlsError(e.to_string()))?;

                Ok(Self::Tls(Box::new(tls_stream)))
            }
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any certificate. Used only with `accept_invalid_certs`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

/// Normalise line endings to CRLF and dot-stuff, then append the
/// end-of-data marker.
fn encode_data(data: &str) -> String {
    let mut encoded = String::with_capacity(data.len() + 8);

    for line in data.lines() {
        if line.starts_with('.') {
            encoded.push('.');
        }
        encoded.push_str(line);
        encoded.push_str("\r\n");
    }

    encoded.push_str(".\r\n");
    encoded
}

/// An SMTP client for sending commands and receiving responses.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    options: ClientOptions,
    capabilities: Vec<String>,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_domain", &self.server_domain)
            .field("connected", &self.connection.is_some())
            .field("tls", &self.is_tls())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Connect to `host:port`, wrapping the socket in TLS straight away
    /// when `implicit_tls` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connect or TLS handshake fails or times
    /// out.
    pub async fn connect(
        host: &str,
        port: u16,
        implicit_tls: bool,
        options: ClientOptions,
    ) -> Result<Self> {
        let connect_timeout = options.timeouts.connect_timeout();

        let stream = bounded(
            connect_timeout,
            "connect",
            async { TcpStream::connect((host, port)).await.map_err(ClientError::from) },
        )
        .await?;

        let mut connection = ClientConnection::Plain(stream);
        if implicit_tls {
            connection = bounded(
                connect_timeout,
                "TLS handshake",
                connection.upgrade_to_tls(host, options.accept_invalid_certs),
            )
            .await?;
        }

        tracing::debug!(host, port, implicit_tls, "Connected");

        Ok(Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain: host.to_string(),
            options,
            capabilities: Vec::new(),
        })
    }

    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ClientConnection::is_tls)
    }

    /// Extension keywords from the last `EHLO` reply, upper-cased.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Whether the last `EHLO` reply advertised `keyword`.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.capabilities.iter().any(|capability| {
            capability
                .split_whitespace()
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(keyword))
        })
    }

    /// Mechanisms listed on the advertised `AUTH` line.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.capabilities
            .iter()
            .filter_map(|capability| {
                let mut words = capability.split_whitespace();
                words
                    .next()
                    .filter(|name| name.eq_ignore_ascii_case("AUTH"))
                    .map(|_| words.map(str::to_ascii_uppercase).collect::<Vec<_>>())
            })
            .flatten()
            .collect()
    }

    /// Reads the initial server greeting, which must be a `220`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is not `220`.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let timeout = self.options.timeouts.command_timeout();
        bounded(timeout, "greeting", self.read_response())
            .await?
            .expect_code(220)
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{line}\r\n");
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(data.as_bytes())
            .await
    }

    /// Send one command line and read the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails or times out. Error
    /// replies are returned as `Ok`; callers decide what they mean.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        outgoing!("{command}");
        self.exchange(command, "command").await
    }

    /// Like [`Self::command`], but never logs the line itself.
    async fn secret_command(&mut self, command: &str, shown: &str) -> Result<Response> {
        outgoing!("{shown}");
        self.exchange(command, "authentication").await
    }

    async fn exchange(&mut self, line: &str, step: &'static str) -> Result<Response> {
        let timeout = self.options.timeouts.command_timeout();
        bounded(timeout, step, async {
            self.send_line(line).await?;
            self.read_response().await
        })
        .await
    }

    /// Sends `EHLO` and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        let response = self.command(&format!("EHLO {domain}")).await?.into_result()?;
        self.capabilities = response.lines.iter().skip(1).cloned().collect();
        Ok(response)
    }

    /// Sends `HELO`, for servers that reject `EHLO`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.capabilities.clear();
        self.command(&format!("HELO {domain}")).await?.into_result()
    }

    /// Sends `MAIL FROM`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails. A rejection is returned as
    /// `Ok`.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// Sends `RCPT TO`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails. A rejection is returned as
    /// `Ok`.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends `DATA`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails. A rejection is returned as
    /// `Ok`.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message body, dot-stuffed and terminated, and reads the
    /// final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails or the reply does not arrive within
    /// the data timeout.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let encoded = encode_data(data);
        outgoing!("<{} bytes of message data>", encoded.len());

        let timeout = self.options.timeouts.data_timeout();
        bounded(timeout, "end of data", async {
            self.connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?
                .send(encoded.as_bytes())
                .await?;
            self.read_response().await
        })
        .await
    }

    /// Sends `QUIT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await;
        self.connection = None;
        response
    }

    /// Sends `RSET` to reset the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await?.into_result()
    }

    /// Sends `NOOP`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or is rejected.
    pub async fn noop(&mut self) -> Result<Response> {
        self.command("NOOP").await?.into_result()
    }

    /// Sends `STARTTLS` and upgrades the connection to TLS.
    ///
    /// The extension list is cleared; callers must `EHLO` again.
    ///
    /// # Errors
    ///
    /// Returns an error if `STARTTLS` is rejected or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?.expect_code(220)?;

        let connection = self
            .connection
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        let timeout = self.options.timeouts.connect_timeout();
        let domain = self.server_domain.clone();

        self.connection = Some(
            bounded(
                timeout,
                "TLS handshake",
                connection.upgrade_to_tls(&domain, self.options.accept_invalid_certs),
            )
            .await?,
        );
        self.buffer_pos = 0;
        self.capabilities.clear();

        Ok(response)
    }

    /// Authenticate, preferring `PLAIN` and falling back to `LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthUnsupported`] if neither mechanism is
    /// offered, or [`ClientError::SmtpError`] if the server rejects the
    /// credentials.
    pub async fn authenticate(&mut self, credentials: &Credentials) -> Result<Response> {
        let mechanisms = self.auth_mechanisms();

        if mechanisms.iter().any(|m| m == "PLAIN") {
            let token = STANDARD.encode(format!(
                "\0{}\0{}",
                credentials.username, credentials.password
            ));
            return self
                .secret_command(&format!("AUTH PLAIN {token}"), "AUTH PLAIN <redacted>")
                .await?
                .expect_code(235);
        }

        if mechanisms.iter().any(|m| m == "LOGIN") {
            self.command("AUTH LOGIN").await?.expect_code(334)?;
            self.secret_command(&STANDARD.encode(&credentials.username), "<username>")
                .await?
                .expect_code(334)?;
            return self
                .secret_command(&STANDARD.encode(&credentials.password), "<password>")
                .await?
                .expect_code(235);
        }

        Err(ClientError::AuthUnsupported {
            offered: if mechanisms.is_empty() {
                "none".to_string()
            } else {
                mechanisms.join(" ")
            },
        })
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{}", response.raw());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    step: &'static str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ClientError::Timeout {
            step,
            secs: limit.as_secs(),
        })?
}

#[cfg(test)]
mod test {
    use super::encode_data;

    #[test]
    fn data_is_dot_stuffed_and_terminated() {
        assert_eq!(
            encode_data("Subject: x\n\n.hidden\nlast"),
            "Subject: x\r\n\r\n..hidden\r\nlast\r\n.\r\n"
        );
        assert_eq!(encode_data("a\r\nb\r\n"), "a\r\nb\r\n.\r\n");
    }
}
