//! One live outbound SMTP session.

use lure_common::{
    config::{Credentials, EffectiveConfig, Mode},
    internal, tracing,
};
use lure_smtp::client::{ClientError, ClientOptions, SmtpClient};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{error::DeliveryError, fingerprint::Fingerprint, mail::Composed};

/// Outcome of one send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReport {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    /// The server's final reply to the message data.
    pub raw_response: String,
}

/// A connection to one SMTP host, bound to the host, port, TLS mode and
/// credentials of the config it was built from.
///
/// The session stays open between sends. Each reuse starts with `RSET`; if
/// that fails the connection is assumed dead and a new one is opened.
pub struct Transport {
    fingerprint: Fingerprint,
    host: String,
    port: u16,
    secure: bool,
    mode: Mode,
    credentials: Option<Credentials>,
    options: ClientOptions,
    session: Mutex<Option<SmtpClient>>,
}

impl core::fmt::Debug for Transport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transport")
            .field("fingerprint", &self.fingerprint.short())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("mode", &self.mode)
            .field("authenticated", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport. No connection is made until it is verified or
    /// used.
    #[must_use]
    pub fn new(config: &EffectiveConfig, options: ClientOptions) -> Self {
        Self {
            fingerprint: Fingerprint::of(config),
            host: config.host.clone(),
            port: config.port,
            secure: config.secure,
            mode: config.mode,
            credentials: config.credentials(),
            options,
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Connect, negotiate TLS and authenticate, within the verify timeout.
    /// The verified session is kept for the next send.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::VerifyFailed`] naming the host and port.
    #[tracing::instrument(skip_all, fields(host = %self.host, port = self.port))]
    pub async fn verify(&self) -> Result<(), DeliveryError> {
        let limit = self.options.timeouts.verify_timeout();
        let outcome = tokio::time::timeout(limit, self.open()).await;

        let failure = match outcome {
            Ok(Ok(client)) => {
                *self.session.lock().await = Some(client);
                internal!(level = INFO, "Verified SMTP transport {}:{}", self.host, self.port);
                return Ok(());
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("no answer within {}s", limit.as_secs()),
        };

        internal!(
            level = WARN,
            "SMTP transport {}:{} failed verification: {failure}",
            self.host,
            self.port
        );

        Err(DeliveryError::VerifyFailed {
            host: self.host.clone(),
            port: self.port,
            reason: failure,
        })
    }

    /// Send a composed message. Recipients the server refuses are reported
    /// in [`SendReport::rejected`]; the send fails only if all of them are.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Rejected`] if the server refuses the sender
    /// or the data, [`DeliveryError::AllRecipientsRejected`] if no
    /// recipient is accepted, or [`DeliveryError::Client`] on connection
    /// failure.
    #[tracing::instrument(skip_all, fields(fingerprint = self.fingerprint.short(), id = %mail.message_id))]
    pub async fn send(&self, mail: &Composed) -> Result<SendReport, DeliveryError> {
        let mut session = self.session.lock().await;

        let mut client = match session.take() {
            Some(mut client) => match client.rset().await {
                Ok(_) => client,
                Err(err) => {
                    internal!(
                        level = DEBUG,
                        "Idle SMTP session to {}:{} is unusable ({err}), reconnecting",
                        self.host,
                        self.port
                    );
                    self.open().await?
                }
            },
            None => self.open().await?,
        };

        let result = transact(&mut client, mail).await;
        match &result {
            Err(err) if err.is_connection_error() => {
                internal!(level = WARN, "Dropping SMTP session after error: {err}");
            }
            _ => *session = Some(client),
        }

        result
    }

    /// Politely close the idle session, if any.
    pub async fn close(&self) {
        if let Some(mut client) = self.session.lock().await.take() {
            if let Err(err) = client.quit().await {
                tracing::debug!("QUIT failed while closing transport: {err}");
            }
        }
    }

    async fn open(&self) -> Result<SmtpClient, ClientError> {
        let mut client =
            SmtpClient::connect(&self.host, self.port, self.secure, self.options.clone()).await?;
        client.read_greeting().await?;

        let helo_name = self.options.helo_name.as_str();
        if let Err(err) = client.ehlo(helo_name).await {
            if err.is_connection_error() {
                return Err(err);
            }
            client.helo(helo_name).await?;
        }

        if self.mode == Mode::External && !self.secure && client.supports("STARTTLS") {
            client.starttls().await?;
            client.ehlo(helo_name).await?;
        }

        if let Some(credentials) = &self.credentials {
            client.authenticate(credentials).await?;
        }

        Ok(client)
    }
}

async fn transact(client: &mut SmtpClient, mail: &Composed) -> Result<SendReport, DeliveryError> {
    let response = client.mail_from(&mail.from).await?;
    if !response.is_success() {
        return Err(DeliveryError::Rejected {
            stage: "MAIL FROM",
            code: response.code,
            message: response.message(),
        });
    }

    let mut accepted = Vec::with_capacity(mail.recipients.len());
    let mut rejected = Vec::new();
    for recipient in &mail.recipients {
        let response = client.rcpt_to(recipient).await?;
        if response.is_success() {
            accepted.push(recipient.clone());
        } else {
            internal!(
                level = INFO,
                "Recipient {recipient} rejected: {} {}",
                response.code,
                response.message()
            );
            rejected.push(recipient.clone());
        }
    }

    if accepted.is_empty() {
        client.rset().await?;
        return Err(DeliveryError::AllRecipientsRejected { rejected });
    }

    let response = client.data().await?;
    if response.code != 354 {
        return Err(DeliveryError::Rejected {
            stage: "DATA",
            code: response.code,
            message: response.message(),
        });
    }

    let response = client.send_data(&mail.data).await?;
    if !response.is_success() {
        return Err(DeliveryError::Rejected {
            stage: "message data",
            code: response.code,
            message: response.message(),
        });
    }

    internal!(
        level = INFO,
        "Sent {} to {} recipient(s), {} rejected",
        mail.message_id,
        accepted.len(),
        rejected.len()
    );

    Ok(SendReport {
        message_id: mail.message_id.clone(),
        accepted,
        rejected,
        raw_response: response.raw(),
    })
}
