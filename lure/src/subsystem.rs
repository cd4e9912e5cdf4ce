use std::{net::SocketAddr, sync::Arc};

use lure_common::{
    config::{
        ConfigResolver, DEFAULT_CAPTURE_PORT, DEFAULT_RATE_LIMIT_PER_MINUTE, DisplayConfig,
        EffectiveConfig, EnvOverrides, Mode, StoredConfig, StoredConfigPatch, UserId,
    },
    internal,
    message::{CapturedMessage, MessageId},
    tracing,
};
use lure_delivery::{OutgoingMail, RateLimiter, SendReport, TransportCache};
use lure_smtp::{CaptureHandler, CaptureServer, SessionConfig, client::ClientOptions};
use lure_store::{ConfigStore, MessageStore, Page};

use crate::error::MailError;

pub const DEFAULT_TEST_SUBJECT: &str = "Test email from lure";
pub const DEFAULT_TEST_BODY: &str =
    "This is a test message from lure. If you can read it, outbound mail is configured correctly.";

/// The mail subsystem: one instance per process, built at startup and
/// passed to whatever needs it.
///
/// It holds the capture listener, the cached outbound transport, the rate
/// limiter, and the message and configuration stores.
#[derive(Debug)]
pub struct MailSubsystem {
    messages: Arc<dyn MessageStore>,
    configs: Arc<dyn ConfigStore>,
    resolver: ConfigResolver,
    env: EnvOverrides,
    capture: CaptureServer,
    transports: TransportCache,
    limiter: RateLimiter,
}

pub struct MailSubsystemBuilder {
    messages: Arc<dyn MessageStore>,
    configs: Arc<dyn ConfigStore>,
    env: Option<EnvOverrides>,
    capture_port: u16,
    session: SessionConfig,
    client: ClientOptions,
}

impl MailSubsystemBuilder {
    /// Environment overrides to resolve against. Defaults to a snapshot of
    /// the process environment taken in [`Self::build`].
    #[must_use]
    pub fn env(mut self, env: EnvOverrides) -> Self {
        self.env = Some(env);
        self
    }

    /// Port capture-mode sends are pointed at when the listener is not
    /// running yet, and the port shown in the display config.
    #[must_use]
    pub const fn capture_port(mut self, port: u16) -> Self {
        self.capture_port = port;
        self
    }

    #[must_use]
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    #[must_use]
    pub fn client_options(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Create the store layouts if needed and assemble the subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if either store cannot be initialised.
    pub async fn build(self) -> Result<MailSubsystem, MailError> {
        self.messages.ensure_schema().await?;
        self.configs.ensure_schema().await?;

        let handler = Arc::new(CaptureHandler::new(Arc::clone(&self.messages)));

        Ok(MailSubsystem {
            messages: self.messages,
            configs: self.configs,
            resolver: ConfigResolver::new(self.capture_port),
            env: self.env.unwrap_or_else(EnvOverrides::from_env),
            capture: CaptureServer::new(handler, self.session),
            transports: TransportCache::new(self.client),
            limiter: RateLimiter::new(DEFAULT_RATE_LIMIT_PER_MINUTE),
        })
    }
}

impl MailSubsystem {
    #[must_use]
    pub fn builder(
        messages: Arc<dyn MessageStore>,
        configs: Arc<dyn ConfigStore>,
    ) -> MailSubsystemBuilder {
        MailSubsystemBuilder {
            messages,
            configs,
            env: None,
            capture_port: DEFAULT_CAPTURE_PORT,
            session: SessionConfig::default(),
            client: ClientOptions::default(),
        }
    }

    /// Start the capture listener. Starting an already running listener
    /// succeeds and returns its address.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Capture`] if the port cannot be bound.
    pub async fn start_capture(&self, port: u16) -> Result<SocketAddr, MailError> {
        Ok(self.capture.start(port).await?)
    }

    /// Stop the capture listener. Stopping a stopped listener is a no-op.
    pub async fn stop_capture(&self) {
        self.capture.stop().await;
    }

    #[must_use]
    pub fn is_capture_running(&self) -> bool {
        self.capture.is_running()
    }

    #[must_use]
    pub fn capture_address(&self) -> Option<SocketAddr> {
        self.capture.local_addr()
    }

    /// Captured messages, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the store cannot be read.
    pub async fn list_messages(&self, limit: usize, offset: usize) -> Result<Page, MailError> {
        Ok(self.messages.list(limit, offset).await?)
    }

    /// # Errors
    ///
    /// Returns a not-found [`MailError::Store`] for unknown ids.
    pub async fn get_message(&self, id: &MessageId) -> Result<CapturedMessage, MailError> {
        Ok(self.messages.get(id).await?)
    }

    /// Delete a message. Unknown ids succeed with `false`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the store cannot be written.
    pub async fn delete_message(&self, id: &MessageId) -> Result<bool, MailError> {
        Ok(self.messages.delete(id).await?)
    }

    /// Remove every captured message, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the store cannot be written.
    pub async fn clear_messages(&self) -> Result<usize, MailError> {
        let removed = self.messages.clear().await?;
        internal!(level = INFO, "Cleared {removed} captured message(s)");
        Ok(removed)
    }

    /// Messages addressed to `recipient`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the store cannot be read.
    pub async fn search_messages(
        &self,
        recipient: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page, MailError> {
        Ok(self
            .messages
            .find_by_recipient(recipient, limit, offset)
            .await?)
    }

    /// The masked configuration for `user`, falling back to the global
    /// record. Never contains the password.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the stored record cannot be read.
    pub async fn get_display_config(
        &self,
        user: Option<&UserId>,
    ) -> Result<DisplayConfig, MailError> {
        let stored = self.configs.load_for(user).await?;
        let mut view = self.resolver.display(stored.as_ref(), &self.env);

        if let (Mode::Capture, Some(port)) = (view.mode, self.capture.port()) {
            view.port = port;
        }

        Ok(view)
    }

    /// Apply a partial update to the record for exactly this scope and
    /// return the new masked view.
    ///
    /// An absent field keeps its value and an empty string clears it, so
    /// `password: Some("")` removes a saved password. The cached transport
    /// is dropped so changed credentials take effect on the next send.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Store`] if the record cannot be read or written.
    #[tracing::instrument(skip_all, fields(user = user.map(UserId::as_str)))]
    pub async fn update_stored_config(
        &self,
        patch: StoredConfigPatch,
        user: Option<&UserId>,
    ) -> Result<DisplayConfig, MailError> {
        let mut stored = self.configs.load(user).await?.unwrap_or_default();
        patch.apply_to(&mut stored);
        self.configs.save(user, &stored).await?;

        self.transports.invalidate().await;
        internal!(level = INFO, "Stored mail configuration updated");

        self.get_display_config(user).await
    }

    /// The configuration a send for `user` would use right now.
    ///
    /// In capture mode this points at the local listener's bound port when
    /// it is running, and at the configured capture port otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Config`] if external delivery is selected but
    /// incomplete.
    pub async fn effective_config(
        &self,
        user: Option<&UserId>,
    ) -> Result<EffectiveConfig, MailError> {
        let stored: Option<StoredConfig> = self.configs.load_for(user).await?;
        let effective = self.resolver.resolve(stored.as_ref(), &self.env)?;

        Ok(match self.capture.port() {
            Some(port) => effective.with_capture_port(port),
            None => effective,
        })
    }

    /// Send `mail` with the configuration for `user`.
    ///
    /// In capture mode the listener is started on the configured capture port
    /// first if it is not already running.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Config`] before any network activity if the
    /// configuration is incomplete, [`MailError::Capture`] if the capture
    /// listener has to be started and cannot bind, and
    /// [`MailError::Delivery`] if the transport cannot be verified or the
    /// server refuses the message.
    #[tracing::instrument(skip_all, fields(recipients = mail.to.len()))]
    pub async fn send(
        &self,
        mail: &OutgoingMail,
        user: Option<&UserId>,
    ) -> Result<SendReport, MailError> {
        let mut config = self.effective_config(user).await?;
        let composed = mail.compose(&config.from_address)?;

        if config.mode == Mode::Capture && !self.capture.is_running() {
            let address = self.capture.start(self.resolver.capture_port()).await?;
            internal!(level = INFO, "Started capture listener on {address} for delivery");
            config = config.with_capture_port(address.port());
        }

        self.limiter.reconfigure(config.rate_limit_per_minute);
        self.limiter.acquire().await;

        let transport = self.transports.get(&config).await?;
        Ok(transport.send(&composed).await?)
    }

    /// Send a short test message with the global configuration.
    ///
    /// # Errors
    ///
    /// As [`Self::send`].
    pub async fn send_test_message(
        &self,
        to: &str,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<SendReport, MailError> {
        let mail = OutgoingMail::new([to])
            .subject(subject.unwrap_or(DEFAULT_TEST_SUBJECT))
            .text(body.unwrap_or(DEFAULT_TEST_BODY));

        self.send(&mail, None).await
    }

    /// Stop the listener and close the outbound session.
    pub async fn shutdown(&self) {
        self.capture.stop().await;
        self.transports.invalidate().await;
    }
}
