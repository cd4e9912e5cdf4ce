use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use lure_common::{
    config::{EffectiveConfig, Mode},
    internal, tracing,
};
use lure_smtp::client::ClientOptions;
use tokio::sync::Mutex;

use crate::{error::DeliveryError, fingerprint::Fingerprint, transport::Transport};

/// Holds at most one [`Transport`], keyed by the [`Fingerprint`] of the
/// config it was built for.
///
/// Reading the fingerprint, rebuilding and handing out the transport happen
/// under one lock, so concurrent callers that see a stale transport build a
/// single replacement between them.
#[derive(Debug)]
pub struct TransportCache {
    options: ClientOptions,
    slot: Mutex<Option<Arc<Transport>>>,
    builds: AtomicUsize,
}

impl TransportCache {
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            slot: Mutex::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    /// The transport for `config`, reusing the cached one when the
    /// fingerprint matches.
    ///
    /// New external transports are verified before being cached. Capture
    /// transports are not, since the capture listener has no AUTH.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::VerifyFailed`] if a new external transport
    /// fails verification. The cache is left empty.
    #[tracing::instrument(skip_all, fields(host = %config.host, port = config.port, mode = %config.mode))]
    pub async fn get(&self, config: &EffectiveConfig) -> Result<Arc<Transport>, DeliveryError> {
        let fingerprint = Fingerprint::of(config);
        let mut slot = self.slot.lock().await;

        if let Some(transport) = slot
            .as_ref()
            .filter(|transport| transport.fingerprint() == &fingerprint)
        {
            return Ok(Arc::clone(transport));
        }

        if let Some(stale) = slot.take() {
            internal!(
                level = INFO,
                "Transport configuration changed ({} -> {}), rebuilding",
                stale.fingerprint().short(),
                fingerprint.short()
            );
            stale.close().await;
        }

        let transport = Arc::new(Transport::new(config, self.options.clone()));
        self.builds.fetch_add(1, Ordering::Relaxed);

        if config.mode == Mode::External {
            transport.verify().await?;
        }

        *slot = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Drop the cached transport so the next [`Self::get`] builds a fresh
    /// one.
    pub async fn invalidate(&self) {
        let stale = self.slot.lock().await.take();
        if let Some(stale) = stale {
            internal!(
                level = DEBUG,
                "Invalidated transport {}",
                stale.fingerprint().short()
            );
            stale.close().await;
        }
    }

    /// Fingerprint of the cached transport, if any.
    pub async fn current(&self) -> Option<Fingerprint> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|transport| transport.fingerprint().clone())
    }

    /// How many transports this cache has built.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}
