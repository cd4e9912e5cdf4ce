//! Lifecycle of the embedded capture listener.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use lure_common::{Signal, internal, tracing};
use parking_lot::{Mutex, RwLock};
use tokio::{net::TcpListener, sync::broadcast, task::JoinSet};

use crate::{
    error::CaptureError,
    handler::TransactionHandler,
    session::{Session, SessionConfig},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
        })
    }
}

struct Running {
    address: SocketAddr,
    shutdown: broadcast::Sender<Signal>,
    task: tokio::task::JoinHandle<()>,
}

/// The capture listener and its `Stopped → Starting → Listening → Stopping`
/// lifecycle.
///
/// `start` and `stop` are serialised by a single transition lock, so
/// concurrent callers never race to bind the same port. Both are
/// idempotent.
pub struct CaptureServer {
    handler: Arc<dyn TransactionHandler>,
    config: Arc<SessionConfig>,
    transition: tokio::sync::Mutex<()>,
    state: RwLock<CaptureState>,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for CaptureServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureServer")
            .field("state", &*self.state.read())
            .field("address", &self.local_addr())
            .finish_non_exhaustive()
    }
}

impl CaptureServer {
    #[must_use]
    pub fn new(handler: Arc<dyn TransactionHandler>, config: SessionConfig) -> Self {
        Self {
            handler,
            config: Arc::new(config),
            transition: tokio::sync::Mutex::new(()),
            state: RwLock::new(CaptureState::Stopped),
            running: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Listening
            && self
                .running
                .lock()
                .as_ref()
                .is_some_and(|running| !running.task.is_finished())
    }

    /// The bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.address)
    }

    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|address| address.port())
    }

    /// Bind `0.0.0.0:port` and start accepting. Port `0` picks a free port.
    ///
    /// Starting while already listening succeeds without rebinding and
    /// returns the existing address.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ListenerBindFailed`] if the port cannot be
    /// bound. The server is left stopped.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn start(&self, port: u16) -> Result<SocketAddr, CaptureError> {
        let _transition = self.transition.lock().await;

        if let Some(address) = self.live_address() {
            if address.port() != port && port != 0 {
                internal!(
                    level = INFO,
                    "Capture server already listening on {address}, ignoring request for port {port}"
                );
            }
            return Ok(address);
        }

        *self.state.write() = CaptureState::Starting;

        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(source) => {
                *self.state.write() = CaptureState::Stopped;
                internal!(level = ERROR, "Unable to bind capture listener on {address}: {source}");
                return Err(CaptureError::ListenerBindFailed { address, source });
            }
        };

        let address = match listener.local_addr() {
            Ok(address) => address,
            Err(err) => {
                *self.state.write() = CaptureState::Stopped;
                return Err(CaptureError::LocalAddr(err));
            }
        };

        let (shutdown, receiver) = broadcast::channel(1);
        let task = tokio::spawn(serve(
            listener,
            receiver,
            shutdown.clone(),
            Arc::clone(&self.handler),
            Arc::clone(&self.config),
        ));

        *self.running.lock() = Some(Running {
            address,
            shutdown,
            task,
        });
        *self.state.write() = CaptureState::Listening;

        internal!(level = INFO, "Capture server listening on {address}");
        Ok(address)
    }

    /// Stop accepting and close open sessions.
    ///
    /// Sessions are told to finish with `421` and given the configured grace
    /// period before they are aborted, so this never waits indefinitely.
    /// Stopping a stopped server is a no-op.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn stop(&self) {
        let _transition = self.transition.lock().await;

        let running = self.running.lock().take();
        let Some(running) = running else {
            *self.state.write() = CaptureState::Stopped;
            return;
        };

        *self.state.write() = CaptureState::Stopping;
        internal!(level = INFO, "Stopping capture server on {}", running.address);

        let _ = running.shutdown.send(Signal::Shutdown);
        if let Err(err) = running.task.await {
            internal!(level = ERROR, "Capture listener task failed: {err}");
        }

        *self.state.write() = CaptureState::Stopped;
        internal!(level = INFO, "Capture server stopped");
    }

    /// Address of a listener that is still accepting. A listener task that
    /// died on its own is cleared here so the next start rebinds.
    fn live_address(&self) -> Option<SocketAddr> {
        let mut running = self.running.lock();

        match running.as_ref() {
            Some(live) if !live.task.is_finished() => Some(live.address),
            Some(dead) => {
                internal!(
                    level = WARN,
                    "Capture listener on {} exited unexpectedly",
                    dead.address
                );
                *running = None;
                None
            }
            None => None,
        }
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(Signal::Shutdown);
        }
    }
}

async fn serve(
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<Signal>,
    sessions_shutdown: broadcast::Sender<Signal>,
    handler: Arc<dyn TransactionHandler>,
    config: Arc<SessionConfig>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            sig = shutdown.recv() => {
                if matches!(sig, Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                    break;
                }
            }

            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

            connection = listener.accept() => {
                let (stream, peer) = match connection {
                    Ok(connection) => connection,
                    Err(err) => {
                        internal!(level = WARN, "Failed to accept capture connection: {err}");
                        continue;
                    }
                };

                tracing::debug!("Capture connection received from {peer}");
                let session = Session::create(stream, peer, Arc::clone(&handler), Arc::clone(&config));
                let signal = sessions_shutdown.subscribe();

                sessions.spawn(async move {
                    match session.run(signal).await {
                        Err(err) if !err.is_shutdown() => {
                            internal!(level = WARN, "Capture session with {peer} ended: {err}");
                        }
                        _ => {}
                    }
                });
            }
        }
    }

    drop(listener);

    internal!(
        level = INFO,
        "Capture listener received shutdown signal, finishing {} sessions ...",
        sessions.len()
    );

    let grace = config.timeouts.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        internal!(
            level = WARN,
            "Aborting {} capture sessions still open after {}s",
            sessions.len(),
            grace.as_secs()
        );
        sessions.abort_all();
    }
}
