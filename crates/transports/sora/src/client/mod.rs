//! Sora client handle
//!
//! [`SoraClient`] is a cheap, cloneable handle to a connection controller
//! running on the tokio runtime. Commands are queued to the controller; state
//! is observed through a [`ClientStatus`] watch channel and [`ClientEvent`]
//! broadcasts.
//!
//! Dropping the last handle closes the client.

mod controller;
pub mod state;

pub use state::{ClientEvent, ClientStatus, MediaSessionHandle, Phase};

use crate::config::SessionConfig;
use crate::media::{ConnectivityState, MediaEngine, WebRtcMediaEngine};
use crate::transport::{SignalingTransport, WebSocketTransport};
use crate::{Error, Result};
use controller::{Command, Controller};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Capacity of the event broadcast; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
    /// Set by the first `close`
    closing: AtomicBool,
}

/// Handle to a Sora signaling client
#[derive(Clone)]
pub struct SoraClient {
    inner: Arc<ClientInner>,
}

impl SoraClient {
    /// Spawn a client on the current tokio runtime
    ///
    /// The client stays idle until [`connect`](Self::connect).
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = Controller::new(
            config,
            transport,
            engine,
            commands_rx,
            status_tx,
            events_tx.clone(),
        );
        tokio::spawn(controller.run());

        Self {
            inner: Arc::new(ClientInner {
                commands: commands_tx,
                status: status_rx,
                events: events_tx,
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn a client using the WebSocket transport and the WebRTC media engine
    pub fn with_defaults(config: SessionConfig) -> Self {
        Self::new(
            config,
            Arc::new(WebSocketTransport::new()),
            Arc::new(WebRtcMediaEngine::new()),
        )
    }

    /// Validate the configuration and start connecting
    ///
    /// Returns once the first attempt has started; progress is reported
    /// through [`watch_status`](Self::watch_status). An invalid configuration
    /// closes the client and is returned here. Only valid from
    /// [`Phase::Idle`].
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { reply })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Tear down the current attempt and return to [`Phase::Idle`]
    ///
    /// Clears the retry counter. Does nothing on a closed client.
    pub async fn reset(&self) -> Result<()> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Close the client and release the signaling link and media session
    ///
    /// Idempotent. Concurrent callers all return once the client is closed,
    /// and teardown runs exactly once.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            let mut status = self.inner.status.clone();
            // Err means the controller is gone, which is closed as well
            let _ = status.wait_for(|s| s.phase == Phase::Closed).await;
            return;
        }

        let (reply, rx) = oneshot::channel();
        if self.send(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.inner.status.borrow().phase
    }

    /// Consecutive failed attempts since the last successful connection
    pub fn retry_count(&self) -> u32 {
        self.inner.status.borrow().retry_count
    }

    /// Last connectivity state reported by the media session
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.inner.status.borrow().connectivity
    }

    /// The live media session, if any
    pub fn media_session(&self) -> Option<MediaSessionHandle> {
        self.inner.status.borrow().media_session.clone()
    }

    /// Snapshot of the client state
    pub fn status(&self) -> ClientStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch channel receiving every status change
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.inner.status.clone()
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.inner.commands.send(command).map_err(|_| Error::Closed)
    }
}

impl std::fmt::Debug for SoraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.inner.status.borrow();
        f.debug_struct("SoraClient")
            .field("phase", &status.phase)
            .field("retry_count", &status.retry_count)
            .field("connectivity", &status.connectivity)
            .finish()
    }
}
