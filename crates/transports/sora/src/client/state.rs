//! Observable client state

use crate::media::{ConnectivityState, MediaSession};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not started, or reset
    Idle,
    /// Opening the signaling link
    Connecting,
    /// Connect request sent, waiting for the SFU's offer
    AwaitingOffer,
    /// Answer sent, waiting for media connectivity
    Negotiating,
    /// Media connected
    Connected,
    /// Torn down, waiting for the backoff timer
    ReconnectPending,
    /// Shutting down
    Closing,
    /// Terminal
    Closed,
}

impl Phase {
    /// Whether the watchdog supervises this phase
    ///
    /// These are exactly the phases that own an open signaling link.
    pub fn is_supervised(&self) -> bool {
        matches!(
            self,
            Phase::AwaitingOffer | Phase::Negotiating | Phase::Connected
        )
    }

    /// Whether the client will not make further progress on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Closed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::AwaitingOffer => "awaiting_offer",
            Phase::Negotiating => "negotiating",
            Phase::Connected => "connected",
            Phase::ReconnectPending => "reconnect_pending",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Non-owning handle to the live media session
///
/// The controller owns the session. Once it is disposed `upgrade` returns
/// `None` or a session whose operations fail.
#[derive(Clone)]
pub struct MediaSessionHandle {
    generation: u64,
    id: String,
    session: Weak<dyn MediaSession>,
}

impl MediaSessionHandle {
    pub(crate) fn new(generation: u64, session: &Arc<dyn MediaSession>) -> Self {
        Self {
            generation,
            id: session.id().to_string(),
            session: Arc::downgrade(session),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection attempt the session belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Borrow the session if the controller still holds it
    pub fn upgrade(&self) -> Option<Arc<dyn MediaSession>> {
        self.session.upgrade()
    }
}

impl std::fmt::Debug for MediaSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSessionHandle")
            .field("generation", &self.generation)
            .field("id", &self.id)
            .field("alive", &(self.session.strong_count() > 0))
            .finish()
    }
}

/// Snapshot published after every state change
#[derive(Debug, Clone)]
pub struct ClientStatus {
    /// Current phase
    pub phase: Phase,
    /// Consecutive failed attempts since the last successful connection
    pub retry_count: u32,
    /// Last connectivity state reported by the media session
    pub connectivity: ConnectivityState,
    /// Current media session, if any
    pub media_session: Option<MediaSessionHandle>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            retry_count: 0,
            connectivity: ConnectivityState::New,
            media_session: None,
        }
    }
}

/// Notifications delivered to subscribers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Lifecycle transition
    PhaseChanged {
        /// Previous phase
        from: Phase,
        /// New phase
        to: Phase,
    },
    /// A reconnect was scheduled
    Reconnecting {
        /// Retry number (1-based)
        retry: u32,
        /// Backoff before the attempt
        delay: Duration,
    },
    /// `notify` message from the SFU
    Notify(Value),
    /// `push` message from the SFU
    Push(Value),
    /// `switched` message from the SFU
    Switched(Value),
    /// A frame was dropped as malformed or unexpected
    ProtocolError(String),
}
