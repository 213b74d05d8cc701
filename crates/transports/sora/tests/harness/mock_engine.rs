//! In-memory media engine
//!
//! Counts live sessions so tests can check that no two sessions ever
//! coexist, and exposes each session's observer so tests can play the ICE
//! agent.
//!
//! An offer SDP or candidate containing `STALL_MARKER` never completes, and
//! `MockSession::stall_dispose` makes `dispose` hang; tests use these to
//! check that a wedged media stack cannot freeze the client.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sora_signaling::{
    Error, IceCandidate, MediaEngine, MediaObserver, MediaSession, PeerConfig, Result,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Offers and candidates containing this never complete
pub const STALL_MARKER: &str = "stall";

/// Long enough to outlast any test
const STALL: Duration = Duration::from_secs(10 * 3600);

/// How `stats` behaves
#[derive(Debug, Clone)]
pub enum StatsBehavior {
    Report(Value),
    Fail,
    Stall,
}

#[derive(Default)]
struct Counters {
    live: AtomicUsize,
    max_live: AtomicUsize,
    disposals: AtomicUsize,
}

pub struct MockEngine {
    counters: Arc<Counters>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    observers: Mutex<Vec<Arc<dyn MediaObserver>>>,
    configs: Mutex<Vec<PeerConfig>>,
    fail_create: AtomicBool,
    stats: Arc<Mutex<StatsBehavior>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(Counters::default()),
            sessions: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            stats: Arc::new(Mutex::new(StatsBehavior::Report(
                json!([{"type": "transport", "bytesSent": 1200}]),
            ))),
        })
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn set_stats(&self, behavior: StatsBehavior) {
        *self.stats.lock() = behavior;
    }

    pub fn created(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    pub fn disposals(&self) -> usize {
        self.counters.disposals.load(Ordering::SeqCst)
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub fn observer(&self, index: usize) -> Arc<dyn MediaObserver> {
        Arc::clone(&self.observers.lock()[index])
    }

    pub fn peer_config(&self, index: usize) -> PeerConfig {
        self.configs.lock()[index].clone()
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_session(
        &self,
        config: &PeerConfig,
        observer: Arc<dyn MediaObserver>,
    ) -> Result<Arc<dyn MediaSession>> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(Error::WebRtcError("no codecs available".to_string()));
        }

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        let index = self.sessions.lock().len();
        let session = Arc::new(MockSession {
            id: format!("mock-session-{}", index),
            counters: Arc::clone(&self.counters),
            stats: Arc::clone(&self.stats),
            disposed: AtomicBool::new(false),
            dispose_calls: AtomicUsize::new(0),
            stall_dispose: AtomicBool::new(false),
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
        });

        self.sessions.lock().push(Arc::clone(&session));
        self.observers.lock().push(observer);
        self.configs.lock().push(config.clone());

        Ok(session)
    }
}

pub struct MockSession {
    id: String,
    counters: Arc<Counters>,
    stats: Arc<Mutex<StatsBehavior>>,
    disposed: AtomicBool,
    dispose_calls: AtomicUsize,
    stall_dispose: AtomicBool,
    offers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
}

impl MockSession {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn dispose_calls(&self) -> usize {
        self.dispose_calls.load(Ordering::SeqCst)
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn stall_dispose(&self) {
        self.stall_dispose.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_remote_offer(&self, sdp: &str) -> Result<String> {
        if self.is_disposed() {
            return Err(Error::MediaError("session disposed".to_string()));
        }
        self.offers.lock().push(sdp.to_string());
        if sdp.contains(STALL_MARKER) {
            tokio::time::sleep(STALL).await;
        }
        Ok(format!("answer-for:{}", sdp))
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::MediaError("session disposed".to_string()));
        }
        self.candidates.lock().push(candidate.clone());
        if candidate.candidate.contains(STALL_MARKER) {
            tokio::time::sleep(STALL).await;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<Value> {
        let behavior = self.stats.lock().clone();
        match behavior {
            StatsBehavior::Report(value) => Ok(value),
            StatsBehavior::Fail => Err(Error::StatsError("stats unavailable".to_string())),
            StatsBehavior::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::StatsError("stalled".to_string()))
            }
        }
    }

    async fn dispose(&self) -> Result<()> {
        self.dispose_calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_dispose.load(Ordering::SeqCst) {
            tokio::time::sleep(STALL).await;
        }
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.counters.disposals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
