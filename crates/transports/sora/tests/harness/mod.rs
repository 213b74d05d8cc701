//! Sora client test harness
//!
//! Provides an in-memory SFU for integration testing of the client:
//! - `MockTransport` hands each accepted link to the test as a `ServerConn`
//! - `MockEngine` records media sessions and lets the test drive ICE
//! - `Fixture` wires both into a `SoraClient`
//!
//! Tests run on a paused clock (`start_paused = true`), so backoff and
//! watchdog deadlines elapse instantly and deterministically.

#![allow(dead_code)]

pub mod mock_engine;
pub mod mock_transport;

use serde_json::{json, Value};
use sora_signaling::{ClientEvent, Phase, SessionConfig, SoraClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub use mock_engine::{MockEngine, MockSession, StatsBehavior, STALL_MARKER};
pub use mock_transport::{MockServer, MockTransport, ServerConn};

/// Upper bound for any single wait; virtual time under a paused clock
pub const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Config with short intervals for tests
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new("ws://sora.test/signaling", "sora-test");
    config.watchdog_timeout_ms = 1000;
    config.stats_timeout_ms = 100;
    config.media_timeout_ms = 5000;
    config.reconnect.backoff_initial_ms = 100;
    config.reconnect.backoff_max_ms = 400;
    config.reconnect.backoff_multiplier = 2.0;
    config
}

/// Offer as sent by the SFU
pub fn offer_frame(sdp: &str) -> Value {
    json!({
        "type": "offer",
        "sdp": sdp,
        "client_id": "client-1",
        "connection_id": "connection-1",
        "config": {
            "iceServers": [{"urls": ["turn:turn.sora.test:3478"], "username": "u", "credential": "p"}],
            "iceTransportPolicy": "relay"
        }
    })
}

/// Client wired to an in-memory SFU
pub struct Fixture {
    pub client: SoraClient,
    pub transport: Arc<MockTransport>,
    pub server: MockServer,
    pub engine: Arc<MockEngine>,
}

impl Fixture {
    pub fn new(config: SessionConfig) -> Self {
        init_tracing();
        let (transport, server) = MockTransport::new();
        let engine = MockEngine::new();
        let client = SoraClient::new(config, transport.clone(), engine.clone());
        Self {
            client,
            transport,
            server,
            engine,
        }
    }

    /// Connect and consume the connect frame
    pub async fn awaiting_offer(&mut self) -> HarnessResult<(ServerConn, Value)> {
        self.client
            .connect()
            .await
            .map_err(|e| HarnessError::ConnectionError(e.to_string()))?;
        self.accept_awaiting_offer().await
    }

    /// Accept the next link and consume its connect frame
    pub async fn accept_awaiting_offer(&mut self) -> HarnessResult<(ServerConn, Value)> {
        let mut conn = self.server.accept().await?;
        let connect = conn.recv().await?;
        if connect["type"] != "connect" {
            return Err(HarnessError::ValidationError(format!(
                "expected connect, got {}",
                connect
            )));
        }
        wait_phase(&self.client, Phase::AwaitingOffer).await?;
        Ok((conn, connect))
    }

    /// Deliver an offer and consume the answer
    pub async fn negotiate(&mut self, conn: &mut ServerConn) -> HarnessResult<Value> {
        conn.send(offer_frame("v=0 offer"));
        let answer = conn.recv().await?;
        if answer["type"] != "answer" {
            return Err(HarnessError::ValidationError(format!(
                "expected answer, got {}",
                answer
            )));
        }
        wait_phase(&self.client, Phase::Negotiating).await?;
        Ok(answer)
    }

    /// Drive a fresh client all the way to `Connected`
    pub async fn connected(&mut self) -> HarnessResult<ServerConn> {
        let (mut conn, _) = self.awaiting_offer().await?;
        self.negotiate(&mut conn).await?;
        let index = self.engine.created() - 1;
        self.engine
            .observer(index)
            .on_connectivity_change(sora_signaling::ConnectivityState::Connected);
        wait_phase(&self.client, Phase::Connected).await?;
        Ok(conn)
    }
}

/// Wait until the client reports `phase`
pub async fn wait_phase(client: &SoraClient, phase: Phase) -> HarnessResult<()> {
    let mut status = client.watch_status();
    tokio::time::timeout(WAIT_LIMIT, status.wait_for(|s| s.phase == phase))
        .await
        .map_err(|_| HarnessError::Timeout(format!("phase {} never reached", phase)))?
        .map_err(|_| HarnessError::ConnectionError("controller stopped".to_string()))?;
    Ok(())
}

/// Let spawned tasks run without advancing the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Phase transitions received so far
pub fn drain_transitions(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<(Phase, Phase)> {
    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::PhaseChanged { from, to } = event {
            transitions.push((from, to));
        }
    }
    transitions
}
