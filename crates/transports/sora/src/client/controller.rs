//! Connection controller
//!
//! One task owns all connection state. Caller commands, transport and media
//! completions, watchdog expiry and incoming frames are serialized through a
//! single `select!` loop, so no two transitions ever interleave.
//!
//! Every connection attempt gets a new generation. Completions and callbacks
//! carry the generation they were started under; anything that arrives for an
//! older generation is dropped without touching state.
//!
//! Transport connect and offer answering run on spawned tasks and report back
//! as events. Everything the loop awaits inline is bounded by a timeout.

use super::state::{ClientEvent, ClientStatus, MediaSessionHandle, Phase};
use crate::config::{Endpoint, SessionConfig};
use crate::media::{
    ConnectivityState, IceCandidate, MediaEngine, MediaObserver, MediaSession, PeerConfig,
};
use crate::signaling::{Inbound, Negotiator};
use crate::transport::{SignalingLink, SignalingTransport};
use crate::watchdog::Watchdog;
use crate::{Error, Result};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

/// Upper bound for closing a signaling link during teardown
const LINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests from `SoraClient` handles
pub(crate) enum Command {
    Connect { reply: oneshot::Sender<Result<()>> },
    Reset { reply: oneshot::Sender<()> },
    Close { reply: oneshot::Sender<()> },
}

/// Completions and callbacks from collaborators
enum Event {
    TransportConnected {
        generation: u64,
        result: Result<Box<dyn SignalingLink>>,
    },
    Connectivity {
        generation: u64,
        state: ConnectivityState,
    },
    LocalCandidate {
        generation: u64,
        candidate: IceCandidate,
    },
    WatchdogExpired {
        generation: u64,
    },
    SessionCreated {
        generation: u64,
        session: Arc<dyn MediaSession>,
    },
    Negotiated {
        generation: u64,
        result: Result<String>,
    },
}

/// Media observer bound to one generation
struct EventForwarder {
    generation: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl MediaObserver for EventForwarder {
    fn on_connectivity_change(&self, state: ConnectivityState) {
        let _ = self.tx.send(Event::Connectivity {
            generation: self.generation,
            state,
        });
    }

    fn on_local_candidate(&self, candidate: IceCandidate) {
        let _ = self.tx.send(Event::LocalCandidate {
            generation: self.generation,
            candidate,
        });
    }
}

pub(crate) struct Controller {
    config: SessionConfig,
    negotiator: Negotiator,
    transport: Arc<dyn SignalingTransport>,
    engine: Arc<dyn MediaEngine>,

    phase: Phase,
    retry_count: u32,
    connectivity: ConnectivityState,
    generation: u64,
    endpoint: Option<Endpoint>,
    link: Option<Box<dyn SignalingLink>>,
    session: Option<Arc<dyn MediaSession>>,
    connect_task: Option<JoinHandle<()>>,
    negotiation_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    watchdog: Watchdog,

    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    status: watch::Sender<ClientStatus>,
    notifications: broadcast::Sender<ClientEvent>,
}

impl Controller {
    pub(crate) fn new(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        engine: Arc<dyn MediaEngine>,
        commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<ClientStatus>,
        notifications: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            negotiator: Negotiator::new(config.clone()),
            config,
            transport,
            engine,
            phase: Phase::Idle,
            retry_count: 0,
            connectivity: ConnectivityState::New,
            generation: 0,
            endpoint: None,
            link: None,
            session: None,
            connect_task: None,
            negotiation_task: None,
            reconnect_timer: None,
            watchdog: Watchdog::new(),
            commands,
            events_tx,
            events_rx,
            status,
            notifications,
        }
    }

    /// Drive the client until it is closed or every handle is dropped
    pub(crate) async fn run(mut self) {
        debug!(channel_id = %self.config.channel_id, "Controller started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All client handles dropped");
                        self.shutdown().await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                frame = recv_frame(&mut self.link) => self.handle_frame(frame).await,
                _ = wait_timer(&mut self.reconnect_timer) => self.handle_reconnect_due(),
            }

            if self.phase.is_terminal() {
                break;
            }
        }

        debug!(channel_id = %self.config.channel_id, "Controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let _ = reply.send(self.connect());
            }
            Command::Reset { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
            Command::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(Error::InvalidState(format!(
                "connect called in phase {}",
                self.phase
            )));
        }

        let endpoint = match self.config.validate().and_then(|_| self.config.endpoint()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Refusing to connect: {}", e);
                self.set_phase(Phase::Closed);
                return Err(e);
            }
        };

        self.endpoint = Some(endpoint);
        self.start_attempt();
        Ok(())
    }

    async fn reset(&mut self) {
        if self.phase.is_terminal() {
            return;
        }

        info!(phase = %self.phase, "Resetting client");
        self.teardown().await;
        self.retry_count = 0;
        self.connectivity = ConnectivityState::New;
        self.endpoint = None;
        self.publish_status();
        self.set_phase(Phase::Idle);
    }

    /// Graceful close; terminal
    async fn shutdown(&mut self) {
        if matches!(self.phase, Phase::Closing | Phase::Closed) {
            return;
        }

        self.set_phase(Phase::Closing);
        self.teardown().await;
        self.set_phase(Phase::Closed);
    }

    /// Release everything the current attempt holds
    ///
    /// Bumps the generation first so completions already in flight are stale.
    async fn teardown(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.watchdog.disarm();
        self.reconnect_timer = None;

        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.negotiation_task.take() {
            task.abort();
        }

        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(LINK_CLOSE_TIMEOUT, link.close()).await {
                Ok(Ok(())) => debug!("Signaling link closed"),
                Ok(Err(e)) => warn!("Failed to close signaling link: {}", e),
                Err(_) => warn!("Timed out closing signaling link"),
            }
        }

        if let Some(session) = self.session.take() {
            match tokio::time::timeout(self.config.media_timeout(), session.dispose()).await {
                Ok(Ok(())) => debug!(session_id = session.id(), "Media session disposed"),
                Ok(Err(e)) => {
                    warn!(session_id = session.id(), "Failed to dispose media session: {}", e)
                }
                Err(_) => warn!(session_id = session.id(), "Timed out disposing media session"),
            }
            self.connectivity = ConnectivityState::Closed;
        }

        self.publish_status();
    }

    fn start_attempt(&mut self) {
        let Some(endpoint) = self.endpoint.clone() else {
            error!("No endpoint to connect to");
            self.set_phase(Phase::Closed);
            return;
        };

        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        self.set_phase(Phase::Connecting);

        info!(generation, retry = self.retry_count, "Connecting to {}", endpoint);

        let transport = Arc::clone(&self.transport);
        let tx = self.events_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = transport.connect(&endpoint).await;
            let _ = tx.send(Event::TransportConnected { generation, result });
        }));
    }

    /// Tear down and schedule a reconnect, or give up
    async fn fail(&mut self, err: Error) {
        if matches!(self.phase, Phase::Idle | Phase::Closing | Phase::Closed) {
            return;
        }

        warn!(phase = %self.phase, generation = self.generation, "Connection failed: {}", err);
        self.teardown().await;

        let retry = self.retry_count.saturating_add(1);
        if !self.config.reconnect.should_retry(retry) {
            error!(retries = self.retry_count, "Giving up reconnecting");
            self.set_phase(Phase::Closing);
            self.set_phase(Phase::Closed);
            return;
        }

        let delay = self.config.reconnect.calculate_backoff(retry);
        self.retry_count = retry;
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        self.set_phase(Phase::ReconnectPending);

        info!(retry, ?delay, "Reconnect scheduled");
        self.emit(ClientEvent::Reconnecting { retry, delay });
    }

    fn handle_reconnect_due(&mut self) {
        self.reconnect_timer = None;
        if self.phase == Phase::ReconnectPending {
            self.start_attempt();
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::TransportConnected { generation, result } => {
                if generation != self.generation || self.phase != Phase::Connecting {
                    debug!(generation, "Discarding stale transport completion");
                    if let Ok(mut link) = result {
                        tokio::spawn(async move {
                            let _ = link.close().await;
                        });
                    }
                    return;
                }

                self.connect_task = None;
                match result {
                    Ok(link) => self.on_link_open(link).await,
                    Err(e) => self.fail(e).await,
                }
            }
            Event::Connectivity { generation, state } => {
                if generation != self.generation {
                    debug!(generation, %state, "Discarding stale connectivity change");
                    return;
                }
                self.on_connectivity(state).await;
            }
            Event::LocalCandidate {
                generation,
                candidate,
            } => {
                if generation != self.generation {
                    debug!(generation, "Discarding stale local candidate");
                    return;
                }
                if self.link.is_none() {
                    debug!("No signaling link for local candidate");
                    return;
                }
                let frame = self.negotiator.candidate_frame(&candidate);
                if let Err(e) = self.send_frame(frame).await {
                    self.fail(e).await;
                }
            }
            Event::WatchdogExpired { generation } => {
                if generation != self.generation || !self.phase.is_supervised() {
                    debug!(generation, "Discarding stale watchdog expiry");
                    return;
                }
                let interval = self.config.watchdog_timeout();
                self.fail(Error::LivenessFailure(format!(
                    "No signaling traffic for {:?}",
                    interval
                )))
                .await;
            }
            Event::SessionCreated {
                generation,
                session,
            } => {
                if generation != self.generation {
                    debug!(generation, session_id = session.id(), "Disposing stale media session");
                    let bound = self.config.media_timeout();
                    tokio::spawn(async move {
                        let _ = tokio::time::timeout(bound, session.dispose()).await;
                    });
                    return;
                }

                info!(session_id = session.id(), "Media session created");
                self.session = Some(session);
                self.connectivity = ConnectivityState::New;
                self.publish_status();
            }
            Event::Negotiated { generation, result } => {
                if generation != self.generation || self.phase != Phase::AwaitingOffer {
                    debug!(generation, "Discarding stale negotiation result");
                    return;
                }

                self.negotiation_task = None;
                match result {
                    Ok(answer) => self.on_answer(answer).await,
                    Err(e) => self.fail(e).await,
                }
            }
        }
    }

    async fn on_link_open(&mut self, link: Box<dyn SignalingLink>) {
        self.link = Some(link);

        let frame = self.negotiator.connect_frame();
        if let Err(e) = self.send_frame(frame).await {
            self.fail(e).await;
            return;
        }

        self.arm_watchdog();
        self.set_phase(Phase::AwaitingOffer);
    }

    async fn on_connectivity(&mut self, state: ConnectivityState) {
        debug!(%state, phase = %self.phase, "Media connectivity changed");
        self.connectivity = state;
        self.publish_status();

        if state.is_connected() {
            if self.phase == Phase::Negotiating {
                self.retry_count = 0;
                self.set_phase(Phase::Connected);
            }
        } else if state.is_failure()
            && matches!(self.phase, Phase::Negotiating | Phase::Connected)
        {
            self.fail(Error::MediaError(format!("ICE connection {}", state)))
                .await;
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<String>>) {
        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => return self.fail(e).await,
            None => {
                return self
                    .fail(Error::TransportError(
                        "Signaling connection closed by peer".to_string(),
                    ))
                    .await
            }
        };

        self.watchdog.reset();

        match self.negotiator.decode(&text) {
            Ok(inbound) => self.handle_inbound(inbound).await,
            Err(e) => self.protocol_error(e),
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Offer { sdp, peer_config } => {
                if self.phase != Phase::AwaitingOffer {
                    self.protocol_error(Error::Protocol(format!(
                        "Unexpected offer in phase {}",
                        self.phase
                    )));
                    return;
                }
                if self.negotiation_task.is_some() {
                    self.protocol_error(Error::Protocol(
                        "Duplicate offer while the previous one is being answered".to_string(),
                    ));
                    return;
                }
                self.start_negotiation(sdp, peer_config);
            }
            Inbound::Candidate(candidate) => {
                let Some(session) = self.session.clone() else {
                    self.protocol_error(Error::Protocol(
                        "Candidate received without a media session".to_string(),
                    ));
                    return;
                };
                let bound = self.config.media_timeout();
                match tokio::time::timeout(bound, session.add_remote_candidate(&candidate)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to add remote candidate: {}", e),
                    Err(_) => {
                        self.fail(Error::MediaError(format!(
                            "Adding remote candidate timed out after {:?}",
                            bound
                        )))
                        .await
                    }
                }
            }
            Inbound::Ping { stats } => {
                if self.phase != Phase::Connected {
                    debug!(phase = %self.phase, "Ignoring ping before media is connected");
                    return;
                }
                let stats = match (stats, self.session.clone()) {
                    (true, Some(session)) => {
                        sample_stats(session, self.config.stats_timeout()).await
                    }
                    _ => None,
                };
                let frame = self.negotiator.pong_frame(stats);
                if let Err(e) = self.send_frame(frame).await {
                    self.fail(e).await;
                }
            }
            Inbound::Push(body) => self.emit(ClientEvent::Push(body)),
            Inbound::Notify(body) => self.emit(ClientEvent::Notify(body)),
            Inbound::Switched(body) => self.emit(ClientEvent::Switched(body)),
            Inbound::Disconnect { reason } => {
                info!(reason = reason.as_deref().unwrap_or(""), "Disconnect requested by server");
                self.shutdown().await;
            }
            Inbound::Redirect { location } => {
                let endpoint = match Endpoint::parse(&location, self.config.insecure) {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        self.protocol_error(Error::Protocol(format!(
                            "Invalid redirect location {}: {}",
                            location, e
                        )));
                        return;
                    }
                };

                info!("Redirected to {}", endpoint);
                self.teardown().await;
                self.endpoint = Some(endpoint);
                self.start_attempt();
            }
        }
    }

    /// Create the media session and answer the offer off the control loop
    fn start_negotiation(&mut self, sdp: String, peer_config: PeerConfig) {
        let generation = self.generation;
        let observer = Arc::new(EventForwarder {
            generation,
            tx: self.events_tx.clone(),
        });
        let engine = Arc::clone(&self.engine);
        let bound = self.config.media_timeout();
        let tx = self.events_tx.clone();

        debug!(generation, "Answering offer");
        self.negotiation_task = Some(tokio::spawn(async move {
            let result =
                answer_offer(engine, peer_config, observer, sdp, bound, generation, &tx).await;
            let _ = tx.send(Event::Negotiated { generation, result });
        }));
    }

    async fn on_answer(&mut self, answer: String) {
        let frame = self.negotiator.answer_frame(answer);
        if let Err(e) = self.send_frame(frame).await {
            self.fail(e).await;
            return;
        }

        self.arm_watchdog();
        self.set_phase(Phase::Negotiating);
    }

    async fn send_frame(&mut self, frame: Result<String>) -> Result<()> {
        let frame = frame?;
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| Error::TransportError("No signaling link".to_string()))?;
        link.send_text(frame).await
    }

    fn arm_watchdog(&self) {
        let generation = self.generation;
        let tx = self.events_tx.clone();
        self.watchdog.arm(self.config.watchdog_timeout(), move || {
            let _ = tx.send(Event::WatchdogExpired { generation });
        });
    }

    fn protocol_error(&self, err: Error) {
        warn!(phase = %self.phase, "Dropping signaling frame: {}", err);
        self.emit(ClientEvent::ProtocolError(err.to_string()));
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }

        let from = std::mem::replace(&mut self.phase, phase);
        info!(%from, to = %phase, "Phase changed");
        self.publish_status();
        self.emit(ClientEvent::PhaseChanged { from, to: phase });
    }

    fn publish_status(&self) {
        self.status.send_replace(ClientStatus {
            phase: self.phase,
            retry_count: self.retry_count,
            connectivity: self.connectivity,
            media_session: self
                .session
                .as_ref()
                .map(|session| MediaSessionHandle::new(self.generation, session)),
        });
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.notifications.send(event);
    }
}

async fn recv_frame(link: &mut Option<Box<dyn SignalingLink>>) -> Option<Result<String>> {
    match link {
        Some(link) => link.recv_text().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Create a session for `peer_config` and produce the answer to `sdp`
///
/// The session is handed to the controller as soon as it exists so teardown
/// can dispose it even while the answer is still being produced.
async fn answer_offer(
    engine: Arc<dyn MediaEngine>,
    peer_config: PeerConfig,
    observer: Arc<EventForwarder>,
    sdp: String,
    bound: Duration,
    generation: u64,
    tx: &mpsc::UnboundedSender<Event>,
) -> Result<String> {
    let session = match tokio::time::timeout(bound, engine.create_session(&peer_config, observer))
        .await
    {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            return Err(Error::MediaError(format!(
                "Failed to create media session: {}",
                e
            )))
        }
        Err(_) => {
            return Err(Error::MediaError(format!(
                "Creating media session timed out after {:?}",
                bound
            )))
        }
    };

    let _ = tx.send(Event::SessionCreated {
        generation,
        session: Arc::clone(&session),
    });

    match tokio::time::timeout(bound, session.set_remote_offer(&sdp)).await {
        Ok(result) => result,
        Err(_) => Err(Error::MediaError(format!(
            "Answering offer timed out after {:?}",
            bound
        ))),
    }
}

/// Statistics for a pong; `None` if sampling fails or is too slow
async fn sample_stats(session: Arc<dyn MediaSession>, bound: Duration) -> Option<Value> {
    match tokio::time::timeout(bound, session.stats()).await {
        Ok(Ok(stats)) => Some(stats),
        Ok(Err(e)) => {
            debug!("Stats unavailable, sending pong without them: {}", e);
            None
        }
        Err(_) => {
            debug!("Stats sampling timed out, sending pong without them");
            None
        }
    }
}
