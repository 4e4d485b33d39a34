use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::{PeerCamError, Result, TransportErrorKind};
use crate::media::MediaStream;
use crate::session::{
    Call, ConnectivityState, EventSink, HealthState, LinkEvent, PeerConnectionHandle, PeerEndpoint,
    PeerTransport, TransportEvent,
};
use crate::traversal::TraversalCandidateSet;
use crate::types::{Role, SessionId, TrackSettings};

/// What a handled event meant for the owner of the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Unchanged,
    /// Callee endpoint registered under this id
    Published(String),
    CallPlaced,
    /// Callee answered a call from this peer
    CallAnswered(String),
    Negotiating,
    /// First arrival at CONNECTED
    Connected,
    /// Back to CONNECTED after an interruption
    Recovered,
    Interrupted,
    RemoteStream(Option<TrackSettings>),
    Failed(PeerCamError),
    /// Remote hung up; the session is closed
    Ended,
}

/// One call attempt between this instance and a remote peer
#[derive(Debug)]
pub struct ConnectionSession {
    id: SessionId,
    role: Role,
    remote_id: Option<String>,
    requested_local_id: Option<String>,
    attempt: u32,
    health: HealthState,
    history: Vec<HealthState>,
    traversal: TraversalCandidateSet,
    local_stream: Option<Arc<MediaStream>>,
    endpoint: Option<Box<dyn PeerEndpoint>>,
    call: Option<Box<dyn Call>>,
    connection: Option<Arc<dyn PeerConnectionHandle>>,
    local_id: Option<String>,
    remote_stream: Option<MediaStream>,
    connect_timer: Option<JoinHandle<()>>,
    stats_task: Option<JoinHandle<()>>,
    reached_connected: bool,
}

impl ConnectionSession {
    /// Streamer side: calls `remote_id` as soon as the endpoint opens
    pub fn caller(
        remote_id: impl Into<String>,
        local_stream: Arc<MediaStream>,
        attempt: u32,
        traversal: TraversalCandidateSet,
    ) -> Self {
        Self::new(
            Role::Caller,
            Some(remote_id.into()),
            Some(local_stream),
            attempt,
            traversal,
        )
    }

    /// Viewer side: publishes its id and answers the first call
    pub fn callee(
        local_stream: Option<Arc<MediaStream>>,
        attempt: u32,
        traversal: TraversalCandidateSet,
    ) -> Self {
        Self::new(Role::Callee, None, local_stream, attempt, traversal)
    }

    fn new(
        role: Role,
        remote_id: Option<String>,
        local_stream: Option<Arc<MediaStream>>,
        attempt: u32,
        traversal: TraversalCandidateSet,
    ) -> Self {
        Self {
            id: SessionId::new(),
            role,
            remote_id,
            requested_local_id: None,
            attempt,
            health: HealthState::New,
            history: vec![HealthState::New],
            traversal,
            local_stream,
            endpoint: None,
            call: None,
            connection: None,
            local_id: None,
            remote_stream: None,
            connect_timer: None,
            stats_task: None,
            reached_connected: false,
        }
    }

    /// Ask the transport for a specific public id
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.requested_local_id = Some(local_id.into());
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn health(&self) -> HealthState {
        self.health
    }

    pub fn history(&self) -> &[HealthState] {
        &self.history
    }

    pub fn traversal(&self) -> &TraversalCandidateSet {
        &self.traversal
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    pub fn local_stream(&self) -> Option<&Arc<MediaStream>> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.remote_stream.as_ref()
    }

    pub fn connection(&self) -> Option<&Arc<dyn PeerConnectionHandle>> {
        self.connection.as_ref()
    }

    pub fn has_connected(&self) -> bool {
        self.reached_connected
    }

    /// NEW -> OPENING: request the transport endpoint
    pub fn open(
        &mut self,
        transport: &dyn PeerTransport,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<()> {
        if self.health != HealthState::New {
            return Err(PeerCamError::SessionClosed);
        }
        self.transition(HealthState::Opening);

        log::info!(
            "Opening session {} as {:?} (attempt {}, policy {})",
            self.id,
            self.role,
            self.attempt,
            self.traversal.policy()
        );

        let sink = EventSink::new(self.id, events);
        match transport.create_endpoint(self.requested_local_id.as_deref(), &self.traversal, sink)
        {
            Ok(endpoint) => {
                self.endpoint = Some(endpoint);
                Ok(())
            }
            Err(e) => {
                self.transition(HealthState::Failed);
                Err(e)
            }
        }
    }

    /// Feed one transport event through the state machine
    pub fn handle(&mut self, event: TransportEvent) -> SessionOutcome {
        if self.health.is_terminal() {
            log::debug!("Session {} is {}; dropping {:?}", self.id, self.health, event);
            if let TransportEvent::IncomingCall(call) = event {
                call.close();
            }
            return SessionOutcome::Unchanged;
        }

        match event {
            TransportEvent::Open(id) => self.on_open(id),
            TransportEvent::IncomingCall(call) => self.on_incoming_call(call),
            TransportEvent::ConnectionAttached(connection) => self.on_connection_attached(connection),
            TransportEvent::Connectivity(state) => self.on_connectivity(state),
            TransportEvent::RemoteStream(stream) => {
                let settings = stream.video_settings();
                log::info!("Session {} received remote stream {}", self.id, stream.id());
                if let Some(previous) = self.remote_stream.replace(stream) {
                    previous.stop();
                }
                SessionOutcome::RemoteStream(settings)
            }
            TransportEvent::Disconnected => self.on_signaling_disconnected(),
            TransportEvent::Error { kind, message } => {
                if !kind.likely_recoverable() {
                    log::warn!(
                        "Transport reported {}; the remote peer is probably not listening",
                        kind
                    );
                }
                self.fail(PeerCamError::Transport { kind, message })
            }
            TransportEvent::CallClosed => {
                log::info!("Remote side closed the call on session {}", self.id);
                self.close();
                SessionOutcome::Ended
            }
            TransportEvent::CallError(message) => {
                self.fail(PeerCamError::transport(TransportErrorKind::Call, message))
            }
        }
    }

    fn on_open(&mut self, id: String) -> SessionOutcome {
        if self.health != HealthState::Opening {
            log::debug!("Session {}: duplicate open for {}", self.id, id);
            return SessionOutcome::Unchanged;
        }
        self.local_id = Some(id.clone());

        match self.role {
            Role::Callee => {
                self.transition(HealthState::AwaitingCall);
                log::info!("Endpoint {} published, waiting for a call", id);
                SessionOutcome::Published(id)
            }
            Role::Caller => {
                let (Some(remote), Some(stream), Some(endpoint)) = (
                    self.remote_id.as_deref(),
                    self.local_stream.as_ref(),
                    self.endpoint.as_ref(),
                ) else {
                    return self.fail(PeerCamError::SessionClosed);
                };

                log::info!("Endpoint {} open, calling {}", id, remote);
                match endpoint.call(remote, Arc::clone(stream)) {
                    Ok(call) => {
                        self.call = Some(call);
                        self.transition(HealthState::OutgoingCall);
                        SessionOutcome::CallPlaced
                    }
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    fn on_incoming_call(&mut self, call: Box<dyn Call>) -> SessionOutcome {
        if self.role != Role::Callee
            || self.health != HealthState::AwaitingCall
            || self.call.is_some()
        {
            log::warn!("Rejecting unexpected call from {}", call.peer());
            call.close();
            return SessionOutcome::Unchanged;
        }

        let peer = call.peer().to_string();
        log::info!("Answering call from {}", peer);
        match call.answer(self.local_stream.clone()) {
            Ok(()) => {
                self.remote_id = Some(peer.clone());
                self.call = Some(call);
                SessionOutcome::CallAnswered(peer)
            }
            Err(e) => {
                call.close();
                self.fail(e)
            }
        }
    }

    fn on_connection_attached(
        &mut self,
        connection: Arc<dyn PeerConnectionHandle>,
    ) -> SessionOutcome {
        let expecting = matches!(
            self.health,
            HealthState::OutgoingCall | HealthState::AwaitingCall
        );
        if !expecting || self.call.is_none() {
            log::debug!("Session {}: connection attached in {}", self.id, self.health);
            return SessionOutcome::Unchanged;
        }

        self.connection = Some(connection);
        self.transition(HealthState::Negotiating);
        SessionOutcome::Negotiating
    }

    fn on_connectivity(&mut self, state: ConnectivityState) -> SessionOutcome {
        log::debug!("Session {} connectivity: {:?}", self.id, state);

        match state {
            ConnectivityState::Connected | ConnectivityState::Completed => match self.health {
                HealthState::Negotiating => {
                    self.transition(HealthState::Connected);
                    if self.reached_connected {
                        log::info!("Session {} recovered", self.id);
                        SessionOutcome::Recovered
                    } else {
                        self.reached_connected = true;
                        self.cancel_connect_timer();
                        log::info!("Session {} connected", self.id);
                        SessionOutcome::Connected
                    }
                }
                HealthState::Disconnected => {
                    self.transition(HealthState::Negotiating);
                    self.transition(HealthState::Connected);
                    log::info!("Session {} recovered", self.id);
                    SessionOutcome::Recovered
                }
                _ => SessionOutcome::Unchanged,
            },
            ConnectivityState::Checking if self.health == HealthState::Disconnected => {
                self.transition(HealthState::Negotiating);
                SessionOutcome::Negotiating
            }
            ConnectivityState::Disconnected if self.health == HealthState::Connected => {
                self.transition(HealthState::Disconnected);
                log::warn!("Session {} interrupted, waiting for recovery", self.id);
                SessionOutcome::Interrupted
            }
            ConnectivityState::Failed => self.fail(PeerCamError::TraversalFailed(format!(
                "connectivity checks failed on attempt {} (policy {})",
                self.attempt,
                self.traversal.policy()
            ))),
            _ => SessionOutcome::Unchanged,
        }
    }

    fn on_signaling_disconnected(&mut self) -> SessionOutcome {
        match self.health {
            HealthState::Opening
            | HealthState::OutgoingCall
            | HealthState::AwaitingCall
            | HealthState::Negotiating => self.fail(PeerCamError::transport(
                TransportErrorKind::Disconnected,
                "signaling lost before the call connected",
            )),
            _ => {
                log::info!(
                    "Session {}: signaling disconnected, media path unaffected",
                    self.id
                );
                SessionOutcome::Unchanged
            }
        }
    }

    /// Move to FAILED; no-op once terminal
    pub fn fail(&mut self, error: PeerCamError) -> SessionOutcome {
        if self.health.is_terminal() {
            return SessionOutcome::Unchanged;
        }
        log::warn!("Session {} failed in {}: {}", self.id, self.health, error);
        self.transition(HealthState::Failed);
        SessionOutcome::Failed(error)
    }

    pub fn set_connect_timer(&mut self, timer: JoinHandle<()>) {
        if self.health == HealthState::Closed {
            timer.abort();
            return;
        }
        if let Some(previous) = self.connect_timer.replace(timer) {
            previous.abort();
        }
    }

    pub fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    pub fn set_stats_task(&mut self, task: JoinHandle<()>) {
        if self.health == HealthState::Closed {
            task.abort();
            return;
        }
        if let Some(previous) = self.stats_task.replace(task) {
            previous.abort();
        }
    }

    /// Release everything the session owns and move to CLOSED
    ///
    /// The local stream belongs to the media acquirer and is only dropped,
    /// never stopped, here.
    pub fn close(&mut self) {
        if self.health == HealthState::Closed {
            return;
        }

        self.cancel_connect_timer();
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
        if let Some(call) = self.call.take() {
            call.close();
        }
        if let Some(stream) = self.remote_stream.take() {
            stream.stop();
        }
        self.connection = None;
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.destroy();
        }
        self.local_stream = None;

        self.transition(HealthState::Closed);
        log::debug!("Session {} closed", self.id);
    }

    fn transition(&mut self, next: HealthState) -> bool {
        if !self.health.can_transition_to(next) {
            log::debug!(
                "Session {}: ignoring illegal transition {} -> {}",
                self.id,
                self.health,
                next
            );
            return false;
        }
        log::debug!("Session {}: {} -> {}", self.id, self.health, next);
        self.health = next;
        self.history.push(next);
        true
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
