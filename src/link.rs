//! Link orchestration
//!
//! `PeerLink` owns the local stream, the active session and the policy
//! components, and dispatches every transport callback and timer through a
//! single event channel. Nothing is global; a link lives from `start` to
//! `teardown`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::config::PeerCamConfig;
use crate::errors::{PeerCamError, Result};
use crate::media::{MediaAcquisition, MediaDevices, MediaStream};
use crate::quality::{EncodingPlan, QualityController};
use crate::rendezvous::Rendezvous;
use crate::resilience::{ResilienceManager, RetryDecision, StatsSample, StatsSampler};
use crate::session::{
    ConnectionSession, HealthState, LinkEvent, PeerTransport, SessionOutcome, TransportEvent,
};
use crate::traversal::{TransportPolicy, TraversalConfig};
use crate::types::{DeviceInfo, Role, SessionId};

/// Coarse, user-facing phase of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Idle,
    AcquiringMedia,
    Connecting,
    AwaitingCall,
    Connected,
    Interrupted,
    Reconnecting,
    /// The remote side hung up
    Ended,
    Failed,
    Closed,
}

impl LinkPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkPhase::Ended | LinkPhase::Failed | LinkPhase::Closed)
    }
}

/// Snapshot published on every change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub phase: LinkPhase,
    pub role: Role,
    pub health: Option<HealthState>,
    /// Transitions of the current (or last closed) session
    pub history: Vec<HealthState>,
    pub attempt: u32,
    pub policy: Option<TransportPolicy>,
    pub profile: Option<String>,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub viewer_link: Option<String>,
    pub remote_video: Option<(u32, u32)>,
    pub plan: Option<EncodingPlan>,
    pub error: Option<String>,
    pub message: String,
}

impl LinkStatus {
    fn idle(role: Role) -> Self {
        Self {
            phase: LinkPhase::Idle,
            role,
            health: None,
            history: Vec::new(),
            attempt: 0,
            policy: None,
            profile: None,
            local_id: None,
            remote_id: None,
            viewer_link: None,
            remote_video: None,
            plan: None,
            error: None,
            message: "idle".to_string(),
        }
    }
}

/// One streamer or viewer instance
pub struct PeerLink {
    role: Role,
    remote_id: Option<String>,
    local_id: Option<String>,
    device_id: Option<String>,
    transport: Arc<dyn PeerTransport>,
    media: Option<MediaAcquisition>,
    traversal: TraversalConfig,
    quality: QualityController,
    resilience: ResilienceManager,
    stats: StatsSampler,
    rendezvous: Rendezvous,
    session: Option<ConnectionSession>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    status: watch::Sender<LinkStatus>,
    phase: LinkPhase,
    outcome: Option<Result<()>>,
    last_error: Option<String>,
    last_history: Vec<HealthState>,
    viewer_link: Option<Url>,
    remote_video: Option<(u32, u32)>,
    plan: Option<EncodingPlan>,
    sessions_opened: u32,
}

impl PeerLink {
    /// Streamer: captures local media and calls `remote_id`
    pub fn streamer(
        config: &PeerCamConfig,
        devices: Arc<dyn MediaDevices>,
        transport: Arc<dyn PeerTransport>,
        remote_id: impl Into<String>,
    ) -> Result<Self> {
        let remote_id = remote_id.into();
        if remote_id.trim().is_empty() {
            return Err(PeerCamError::Rendezvous("remote id is empty".to_string()));
        }

        let mut link = Self::build(Role::Caller, config, transport)?;
        link.media = Some(MediaAcquisition::from_config(devices, &config.media)?);
        link.remote_id = Some(remote_id);
        Ok(link)
    }

    /// Viewer: publishes an id and answers, optionally with its own media
    pub fn viewer(
        config: &PeerCamConfig,
        transport: Arc<dyn PeerTransport>,
        devices: Option<Arc<dyn MediaDevices>>,
    ) -> Result<Self> {
        let mut link = Self::build(Role::Callee, config, transport)?;
        if let Some(devices) = devices {
            link.media = Some(MediaAcquisition::from_config(devices, &config.media)?);
        }
        Ok(link)
    }

    fn build(
        role: Role,
        config: &PeerCamConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(LinkStatus::idle(role));

        Ok(Self {
            role,
            remote_id: None,
            local_id: None,
            device_id: None,
            transport,
            media: None,
            traversal: TraversalConfig::from_config(&config.traversal)?,
            quality: QualityController::from_config(&config.quality),
            resilience: ResilienceManager::from_config(&config.resilience),
            stats: StatsSampler::new(config.resilience.stats_interval()),
            rendezvous: Rendezvous::from_config(&config.rendezvous)?,
            session: None,
            events_tx,
            events_rx,
            status,
            phase: LinkPhase::Idle,
            outcome: None,
            last_error: None,
            last_history: Vec::new(),
            viewer_link: None,
            remote_video: None,
            plan: None,
            sessions_opened: 0,
        })
    }

    /// Request a specific public id for the endpoint
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> watch::Receiver<Option<StatsSample>> {
        self.stats.subscribe()
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn media(&self) -> Option<&MediaAcquisition> {
        self.media.as_ref()
    }

    pub fn local_stream(&self) -> Option<&Arc<MediaStream>> {
        self.media.as_ref().and_then(|m| m.current())
    }

    pub fn remote_stream(&self) -> Option<&MediaStream> {
        self.session.as_ref().and_then(|s| s.remote_stream())
    }

    pub fn viewer_link(&self) -> Option<&Url> {
        self.viewer_link.as_ref()
    }

    pub fn encoding_plan(&self) -> Option<&EncodingPlan> {
        self.plan.as_ref()
    }

    /// Sessions constructed since the link was created
    pub fn sessions_opened(&self) -> u32 {
        self.sessions_opened
    }

    pub async fn list_cameras(&self) -> Result<Vec<DeviceInfo>> {
        match &self.media {
            Some(media) => media.list_cameras().await,
            None => Ok(Vec::new()),
        }
    }

    /// Begin a new logical session
    ///
    /// Cancels any scheduled reconnect, closes the current session, acquires
    /// media (when this link sends media) and opens attempt 0. Only
    /// acquisition failures are returned; connection failures go through the
    /// retry policy and surface through `run` and the status channel.
    pub async fn start(&mut self, profile: Option<&str>, device_id: Option<&str>) -> Result<()> {
        log::info!("Starting {:?} link", self.role);

        self.resilience.reset();
        self.close_session();
        self.outcome = None;
        self.last_error = None;
        self.last_history.clear();
        self.viewer_link = None;
        self.remote_video = None;
        self.plan = None;
        self.device_id = device_id.map(str::to_owned);

        if self.media.is_some() {
            self.publish(LinkPhase::AcquiringMedia, "requesting camera access");
        }
        let acquired = match self.media.as_mut() {
            Some(media) => Some(match profile {
                Some(name) => media.acquire_named(name, device_id).await,
                None => {
                    let index = media.default_profile_index();
                    media.acquire(index, device_id).await
                }
            }),
            None => None,
        };
        if let Some(Err(e)) = acquired {
            self.finish(Err(e.clone()));
            return Err(e);
        }

        self.open_session(0);
        Ok(())
    }

    /// Switch quality tier; restarts the logical session on the same device
    pub async fn change_profile(&mut self, profile: &str) -> Result<()> {
        let device_id = self.device_id.clone();
        self.start(Some(profile), device_id.as_deref()).await
    }

    /// Switch camera; restarts the logical session at the active tier
    pub async fn change_device(&mut self, device_id: &str) -> Result<()> {
        let profile = self
            .media
            .as_ref()
            .and_then(|m| m.active_profile())
            .map(|p| p.name.clone());
        self.start(profile.as_deref(), Some(device_id)).await
    }

    /// Process one event; `None` once the link reached a terminal outcome
    pub async fn step(&mut self) -> Option<LinkStatus> {
        if self.outcome.is_some() {
            return None;
        }
        let event = self.events_rx.recv().await?;
        self.dispatch(event).await;
        Some(self.status())
    }

    /// Drive the link until it ends, fails terminally or is torn down
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if let Some(outcome) = &self.outcome {
                return outcome.clone();
            }
            if self.session.is_none() && !self.resilience.has_pending() {
                return Err(PeerCamError::SessionClosed);
            }
            match self.events_rx.recv().await {
                Some(event) => self.dispatch(event).await,
                None => return Err(PeerCamError::SessionClosed),
            }
        }
    }

    /// Stop everything: pending reconnect, session, local media
    pub fn teardown(&mut self) {
        log::info!("Tearing down {:?} link", self.role);
        self.resilience.cancel_pending();
        self.close_session();
        if let Some(media) = self.media.as_mut() {
            media.release();
        }
        self.outcome = Some(Ok(()));
        self.publish(LinkPhase::Closed, "closed");
    }

    async fn dispatch(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Transport { session_id, event } => {
                let outcome = match self.session.as_mut() {
                    Some(session) if session.id() == session_id => session.handle(event),
                    _ => {
                        log::debug!(
                            "Ignoring event from discarded session {}: {:?}",
                            session_id,
                            event
                        );
                        if let TransportEvent::IncomingCall(call) = event {
                            call.close();
                        }
                        return;
                    }
                };
                self.on_outcome(outcome).await;
            }
            LinkEvent::ConnectTimeout { session_id } => {
                let outcome = match self.session.as_mut() {
                    Some(session) if session.id() == session_id && !session.has_connected() => {
                        let after = self.resilience.connect_timeout(session.traversal().policy());
                        session.fail(PeerCamError::ConnectTimeout {
                            after_ms: after.as_millis() as u64,
                        })
                    }
                    _ => return,
                };
                self.on_outcome(outcome).await;
            }
            LinkEvent::ReconnectDue { generation } => {
                match self.resilience.take_due(generation) {
                    Some((attempt, degrade_media)) => self.reconnect(attempt, degrade_media).await,
                    None => log::debug!("Ignoring stale reconnect timer {}", generation),
                }
            }
        }
    }

    async fn on_outcome(&mut self, outcome: SessionOutcome) {
        match outcome {
            SessionOutcome::Unchanged => {}
            SessionOutcome::Published(id) => {
                self.viewer_link = match self.rendezvous.viewer_link(&id) {
                    Ok(link) => {
                        log::info!("Viewer link: {}", link);
                        Some(link)
                    }
                    Err(e) => {
                        log::warn!("Could not build viewer link for {}: {}", id, e);
                        None
                    }
                };
                self.publish(LinkPhase::AwaitingCall, format!("waiting for a call on {}", id));
            }
            SessionOutcome::CallPlaced => {
                let remote = self.remote_id.clone().unwrap_or_default();
                self.publish(LinkPhase::Connecting, format!("calling {}", remote));
            }
            SessionOutcome::CallAnswered(peer) => {
                self.publish(LinkPhase::Connecting, format!("answered call from {}", peer));
            }
            SessionOutcome::Negotiating => {
                self.publish(LinkPhase::Connecting, "negotiating");
            }
            SessionOutcome::Connected => {
                self.tune_connection().await;
                self.publish(LinkPhase::Connected, "connected");
            }
            SessionOutcome::Recovered => {
                self.publish(LinkPhase::Connected, "connection recovered");
            }
            SessionOutcome::Interrupted => {
                self.publish(LinkPhase::Interrupted, "connection interrupted");
            }
            SessionOutcome::RemoteStream(settings) => {
                self.remote_video = settings.and_then(|s| Some((s.width?, s.height?)));
                self.publish(self.phase, "remote stream received");
            }
            SessionOutcome::Failed(error) => self.handle_failure(error),
            SessionOutcome::Ended => {
                self.close_session();
                self.finish(Ok(()));
            }
        }
    }

    /// Encoding limits and stats sampling for a freshly connected session
    async fn tune_connection(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(connection) = session.connection().cloned() else {
            return;
        };
        let session_id = session.id();
        let local_stream = session.local_stream().cloned();

        if let Some(stream) = local_stream {
            let profile = self
                .media
                .as_ref()
                .and_then(|m| m.active_profile())
                .cloned();
            let plan = self
                .quality
                .apply(connection.as_ref(), &stream, profile.as_ref())
                .await;
            self.plan = Some(plan);
        }

        let task = self.stats.spawn(session_id, connection);
        match self.session.as_mut() {
            Some(session) if session.id() == session_id => session.set_stats_task(task),
            _ => task.abort(),
        }
    }

    fn handle_failure(&mut self, error: PeerCamError) {
        self.close_session();

        match self.resilience.on_failure(&error) {
            RetryDecision::Retry {
                attempt,
                delay,
                degrade_media,
            } => {
                if let PeerCamError::Transport { kind, .. } = &error {
                    if !kind.likely_recoverable() {
                        log::warn!("Retrying after {}, which rarely recovers", kind);
                    }
                }
                self.last_error = Some(error.to_string());
                self.resilience
                    .schedule(attempt, degrade_media, self.events_tx.clone());
                self.publish(
                    LinkPhase::Reconnecting,
                    format!(
                        "{}; retry {}/{} in {:?}",
                        error,
                        attempt,
                        self.resilience.max_attempts(),
                        delay
                    ),
                );
            }
            RetryDecision::AlreadyScheduled => {
                log::debug!("Reconnect already scheduled; ignoring {}", error);
            }
            RetryDecision::GiveUp(terminal) => self.finish(Err(terminal)),
        }
    }

    async fn reconnect(&mut self, attempt: u32, degrade_media: bool) {
        if degrade_media {
            let stepped = match self.media.as_mut() {
                Some(media) => Some(media.step_down().await),
                None => None,
            };
            match stepped {
                Some(Ok(_)) => {
                    let name = self
                        .media
                        .as_ref()
                        .and_then(|m| m.active_profile())
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    log::info!("Retrying with lower profile '{}'", name);
                }
                Some(Err(PeerCamError::PermissionDenied(msg))) => {
                    self.finish(Err(PeerCamError::PermissionDenied(msg)));
                    return;
                }
                Some(Err(e)) => {
                    let kept = self
                        .media
                        .as_ref()
                        .and_then(|m| m.active_profile())
                        .map(|p| p.name.clone());
                    match kept {
                        Some(name) => {
                            log::info!("Could not step down ({}); retrying at '{}'", e, name)
                        }
                        None => {
                            self.finish(Err(e));
                            return;
                        }
                    }
                }
                None => {}
            }
        }

        self.open_session(attempt);
    }

    fn open_session(&mut self, attempt: u32) {
        self.close_session();

        let traversal = self.traversal.build(attempt);
        let policy = traversal.policy();
        let local_stream = self.media.as_ref().and_then(|m| m.current().cloned());
        let remote_id = self.remote_id.clone();

        let session = match (self.role, remote_id, local_stream) {
            (Role::Caller, Some(remote), Some(stream)) => {
                ConnectionSession::caller(remote, stream, attempt, traversal)
            }
            (Role::Caller, _, _) => {
                self.finish(Err(PeerCamError::NoDeviceAvailable(
                    "no local stream to send".to_string(),
                )));
                return;
            }
            (Role::Callee, _, stream) => ConnectionSession::callee(stream, attempt, traversal),
        };
        let mut session = match &self.local_id {
            Some(id) => session.with_local_id(id.clone()),
            None => session,
        };

        self.sessions_opened += 1;
        let opened = session.open(self.transport.as_ref(), self.events_tx.clone());
        let session_id = session.id();
        self.session = Some(session);

        match opened {
            Ok(()) => {
                let timeout = self.resilience.connect_timeout(policy);
                let timer = spawn_connect_timeout(session_id, timeout, self.events_tx.clone());
                if let Some(session) = self.session.as_mut() {
                    session.set_connect_timer(timer);
                }
                self.publish(
                    LinkPhase::Connecting,
                    format!("attempt {} with {} transport", attempt, policy),
                );
            }
            Err(e) => self.handle_failure(e),
        }
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            self.last_history = session.history().to_vec();
            self.stats.clear();
        }
    }

    fn finish(&mut self, result: Result<()>) {
        let (phase, message) = match &result {
            Ok(()) => (LinkPhase::Ended, "remote side ended the call".to_string()),
            Err(e) => {
                log::error!("Link failed: {}", e);
                self.last_error = Some(e.to_string());
                (LinkPhase::Failed, e.to_string())
            }
        };
        self.resilience.cancel_pending();
        self.outcome = Some(result);
        self.publish(phase, message);
    }

    fn publish(&mut self, phase: LinkPhase, message: impl Into<String>) {
        self.phase = phase;
        let session = self.session.as_ref();

        let status = LinkStatus {
            phase,
            role: self.role,
            health: session.map(|s| s.health()),
            history: session
                .map(|s| s.history().to_vec())
                .unwrap_or_else(|| self.last_history.clone()),
            attempt: self.resilience.attempt(),
            policy: session.map(|s| s.traversal().policy()),
            profile: self
                .media
                .as_ref()
                .and_then(|m| m.active_profile())
                .map(|p| p.name.clone()),
            local_id: session.and_then(|s| s.local_id()).map(str::to_owned),
            remote_id: session
                .and_then(|s| s.remote_id())
                .map(str::to_owned)
                .or_else(|| self.remote_id.clone()),
            viewer_link: self.viewer_link.as_ref().map(Url::to_string),
            remote_video: self.remote_video,
            plan: self.plan.clone(),
            error: self.last_error.clone(),
            message: message.into(),
        };

        log::debug!("{:?} link: {:?} ({})", self.role, phase, status.message);
        self.status.send_replace(status);
    }
}

fn spawn_connect_timeout(
    session_id: SessionId,
    timeout: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = events.send(LinkEvent::ConnectTimeout { session_id });
    })
}
