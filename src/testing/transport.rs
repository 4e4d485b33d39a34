//! In-process peer transport
//!
//! Endpoints created on one `LoopbackNetwork` can call each other by id.
//! The network also hosts "auto-answer" peers that accept any call without
//! a link of their own, and a queue of scripts that decide how each call's
//! connectivity checks end.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::errors::{PeerCamError, Result, TransportErrorKind};
use crate::media::MediaStream;
use crate::session::{
    Call, ConnectivityState, EventSink, PeerConnectionHandle, PeerEndpoint, PeerTransport,
    RtpSender, TransportEvent,
};
use crate::testing::SyntheticTrack;
use crate::traversal::TraversalCandidateSet;
use crate::types::{
    CodecCapability, ConnectionStats, EncodingParameters, RtpStreamStats, SendParameters,
    SessionId, TrackKind,
};

/// Bytes added to the video counter on every stats poll
const BYTES_PER_POLL: u64 = 625_000;

/// How the next connection attempt plays out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkScript {
    /// Checks succeed
    #[default]
    Connect,
    /// Checks report failure
    FailConnectivity,
    /// Checks never finish
    Stall,
    /// The endpoint reports this error instead of opening
    SignalingError(TransportErrorKind),
}

/// Record of every endpoint the network created
#[derive(Debug, Clone)]
pub struct EndpointRecord {
    pub local_id: String,
    pub session_id: SessionId,
    pub traversal: TraversalCandidateSet,
}

#[derive(Debug, Default)]
struct NetworkState {
    next_id: u64,
    endpoints: HashMap<String, EventSink>,
    created: Vec<EndpointRecord>,
    sinks: Vec<EventSink>,
    auto_answer: HashSet<String>,
    scripts: VecDeque<LinkScript>,
    default_script: LinkScript,
    connections: Vec<Arc<LoopbackConnection>>,
    reject_parameters: bool,
    fail_stats: bool,
}

impl NetworkState {
    fn next_script(&mut self) -> LinkScript {
        self.scripts
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone())
    }

    fn new_connection(&mut self, with_senders: bool) -> Arc<LoopbackConnection> {
        let senders = if with_senders {
            vec![
                Arc::new(LoopbackSender::new(TrackKind::Video, self.reject_parameters)),
                Arc::new(LoopbackSender::new(TrackKind::Audio, self.reject_parameters)),
            ]
        } else {
            Vec::new()
        };
        let connection = Arc::new(LoopbackConnection {
            senders,
            bytes_sent: AtomicU64::new(0),
            polls: AtomicU64::new(0),
            fail_stats: self.fail_stats,
        });
        self.connections.push(Arc::clone(&connection));
        connection
    }
}

/// Shared in-process signaling and media network
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id that answers every call without sending media
    pub fn add_auto_answer_peer(&self, id: impl Into<String>) {
        self.lock().auto_answer.insert(id.into());
    }

    /// Queue the outcome of the next attempt
    pub fn script(&self, script: LinkScript) {
        self.lock().scripts.push_back(script);
    }

    /// Outcome used once the queue is empty
    pub fn set_default_script(&self, script: LinkScript) {
        self.lock().default_script = script;
    }

    pub fn reject_sender_parameters(&self, reject: bool) {
        self.lock().reject_parameters = reject;
    }

    pub fn fail_stats(&self, fail: bool) {
        self.lock().fail_stats = fail;
    }

    /// Every endpoint ever created, oldest first
    pub fn endpoints(&self) -> Vec<EndpointRecord> {
        self.lock().created.clone()
    }

    pub fn live_endpoint_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connections(&self) -> Vec<Arc<LoopbackConnection>> {
        self.lock().connections.clone()
    }

    /// Inject an event as if the transport of `session_id` emitted it
    pub fn emit(&self, session_id: SessionId, event: TransportEvent) -> bool {
        let sink = self
            .lock()
            .sinks
            .iter()
            .find(|s| s.session_id() == session_id)
            .cloned();
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PeerTransport for LoopbackNetwork {
    fn create_endpoint(
        &self,
        local_id: Option<&str>,
        traversal: &TraversalCandidateSet,
        events: EventSink,
    ) -> Result<Box<dyn PeerEndpoint>> {
        let mut state = self.lock();

        let id = match local_id {
            Some(id) if state.endpoints.contains_key(id) || state.auto_answer.contains(id) => {
                return Err(PeerCamError::transport(
                    TransportErrorKind::Other("unavailable-id".to_string()),
                    format!("ID \"{}\" is taken", id),
                ));
            }
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("peer-{}", state.next_id)
            }
        };

        let signaling_error = match state.scripts.front() {
            Some(LinkScript::SignalingError(kind)) => {
                let kind = kind.clone();
                state.scripts.pop_front();
                Some(kind)
            }
            _ => None,
        };

        state.endpoints.insert(id.clone(), events.clone());
        state.sinks.push(events.clone());
        state.created.push(EndpointRecord {
            local_id: id.clone(),
            session_id: events.session_id(),
            traversal: traversal.clone(),
        });
        drop(state);

        match signaling_error {
            Some(kind) => events.emit(TransportEvent::Error {
                message: format!("scripted {} error", kind),
                kind,
            }),
            None => events.emit(TransportEvent::Open(id.clone())),
        };

        Ok(Box::new(LoopbackEndpoint {
            id,
            session_id: events.session_id(),
            network: self.clone(),
        }))
    }
}

/// Endpoint registered on a `LoopbackNetwork`
#[derive(Debug)]
pub struct LoopbackEndpoint {
    id: String,
    session_id: SessionId,
    network: LoopbackNetwork,
}

impl PeerEndpoint for LoopbackEndpoint {
    fn call(&self, remote_id: &str, stream: Arc<MediaStream>) -> Result<Box<dyn Call>> {
        let mut state = self.network.lock();
        let caller_sink = state
            .endpoints
            .get(&self.id)
            .filter(|s| s.session_id() == self.session_id)
            .cloned()
            .ok_or_else(|| {
                PeerCamError::transport(TransportErrorKind::Disconnected, "endpoint destroyed")
            })?;

        let remote_slot = Arc::new(Mutex::new(None));
        let outgoing = LoopbackCall::new(remote_id, caller_sink.clone(), Arc::clone(&remote_slot));

        if state.auto_answer.contains(remote_id) {
            let script = state.next_script();
            let connection = state.new_connection(true);
            drop(state);
            play_script(&caller_sink, connection, &script, None);
            return Ok(Box::new(outgoing));
        }

        if let Some(callee_sink) = state.endpoints.get(remote_id).cloned() {
            let script = state.next_script();
            drop(state);

            let incoming = LoopbackCall::new(
                &self.id,
                callee_sink.clone(),
                Arc::new(Mutex::new(None)),
            );
            *lock_slot(&incoming.offer) = Some(Offer {
                caller_sink,
                caller_slot: remote_slot,
                stream,
                script,
                network: self.network.clone(),
            });
            callee_sink.emit(TransportEvent::IncomingCall(Box::new(incoming)));
            return Ok(Box::new(outgoing));
        }

        drop(state);
        caller_sink.emit(TransportEvent::Error {
            kind: TransportErrorKind::PeerUnavailable,
            message: format!("Could not connect to peer {}", remote_id),
        });
        Ok(Box::new(outgoing))
    }

    fn destroy(&self) {
        let mut state = self.network.lock();
        let owned = state
            .endpoints
            .get(&self.id)
            .is_some_and(|s| s.session_id() == self.session_id);
        if owned {
            state.endpoints.remove(&self.id);
        }
    }
}

#[derive(Debug)]
struct Offer {
    caller_sink: EventSink,
    caller_slot: Arc<Mutex<Option<EventSink>>>,
    stream: Arc<MediaStream>,
    script: LinkScript,
    network: LoopbackNetwork,
}

/// One side of a loopback call
#[derive(Debug)]
pub struct LoopbackCall {
    peer: String,
    own_sink: EventSink,
    /// Notified with `CallClosed` when this side hangs up
    remote: Arc<Mutex<Option<EventSink>>>,
    offer: Mutex<Option<Offer>>,
    closed: AtomicBool,
}

impl LoopbackCall {
    fn new(peer: &str, own_sink: EventSink, remote: Arc<Mutex<Option<EventSink>>>) -> Self {
        Self {
            peer: peer.to_string(),
            own_sink,
            remote,
            offer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

impl Call for LoopbackCall {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn answer(&self, stream: Option<Arc<MediaStream>>) -> Result<()> {
        let offer = lock_slot(&self.offer).take().ok_or_else(|| {
            PeerCamError::transport(TransportErrorKind::Call, "call already answered")
        })?;

        let (caller_connection, callee_connection) = {
            let mut state = offer.network.lock();
            (state.new_connection(true), state.new_connection(stream.is_some()))
        };

        *lock_slot(&offer.caller_slot) = Some(self.own_sink.clone());
        *lock_slot(&self.remote) = Some(offer.caller_sink.clone());

        let answer_media = stream.as_deref().map(SyntheticTrack::mirror);
        play_script(&offer.caller_sink, caller_connection, &offer.script, answer_media);
        play_script(
            &self.own_sink,
            callee_connection,
            &offer.script,
            Some(SyntheticTrack::mirror(&offer.stream)),
        );
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock_slot(&self.offer).take();
        if let Some(remote) = lock_slot(&self.remote).take() {
            remote.emit(TransportEvent::CallClosed);
        }
    }
}

fn play_script(
    sink: &EventSink,
    connection: Arc<LoopbackConnection>,
    script: &LinkScript,
    remote_stream: Option<MediaStream>,
) {
    sink.emit(TransportEvent::ConnectionAttached(connection));
    sink.emit(TransportEvent::Connectivity(ConnectivityState::Checking));
    match script {
        LinkScript::Connect => {
            sink.emit(TransportEvent::Connectivity(ConnectivityState::Connected));
            if let Some(stream) = remote_stream {
                sink.emit(TransportEvent::RemoteStream(stream));
            }
        }
        LinkScript::FailConnectivity => {
            sink.emit(TransportEvent::Connectivity(ConnectivityState::Failed));
        }
        LinkScript::Stall | LinkScript::SignalingError(_) => {}
    }
}

/// Peer connection whose counters grow on every stats poll
#[derive(Debug)]
pub struct LoopbackConnection {
    senders: Vec<Arc<LoopbackSender>>,
    bytes_sent: AtomicU64,
    polls: AtomicU64,
    fail_stats: bool,
}

impl LoopbackConnection {
    pub fn sender(&self, kind: TrackKind) -> Option<Arc<LoopbackSender>> {
        self.senders.iter().find(|s| s.kind == kind).cloned()
    }

    pub fn stats_polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnectionHandle for LoopbackConnection {
    fn senders(&self) -> Vec<Arc<dyn RtpSender>> {
        self.senders
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn RtpSender>)
            .collect()
    }

    async fn stats(&self) -> Result<ConnectionStats> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_stats {
            return Err(PeerCamError::transport(
                TransportErrorKind::Other("stats".to_string()),
                "stats unavailable",
            ));
        }

        let bytes = self.bytes_sent.fetch_add(BYTES_PER_POLL, Ordering::SeqCst) + BYTES_PER_POLL;
        let mut video = RtpStreamStats::new(TrackKind::Video);
        video.bytes = bytes;
        video.packets = bytes / 1200;
        video.frames = Some(polls * 125);
        video.encoder_implementation = Some("loopback".to_string());

        Ok(ConnectionStats {
            outbound: vec![video],
            inbound: Vec::new(),
        })
    }
}

/// Sender that records what was applied to it
#[derive(Debug)]
pub struct LoopbackSender {
    kind: TrackKind,
    codecs: Vec<CodecCapability>,
    preferences: Mutex<Vec<CodecCapability>>,
    parameters: Mutex<SendParameters>,
    reject_parameters: bool,
}

impl LoopbackSender {
    fn new(kind: TrackKind, reject_parameters: bool) -> Self {
        let codecs = match kind {
            TrackKind::Video => vec![
                CodecCapability::new("video/VP8", 90_000, 0),
                CodecCapability::new("video/VP9", 90_000, 0),
                CodecCapability::new("video/H264", 90_000, 0),
            ],
            TrackKind::Audio => vec![
                CodecCapability::new("audio/PCMU", 8000, 1),
                CodecCapability::new("audio/opus", 48_000, 2),
            ],
        };
        Self {
            kind,
            codecs,
            preferences: Mutex::new(Vec::new()),
            parameters: Mutex::new(SendParameters {
                encodings: vec![EncodingParameters::default()],
            }),
            reject_parameters,
        }
    }

    /// MIME types in the order last set by `set_codec_preferences`
    pub fn preferred_codecs(&self) -> Vec<String> {
        lock_slot(&self.preferences)
            .iter()
            .map(|c| c.mime_type.clone())
            .collect()
    }

    pub fn applied_parameters(&self) -> SendParameters {
        lock_slot(&self.parameters).clone()
    }
}

#[async_trait]
impl RtpSender for LoopbackSender {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn codecs(&self) -> Vec<CodecCapability> {
        self.codecs.clone()
    }

    fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<()> {
        *lock_slot(&self.preferences) = codecs;
        Ok(())
    }

    fn parameters(&self) -> SendParameters {
        lock_slot(&self.parameters).clone()
    }

    async fn set_parameters(&self, parameters: SendParameters) -> Result<()> {
        if self.reject_parameters {
            return Err(PeerCamError::ParameterApplicationFailed(format!(
                "{} sender rejected parameters",
                self.kind
            )));
        }
        *lock_slot(&self.parameters) = parameters;
        Ok(())
    }
}
