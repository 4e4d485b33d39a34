use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::TransportErrorKind;
use crate::media::MediaStream;
use crate::session::{Call, ConnectivityState, PeerConnectionHandle};
use crate::types::SessionId;

/// Raw notification from a transport endpoint or call
#[derive(Debug)]
pub enum TransportEvent {
    /// The endpoint registered under this id
    Open(String),
    IncomingCall(Box<dyn Call>),
    /// Signaling connection lost
    Disconnected,
    Error {
        kind: TransportErrorKind,
        message: String,
    },
    ConnectionAttached(Arc<dyn PeerConnectionHandle>),
    RemoteStream(MediaStream),
    Connectivity(ConnectivityState),
    /// The remote side closed the call
    CallClosed,
    CallError(String),
}

/// Everything the link dispatcher reacts to
#[derive(Debug)]
pub enum LinkEvent {
    Transport {
        session_id: SessionId,
        event: TransportEvent,
    },
    ConnectTimeout {
        session_id: SessionId,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Session-tagged sender handed to transports
#[derive(Debug, Clone)]
pub struct EventSink {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    pub fn new(session_id: SessionId, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns false once the dispatcher is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(LinkEvent::Transport {
                session_id: self.session_id,
                event,
            })
            .is_ok()
    }
}
