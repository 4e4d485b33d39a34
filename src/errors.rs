use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PeerCamError>;

/// Subtype of a signaling/transport level failure
///
/// Names follow the error types emitted by the rendezvous service
/// (`peer-unavailable`, `network`, `server-error`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportErrorKind {
    /// The remote id is not registered or not listening
    PeerUnavailable,
    /// Lost or failed connection to the signaling service
    Network,
    /// The signaling service reported an internal error
    ServerError,
    /// Socket level failure underneath the signaling channel
    SocketError,
    /// The endpoint was disconnected from the signaling service
    Disconnected,
    /// The call object itself reported an error
    Call,
    /// Anything the transport reported that has no dedicated subtype
    Other(String),
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            TransportErrorKind::PeerUnavailable => "peer-unavailable",
            TransportErrorKind::Network => "network",
            TransportErrorKind::ServerError => "server-error",
            TransportErrorKind::SocketError => "socket-error",
            TransportErrorKind::Disconnected => "disconnected",
            TransportErrorKind::Call => "call",
            TransportErrorKind::Other(kind) => kind,
        }
    }

    /// Map a raw transport error type string onto a subtype
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "peer-unavailable" => TransportErrorKind::PeerUnavailable,
            "network" => TransportErrorKind::Network,
            "server-error" => TransportErrorKind::ServerError,
            "socket-error" | "socket-closed" => TransportErrorKind::SocketError,
            "disconnected" => TransportErrorKind::Disconnected,
            "call" => TransportErrorKind::Call,
            other => TransportErrorKind::Other(other.to_string()),
        }
    }

    /// A missing remote usually means nobody is listening; retrying rarely helps
    pub fn likely_recoverable(&self) -> bool {
        !matches!(self, TransportErrorKind::PeerUnavailable)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for acquisition, connection and recovery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerCamError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No media device available: {0}")]
    NoDeviceAvailable(String),

    #[error("Traversal failed: {0}")]
    TraversalFailed(String),

    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Connection not established within {after_ms} ms")]
    ConnectTimeout { after_ms: u64 },

    #[error("Parameter application failed: {0}")]
    ParameterApplicationFailed(String),

    #[error("Gave up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<PeerCamError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Rendezvous error: {0}")]
    Rendezvous(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(String),
}

impl PeerCamError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        PeerCamError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Failures the resilience layer may answer with a reconnect
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PeerCamError::TraversalFailed(_)
                | PeerCamError::Transport { .. }
                | PeerCamError::ConnectTimeout { .. }
        )
    }

    /// Conditions that must reach the user-visible status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerCamError::PermissionDenied(_)
                | PeerCamError::NoDeviceAvailable(_)
                | PeerCamError::RetriesExhausted { .. }
                | PeerCamError::InvalidConfig(_)
                | PeerCamError::Rendezvous(_)
        )
    }
}

impl From<std::io::Error> for PeerCamError {
    fn from(error: std::io::Error) -> Self {
        PeerCamError::Io(error.to_string())
    }
}
