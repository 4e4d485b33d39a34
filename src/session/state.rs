use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one ConnectionSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    New,
    Opening,
    OutgoingCall,
    AwaitingCall,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl HealthState {
    /// Transition table of the session state machine
    pub fn can_transition_to(self, next: HealthState) -> bool {
        use HealthState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (New, Opening) => true,
            (Opening, OutgoingCall) | (Opening, AwaitingCall) => true,
            (OutgoingCall, Negotiating) | (AwaitingCall, Negotiating) => true,
            (Negotiating, Connected) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Negotiating) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HealthState::Failed | HealthState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::New => "NEW",
            HealthState::Opening => "OPENING",
            HealthState::OutgoingCall => "OUTGOING_CALL",
            HealthState::AwaitingCall => "AWAITING_CALL",
            HealthState::Negotiating => "NEGOTIATING",
            HealthState::Connected => "CONNECTED",
            HealthState::Disconnected => "DISCONNECTED",
            HealthState::Failed => "FAILED",
            HealthState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity-check state reported by the underlying peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}
