//! Peer connection sessions
//!
//! A `ConnectionSession` owns exactly one connection attempt. It is driven by
//! `TransportEvent`s and never revived once it has failed or closed; retries
//! construct a new session.

pub mod connection;
pub mod events;
pub mod state;
pub mod transport;

pub use connection::{ConnectionSession, SessionOutcome};
pub use events::{EventSink, LinkEvent, TransportEvent};
pub use state::{ConnectivityState, HealthState};
pub use transport::{Call, PeerConnectionHandle, PeerEndpoint, PeerTransport, RtpSender};
