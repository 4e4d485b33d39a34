//! Testing utilities for peercam
//!
//! Synthetic capture and transport backends for offline tests and demos.

pub mod devices;
pub mod transport;

pub use devices::{SyntheticDevices, SyntheticTrack};
pub use transport::{
    EndpointRecord, LinkScript, LoopbackCall, LoopbackConnection, LoopbackEndpoint,
    LoopbackNetwork, LoopbackSender,
};
