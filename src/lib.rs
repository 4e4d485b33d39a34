//! peercam: connection establishment and resilience for peer-to-peer camera streaming
//!
//! A streamer captures a local camera and calls a viewer over a peer
//! connection; the viewer publishes an id out of band and answers. This
//! crate owns everything between "camera opened" and "video flowing":
//!
//! # Features
//! - Tiered media acquisition that steps down on device failures
//! - Traversal candidate sets alternating relay-only and any transport
//! - An explicit per-attempt session state machine
//! - Post-connect codec preference and bitrate caps
//! - Bounded reconnects with degraded fallback and stats sampling
//!
//! Capture and transport are traits (`MediaDevices`, `PeerTransport`);
//! `testing` ships synthetic implementations of both.
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use peercam::testing::{LoopbackNetwork, SyntheticDevices};
//! use peercam::{PeerCamConfig, PeerLink};
//!
//! # async fn demo() -> peercam::Result<()> {
//! let network = LoopbackNetwork::new();
//! network.add_auto_answer_peer("abc123");
//!
//! let config = PeerCamConfig::default();
//! let mut link = PeerLink::streamer(
//!     &config,
//!     Arc::new(SyntheticDevices::new()),
//!     Arc::new(network),
//!     "abc123",
//! )?;
//! link.start(Some("medium"), None).await?;
//! link.run().await
//! # }
//! ```
pub mod config;
pub mod errors;
pub mod link;
pub mod media;
pub mod quality;
pub mod rendezvous;
pub mod resilience;
pub mod session;
pub mod traversal;
pub mod types;

// Testing utilities - synthetic capture and loopback transport
pub mod testing;

#[cfg(feature = "webrtc")]
pub mod webrtc;

// Re-exports for convenience
pub use config::PeerCamConfig;
pub use errors::{PeerCamError, Result, TransportErrorKind};
pub use link::{LinkPhase, LinkStatus, PeerLink};
pub use media::{MediaAcquisition, MediaDevices, MediaProfile, MediaStream, ProfileLadder};
pub use quality::{EncodingPlan, QualityController};
pub use resilience::{ResilienceManager, StatsSample};
pub use session::{ConnectionSession, HealthState, PeerTransport};
pub use traversal::{TransportPolicy, TraversalCandidateSet, TraversalConfig};
pub use types::Role;

/// Initialize logging for peercam
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "peercam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        webrtc_types: cfg!(feature = "webrtc"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with the `webrtc` type mapping
    pub webrtc_types: bool,
}
