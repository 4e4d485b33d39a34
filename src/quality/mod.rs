/// Post-connect encoding tuning
///
/// Derives an encoding plan from the negotiated capture resolution and
/// pushes codec order and send limits into the outgoing RTP senders.
pub mod controller;
pub mod plan;

pub use controller::QualityController;
pub use plan::{BitrateLadder, BitrateStep, EncodingPlan};
