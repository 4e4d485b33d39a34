//! Local media capture
//!
//! Profiles describe quality tiers, `MediaDevices` is the capture boundary
//! and `MediaAcquisition` walks the profile ladder until a device accepts.

pub mod acquisition;
pub mod devices;
pub mod profile;
pub mod stream;

pub use acquisition::{AudioProcessing, MediaAcquisition};
pub use devices::{CaptureFailure, MediaDevices};
pub use profile::{MediaProfile, ProfileLadder};
pub use stream::{MediaStream, MediaTrack};
