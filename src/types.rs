use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Which side of a call this instance plays
///
/// The streamer places the call (caller); the viewer publishes an id and
/// answers (callee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

/// Camera facing preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Class of a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
}

/// Capture device descriptor reported by the capture boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
    pub facing: Option<FacingMode>,
}

/// Constraint object handed to the capture boundary
///
/// Width, height and frame rate are ideals; the device id is exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub device_id: Option<String>,
    pub facing_mode: Option<FacingMode>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
}

/// Settings negotiated by a live track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub device_id: Option<String>,
}

impl TrackSettings {
    pub fn pixel_count(&self) -> Option<u64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w as u64 * h as u64),
            _ => None,
        }
    }
}

/// Identifier of one ConnectionSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Codec entry as exposed by an RTP sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl CodecCapability {
    pub fn new(mime_type: impl Into<String>, clock_rate: u32, channels: u16) -> Self {
        Self {
            mime_type: mime_type.into(),
            clock_rate,
            channels,
            sdp_fmtp_line: String::new(),
        }
    }
}

/// Per-encoding send limits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub max_bitrate_bps: Option<u64>,
    pub max_framerate: Option<f64>,
    pub scale_resolution_down_by: Option<f64>,
}

/// Sender parameters read from and written back to an RTP sender
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

/// Counters for one RTP stream as reported by a stats query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpStreamStats {
    pub kind: TrackKind,
    pub bytes: u64,
    pub packets: u64,
    pub frames: Option<u64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub encoder_implementation: Option<String>,
    pub quality_limitation_reason: Option<String>,
}

impl RtpStreamStats {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            bytes: 0,
            packets: 0,
            frames: None,
            frame_width: None,
            frame_height: None,
            encoder_implementation: None,
            quality_limitation_reason: None,
        }
    }
}

/// Raw statistics report of a peer connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub outbound: Vec<RtpStreamStats>,
    pub inbound: Vec<RtpStreamStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_count_requires_both_dimensions() {
        let mut settings = TrackSettings {
            width: Some(1280),
            ..Default::default()
        };
        assert_eq!(settings.pixel_count(), None);
        settings.height = Some(720);
        assert_eq!(settings.pixel_count(), Some(921_600));
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_track_kind_serialization() {
        let json = serde_json::to_string(&TrackKind::Video).unwrap();
        assert_eq!(json, "\"video\"");
    }
}
