//! Scriptable capture backend
//!
//! Behaves like a host with a rear camera, a front camera and a microphone.
//! Tests can deny permission, cap the supported resolution, fail specific
//! resolutions or queue one-off failures, and inspect every request made.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::media::{CaptureFailure, MediaDevices, MediaStream, MediaTrack};
use crate::types::{DeviceInfo, DeviceKind, FacingMode, MediaConstraints, TrackKind, TrackSettings};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id(prefix: &str) -> String {
    format!("{}-{}", prefix, NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// In-memory track with fixed settings
#[derive(Debug)]
pub struct SyntheticTrack {
    id: String,
    kind: TrackKind,
    settings: TrackSettings,
    live: AtomicBool,
}

impl SyntheticTrack {
    pub fn new(kind: TrackKind, settings: TrackSettings) -> Self {
        Self {
            id: next_id(&format!("{}-track", kind)),
            kind,
            settings,
            live: AtomicBool::new(true),
        }
    }

    /// Stream with one video and one audio track
    pub fn stream(video: TrackSettings, audio: TrackSettings) -> (MediaStream, Vec<Arc<SyntheticTrack>>) {
        let tracks = vec![
            Arc::new(SyntheticTrack::new(TrackKind::Video, video)),
            Arc::new(SyntheticTrack::new(TrackKind::Audio, audio)),
        ];
        let handles: Vec<Arc<dyn MediaTrack>> = tracks
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn MediaTrack>)
            .collect();
        (MediaStream::new(next_id("stream"), handles), tracks)
    }

    /// A fresh stream mirroring another stream's negotiated settings
    pub fn mirror(stream: &MediaStream) -> MediaStream {
        let video = stream.video_settings().unwrap_or_default();
        let audio = stream.audio_settings().unwrap_or_default();
        Self::stream(video, audio).0
    }
}

impl MediaTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn settings(&self) -> TrackSettings {
        self.settings.clone()
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct DevicesState {
    devices: Vec<DeviceInfo>,
    permission_denied: bool,
    max_pixels: Option<u64>,
    failing_resolutions: HashMap<(u32, u32), CaptureFailure>,
    queued_failures: VecDeque<CaptureFailure>,
    requests: Vec<MediaConstraints>,
    issued: Vec<(String, Vec<Arc<SyntheticTrack>>)>,
}

/// Synthetic `MediaDevices` implementation
#[derive(Debug, Clone)]
pub struct SyntheticDevices {
    state: Arc<Mutex<DevicesState>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        let devices = vec![
            DeviceInfo {
                device_id: "synthetic-rear".to_string(),
                label: "Synthetic rear camera".to_string(),
                kind: DeviceKind::VideoInput,
                facing: Some(FacingMode::Environment),
            },
            DeviceInfo {
                device_id: "synthetic-front".to_string(),
                label: "Synthetic front camera".to_string(),
                kind: DeviceKind::VideoInput,
                facing: Some(FacingMode::User),
            },
            DeviceInfo {
                device_id: "synthetic-mic".to_string(),
                label: "Synthetic microphone".to_string(),
                kind: DeviceKind::AudioInput,
                facing: None,
            },
        ];

        Self {
            state: Arc::new(Mutex::new(DevicesState {
                devices,
                ..Default::default()
            })),
        }
    }

    /// Cameras refuse anything above `width` x `height`
    pub fn with_max_resolution(self, width: u32, height: u32) -> Self {
        self.lock().max_pixels = Some(width as u64 * height as u64);
        self
    }

    pub fn deny_permission(&self) {
        self.lock().permission_denied = true;
    }

    /// Every request at exactly this resolution fails with `failure`
    pub fn fail_resolution(&self, width: u32, height: u32, failure: CaptureFailure) {
        self.lock().failing_resolutions.insert((width, height), failure);
    }

    /// The next request fails with `failure`
    pub fn queue_failure(&self, failure: CaptureFailure) {
        self.lock().queued_failures.push_back(failure);
    }

    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.lock().requests.clone()
    }

    pub fn live_track_count(&self) -> usize {
        self.lock()
            .issued
            .iter()
            .flat_map(|(_, tracks)| tracks.iter())
            .filter(|t| t.is_live())
            .count()
    }

    /// Streams with at least one live track
    pub fn live_stream_count(&self) -> usize {
        self.lock()
            .issued
            .iter()
            .filter(|(_, tracks)| tracks.iter().any(|t| t.is_live()))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, DevicesState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureFailure> {
        let state = self.lock();
        if state.permission_denied {
            return Err(CaptureFailure::PermissionDenied(
                "camera access blocked".to_string(),
            ));
        }
        Ok(state.devices.clone())
    }

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, CaptureFailure> {
        let mut state = self.lock();
        state.requests.push(constraints.clone());

        if state.permission_denied {
            return Err(CaptureFailure::PermissionDenied(
                "camera access blocked".to_string(),
            ));
        }
        if let Some(failure) = state.queued_failures.pop_front() {
            return Err(failure);
        }
        if let Some(failure) = state
            .failing_resolutions
            .get(&(constraints.width, constraints.height))
        {
            return Err(failure.clone());
        }

        let camera = match &constraints.device_id {
            Some(id) => state
                .devices
                .iter()
                .find(|d| &d.device_id == id && d.kind == DeviceKind::VideoInput)
                .ok_or_else(|| CaptureFailure::NotFound(id.clone()))?,
            None => state
                .devices
                .iter()
                .filter(|d| d.kind == DeviceKind::VideoInput)
                .find(|d| constraints.facing_mode.is_none() || d.facing == constraints.facing_mode)
                .ok_or_else(|| CaptureFailure::NotFound("no camera".to_string()))?,
        };
        let device_id = camera.device_id.clone();

        let pixels = constraints.width as u64 * constraints.height as u64;
        if state.max_pixels.is_some_and(|max| pixels > max) {
            return Err(CaptureFailure::Overconstrained(format!(
                "{}x{} exceeds camera capability",
                constraints.width, constraints.height
            )));
        }

        let video = TrackSettings {
            width: Some(constraints.width),
            height: Some(constraints.height),
            frame_rate: Some(constraints.frame_rate as f64),
            device_id: Some(device_id),
            ..Default::default()
        };
        let audio = TrackSettings {
            sample_rate: Some(constraints.sample_rate),
            channel_count: Some(constraints.channel_count),
            device_id: Some("synthetic-mic".to_string()),
            ..Default::default()
        };

        let (stream, tracks) = SyntheticTrack::stream(video, audio);
        state.issued.push((stream.id().to_string(), tracks));
        Ok(stream)
    }
}
