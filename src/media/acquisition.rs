use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::MediaConfig;
use crate::errors::{PeerCamError, Result};
use crate::media::{CaptureFailure, MediaDevices, MediaProfile, MediaStream, ProfileLadder};
use crate::types::{DeviceInfo, DeviceKind};

/// Audio processing switches forwarded with every capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioProcessing {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Owner of the local stream
///
/// Holds at most one live stream. Every acquisition stops the previous
/// stream before asking the device for a new one, and the stream is
/// stopped when the acquirer is dropped.
pub struct MediaAcquisition {
    devices: Arc<dyn MediaDevices>,
    ladder: ProfileLadder,
    default_profile: usize,
    prefer_rear_camera: bool,
    audio: AudioProcessing,
    current: Option<Arc<MediaStream>>,
    active_profile: Option<usize>,
    device_id: Option<String>,
}

impl MediaAcquisition {
    pub fn new(devices: Arc<dyn MediaDevices>, ladder: ProfileLadder) -> Self {
        let default_profile = ladder.index_of("medium").unwrap_or(ladder.highest_index());
        Self {
            devices,
            ladder,
            default_profile,
            prefer_rear_camera: true,
            audio: AudioProcessing::default(),
            current: None,
            active_profile: None,
            device_id: None,
        }
    }

    pub fn from_config(devices: Arc<dyn MediaDevices>, config: &MediaConfig) -> Result<Self> {
        let ladder = ProfileLadder::new(config.profiles.clone())?;
        let default_profile = ladder.index_of(&config.default_profile).ok_or_else(|| {
            PeerCamError::InvalidConfig(format!(
                "default profile '{}' is not in the ladder",
                config.default_profile
            ))
        })?;

        let mut acquisition = Self::new(devices, ladder);
        acquisition.default_profile = default_profile;
        acquisition.prefer_rear_camera = config.prefer_rear_camera;
        acquisition.audio = config.audio;
        Ok(acquisition)
    }

    pub fn with_rear_camera_preference(mut self, prefer: bool) -> Self {
        self.prefer_rear_camera = prefer;
        self
    }

    pub fn ladder(&self) -> &ProfileLadder {
        &self.ladder
    }

    pub fn default_profile_index(&self) -> usize {
        self.default_profile
    }

    /// Acquire a stream at `profile_index`, stepping down on device failures
    ///
    /// Permission denial aborts at once. Any other refusal moves to the next
    /// lower tier; when every tier down to the lowest has been refused the
    /// result is `NoDeviceAvailable`.
    pub async fn acquire(
        &mut self,
        profile_index: usize,
        device_id: Option<&str>,
    ) -> Result<Arc<MediaStream>> {
        if profile_index >= self.ladder.len() {
            return Err(PeerCamError::InvalidConfig(format!(
                "profile index {} out of range (ladder has {} tiers)",
                profile_index,
                self.ladder.len()
            )));
        }

        self.release();

        let mut last_failure: Option<CaptureFailure> = None;
        for index in (0..=profile_index).rev() {
            let Some(profile) = self.ladder.get(index).cloned() else {
                continue;
            };
            let constraints = profile.constraints(device_id, self.prefer_rear_camera, self.audio);

            log::info!(
                "Requesting media at profile '{}' ({}x{}@{}fps)",
                profile.name,
                profile.video_width,
                profile.video_height,
                profile.frame_rate
            );

            match self.devices.get_user_media(&constraints).await {
                Ok(stream) => {
                    if let Some(settings) = stream.video_settings() {
                        log::info!(
                            "Media acquired at '{}', negotiated {:?}x{:?}@{:?}",
                            profile.name,
                            settings.width,
                            settings.height,
                            settings.frame_rate
                        );
                    }
                    let stream = Arc::new(stream);
                    self.current = Some(Arc::clone(&stream));
                    self.active_profile = Some(index);
                    self.device_id = device_id.map(str::to_owned);
                    return Ok(stream);
                }
                Err(CaptureFailure::PermissionDenied(msg)) => {
                    log::error!("Media permission denied: {}", msg);
                    return Err(PeerCamError::PermissionDenied(msg));
                }
                Err(failure) => {
                    log::warn!("Profile '{}' unavailable: {}", profile.name, failure);
                    last_failure = Some(failure);
                }
            }
        }

        let reason = last_failure
            .map(|f| f.to_string())
            .unwrap_or_else(|| "no profile could be tried".to_string());
        Err(PeerCamError::NoDeviceAvailable(reason))
    }

    /// Acquire by profile name; unknown names fall back to the default profile
    pub async fn acquire_named(
        &mut self,
        name: &str,
        device_id: Option<&str>,
    ) -> Result<Arc<MediaStream>> {
        let index = match self.ladder.index_of(name) {
            Some(index) => index,
            None => {
                log::warn!("Unknown profile '{}', using default", name);
                self.default_profile
            }
        };
        self.acquire(index, device_id).await
    }

    /// Re-acquire one tier below the active profile on the same device
    ///
    /// When no lower tier can be captured the stream is re-acquired at the
    /// tier it had before, and the step-down error is returned. A caller can
    /// tell the two apart through `current()`: it is `None` only if that
    /// restore failed as well.
    pub async fn step_down(&mut self) -> Result<Arc<MediaStream>> {
        let current = self.active_profile.ok_or_else(|| {
            PeerCamError::NoDeviceAvailable("no active profile to step down from".to_string())
        })?;
        if current == 0 {
            return Err(PeerCamError::NoDeviceAvailable(
                "already at the lowest profile".to_string(),
            ));
        }

        let device_id = self.device_id.clone();
        match self.acquire(current - 1, device_id.as_deref()).await {
            Err(PeerCamError::NoDeviceAvailable(reason)) => {
                log::warn!("No lower profile available ({}), restoring previous tier", reason);
                self.acquire(current, device_id.as_deref()).await?;
                Err(PeerCamError::NoDeviceAvailable(reason))
            }
            other => other,
        }
    }

    /// Video input devices known to the capture boundary
    pub async fn list_cameras(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.devices.enumerate_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .collect())
    }

    /// Stop the current stream, if any
    pub fn release(&mut self) {
        if let Some(stream) = self.current.take() {
            log::debug!("Stopping media stream {}", stream.id());
            stream.stop();
        }
        self.active_profile = None;
    }

    pub fn current(&self) -> Option<&Arc<MediaStream>> {
        self.current.as_ref()
    }

    pub fn active_profile(&self) -> Option<&MediaProfile> {
        self.active_profile.and_then(|i| self.ladder.get(i))
    }

    pub fn active_profile_index(&self) -> Option<usize> {
        self.active_profile
    }
}

impl Drop for MediaAcquisition {
    fn drop(&mut self) {
        self.release();
    }
}
