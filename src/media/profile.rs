use serde::{Deserialize, Serialize};

use crate::errors::{PeerCamError, Result};
use crate::types::{FacingMode, MediaConstraints};

/// A named capture quality tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaProfile {
    pub name: String,
    pub video_width: u32,
    pub video_height: u32,
    pub frame_rate: u32,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl MediaProfile {
    pub fn new(
        name: impl Into<String>,
        video_width: u32,
        video_height: u32,
        frame_rate: u32,
        sample_rate: u32,
        channel_count: u16,
    ) -> Self {
        Self {
            name: name.into(),
            video_width,
            video_height,
            frame_rate,
            sample_rate,
            channel_count,
        }
    }

    pub fn ultra_low() -> Self {
        Self::new("ultra-low", 320, 240, 15, 16_000, 1)
    }

    pub fn low() -> Self {
        Self::new("low", 640, 480, 20, 22_050, 1)
    }

    pub fn medium() -> Self {
        Self::new("medium", 1280, 720, 25, 44_100, 1)
    }

    pub fn high() -> Self {
        Self::new("high", 1920, 1080, 30, 48_000, 2)
    }

    /// Width times height, the ordering key of the ladder
    pub fn pixel_budget(&self) -> u64 {
        self.video_width as u64 * self.video_height as u64
    }

    /// Build capture constraints for this tier
    ///
    /// An explicit device id wins over the facing preference.
    pub fn constraints(
        &self,
        device_id: Option<&str>,
        prefer_rear_camera: bool,
        audio: crate::media::AudioProcessing,
    ) -> MediaConstraints {
        let facing_mode = match device_id {
            None if prefer_rear_camera => Some(FacingMode::Environment),
            _ => None,
        };

        MediaConstraints {
            width: self.video_width,
            height: self.video_height,
            frame_rate: self.frame_rate,
            device_id: device_id.map(str::to_owned),
            facing_mode,
            echo_cancellation: audio.echo_cancellation,
            noise_suppression: audio.noise_suppression,
            auto_gain_control: audio.auto_gain_control,
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
        }
    }
}

/// Profiles sorted from lowest to highest pixel budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLadder {
    profiles: Vec<MediaProfile>,
}

impl ProfileLadder {
    /// Sort and validate a set of profiles
    ///
    /// Pixel budgets must be distinct so the ladder is totally ordered.
    pub fn new(mut profiles: Vec<MediaProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(PeerCamError::InvalidConfig(
                "profile ladder must contain at least one profile".to_string(),
            ));
        }

        for profile in &profiles {
            if profile.video_width == 0 || profile.video_height == 0 || profile.frame_rate == 0 {
                return Err(PeerCamError::InvalidConfig(format!(
                    "profile '{}' has a zero dimension or frame rate",
                    profile.name
                )));
            }
        }

        profiles.sort_by_key(MediaProfile::pixel_budget);

        for pair in profiles.windows(2) {
            if pair[0].pixel_budget() == pair[1].pixel_budget() {
                return Err(PeerCamError::InvalidConfig(format!(
                    "profiles '{}' and '{}' share a pixel budget",
                    pair[0].name, pair[1].name
                )));
            }
        }

        for (i, profile) in profiles.iter().enumerate() {
            if profiles[..i].iter().any(|p| p.name == profile.name) {
                return Err(PeerCamError::InvalidConfig(format!(
                    "duplicate profile name '{}'",
                    profile.name
                )));
            }
        }

        Ok(Self { profiles })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MediaProfile> {
        self.profiles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaProfile> {
        self.profiles.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.name == name)
    }

    pub fn highest_index(&self) -> usize {
        self.profiles.len().saturating_sub(1)
    }
}

impl Default for ProfileLadder {
    fn default() -> Self {
        Self {
            profiles: vec![
                MediaProfile::ultra_low(),
                MediaProfile::low(),
                MediaProfile::medium(),
                MediaProfile::high(),
            ],
        }
    }
}
