use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;

/// Video ceiling for resolutions up to `max_pixels`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateStep {
    pub max_pixels: u64,
    pub bitrate_bps: u64,
}

impl BitrateStep {
    pub fn new(max_pixels: u64, bitrate_bps: u64) -> Self {
        Self {
            max_pixels,
            bitrate_bps,
        }
    }
}

/// Step function from pixel count to video bitrate ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitrateLadder {
    steps: Vec<BitrateStep>,
    ceiling_bps: u64,
}

impl BitrateLadder {
    pub fn new(mut steps: Vec<BitrateStep>, ceiling_bps: u64) -> Self {
        steps.sort_by_key(|s| s.max_pixels);
        Self { steps, ceiling_bps }
    }

    pub fn from_config(config: &QualityConfig) -> Self {
        Self::new(config.bitrate_steps.clone(), config.max_bitrate_bps)
    }

    pub fn bitrate_for(&self, pixels: u64) -> u64 {
        self.steps
            .iter()
            .find(|s| pixels <= s.max_pixels)
            .map(|s| s.bitrate_bps)
            .unwrap_or(self.ceiling_bps)
    }

    pub fn steps(&self) -> &[BitrateStep] {
        &self.steps
    }
}

impl Default for BitrateLadder {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

/// Encoding limits computed once per successful connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingPlan {
    pub max_bitrate_bps: u64,
    pub max_framerate: f64,
    /// Video codec MIME types, most preferred first
    pub codec_priority: Vec<String>,
    pub audio_bitrate_bps: u64,
    pub audio_codec_priority: Vec<String>,
}
