//! Configuration management for peercam
//!
//! One TOML file collapses what would otherwise be many hard-coded app
//! variants: the profile ladder, traversal servers and policy mode, retry
//! budget, encoding limits and the rendezvous link layout.

use crate::errors::{PeerCamError, Result};
use crate::media::{AudioProcessing, MediaProfile, ProfileLadder};
use crate::quality::BitrateStep;
use crate::traversal::{BundlePolicy, PolicyMode, TraversalConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerCamConfig {
    pub media: MediaConfig,
    pub traversal: TraversalSettings,
    pub resilience: ResilienceConfig,
    pub quality: QualityConfig,
    pub rendezvous: RendezvousConfig,
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Profile used when none is requested
    pub default_profile: String,
    /// Ask for the environment-facing camera when no device is given
    pub prefer_rear_camera: bool,
    pub audio: AudioProcessing,
    /// Quality tiers; sorted by pixel budget when loaded
    pub profiles: Vec<MediaProfile>,
}

/// Traversal server list and policy selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
    pub policy_mode: PolicyMode,
    pub candidate_pool_size: u8,
    pub bundle_policy: BundlePolicy,
    /// `stun:` URLs, tried first
    pub discovery_servers: Vec<String>,
    /// Relay groups in priority order
    pub relay_servers: Vec<RelayServerConfig>,
}

/// A relay provider; every URL shares the same credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Retry budget, timeouts and stats cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Reconnect attempts per logical session
    pub max_attempts: u32,
    /// Fixed delay before each reconnect
    pub backoff_ms: u64,
    pub connect_timeout_relay_ms: u64,
    pub connect_timeout_any_ms: u64,
    pub stats_interval_ms: u64,
    /// Step the streamer's profile down before retrying after traversal failures
    pub degrade_media_on_retry: bool,
}

/// Post-connect encoding limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Video ceiling above the last step
    pub max_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    pub video_codecs: Vec<String>,
    pub audio_codecs: Vec<String>,
    pub bitrate_steps: Vec<BitrateStep>,
}

/// Viewer link layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub base_url: String,
    pub streamer_page: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            default_profile: "medium".to_string(),
            prefer_rear_camera: true,
            audio: AudioProcessing::default(),
            profiles: ProfileLadder::default().iter().cloned().collect(),
        }
    }
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            policy_mode: PolicyMode::Alternate,
            candidate_pool_size: 10,
            bundle_policy: BundlePolicy::MaxBundle,
            discovery_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            relay_servers: vec![RelayServerConfig {
                urls: vec![
                    "turn:openrelay.metered.ca:80".to_string(),
                    "turn:openrelay.metered.ca:443".to_string(),
                    "turn:openrelay.metered.ca:443?transport=tcp".to_string(),
                ],
                username: "openrelayproject".to_string(),
                credential: "openrelayproject".to_string(),
            }],
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 3000,
            connect_timeout_relay_ms: 25_000,
            connect_timeout_any_ms: 15_000,
            stats_interval_ms: 5000,
            degrade_media_on_retry: true,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_bitrate_bps: 8_000_000,
            audio_bitrate_bps: 64_000,
            video_codecs: vec!["video/H264".to_string(), "video/VP8".to_string()],
            audio_codecs: vec!["audio/opus".to_string()],
            bitrate_steps: vec![
                BitrateStep::new(76_800, 300_000),
                BitrateStep::new(307_200, 800_000),
                BitrateStep::new(921_600, 2_500_000),
                BitrateStep::new(2_073_600, 5_000_000),
            ],
        }
    }
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/".to_string(),
            streamer_page: "streamer.html".to_string(),
        }
    }
}

impl ResilienceConfig {
    pub fn backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_ms)
    }

    pub fn stats_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stats_interval_ms)
    }
}

impl PeerCamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| PeerCamError::Io(format!("Failed to read config file: {}", e)))?;

        let config: PeerCamConfig = toml::from_str(&contents).map_err(|e| {
            PeerCamError::InvalidConfig(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PeerCamError::Io(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            PeerCamError::InvalidConfig(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string)
            .map_err(|e| PeerCamError::Io(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("peercam.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let ladder = ProfileLadder::new(self.media.profiles.clone())?;
        if ladder.index_of(&self.media.default_profile).is_none() {
            return Err(PeerCamError::InvalidConfig(format!(
                "default profile '{}' is not defined",
                self.media.default_profile
            )));
        }

        TraversalConfig::from_config(&self.traversal)?;
        if self.traversal.discovery_servers.is_empty() && self.traversal.relay_servers.is_empty()
        {
            return Err(PeerCamError::InvalidConfig(
                "at least one traversal server is required".to_string(),
            ));
        }

        let resilience = &self.resilience;
        if resilience.max_attempts > 20 {
            return Err(PeerCamError::InvalidConfig(
                "max_attempts must be at most 20".to_string(),
            ));
        }
        if resilience.connect_timeout_relay_ms == 0 || resilience.connect_timeout_any_ms == 0 {
            return Err(PeerCamError::InvalidConfig(
                "connect timeouts must be positive".to_string(),
            ));
        }
        if resilience.stats_interval_ms == 0 {
            return Err(PeerCamError::InvalidConfig(
                "stats_interval_ms must be positive".to_string(),
            ));
        }

        let quality = &self.quality;
        for pair in quality.bitrate_steps.windows(2) {
            if pair[0].max_pixels >= pair[1].max_pixels {
                return Err(PeerCamError::InvalidConfig(
                    "bitrate step thresholds must be strictly ascending".to_string(),
                ));
            }
            if pair[0].bitrate_bps > pair[1].bitrate_bps {
                return Err(PeerCamError::InvalidConfig(
                    "bitrate steps must not decrease".to_string(),
                ));
            }
        }
        if let Some(last) = quality.bitrate_steps.last() {
            if last.bitrate_bps > quality.max_bitrate_bps {
                return Err(PeerCamError::InvalidConfig(
                    "max_bitrate_bps must not be below the last step".to_string(),
                ));
            }
        }
        if quality.audio_bitrate_bps == 0 || quality.max_bitrate_bps == 0 {
            return Err(PeerCamError::InvalidConfig(
                "bitrate ceilings must be positive".to_string(),
            ));
        }

        if self.rendezvous.streamer_page.is_empty() {
            return Err(PeerCamError::InvalidConfig(
                "streamer_page must not be empty".to_string(),
            ));
        }
        crate::rendezvous::Rendezvous::from_config(&self.rendezvous)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PeerCamConfig::default();
        assert_eq!(config.media.default_profile, "medium");
        assert_eq!(config.media.profiles.len(), 4);
        assert_eq!(config.resilience.max_attempts, 3);
        assert_eq!(config.resilience.backoff_ms, 3000);
        assert_eq!(config.traversal.policy_mode, PolicyMode::Alternate);
        assert_eq!(config.quality.audio_bitrate_bps, 64_000);
    }

    #[test]
    fn test_config_validation() {
        let config = PeerCamConfig::default();
        assert!(config.validate().is_ok());

        let mut bad_default = config.clone();
        bad_default.media.default_profile = "cinema".to_string();
        assert!(bad_default.validate().is_err());

        let mut bad_steps = PeerCamConfig::default();
        bad_steps.quality.bitrate_steps = vec![
            BitrateStep::new(307_200, 800_000),
            BitrateStep::new(76_800, 300_000),
        ];
        assert!(bad_steps.validate().is_err());

        let mut decreasing = PeerCamConfig::default();
        decreasing.quality.bitrate_steps = vec![
            BitrateStep::new(76_800, 900_000),
            BitrateStep::new(307_200, 800_000),
        ];
        assert!(decreasing.validate().is_err());

        let mut no_relays = PeerCamConfig::default();
        no_relays.traversal.relay_servers.clear();
        no_relays.traversal.policy_mode = PolicyMode::AlwaysRelay;
        assert!(no_relays.validate().is_err());

        let mut bad_url = PeerCamConfig::default();
        bad_url.traversal.discovery_servers = vec!["stun.example.org".to_string()];
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("peercam.toml");

        let mut config = PeerCamConfig::default();
        config.resilience.max_attempts = 5;
        config.traversal.policy_mode = PolicyMode::AlwaysAny;
        config.save_to_file(&config_path).unwrap();

        let loaded = PeerCamConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = PeerCamConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[media]"));
        assert!(toml_string.contains("[traversal]"));
        assert!(toml_string.contains("[resilience]"));
        assert!(toml_string.contains("[quality]"));
        assert!(toml_string.contains("[rendezvous]"));
        assert!(toml_string.contains("policy_mode = \"alternate\""));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PeerCamConfig = toml::from_str(
            r#"
            [resilience]
            max_attempts = 5

            [traversal]
            policy_mode = "always_any"
            "#,
        )
        .unwrap();
        assert_eq!(config.resilience.max_attempts, 5);
        assert_eq!(config.resilience.backoff_ms, 3000);
        assert_eq!(config.traversal.policy_mode, PolicyMode::AlwaysAny);
        assert_eq!(config.traversal.discovery_servers.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = PeerCamConfig::load_from_file("nonexistent_peercam.toml");
        assert_eq!(result.unwrap().resilience.max_attempts, 3);
    }
}
