use crate::config::QualityConfig;
use crate::media::{MediaProfile, MediaStream};
use crate::quality::{BitrateLadder, EncodingPlan};
use crate::session::{PeerConnectionHandle, RtpSender};
use crate::types::{CodecCapability, EncodingParameters, TrackKind, TrackSettings};

const FALLBACK_FRAMERATE: f64 = 30.0;

/// Applies codec preference and send limits once a connection is up
#[derive(Debug, Clone)]
pub struct QualityController {
    bitrates: BitrateLadder,
    audio_bitrate_bps: u64,
    video_codecs: Vec<String>,
    audio_codecs: Vec<String>,
}

impl QualityController {
    pub fn new(bitrates: BitrateLadder, audio_bitrate_bps: u64) -> Self {
        Self {
            bitrates,
            audio_bitrate_bps,
            video_codecs: vec!["video/H264".to_string(), "video/VP8".to_string()],
            audio_codecs: vec!["audio/opus".to_string()],
        }
    }

    pub fn from_config(config: &QualityConfig) -> Self {
        Self {
            bitrates: BitrateLadder::from_config(config),
            audio_bitrate_bps: config.audio_bitrate_bps,
            video_codecs: config.video_codecs.clone(),
            audio_codecs: config.audio_codecs.clone(),
        }
    }

    /// Compute the plan for a negotiated video track
    ///
    /// Missing dimensions or frame rate fall back to the active profile.
    pub fn plan(&self, video: &TrackSettings, fallback: Option<&MediaProfile>) -> EncodingPlan {
        let pixels = video
            .pixel_count()
            .or_else(|| fallback.map(MediaProfile::pixel_budget))
            .unwrap_or(0);

        let max_framerate = video
            .frame_rate
            .filter(|fps| *fps > 0.0)
            .map(f64::ceil)
            .or_else(|| fallback.map(|p| p.frame_rate as f64))
            .unwrap_or(FALLBACK_FRAMERATE);

        EncodingPlan {
            max_bitrate_bps: self.bitrates.bitrate_for(pixels),
            max_framerate,
            codec_priority: self.video_codecs.clone(),
            audio_bitrate_bps: self.audio_bitrate_bps,
            audio_codec_priority: self.audio_codecs.clone(),
        }
    }

    /// Push the plan into every sender of `connection`
    ///
    /// Individual sender failures are logged and skipped; the returned plan
    /// is what was attempted.
    pub async fn apply(
        &self,
        connection: &dyn PeerConnectionHandle,
        stream: &MediaStream,
        fallback: Option<&MediaProfile>,
    ) -> EncodingPlan {
        let settings = stream.video_settings().unwrap_or_default();
        let plan = self.plan(&settings, fallback);

        log::info!(
            "Applying encoding plan: {} bps video, {} fps, {} bps audio",
            plan.max_bitrate_bps,
            plan.max_framerate,
            plan.audio_bitrate_bps
        );

        for sender in connection.senders() {
            self.tune_sender(sender.as_ref(), &plan).await;
        }

        plan
    }

    async fn tune_sender(&self, sender: &dyn RtpSender, plan: &EncodingPlan) {
        let kind = sender.kind();
        let priority = match kind {
            TrackKind::Video => &plan.codec_priority,
            TrackKind::Audio => &plan.audio_codec_priority,
        };

        let codecs = sender.codecs();
        if !codecs.is_empty() {
            let ordered = prioritize_codecs(codecs, priority);
            if let Err(e) = sender.set_codec_preferences(ordered) {
                log::warn!("Could not reorder {} codecs: {}", kind, e);
            }
        }

        let mut params = sender.parameters();
        if params.encodings.is_empty() {
            params.encodings.push(EncodingParameters::default());
        }
        for encoding in &mut params.encodings {
            match kind {
                TrackKind::Video => {
                    encoding.max_bitrate_bps = Some(plan.max_bitrate_bps);
                    encoding.max_framerate = Some(plan.max_framerate);
                    encoding.scale_resolution_down_by = Some(1.0);
                }
                TrackKind::Audio => {
                    encoding.max_bitrate_bps = Some(plan.audio_bitrate_bps);
                }
            }
        }

        match sender.set_parameters(params).await {
            Ok(()) => log::debug!("Applied {} sender parameters", kind),
            Err(e) => log::warn!("Sender parameters not applied for {}: {}", kind, e),
        }
    }
}

impl Default for QualityController {
    fn default() -> Self {
        Self::from_config(&QualityConfig::default())
    }
}

/// Stable reorder: listed MIME types first in list order, the rest after
pub fn prioritize_codecs(
    mut codecs: Vec<CodecCapability>,
    priority: &[String],
) -> Vec<CodecCapability> {
    codecs.sort_by_key(|codec| {
        priority
            .iter()
            .position(|mime| mime.eq_ignore_ascii_case(&codec.mime_type))
            .unwrap_or(priority.len())
    });
    codecs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_uses_negotiated_settings() {
        let controller = QualityController::default();
        let settings = TrackSettings {
            width: Some(1280),
            height: Some(720),
            frame_rate: Some(24.5),
            ..Default::default()
        };
        let plan = controller.plan(&settings, Some(&MediaProfile::high()));
        assert_eq!(plan.max_bitrate_bps, 2_500_000);
        assert_eq!(plan.max_framerate, 25.0);
        assert_eq!(plan.codec_priority[0], "video/H264");
        assert_eq!(plan.audio_bitrate_bps, 64_000);
    }

    #[test]
    fn test_plan_falls_back_to_profile() {
        let controller = QualityController::default();
        let plan = controller.plan(&TrackSettings::default(), Some(&MediaProfile::low()));
        assert_eq!(plan.max_bitrate_bps, 800_000);
        assert_eq!(plan.max_framerate, 20.0);

        let bare = controller.plan(&TrackSettings::default(), None);
        assert_eq!(bare.max_bitrate_bps, 300_000);
        assert_eq!(bare.max_framerate, 30.0);
    }

    #[test]
    fn test_prioritize_codecs_is_stable() {
        let codecs = vec![
            CodecCapability::new("video/VP9", 90_000, 0),
            CodecCapability::new("video/VP8", 90_000, 0),
            CodecCapability::new("video/AV1", 90_000, 0),
            CodecCapability::new("video/h264", 90_000, 0),
        ];
        let ordered = prioritize_codecs(
            codecs,
            &["video/H264".to_string(), "video/VP8".to_string()],
        );
        let mimes: Vec<&str> = ordered.iter().map(|c| c.mime_type.as_str()).collect();
        assert_eq!(mimes, vec!["video/h264", "video/VP8", "video/VP9", "video/AV1"]);
    }
}
