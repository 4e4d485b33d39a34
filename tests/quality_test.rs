use std::sync::Arc;
use std::time::Duration;

use peercam::config::QualityConfig;
use peercam::quality::{BitrateLadder, QualityController};
use peercam::testing::{LoopbackNetwork, SyntheticDevices};
use peercam::types::{TrackKind, TrackSettings};
use peercam::{LinkPhase, MediaProfile, PeerCamConfig, PeerLink};
use proptest::prelude::*;

async fn connected_streamer(
    network: &LoopbackNetwork,
    profile: &str,
) -> PeerLink {
    network.add_auto_answer_peer("abc123");
    let mut link = PeerLink::streamer(
        &PeerCamConfig::default(),
        Arc::new(SyntheticDevices::new()),
        Arc::new(network.clone()),
        "abc123",
    )
    .unwrap();

    link.start(Some(profile), None).await.unwrap();
    let mut status = link.subscribe();
    let connected = tokio::time::timeout(Duration::from_secs(60), async {
        while link.status().phase != LinkPhase::Connected {
            if link.step().await.is_none() {
                break;
            }
        }
    })
    .await;
    assert!(connected.is_ok());
    assert_eq!(status.borrow_and_update().phase, LinkPhase::Connected);
    link
}

#[tokio::test(start_paused = true)]
async fn test_limits_applied_to_senders_after_connect() {
    let network = LoopbackNetwork::new();
    let link = connected_streamer(&network, "medium").await;

    let connection = network.connections()[0].clone();
    let video = connection.sender(TrackKind::Video).unwrap();
    let audio = connection.sender(TrackKind::Audio).unwrap();

    assert_eq!(
        video.preferred_codecs(),
        vec!["video/H264", "video/VP8", "video/VP9"]
    );
    assert_eq!(audio.preferred_codecs(), vec!["audio/opus", "audio/PCMU"]);

    let encoding = &video.applied_parameters().encodings[0];
    assert_eq!(encoding.max_bitrate_bps, Some(2_500_000));
    assert_eq!(encoding.max_framerate, Some(25.0));
    assert_eq!(encoding.scale_resolution_down_by, Some(1.0));

    let audio_encoding = &audio.applied_parameters().encodings[0];
    assert_eq!(audio_encoding.max_bitrate_bps, Some(64_000));

    let plan = link.encoding_plan().unwrap();
    assert_eq!(plan.max_bitrate_bps, 2_500_000);
    assert_eq!(link.status().plan.as_ref(), Some(plan));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_parameters_do_not_break_the_connection() {
    let network = LoopbackNetwork::new();
    network.reject_sender_parameters(true);
    let link = connected_streamer(&network, "high").await;

    let connection = network.connections()[0].clone();
    let video = connection.sender(TrackKind::Video).unwrap();

    assert_eq!(video.applied_parameters().encodings[0].max_bitrate_bps, None);
    assert_eq!(video.preferred_codecs()[0], "video/H264");
    assert_eq!(link.status().phase, LinkPhase::Connected);
    assert_eq!(link.encoding_plan().unwrap().max_bitrate_bps, 5_000_000);
}

#[test]
fn test_configured_codec_order_is_used() {
    let config = QualityConfig {
        video_codecs: vec!["video/VP9".to_string()],
        ..Default::default()
    };
    let controller = QualityController::from_config(&config);

    let plan = controller.plan(&TrackSettings::default(), Some(&MediaProfile::medium()));

    assert_eq!(plan.codec_priority, vec!["video/VP9"]);
    assert_eq!(plan.max_framerate, 25.0);
}

proptest! {
    #[test]
    fn bitrate_is_monotonic_in_resolution(
        w1 in 1u32..4096,
        h1 in 1u32..2160,
        w2 in 1u32..4096,
        h2 in 1u32..2160,
    ) {
        let controller = QualityController::default();
        let small = TrackSettings { width: Some(w1), height: Some(h1), ..Default::default() };
        let large = TrackSettings { width: Some(w2), height: Some(h2), ..Default::default() };

        let (small, large) = if small.pixel_count() <= large.pixel_count() {
            (small, large)
        } else {
            (large, small)
        };

        prop_assert!(
            controller.plan(&small, None).max_bitrate_bps
                <= controller.plan(&large, None).max_bitrate_bps
        );
    }

    #[test]
    fn ladder_never_exceeds_ceiling(pixels in 0u64..50_000_000) {
        let ladder = BitrateLadder::default();
        prop_assert!(ladder.bitrate_for(pixels) <= QualityConfig::default().max_bitrate_bps);
        prop_assert!(ladder.bitrate_for(pixels) > 0);
    }
}
