//! Reconnect budget, policy alternation and degraded fallback
//!
//! All tests run on paused time, so backoffs and connect timeouts elapse
//! as soon as the link has nothing else to do.

use std::sync::Arc;
use std::time::Duration;

use peercam::errors::TransportErrorKind;
use peercam::session::{ConnectivityState, TransportEvent};
use peercam::media::CaptureFailure;
use peercam::testing::{LinkScript, LoopbackNetwork, SyntheticDevices};
use peercam::traversal::TransportPolicy;
use peercam::{HealthState, LinkPhase, LinkStatus, PeerCamConfig, PeerCamError, PeerLink};

fn streamer(
    config: &PeerCamConfig,
    network: &LoopbackNetwork,
    devices: &SyntheticDevices,
) -> PeerLink {
    PeerLink::streamer(
        config,
        Arc::new(devices.clone()),
        Arc::new(network.clone()),
        "abc123",
    )
    .unwrap()
}

fn auto_answer_network() -> LoopbackNetwork {
    let network = LoopbackNetwork::new();
    network.add_auto_answer_peer("abc123");
    network
}

/// Step the link until `done` holds or the link stops
async fn drive_until(link: &mut PeerLink, done: impl Fn(&LinkStatus) -> bool) -> LinkStatus {
    let driven = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let status = link.status();
            if done(&status) {
                return status;
            }
            if link.step().await.is_none() {
                return link.status();
            }
        }
    })
    .await;
    driven.unwrap_or_else(|_| panic!("link stalled at {:?}", link.status()))
}

fn policies(network: &LoopbackNetwork) -> Vec<TransportPolicy> {
    network
        .endpoints()
        .iter()
        .map(|e| e.traversal.policy())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_transport_gives_exactly_three_reconnects() {
    let network = auto_answer_network();
    network.set_default_script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let err = link.run().await.unwrap_err();

    match err {
        PeerCamError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, PeerCamError::TraversalFailed(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(link.sessions_opened(), 4);
    assert_eq!(network.endpoints().len(), 4);
    assert_eq!(
        policies(&network),
        vec![
            TransportPolicy::Any,
            TransportPolicy::RelayOnly,
            TransportPolicy::Any,
            TransportPolicy::RelayOnly,
        ]
    );

    let status = link.status();
    assert_eq!(status.phase, LinkPhase::Failed);
    assert!(status.error.is_some());

    // no stray reconnect after the terminal failure
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(link.step().await.is_none());
    assert_eq!(network.endpoints().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_traversal_failures_step_media_down() {
    let network = auto_answer_network();
    network.set_default_script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let _ = link.run().await;

    let widths: Vec<u32> = devices.requests().iter().map(|c| c.width).collect();
    assert_eq!(widths, vec![1280, 640, 320]);
    assert_eq!(link.status().profile.as_deref(), Some("ultra-low"));
    assert_eq!(devices.live_stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degrade_can_be_disabled() {
    let network = auto_answer_network();
    network.set_default_script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut config = PeerCamConfig::default();
    config.resilience.degrade_media_on_retry = false;
    let mut link = streamer(&config, &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let _ = link.run().await;

    assert_eq!(devices.requests().len(), 1);
    assert_eq!(link.status().profile.as_deref(), Some("medium"));
}

#[tokio::test(start_paused = true)]
async fn test_recovers_on_second_attempt() {
    let network = auto_answer_network();
    network.script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let status = drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    assert_eq!(status.phase, LinkPhase::Connected);
    assert_eq!(status.attempt, 1);
    assert_eq!(status.policy, Some(TransportPolicy::RelayOnly));
    assert_eq!(status.profile.as_deref(), Some("low"));
    assert!(!status.history.contains(&HealthState::Failed));
    assert_eq!(link.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_keeps_media_when_no_lower_tier_is_available() {
    let network = auto_answer_network();
    network.script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    devices.fail_resolution(640, 480, CaptureFailure::DeviceBusy("busy".to_string()));
    devices.fail_resolution(320, 240, CaptureFailure::DeviceBusy("busy".to_string()));
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let status = drive_until(&mut link, |s| {
        s.phase == LinkPhase::Connected || s.phase.is_terminal()
    })
    .await;

    assert_eq!(status.phase, LinkPhase::Connected);
    assert_eq!(status.attempt, 1);
    assert_eq!(status.profile.as_deref(), Some("medium"));
    assert_eq!(link.sessions_opened(), 2);
    let widths: Vec<u32> = devices.requests().iter().map(|c| c.width).collect();
    assert_eq!(widths, vec![1280, 640, 320, 1280]);
    assert_eq!(devices.live_stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_discarded_session_events_do_not_touch_active_session() {
    let network = auto_answer_network();
    network.script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;
    assert_eq!(link.sessions_opened(), 2);

    let discarded = network.endpoints()[0].session_id;
    assert_ne!(Some(discarded), link.session().map(|s| s.id()));
    assert!(network.emit(discarded, TransportEvent::Connectivity(ConnectivityState::Failed)));
    assert!(network.emit(discarded, TransportEvent::Disconnected));

    for _ in 0..2 {
        let status = tokio::time::timeout(Duration::from_secs(1), link.step())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.phase, LinkPhase::Connected);
    }

    assert_eq!(link.session().unwrap().health(), HealthState::Connected);
    assert_eq!(link.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_counts_as_failure() {
    let network = auto_answer_network();
    network.script(LinkScript::Stall);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    let started = tokio::time::Instant::now();
    link.start(Some("medium"), None).await.unwrap();
    let status = drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    assert_eq!(status.attempt, 1);
    assert!(started.elapsed() >= Duration::from_millis(15_000 + 3000));
    assert_eq!(link.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_signaling_errors_retry_without_degrading() {
    let network = auto_answer_network();
    network.script(LinkScript::SignalingError(TransportErrorKind::Network));
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let status = drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    assert_eq!(status.attempt, 1);
    assert_eq!(status.profile.as_deref(), Some("medium"));
    assert!(status.error.unwrap().contains("network"));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_exhausts_budget() {
    let network = LoopbackNetwork::new();
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    let err = link.run().await.unwrap_err();

    assert!(matches!(err, PeerCamError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(link.sessions_opened(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_never_connects() {
    let network = auto_answer_network();
    let devices = SyntheticDevices::new();
    devices.deny_permission();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    let err = link.start(Some("medium"), None).await.unwrap_err();

    assert!(matches!(err, PeerCamError::PermissionDenied(_)));
    assert!(network.endpoints().is_empty());
    assert_eq!(link.status().phase, LinkPhase::Failed);
    assert!(link.run().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_no_device_is_terminal() {
    let network = auto_answer_network();
    let devices = SyntheticDevices::new();
    for _ in 0..3 {
        devices.queue_failure(CaptureFailure::DeviceBusy("busy".to_string()));
    }
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    let err = link.start(Some("medium"), None).await.unwrap_err();

    assert!(matches!(err, PeerCamError::NoDeviceAvailable(_)));
    assert!(network.endpoints().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_user_restart_cancels_scheduled_reconnect() {
    let network = auto_answer_network();
    network.script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Reconnecting).await;
    assert_eq!(link.status().attempt, 1);

    link.change_profile("low").await.unwrap();
    let status = drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;
    assert_eq!(status.attempt, 0);
    assert_eq!(status.profile.as_deref(), Some("low"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let idle = tokio::time::timeout(Duration::from_secs(1), link.step()).await;
    assert!(idle.is_err());
    assert_eq!(link.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stats_sampled_while_connected() {
    let network = auto_answer_network();
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);
    let stats = link.stats();

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    tokio::time::sleep(Duration::from_secs(11)).await;

    let sample = stats.borrow().clone().unwrap();
    assert_eq!(sample.session_id, link.session().unwrap().id());
    assert_eq!(sample.bytes_sent, 2 * 625_000);
    let bitrate = sample.outbound_bitrate_bps.unwrap();
    assert!((bitrate - 1_000_000.0).abs() < 1.0, "bitrate {}", bitrate);
}

#[tokio::test(start_paused = true)]
async fn test_stats_cleared_when_session_closes() {
    let network = auto_answer_network();
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);
    let stats = link.stats();

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(stats.borrow().is_some());

    let active = link.session().unwrap().id();
    assert!(network.emit(active, TransportEvent::Connectivity(ConnectivityState::Failed)));
    drive_until(&mut link, |s| s.phase == LinkPhase::Reconnecting).await;

    assert!(stats.borrow().is_none());
    assert!(link.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stats_failures_leave_connection_alone() {
    let network = auto_answer_network();
    network.fail_stats(true);
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(link.stats().borrow().is_none());
    assert_eq!(link.session().unwrap().health(), HealthState::Connected);
    assert!(network.connections()[0].stats_polls() >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_releases_everything() {
    let network = auto_answer_network();
    let devices = SyntheticDevices::new();
    let mut link = streamer(&PeerCamConfig::default(), &network, &devices);

    link.start(Some("medium"), None).await.unwrap();
    drive_until(&mut link, |s| s.phase == LinkPhase::Connected).await;

    link.teardown();

    assert_eq!(link.status().phase, LinkPhase::Closed);
    assert_eq!(devices.live_stream_count(), 0);
    assert!(network.live_endpoint_ids().is_empty());
    assert!(link.run().await.is_ok());
}
