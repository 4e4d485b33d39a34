//! Streamer and viewer links talking over one loopback network

use std::sync::Arc;
use std::time::Duration;

use peercam::rendezvous::remote_id_from_url;
use peercam::testing::{LinkScript, LoopbackNetwork, SyntheticDevices};
use peercam::{HealthState, LinkPhase, LinkStatus, PeerCamConfig, PeerLink, Role};

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

fn viewer(network: &LoopbackNetwork) -> PeerLink {
    PeerLink::viewer(&PeerCamConfig::default(), Arc::new(network.clone()), None)
        .unwrap()
        .with_local_id("abc123")
}

fn streamer(network: &LoopbackNetwork, devices: &SyntheticDevices, remote: &str) -> PeerLink {
    PeerLink::streamer(
        &PeerCamConfig::default(),
        Arc::new(devices.clone()),
        Arc::new(network.clone()),
        remote,
    )
    .unwrap()
}

fn watching(status: &LinkStatus) -> bool {
    status.phase == LinkPhase::Connected && status.remote_video.is_some()
}

#[tokio::test(start_paused = true)]
async fn test_viewer_receives_medium_stream() {
    let network = LoopbackNetwork::new();
    let devices = SyntheticDevices::new();

    let mut viewer = viewer(&network);
    viewer.start(None, None).await.unwrap();
    let published = drive_until(&mut viewer, |s| s.phase == LinkPhase::AwaitingCall).await;

    let link = published.viewer_link.unwrap();
    assert_eq!(link, "http://localhost:8080/streamer.html?id=abc123");
    let remote = remote_id_from_url(&link).unwrap();

    let mut streamer = streamer(&network, &devices, &remote);
    streamer.start(Some("medium"), None).await.unwrap();

    let (viewer_status, streamer_status) = tokio::join!(
        drive_until(&mut viewer, watching),
        drive_until(&mut streamer, |s| s.phase == LinkPhase::Connected),
    );

    assert_eq!(viewer_status.role, Role::Callee);
    assert_eq!(viewer_status.health, Some(HealthState::Connected));
    assert_eq!(viewer_status.remote_video, Some((1280, 720)));
    assert_eq!(viewer_status.local_id.as_deref(), Some("abc123"));
    assert!(!viewer_status.history.contains(&HealthState::Failed));
    assert_eq!(
        viewer_status.history,
        vec![
            HealthState::New,
            HealthState::Opening,
            HealthState::AwaitingCall,
            HealthState::Negotiating,
            HealthState::Connected,
        ]
    );

    assert_eq!(streamer_status.role, Role::Caller);
    assert_eq!(streamer_status.remote_id.as_deref(), Some("abc123"));
    assert_eq!(streamer_status.profile.as_deref(), Some("medium"));
    assert_eq!(streamer_status.attempt, 0);
    assert!(!streamer_status.history.contains(&HealthState::Failed));

    let remote_stream = viewer.remote_stream().unwrap();
    assert!(remote_stream.is_live());
    assert!(streamer.local_stream().unwrap().is_live());
}

#[tokio::test(start_paused = true)]
async fn test_streamer_hang_up_ends_viewer() {
    let network = LoopbackNetwork::new();
    let devices = SyntheticDevices::new();

    let mut viewer = viewer(&network);
    viewer.start(None, None).await.unwrap();
    let mut streamer = streamer(&network, &devices, "abc123");
    streamer.start(Some("low"), None).await.unwrap();

    tokio::join!(
        drive_until(&mut viewer, watching),
        drive_until(&mut streamer, |s| s.phase == LinkPhase::Connected),
    );

    streamer.teardown();
    assert_eq!(devices.live_stream_count(), 0);

    let result = tokio::time::timeout(Duration::from_secs(5), viewer.run()).await;
    assert_eq!(result.unwrap(), Ok(()));
    assert_eq!(viewer.status().phase, LinkPhase::Ended);
    assert!(viewer.remote_stream().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_both_sides_recover_after_failed_checks() {
    let network = LoopbackNetwork::new();
    network.script(LinkScript::FailConnectivity);
    let devices = SyntheticDevices::new();

    let mut viewer = viewer(&network);
    viewer.start(None, None).await.unwrap();
    let mut streamer = streamer(&network, &devices, "abc123");
    streamer.start(Some("medium"), None).await.unwrap();

    let (viewer_status, streamer_status) = tokio::join!(
        drive_until(&mut viewer, |s| watching(s) || s.phase.is_terminal()),
        drive_until(&mut streamer, |s| {
            (s.phase == LinkPhase::Connected && s.attempt > 0) || s.phase.is_terminal()
        }),
    );

    assert_eq!(streamer_status.phase, LinkPhase::Connected);
    assert!(streamer_status.attempt <= 3);
    assert_eq!(viewer_status.phase, LinkPhase::Connected);
    assert!(viewer_status.attempt >= 1);
    assert!(network.live_endpoint_ids().contains(&"abc123".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_viewer_with_own_camera_sends_back() {
    let network = LoopbackNetwork::new();
    let streamer_devices = SyntheticDevices::new();
    let viewer_devices = SyntheticDevices::new();

    let mut viewer = PeerLink::viewer(
        &PeerCamConfig::default(),
        Arc::new(network.clone()),
        Some(Arc::new(viewer_devices.clone())),
    )
    .unwrap()
    .with_local_id("abc123");
    viewer.start(Some("low"), None).await.unwrap();

    let mut streamer = streamer(&network, &streamer_devices, "abc123");
    streamer.start(Some("medium"), None).await.unwrap();

    let (_, streamer_status) = tokio::join!(
        drive_until(&mut viewer, watching),
        drive_until(&mut streamer, watching),
    );

    assert_eq!(streamer_status.remote_video, Some((640, 480)));
    assert_eq!(viewer_devices.live_stream_count(), 1);
}
