use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::session::PeerConnectionHandle;
use crate::types::{ConnectionStats, SessionId, TrackKind};

/// One observation of a live connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    pub taken_at: DateTime<Utc>,
    pub session_id: SessionId,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub frames_sent: Option<u64>,
    pub bytes_received: u64,
    pub packets_received: u64,
    pub frames_received: Option<u64>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    /// Derived from the byte delta since the previous sample
    pub outbound_bitrate_bps: Option<f64>,
    pub encoder_implementation: Option<String>,
    pub quality_limitation_reason: Option<String>,
}

impl StatsSample {
    /// Reduce a raw report; `previous` is the (time, bytes_sent) of the last sample
    pub fn from_report(
        session_id: SessionId,
        report: &ConnectionStats,
        previous: Option<(Instant, u64)>,
        now: Instant,
    ) -> Self {
        let bytes_sent = report.outbound.iter().map(|s| s.bytes).sum();
        let packets_sent = report.outbound.iter().map(|s| s.packets).sum();
        let bytes_received = report.inbound.iter().map(|s| s.bytes).sum();
        let packets_received = report.inbound.iter().map(|s| s.packets).sum();

        let video_out = report.outbound.iter().find(|s| s.kind == TrackKind::Video);
        let video_in = report.inbound.iter().find(|s| s.kind == TrackKind::Video);

        let outbound_bitrate_bps = previous.and_then(|(at, bytes)| {
            let elapsed = now.saturating_duration_since(at).as_secs_f64();
            if elapsed <= 0.0 || bytes_sent < bytes {
                return None;
            }
            Some((bytes_sent - bytes) as f64 * 8.0 / elapsed)
        });

        Self {
            taken_at: Utc::now(),
            session_id,
            bytes_sent,
            packets_sent,
            frames_sent: video_out.and_then(|s| s.frames),
            bytes_received,
            packets_received,
            frames_received: video_in.and_then(|s| s.frames),
            frame_width: video_out.or(video_in).and_then(|s| s.frame_width),
            frame_height: video_out.or(video_in).and_then(|s| s.frame_height),
            outbound_bitrate_bps,
            encoder_implementation: video_out.and_then(|s| s.encoder_implementation.clone()),
            quality_limitation_reason: video_out
                .and_then(|s| s.quality_limitation_reason.clone()),
        }
    }
}

/// Periodic stats polling for connected sessions
///
/// A failed poll is logged and skipped; it never touches connection state.
#[derive(Debug, Clone)]
pub struct StatsSampler {
    interval: Duration,
    latest: Arc<watch::Sender<Option<StatsSample>>>,
}

impl StatsSampler {
    pub fn new(interval: Duration) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            interval,
            latest: Arc::new(latest),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatsSample>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<StatsSample> {
        self.latest.borrow().clone()
    }

    /// Forget the last sample once its session is gone
    pub fn clear(&self) {
        self.latest.send_replace(None);
    }

    /// Start polling `connection`; the caller owns the returned task
    pub fn spawn(
        &self,
        session_id: SessionId,
        connection: Arc<dyn PeerConnectionHandle>,
    ) -> JoinHandle<()> {
        let latest = Arc::clone(&self.latest);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            let mut previous: Option<(Instant, u64)> = None;
            loop {
                ticker.tick().await;
                match connection.stats().await {
                    Ok(report) => {
                        let now = Instant::now();
                        let sample = StatsSample::from_report(session_id, &report, previous, now);
                        previous = Some((now, sample.bytes_sent));

                        log::info!(
                            "Session {}: {} bytes sent, {:.2} Mbps, {:?}x{:?}, limit {:?}",
                            session_id,
                            sample.bytes_sent,
                            sample.outbound_bitrate_bps.unwrap_or(0.0) / 1_000_000.0,
                            sample.frame_width,
                            sample.frame_height,
                            sample.quality_limitation_reason
                        );
                        latest.send_replace(Some(sample));
                    }
                    Err(e) => log::warn!("Stats sampling failed for session {}: {}", session_id, e),
                }
            }
        })
    }
}
