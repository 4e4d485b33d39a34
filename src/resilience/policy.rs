use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ResilienceConfig;
use crate::errors::PeerCamError;
use crate::session::LinkEvent;
use crate::traversal::TransportPolicy;

/// What to do about a failed session
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry {
        attempt: u32,
        delay: Duration,
        degrade_media: bool,
    },
    /// A reconnect is already scheduled
    AlreadyScheduled,
    GiveUp(PeerCamError),
}

#[derive(Debug)]
struct PendingReconnect {
    generation: u64,
    attempt: u32,
    degrade_media: bool,
    timer: JoinHandle<()>,
}

/// Bounded reconnect budget for one logical session
///
/// The counter covers the whole logical session; reaching CONNECTED does not
/// refill it. Only a user-initiated restart (`reset`) does.
#[derive(Debug)]
pub struct ResilienceManager {
    max_attempts: u32,
    backoff: Duration,
    connect_timeout_relay: Duration,
    connect_timeout_any: Duration,
    degrade_media_on_retry: bool,
    attempt: u32,
    generation: u64,
    pending: Option<PendingReconnect>,
}

impl ResilienceManager {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            connect_timeout_relay: Duration::from_secs(25),
            connect_timeout_any: Duration::from_secs(15),
            degrade_media_on_retry: false,
            attempt: 0,
            generation: 0,
            pending: None,
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
            connect_timeout_relay: Duration::from_millis(config.connect_timeout_relay_ms),
            connect_timeout_any: Duration::from_millis(config.connect_timeout_any_ms),
            degrade_media_on_retry: config.degrade_media_on_retry,
            attempt: 0,
            generation: 0,
            pending: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn connect_timeout(&self, policy: TransportPolicy) -> Duration {
        match policy {
            TransportPolicy::RelayOnly => self.connect_timeout_relay,
            TransportPolicy::Any => self.connect_timeout_any,
        }
    }

    /// Start a new logical session: cancel pending work and refill the budget
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.attempt = 0;
    }

    /// Decide how to answer a failed session
    pub fn on_failure(&mut self, error: &PeerCamError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp(error.clone());
        }
        if self.pending.is_some() {
            return RetryDecision::AlreadyScheduled;
        }
        if self.attempt >= self.max_attempts {
            return RetryDecision::GiveUp(PeerCamError::RetriesExhausted {
                attempts: self.attempt,
                last: Box::new(error.clone()),
            });
        }

        self.attempt += 1;
        let degrade_media = self.degrade_media_on_retry
            && matches!(
                error,
                PeerCamError::TraversalFailed(_) | PeerCamError::ConnectTimeout { .. }
            );

        RetryDecision::Retry {
            attempt: self.attempt,
            delay: self.backoff,
            degrade_media,
        }
    }

    /// Arm the reconnect timer; it posts `ReconnectDue` when it fires
    pub fn schedule(
        &mut self,
        attempt: u32,
        degrade_media: bool,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) {
        self.cancel_pending();
        self.generation += 1;
        let generation = self.generation;
        let delay = self.backoff;

        log::info!(
            "Reconnect attempt {}/{} in {:?}",
            attempt,
            self.max_attempts,
            delay
        );

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(LinkEvent::ReconnectDue { generation });
        });

        self.pending = Some(PendingReconnect {
            generation,
            attempt,
            degrade_media,
            timer,
        });
    }

    /// Claim a fired timer; stale generations return `None`
    pub fn take_due(&mut self, generation: u64) -> Option<(u32, bool)> {
        if self.pending.as_ref().map(|p| p.generation) != Some(generation) {
            return None;
        }
        let pending = self.pending.take()?;
        Some((pending.attempt, pending.degrade_media))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::debug!("Cancelling scheduled reconnect {}", pending.attempt);
            pending.timer.abort();
        }
    }
}

impl Drop for ResilienceManager {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traversal_failure() -> PeerCamError {
        PeerCamError::TraversalFailed("checks failed".to_string())
    }

    #[test]
    fn test_budget_is_exact() {
        let mut manager = ResilienceManager::new(3, Duration::from_secs(3));
        let mut retries = 0;
        loop {
            match manager.on_failure(&traversal_failure()) {
                RetryDecision::Retry { attempt, .. } => {
                    retries += 1;
                    assert_eq!(attempt, retries);
                }
                RetryDecision::GiveUp(error) => {
                    assert!(matches!(
                        error,
                        PeerCamError::RetriesExhausted { attempts: 3, .. }
                    ));
                    break;
                }
                RetryDecision::AlreadyScheduled => unreachable!(),
            }
        }
        assert_eq!(retries, 3);
    }

    #[test]
    fn test_non_retryable_gives_up_at_once() {
        let mut manager = ResilienceManager::new(3, Duration::from_secs(3));
        let decision = manager.on_failure(&PeerCamError::PermissionDenied("denied".into()));
        assert_eq!(
            decision,
            RetryDecision::GiveUp(PeerCamError::PermissionDenied("denied".into()))
        );
        assert_eq!(manager.attempt(), 0);
    }

    #[test]
    fn test_degrade_only_for_traversal_and_timeout() {
        let config = ResilienceConfig::default();
        let mut manager = ResilienceManager::from_config(&config);

        let decision = manager.on_failure(&PeerCamError::ConnectTimeout { after_ms: 15_000 });
        assert!(matches!(
            decision,
            RetryDecision::Retry {
                degrade_media: true,
                ..
            }
        ));

        let decision = manager.on_failure(&PeerCamError::transport(
            crate::errors::TransportErrorKind::Network,
            "offline",
        ));
        assert!(matches!(
            decision,
            RetryDecision::Retry {
                degrade_media: false,
                ..
            }
        ));
    }

    #[test]
    fn test_timeouts_follow_policy() {
        let manager = ResilienceManager::from_config(&ResilienceConfig::default());
        assert_eq!(
            manager.connect_timeout(TransportPolicy::RelayOnly),
            Duration::from_secs(25)
        );
        assert_eq!(
            manager.connect_timeout(TransportPolicy::Any),
            Duration::from_secs(15)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_once_and_stale_generations_are_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = ResilienceManager::new(3, Duration::from_secs(3));

        manager.schedule(1, false, tx.clone());
        manager.schedule(2, true, tx);

        let event = rx.recv().await.unwrap();
        let LinkEvent::ReconnectDue { generation } = event else {
            panic!("unexpected event {:?}", event);
        };
        assert_eq!(manager.take_due(generation), Some((2, true)));
        assert_eq!(manager.take_due(generation), None);
        assert!(!manager.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = ResilienceManager::new(3, Duration::from_secs(3));
        manager.on_failure(&traversal_failure());
        manager.schedule(1, false, tx);
        manager.reset();

        assert_eq!(manager.attempt(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
