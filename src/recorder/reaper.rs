//! Background sealing of abandoned capture sessions.
//!
//! A host that never calls `finish` or `abort` (a dropped connection the
//! pipeline did not notice, a handler stuck forever) would otherwise leave
//! its session in the registry. The reaper seals such sessions as faulted
//! with kind `timeout` once they outlive the session timeout.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::recorder::Recorder;

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

pub struct SessionReaper {
    recorder: Recorder,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(recorder: Recorder) -> Self {
        let interval = sweep_interval(recorder.session_timeout());
        Self { recorder, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_secs = self.recorder.session_timeout().as_secs(),
            "Session reaper starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = self.recorder.reap_expired().await;
                    if reaped > 0 {
                        tracing::info!(reaped, "Sealed stale capture sessions");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Half the timeout, capped at 30s.
fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 2).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::testing::descriptor;

    #[test]
    fn test_sweep_interval() {
        assert_eq!(sweep_interval(Duration::from_secs(300)), Duration::from_secs(30));
        assert_eq!(sweep_interval(Duration::from_secs(10)), Duration::from_secs(5));
        assert_eq!(sweep_interval(Duration::ZERO), MIN_SWEEP_INTERVAL);
    }

    #[tokio::test]
    async fn test_reaper_seals_abandoned_session_and_stops() {
        let recorder = Recorder::builder()
            .session_timeout(Duration::from_millis(40))
            .build_in_memory();
        let session = recorder.on_request_start(&descriptor("/hang")).unwrap();
        session.start_processing();

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(SessionReaper::new(recorder.clone()).run(shutdown.subscribe()));

        let mut sealed = false;
        for _ in 0..100 {
            if recorder.storage().len().await.unwrap() == 1 {
                sealed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sealed);
        assert!(session.is_sealed());
        assert!(recorder.sessions().is_empty());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
