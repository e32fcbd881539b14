/// Chain-head watchdog pipeline.
///
/// Runs on its own task: poll the head every `interval`, feed the detector,
/// and forward alerts to the multiplexer. The detector state lives here and
/// nowhere else; the multiplexer only ever sees alerts.
use crate::chain::{ChainApi, ChainHead};
use crate::poller::HeadPoller;
use crate::staleness::{AlertEvent, Observation, StalenessDetector};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Hold-off until the node has caught up with the network.
#[derive(Debug, Clone, Copy)]
pub struct SyncGate {
    /// A head this close to wall-clock time counts as synced.
    pub max_lag: Duration,
    pub poll_every: Duration,
    /// Start monitoring anyway after this long. A stalled node never catches up.
    pub deadline: Duration,
}

pub struct Watchdog<A> {
    poller: HeadPoller<A>,
    detector: StalenessDetector,
    interval: Duration,
    sync_gate: Option<SyncGate>,
}

impl<A: ChainApi> Watchdog<A> {
    pub fn new(
        poller: HeadPoller<A>,
        detector: StalenessDetector,
        interval: Duration,
        sync_gate: Option<SyncGate>,
    ) -> Self {
        Self {
            poller,
            detector,
            interval,
            sync_gate,
        }
    }

    /// Run until the alert receiver goes away.
    pub async fn run(mut self, alerts: mpsc::Sender<AlertEvent>) {
        if let Some(gate) = self.sync_gate {
            tokio::select! {
                synced = tokio::time::timeout(gate.deadline, wait_for_sync(&self.poller, gate)) => {
                    match synced {
                        Ok(head) => info!(height = head.height, "node in sync, monitoring chain head"),
                        Err(_) => warn!(
                            deadline_secs = gate.deadline.as_secs(),
                            "node still behind after sync deadline, monitoring anyway"
                        ),
                    }
                }
                _ = alerts.closed() => return,
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            threshold = self.detector.threshold(),
            "watchdog started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = alerts.closed() => return,
            }

            let observation = match self.poller.poll().await {
                Ok(head) => {
                    debug!(key = %head.key, height = head.height, "observed chain head");
                    Observation::Head(head)
                }
                // Already logged by the poller.
                Err(_) => Observation::Unreachable,
            };

            if let Some(alert) = self.detector.observe(observation) {
                if alerts.send(alert).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Poll until the head's timestamp is within `gate.max_lag` of now.
async fn wait_for_sync<A: ChainApi>(poller: &HeadPoller<A>, gate: SyncGate) -> ChainHead {
    loop {
        if let Ok(head) = poller.poll().await {
            let lag = head.lag_secs(Utc::now());
            if lag < gate.max_lag.as_secs() {
                return head;
            }
            debug!(height = head.height, lag_secs = lag, "waiting for node to sync");
        }
        tokio::time::sleep(gate.poll_every).await;
    }
}
