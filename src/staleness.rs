/// Staleness detection: counts consecutive observations of the same chain
/// head and raises one alert per stale episode.
use crate::chain::{ChainHead, TipSetKey};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// What happens to the counter when a tick could not reach the chain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnreachablePolicy {
    /// Leave the counter alone. Our reachability says nothing about the node.
    #[default]
    Skip,
    /// Treat the tick as another sighting of the last known head.
    CountAsStale,
}

/// Input for one interval tick.
#[derive(Debug, Clone)]
pub enum Observation {
    Head(ChainHead),
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertReason {
    StaleHead {
        key: TipSetKey,
        height: u64,
        unchanged: u32,
    },
}

/// Raised once when a head has gone unchanged for `threshold` ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub reason: AlertReason,
    pub observed_at: DateTime<Utc>,
}

/// Detector state. Owned by the pipeline task, never shared.
#[derive(Debug)]
pub struct StalenessDetector {
    threshold: u32,
    policy: UnreachablePolicy,
    last_head: Option<ChainHead>,
    unchanged_count: u32,
    alerted: bool,
}

impl StalenessDetector {
    /// `threshold` must be at least 1; config validation enforces this.
    pub fn new(threshold: u32, policy: UnreachablePolicy) -> Self {
        Self {
            threshold,
            policy,
            last_head: None,
            unchanged_count: 0,
            alerted: false,
        }
    }

    pub fn unchanged_count(&self) -> u32 {
        self.unchanged_count
    }

    #[allow(dead_code)]
    pub fn last_head(&self) -> Option<&ChainHead> {
        self.last_head.as_ref()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Feed one tick. Returns the alert if this tick completed a stale run.
    pub fn observe(&mut self, observation: Observation) -> Option<AlertEvent> {
        match observation {
            Observation::Head(head) => {
                let same = self
                    .last_head
                    .as_ref()
                    .is_some_and(|last| last.key == head.key);
                if same {
                    let observed_at = head.observed_at;
                    self.last_head = Some(head);
                    self.record_unchanged(observed_at)
                } else {
                    self.reset(head);
                    None
                }
            }
            Observation::Unreachable => match self.policy {
                UnreachablePolicy::Skip => None,
                UnreachablePolicy::CountAsStale if self.last_head.is_some() => {
                    self.record_unchanged(Utc::now())
                }
                UnreachablePolicy::CountAsStale => None,
            },
        }
    }

    fn reset(&mut self, head: ChainHead) {
        if self.alerted {
            info!(key = %head.key, height = head.height, "chain head moving again");
        } else {
            debug!(key = %head.key, height = head.height, "new chain head");
        }
        self.last_head = Some(head);
        self.unchanged_count = 0;
        self.alerted = false;
    }

    fn record_unchanged(&mut self, observed_at: DateTime<Utc>) -> Option<AlertEvent> {
        self.unchanged_count = (self.unchanged_count + 1).min(self.threshold);
        debug!(
            unchanged = self.unchanged_count,
            threshold = self.threshold,
            "chain head unchanged"
        );

        if self.alerted || self.unchanged_count < self.threshold {
            return None;
        }
        self.alerted = true;

        let last = self.last_head.as_ref()?;
        warn!(
            key = %last.key,
            height = last.height,
            unchanged = self.unchanged_count,
            "chain head is stale"
        );
        Some(AlertEvent {
            reason: AlertReason::StaleHead {
                key: last.key.clone(),
                height: last.height,
                unchanged: self.unchanged_count,
            },
            observed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::head;

    fn feed(detector: &mut StalenessDetector, ids: &[&str]) -> (Vec<u32>, Vec<usize>) {
        let mut counts = Vec::new();
        let mut alerts = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            if detector.observe(Observation::Head(head(id, i as u64))).is_some() {
                alerts.push(i);
            }
            counts.push(detector.unchanged_count());
        }
        (counts, alerts)
    }

    #[test]
    fn test_first_observation_starts_at_zero() {
        let mut d = StalenessDetector::new(3, UnreachablePolicy::Skip);
        assert!(d.observe(Observation::Head(head("a", 1))).is_none());
        assert_eq!(d.unchanged_count(), 0);
        assert_eq!(d.last_head().unwrap().key, head("a", 1).key);
    }

    #[test]
    fn test_threshold_two_scenario() {
        let mut d = StalenessDetector::new(2, UnreachablePolicy::Skip);
        let (counts, alerts) = feed(&mut d, &["h1", "h1", "h1", "h2"]);
        assert_eq!(counts, vec![0, 1, 2, 0]);
        assert_eq!(alerts, vec![2]);
    }

    #[test]
    fn test_two_stale_episodes_two_alerts() {
        // A is seen 4 times: three unchanged observations after the first.
        let mut d = StalenessDetector::new(3, UnreachablePolicy::Skip);
        let (counts, alerts) = feed(&mut d, &["A", "A", "A", "A", "B", "B", "B", "B"]);
        assert_eq!(counts, vec![0, 1, 2, 3, 0, 1, 2, 3]);
        assert_eq!(alerts, vec![3, 7]);
    }

    #[test]
    fn test_one_alert_per_episode() {
        let mut d = StalenessDetector::new(3, UnreachablePolicy::Skip);
        let ids = vec!["A"; 50];
        let (counts, alerts) = feed(&mut d, &ids);
        assert_eq!(alerts.len(), 1);
        assert!(counts.iter().all(|&c| c <= 3));
        assert_eq!(*counts.last().unwrap(), 3);
    }

    #[test]
    fn test_counter_tracks_trailing_run() {
        let threshold = 4;
        let mut d = StalenessDetector::new(threshold, UnreachablePolicy::Skip);
        let ids = ["a", "a", "b", "b", "b", "c", "a", "a", "a", "a", "a", "a", "d"];
        let (counts, _) = feed(&mut d, &ids);

        for (i, &count) in counts.iter().enumerate() {
            let run = ids[..=i].iter().rev().take_while(|&&x| x == ids[i]).count() as u32;
            assert_eq!(count, (run - 1).min(threshold), "tick {i}");
        }
    }

    #[test]
    fn test_new_alert_only_after_head_changes() {
        let mut d = StalenessDetector::new(1, UnreachablePolicy::Skip);
        let (_, alerts) = feed(&mut d, &["a", "a", "a", "b", "b", "b", "a", "a"]);
        assert_eq!(alerts, vec![1, 4, 7]);
    }

    #[test]
    fn test_alert_carries_stale_head() {
        let mut d = StalenessDetector::new(1, UnreachablePolicy::Skip);
        d.observe(Observation::Head(head("x", 7)));
        let alert = d.observe(Observation::Head(head("x", 7))).unwrap();
        let AlertReason::StaleHead {
            key,
            height,
            unchanged,
        } = alert.reason;
        assert_eq!(key, head("x", 7).key);
        assert_eq!(height, 7);
        assert_eq!(unchanged, 1);
    }

    #[test]
    fn test_unreachable_skip_leaves_state() {
        let mut d = StalenessDetector::new(2, UnreachablePolicy::Skip);
        d.observe(Observation::Head(head("a", 1)));
        d.observe(Observation::Head(head("a", 1)));
        assert_eq!(d.unchanged_count(), 1);

        for _ in 0..10 {
            assert!(d.observe(Observation::Unreachable).is_none());
        }
        assert_eq!(d.unchanged_count(), 1);
        assert_eq!(d.last_head().unwrap().key, head("a", 1).key);

        // The run continues where it left off.
        assert!(d.observe(Observation::Head(head("a", 1))).is_some());
    }

    #[test]
    fn test_unreachable_before_any_head() {
        let mut d = StalenessDetector::new(1, UnreachablePolicy::CountAsStale);
        assert!(d.observe(Observation::Unreachable).is_none());
        assert_eq!(d.unchanged_count(), 0);
        assert!(d.last_head().is_none());
    }

    #[test]
    fn test_unreachable_count_as_stale() {
        let mut d = StalenessDetector::new(3, UnreachablePolicy::CountAsStale);
        d.observe(Observation::Head(head("a", 1)));
        assert!(d.observe(Observation::Unreachable).is_none());
        assert!(d.observe(Observation::Head(head("a", 1))).is_none());
        assert!(d.observe(Observation::Unreachable).is_some());
        assert!(d.observe(Observation::Unreachable).is_none());
        assert_eq!(d.unchanged_count(), 3);
    }

    #[test]
    fn test_policy_deserializes_kebab_case() {
        #[derive(Deserialize)]
        struct W {
            p: UnreachablePolicy,
        }
        let w: W = toml::from_str("p = \"count-as-stale\"").unwrap();
        assert_eq!(w.p, UnreachablePolicy::CountAsStale);
        let w: W = toml::from_str("p = \"skip\"").unwrap();
        assert_eq!(w.p, UnreachablePolicy::Skip);
    }
}
