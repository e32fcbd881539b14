/// Head poller: one logical chain-head query per tick, with a bounded
/// number of attempts each limited by the API timeout.
use crate::chain::{ChainApi, ChainError, ChainHead};
use crate::retry::{attempt_with_timeout, AttemptBudget, Exhausted};
use std::sync::Arc;
use tracing::warn;

/// The chain API could not be reached within the attempt budget.
///
/// This describes the watchdog's own reachability, not the node's progress.
#[derive(Debug)]
pub struct ConnectivityError {
    pub attempts: u32,
    pub last_error: String,
}

impl std::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chain API unreachable after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for ConnectivityError {}

impl From<Exhausted<ChainError>> for ConnectivityError {
    fn from(e: Exhausted<ChainError>) -> Self {
        Self {
            attempts: e.attempts,
            last_error: e.last.to_string(),
        }
    }
}

pub struct HeadPoller<A> {
    api: Arc<A>,
    budget: AttemptBudget,
}

impl<A: ChainApi> HeadPoller<A> {
    pub fn new(api: Arc<A>, budget: AttemptBudget) -> Self {
        Self { api, budget }
    }

    /// Fetch the current head, retrying up to the budget.
    pub async fn poll(&self) -> Result<ChainHead, ConnectivityError> {
        let timeout = self.budget.attempt_timeout;
        let api: &A = &self.api;
        let result = attempt_with_timeout(self.budget, move |_attempt| api.get_head(timeout)).await;

        result.map_err(|e| {
            let err = ConnectivityError::from(e);
            warn!(attempts = err.attempts, error = %err.last_error, "chain head poll failed");
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::{head, ScriptedApi};
    use std::time::Duration;

    fn poller(api: &Arc<ScriptedApi>, retries: u32) -> HeadPoller<ScriptedApi> {
        HeadPoller::new(
            Arc::clone(api),
            AttemptBudget::new(retries, Duration::from_secs(2)),
        )
    }

    fn refused() -> Result<ChainHead, ChainError> {
        Err(ChainError::Transport("connection refused".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_first_success() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(head("a", 1))]));
        let h = poller(&api, 8).poll().await.unwrap();
        assert_eq!(h, head("a", 1));
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_transient_failures() {
        let api = Arc::new(ScriptedApi::new(vec![refused(), refused(), Ok(head("b", 2))]));
        let h = poller(&api, 8).poll().await.unwrap();
        assert_eq!(h.height, 2);
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_after_budget() {
        let api = Arc::new(ScriptedApi::new(vec![refused(); 10]));
        let err = poller(&api, 2).poll().await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(api.calls(), 3);
        assert!(err.last_error.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_state_carried_between_polls() {
        let mut script = vec![refused(), refused()];
        script.push(Ok(head("c", 3)));
        script.extend([refused(), refused()]);
        script.push(Ok(head("d", 4)));
        let api = Arc::new(ScriptedApi::new(script));
        let p = poller(&api, 2);

        assert_eq!(p.poll().await.unwrap().height, 3);
        // Second poll gets the full budget again.
        assert_eq!(p.poll().await.unwrap().height, 4);
        assert_eq!(api.calls(), 6);
    }
}
