use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget for a single logical request.
///
/// Up to `max_retries + 1` attempts, each bounded by `attempt_timeout`.
/// Holds no state between calls: every call to [`attempt_with_timeout`]
/// starts from attempt 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptBudget {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    /// Constant pause between a failed attempt and the next one.
    pub backoff: Duration,
}

impl AttemptBudget {
    pub fn new(max_retries: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            attempt_timeout,
            backoff: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Total attempts allowed (1-based).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
pub enum AttemptFailure<E> {
    /// The attempt did not finish before `attempt_timeout`.
    TimedOut,
    /// The operation itself returned an error.
    Failed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::TimedOut => write!(f, "attempt timed out"),
            AttemptFailure::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Every attempt in the budget failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: AttemptFailure<E>,
}

impl<E: std::fmt::Display> std::fmt::Display for Exhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for Exhausted<E> {}

/// Run `op` until it succeeds or the budget is spent.
///
/// `op` receives the 1-based attempt number. A slow attempt is abandoned
/// at the deadline and counts as a failure like any other.
pub async fn attempt_with_timeout<T, E, F, Fut>(
    budget: AttemptBudget,
    mut op: F,
) -> Result<T, Exhausted<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = budget.max_attempts();
    let mut attempt = 1;

    loop {
        let failure = match tokio::time::timeout(budget.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => AttemptFailure::Failed(e),
            Err(_) => AttemptFailure::TimedOut,
        };

        debug!(attempt, max_attempts, error = %failure, "attempt failed");

        if attempt >= max_attempts {
            return Err(Exhausted {
                attempts: attempt,
                last: failure,
            });
        }

        attempt += 1;
        if !budget.backoff.is_zero() {
            tokio::time::sleep(budget.backoff).await;
        }
    }
}
