pub mod api_info;
pub mod lotus;

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Ordered set of block CIDs identifying a tipset.
///
/// This is the opaque head identifier: two heads are the same head iff their
/// keys match, regardless of height or when they were observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TipSetKey(Vec<String>);

impl TipSetKey {
    pub fn new(cids: Vec<String>) -> Self {
        Self(cids)
    }

    pub fn cids(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for TipSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.join(","))
    }
}

/// A single observation of the node's chain head.
#[derive(Debug, Clone)]
pub struct ChainHead {
    pub key: TipSetKey,
    /// Epoch of the tipset. Informational only.
    pub height: u64,
    /// Minimum block timestamp in the tipset (unix seconds).
    pub timestamp: u64,
    /// When this watchdog saw the head.
    pub observed_at: DateTime<Utc>,
}

impl ChainHead {
    /// Seconds between the tipset's timestamp and `now`, zero if the tipset is in the future.
    pub fn lag_secs(&self, now: DateTime<Utc>) -> u64 {
        let now = now.timestamp().max(0) as u64;
        now.saturating_sub(self.timestamp)
    }
}

impl PartialEq for ChainHead {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ChainHead {}

/// Errors from a single chain API request.
#[derive(Debug, Clone)]
pub enum ChainError {
    /// The request did not complete within its deadline.
    Timeout(Duration),
    /// Connection refused, reset, DNS failure, non-2xx status and the like.
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The node answered with something that is not a chain head.
    Decode(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Timeout(after) => {
                write!(f, "chain API request timed out after {}ms", after.as_millis())
            }
            ChainError::Transport(msg) => write!(f, "chain API transport error: {msg}"),
            ChainError::Rpc { code, message } => {
                write!(f, "chain API returned error {code}: {message}")
            }
            ChainError::Decode(msg) => write!(f, "malformed chain head response: {msg}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Supplies the node's current chain head.
pub trait ChainApi: Send + Sync {
    /// Fetch the current head. Implementations must give up after `timeout`.
    fn get_head(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<ChainHead, ChainError>> + Send;
}
