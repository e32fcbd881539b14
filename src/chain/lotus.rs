//! HTTP JSON-RPC client for a Lotus full node.
use super::api_info::ApiInfo;
use super::{ChainApi, ChainError, ChainHead, TipSetKey};
use chrono::Utc;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const CHAIN_HEAD_METHOD: &str = "Filecoin.ChainHead";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TipSetJson {
    cids: Vec<CidJson>,
    #[serde(default)]
    blocks: Vec<BlockHeaderJson>,
    height: u64,
}

#[derive(Debug, Deserialize)]
struct CidJson {
    #[serde(rename = "/")]
    cid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockHeaderJson {
    timestamp: u64,
}

impl TipSetJson {
    fn into_head(self) -> Result<ChainHead, ChainError> {
        if self.cids.is_empty() {
            return Err(ChainError::Decode("tipset has no cids".to_string()));
        }
        let timestamp = self.blocks.iter().map(|b| b.timestamp).min().unwrap_or(0);
        Ok(ChainHead {
            key: TipSetKey::new(self.cids.into_iter().map(|c| c.cid).collect()),
            height: self.height,
            timestamp,
            observed_at: Utc::now(),
        })
    }
}

/// `ChainApi` backed by a node's `/rpc/v0` endpoint.
pub struct LotusClient {
    http: reqwest::Client,
    info: ApiInfo,
    next_id: AtomicU64,
}

impl LotusClient {
    pub fn new(info: ApiInfo) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChainError::Transport(format!("http client error: {e}")))?;
        Ok(Self {
            http,
            info,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.info.url
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": [],
            "id": id,
        });

        let mut req = self.http.post(&self.info.url).timeout(timeout).json(&body);
        if let Some(token) = &self.info.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| classify(e, timeout))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("{method} returned HTTP {status}")));
        }

        let parsed: RpcResponse<T> = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ChainError::Timeout(timeout)
            } else {
                ChainError::Decode(e.to_string())
            }
        })?;

        match (parsed.result, parsed.error) {
            (_, Some(err)) => Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(ChainError::Decode(format!("{method}: empty result"))),
        }
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout(timeout)
    } else {
        ChainError::Transport(e.to_string())
    }
}

impl ChainApi for LotusClient {
    async fn get_head(&self, timeout: Duration) -> Result<ChainHead, ChainError> {
        let tipset: TipSetJson = self.call(CHAIN_HEAD_METHOD, timeout).await?;
        tipset.into_head()
    }
}
