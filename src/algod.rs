//! algod REST client: the upstream collaborator every fetcher talks to.
//!
//! Ported from `internal/algod/algod.go`'s client construction (a pooled,
//! builder-assembled `reqwest::Client`) and narrowed to the three algod
//! calls the pipeline needs — status, status-after-block, and
//! block-by-round — matching `go-algorand-sdk`'s `client/v2/algod` REST
//! surface and `internal/algod/algod.go`'s use of it. Every call here is a
//! single attempt; retrying belongs to the caller, via
//! [`crate::retry::retry_forever`].

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{AlgodError, DecodeError};

pub type NodeId = String;

/// One configured upstream node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub address: String,
    pub token: String,
}

/// The algod `/v2/status` and `/v2/status/wait-for-block-after/{round}`
/// response shape, narrowed to the fields the pipeline uses.
#[derive(Debug, Clone, Deserialize)]
pub struct AlgodStatus {
    #[serde(rename = "last-round")]
    pub last_round: u64,
    #[serde(rename = "time-since-last-round", default)]
    pub time_since_last_round_ns: i64,
    /// `<round>#<hash>` form, present once the node has made one catchpoint
    /// since starting up; matches `go-algorand-sdk`'s
    /// `NodeStatusResponse.LastCatchpoint`.
    #[serde(rename = "last-catchpoint", default)]
    pub last_catchpoint: Option<String>,
}

impl AlgodStatus {
    pub fn lag_ms(&self) -> i64 {
        self.time_since_last_round_ns / 1_000_000
    }
}

#[derive(Clone)]
pub struct AlgodClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl AlgodClient {
    pub fn new(node: &NodeConfig) -> Result<Self, AlgodError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            base_url: node.address.trim_end_matches('/').to_string(),
            token: node.token.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .header("X-Algo-API-Token", &self.token)
    }

    /// `GET /v2/status` — the node's current tip and lag since it landed.
    pub async fn status(&self) -> Result<AlgodStatus, AlgodError> {
        let resp = self.get("/v2/status").send().await?;
        decode_json(resp).await
    }

    /// `GET /v2/status/wait-for-block-after/{round}` — blocks on the node
    /// side until a round greater than `round` is produced.
    pub async fn status_after_block(&self, round: u64) -> Result<AlgodStatus, AlgodError> {
        let path = format!("/v2/status/wait-for-block-after/{round}");
        let resp = self.get(&path).send().await?;
        decode_json(resp).await
    }

    /// `GET /v2/blocks/{round}?format=msgpack` — the raw block wire bytes,
    /// byte-faithful for republishing.
    pub async fn block(&self, round: u64) -> Result<Bytes, AlgodError> {
        let path = format!("/v2/blocks/{round}?format=msgpack");
        let resp = self
            .get(&path)
            .header("Accept", "application/msgpack")
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, AlgodError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        Err(AlgodError::Status { status, message })
    }
}

async fn decode_json<T>(resp: reqwest::Response) -> Result<T, AlgodError>
where
    T: for<'de> Deserialize<'de>,
{
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| AlgodError::Decode(DecodeError::Json(e)))
}
