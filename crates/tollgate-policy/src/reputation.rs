// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reputation oracle seam: an on-chain contract returning
//! `(count, score)` for an agent identifier, read over raw JSON-RPC
//! `eth_call`, with results cached per agent for about a minute.

use alloy_primitives::{hex, keccak256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

/// Failures reading the oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Transport-level failure.
    #[error("oracle transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The RPC answered but the payload was not decodable.
    #[error("oracle decode: {0}")]
    Decode(String),
}

/// Read access to an agent-reputation source.
#[async_trait]
pub trait ReputationOracle: Send + Sync {
    /// `(review_count, score)` for the agent.
    async fn reputation(&self, agent_id: u64) -> Result<(u64, i64), OracleError>;
}

/// JSON-RPC `eth_call` oracle client.
///
/// Calls `getReputation(uint256)` on the configured contract and decodes
/// the two-word `(uint256 count, int256 score)` return.
pub struct RpcReputationOracle {
    client: reqwest::Client,
    rpc_url: String,
    contract: String,
    selector: [u8; 4],
}

impl RpcReputationOracle {
    /// Build a client with a per-call deadline.
    pub fn new(
        rpc_url: impl Into<String>,
        contract: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let digest = keccak256(b"getReputation(uint256)");
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&digest[..4]);
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            contract: contract.into(),
            selector,
        })
    }

    fn calldata(&self, agent_id: u64) -> String {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&self.selector);
        data.extend_from_slice(&U256::from(agent_id).to_be_bytes::<32>());
        format!("0x{}", hex::encode(data))
    }
}

#[async_trait]
impl ReputationOracle for RpcReputationOracle {
    async fn reputation(&self, agent_id: u64) -> Result<(u64, i64), OracleError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.contract, "data": self.calldata(agent_id) },
                "latest"
            ],
        });

        let resp: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let result = resp
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::Decode(format!("no result field: {resp}")))?;

        decode_reputation(result)
    }
}

/// Decode a two-word `eth_call` return into `(count, score)`.
fn decode_reputation(result: &str) -> Result<(u64, i64), OracleError> {
    let raw = hex::decode(result.trim_start_matches("0x"))
        .map_err(|e| OracleError::Decode(e.to_string()))?;
    if raw.len() < 64 {
        return Err(OracleError::Decode(format!(
            "expected 64 return bytes, got {}",
            raw.len()
        )));
    }

    let count = U256::from_be_slice(&raw[..32]);
    let score = U256::from_be_slice(&raw[32..64]);

    let count = u64::try_from(count).map_err(|_| OracleError::Decode("count overflow".into()))?;
    // int256 two's complement: anything with the high bit set is negative.
    let score = if score.bit(255) {
        let neg = (!score).wrapping_add(U256::from(1u8));
        -(i64::try_from(neg).map_err(|_| OracleError::Decode("score overflow".into()))?)
    } else {
        i64::try_from(score).map_err(|_| OracleError::Decode("score overflow".into()))?
    };

    Ok((count, score))
}

const CACHE_TTL: Duration = Duration::from_secs(60);

/// Per-agent result cache with a ~60 s TTL.
#[derive(Debug, Default)]
pub struct ReputationCache {
    entries: DashMap<u64, (Instant, (u64, i64))>,
}

impl ReputationCache {
    /// Return the cached value when fresh, otherwise ask the oracle and
    /// cache what it said. Oracle failures yield `None` and are not
    /// cached.
    pub async fn get_or_fetch(
        &self,
        agent_id: u64,
        oracle: &dyn ReputationOracle,
    ) -> Option<(u64, i64)> {
        if let Some(entry) = self.entries.get(&agent_id) {
            let (at, value) = *entry;
            if at.elapsed() < CACHE_TTL {
                return Some(value);
            }
        }

        match oracle.reputation(agent_id).await {
            Ok(value) => {
                self.entries.insert(agent_id, (Instant::now(), value));
                Some(value)
            }
            Err(err) => {
                debug!(agent_id, error = %err, "reputation fetch failed");
                None
            }
        }
    }
}
