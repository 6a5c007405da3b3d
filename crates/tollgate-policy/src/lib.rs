// SPDX-License-Identifier: MIT OR Apache-2.0
//! tollgate-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The agent-policy stage: a wallet blacklist plus an optional on-chain
//! reputation check. Both are advisory identity filters that run after
//! payment and before the proxy.

/// Reputation oracle seam, JSON-RPC client, and the 60-second cache.
pub mod reputation;

pub use reputation::{OracleError, ReputationCache, ReputationOracle, RpcReputationOracle};

use dashmap::DashSet;
use std::sync::Arc;
use tracing::debug;

/// Concurrent set of blocked wallet addresses, stored lowercased.
#[derive(Debug, Default)]
pub struct Blacklist {
    addresses: DashSet<String>,
}

impl Blacklist {
    /// Empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address. Returns false when it was already present.
    pub fn add(&self, address: &str) -> bool {
        self.addresses.insert(normalize(address))
    }

    /// Remove an address. Returns false when it was not present.
    pub fn remove(&self, address: &str) -> bool {
        self.addresses.remove(&normalize(address)).is_some()
    }

    /// Membership check, case-insensitive.
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(&normalize(address))
    }

    /// Snapshot of all blocked addresses.
    pub fn list(&self) -> Vec<String> {
        let mut out: Vec<String> = self.addresses.iter().map(|a| a.clone()).collect();
        out.sort();
        out
    }

    /// Number of blocked addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True when nothing is blocked.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// What the policy stage decided for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Neither check objected.
    Allow,
    /// The wallet address is blacklisted.
    Blocked,
    /// The reputation oracle reported a score below the minimum.
    LowReputation {
        /// Review count reported by the oracle.
        count: u64,
        /// Score reported by the oracle.
        score: i64,
    },
}

/// The agent-policy stage: blacklist plus optional reputation oracle.
pub struct AgentPolicy {
    blacklist: Arc<Blacklist>,
    oracle: Option<Arc<dyn ReputationOracle>>,
    cache: ReputationCache,
    min_score: i64,
}

impl AgentPolicy {
    /// Build the stage. `oracle` is `None` when reputation checking is
    /// not configured.
    pub fn new(
        blacklist: Arc<Blacklist>,
        oracle: Option<Arc<dyn ReputationOracle>>,
        min_score: i64,
    ) -> Self {
        Self {
            blacklist,
            oracle,
            cache: ReputationCache::default(),
            min_score,
        }
    }

    /// The shared blacklist (admin CRUD).
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Query the oracle directly, bypassing the deny logic (admin
    /// introspection). Served from the cache when fresh.
    pub async fn reputation_of(&self, agent_id: u64) -> Option<(u64, i64)> {
        let oracle = self.oracle.as_ref()?;
        self.cache.get_or_fetch(agent_id, oracle.as_ref()).await
    }

    /// Run the stage. Missing headers skip the corresponding check.
    pub async fn check(
        &self,
        agent_address: Option<&str>,
        agent_id: Option<&str>,
    ) -> PolicyDecision {
        if let Some(address) = agent_address {
            if self.blacklist.contains(address) {
                return PolicyDecision::Blocked;
            }
        }

        let (Some(oracle), Some(raw_id)) = (&self.oracle, agent_id) else {
            return PolicyDecision::Allow;
        };

        let Ok(agent_id) = raw_id.trim().parse::<u64>() else {
            debug!(agent_id = raw_id, "unparsable X-Agent-Id, skipping reputation");
            return PolicyDecision::Allow;
        };

        match self.cache.get_or_fetch(agent_id, oracle.as_ref()).await {
            Some((count, score)) if count > 0 && score < self.min_score => {
                PolicyDecision::LowReputation { count, score }
            }
            // Unreviewed agents and oracle failures pass; the oracle is
            // advisory, not load-bearing.
            _ => PolicyDecision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedOracle(u64, i64);

    #[async_trait]
    impl ReputationOracle for FixedOracle {
        async fn reputation(&self, _agent_id: u64) -> Result<(u64, i64), OracleError> {
            Ok((self.0, self.1))
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl ReputationOracle for FailingOracle {
        async fn reputation(&self, _agent_id: u64) -> Result<(u64, i64), OracleError> {
            Err(OracleError::Decode("boom".into()))
        }
    }

    #[test]
    fn blacklist_is_case_insensitive() {
        let bl = Blacklist::new();
        assert!(bl.add("0xAbCd000000000000000000000000000000000001"));
        assert!(!bl.add("0xabcd000000000000000000000000000000000001"));
        assert!(bl.contains("0xABCD000000000000000000000000000000000001"));
        assert_eq!(bl.len(), 1);
        assert!(bl.remove("0xabcd000000000000000000000000000000000001"));
        assert!(bl.is_empty());
    }

    #[tokio::test]
    async fn blocked_wallet_denies() {
        let bl = Arc::new(Blacklist::new());
        bl.add("0xbad0000000000000000000000000000000000001");
        let policy = AgentPolicy::new(bl, None, 0);

        let decision = policy
            .check(Some("0xBAD0000000000000000000000000000000000001"), None)
            .await;
        assert_eq!(decision, PolicyDecision::Blocked);
    }

    #[tokio::test]
    async fn missing_headers_skip_both_checks() {
        let policy = AgentPolicy::new(
            Arc::new(Blacklist::new()),
            Some(Arc::new(FixedOracle(5, -10))),
            0,
        );
        assert_eq!(policy.check(None, None).await, PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn low_score_with_reviews_denies() {
        let policy = AgentPolicy::new(
            Arc::new(Blacklist::new()),
            Some(Arc::new(FixedOracle(3, 12))),
            40,
        );
        assert_eq!(
            policy.check(None, Some("7")).await,
            PolicyDecision::LowReputation { count: 3, score: 12 }
        );
    }

    #[tokio::test]
    async fn unreviewed_agents_pass() {
        let policy = AgentPolicy::new(
            Arc::new(Blacklist::new()),
            Some(Arc::new(FixedOracle(0, 0))),
            40,
        );
        assert_eq!(policy.check(None, Some("7")).await, PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn oracle_failures_and_bad_ids_pass() {
        let policy = AgentPolicy::new(
            Arc::new(Blacklist::new()),
            Some(Arc::new(FailingOracle)),
            40,
        );
        assert_eq!(policy.check(None, Some("7")).await, PolicyDecision::Allow);
        assert_eq!(
            policy.check(None, Some("not-a-number")).await,
            PolicyDecision::Allow
        );
    }
}
