// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway configuration resolved from the process environment.

use alloy_primitives::Address;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Default gateway listen port.
pub const DEFAULT_PORT: u16 = 4402;
/// Default replay-suppression TTL in milliseconds.
pub const DEFAULT_REPLAY_TTL_MS: u64 = 300_000;
/// Default per-IP rate limit, requests per minute.
pub const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 100;
/// Default cap on proxied request bodies, bytes.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;
/// Default per-request deadline for outbound calls, seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors produced while resolving or validating the configuration.
/// Any of these fails startup with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    /// A variable is present but unparsable.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Human-readable parse failure.
        reason: String,
    },
}

/// Target settlement network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum BaseNetwork {
    /// Base mainnet (shorthand).
    Base,
    /// Base mainnet (explicit).
    BaseMainnet,
    /// Base Sepolia testnet.
    BaseSepolia,
}

impl BaseNetwork {
    /// CAIP-2 chain identifier recorded in receipts.
    pub fn caip2(self) -> &'static str {
        match self {
            BaseNetwork::Base | BaseNetwork::BaseMainnet => "eip155:8453",
            BaseNetwork::BaseSepolia => "eip155:84532",
        }
    }

    /// Network tag used on the x402 wire (`network` field).
    pub fn wire_tag(self) -> &'static str {
        match self {
            BaseNetwork::Base | BaseNetwork::BaseMainnet => "base",
            BaseNetwork::BaseSepolia => "base-sepolia",
        }
    }
}

impl FromStr for BaseNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" => Ok(BaseNetwork::Base),
            "base-mainnet" => Ok(BaseNetwork::BaseMainnet),
            "base-sepolia" => Ok(BaseNetwork::BaseSepolia),
            other => Err(format!(
                "unknown network {other:?}, expected base | base-mainnet | base-sepolia"
            )),
        }
    }
}

/// Reputation oracle settings; present only when all three variables are set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReputationConfig {
    /// JSON-RPC endpoint of the chain the oracle lives on.
    pub rpc_url: String,
    /// Oracle contract address.
    pub contract: String,
    /// Minimum acceptable score for agents with at least one review.
    pub min_score: i64,
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GatewayConfig {
    /// Listen port.
    pub port: u16,

    /// Payment facilitator base URL; paid routes degrade to pass-through
    /// when absent or unreachable.
    #[schemars(with = "Option<String>")]
    pub facilitator_url: Option<Url>,

    /// On-chain recipient of captured payments. Required.
    pub pay_to_address: String,

    /// Settlement network.
    pub network: BaseNetwork,

    /// Routes file loaded at startup and rewritten on admin mutations.
    pub routes_file: Option<PathBuf>,

    /// Bearer key for the admin surface; admin is disabled entirely when
    /// absent.
    pub admin_key: Option<String>,

    /// Replay-suppression TTL, milliseconds.
    pub replay_ttl_ms: u64,

    /// Per-IP rate limit, requests per minute.
    pub rate_limit_per_min: u32,

    /// Bypass the upstream-402 probe on route creation (test deployments).
    pub skip_x402_probe: bool,

    /// Reputation oracle settings, when enabled.
    pub reputation: Option<ReputationConfig>,

    /// Authoritative merchant name for intent-mandate checks; falls back
    /// to the request `Host` header when absent.
    pub gateway_domain: Option<String>,

    /// Cap on proxied request bodies, bytes.
    pub body_limit_bytes: usize,

    /// Per-request deadline for outbound calls, seconds.
    pub request_timeout_secs: u64,
}

impl GatewayConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Resolve configuration from an arbitrary variable lookup (tests).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pay_to_address = lookup("PAY_TO_ADDRESS")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingRequired("PAY_TO_ADDRESS"))?;
        Address::from_str(pay_to_address.trim()).map_err(|e| ConfigError::InvalidValue {
            var: "PAY_TO_ADDRESS",
            reason: e.to_string(),
        })?;

        let port = parse_var(&lookup, "PORT", DEFAULT_PORT)?;
        let replay_ttl_ms = parse_var(&lookup, "REPLAY_TTL_MS", DEFAULT_REPLAY_TTL_MS)?;
        let rate_limit_per_min =
            parse_var(&lookup, "RATE_LIMIT_PER_MIN", DEFAULT_RATE_LIMIT_PER_MIN)?;

        let facilitator_url = match lookup("FACILITATOR_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                var: "FACILITATOR_URL",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let network = match lookup("BASE_NETWORK") {
            Some(raw) => raw
                .parse::<BaseNetwork>()
                .map_err(|reason| ConfigError::InvalidValue {
                    var: "BASE_NETWORK",
                    reason,
                })?,
            None => BaseNetwork::Base,
        };

        let reputation = match (
            lookup("REPUTATION_RPC_URL"),
            lookup("REPUTATION_CONTRACT"),
        ) {
            (Some(rpc_url), Some(contract)) => Some(ReputationConfig {
                rpc_url,
                contract,
                min_score: parse_var(&lookup, "REPUTATION_MIN_SCORE", 0i64)?,
            }),
            _ => None,
        };

        Ok(Self {
            port,
            facilitator_url,
            pay_to_address: pay_to_address.trim().to_string(),
            network,
            routes_file: lookup("ROUTES_FILE").map(PathBuf::from),
            admin_key: lookup("ADMIN_KEY").filter(|v| !v.trim().is_empty()),
            replay_ttl_ms,
            rate_limit_per_min,
            skip_x402_probe: flag(&lookup, "SKIP_X402_PROBE"),
            reputation,
            gateway_domain: lookup("GATEWAY_DOMAIN").filter(|v| !v.trim().is_empty()),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        })
    }

    /// Configuration view for admin introspection: the pay-to address is
    /// masked to its first/last 4 characters and the admin key is never
    /// echoed.
    pub fn masked(&self) -> serde_json::Value {
        serde_json::json!({
            "port": self.port,
            "facilitator_url": self.facilitator_url.as_ref().map(Url::as_str),
            "pay_to_address": mask_middle(&self.pay_to_address),
            "network": self.network,
            "chain": self.network.caip2(),
            "routes_file": self.routes_file.as_ref().map(|p| p.display().to_string()),
            "admin_enabled": self.admin_key.is_some(),
            "replay_ttl_ms": self.replay_ttl_ms,
            "rate_limit_per_min": self.rate_limit_per_min,
            "skip_x402_probe": self.skip_x402_probe,
            "reputation_enabled": self.reputation.is_some(),
            "gateway_domain": self.gateway_domain,
            "body_limit_bytes": self.body_limit_bytes,
            "request_timeout_secs": self.request_timeout_secs,
        })
    }
}

fn mask_middle(s: &str) -> String {
    if s.len() <= 8 {
        return "****".to_string();
    }
    format!("{}...{}", &s[..4], &s[s.len() - 4..])
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                var,
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> bool {
    lookup(var)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
