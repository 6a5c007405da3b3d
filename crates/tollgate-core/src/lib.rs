// SPDX-License-Identifier: MIT OR Apache-2.0
//! tollgate-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Tollgate gateway.
//!
//! Every other crate in the workspace depends on the types here: the
//! receipt model, the reason-code taxonomy, route rules, the canonical
//! request fingerprint, and the injected clock.

/// Injected clock so expiry and daily-rollover logic is deterministic in tests.
pub mod clock;
/// Gateway configuration resolved from the process environment.
pub mod config;
/// Canonical request fingerprinting and deterministic JSON serialization.
pub mod fingerprint;
/// Reason-code taxonomy shared by every pipeline stage.
pub mod reason;
/// Route rules and their validation.
pub mod route;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BaseNetwork, ConfigError, GatewayConfig, ReputationConfig};
pub use fingerprint::{canonical_json, keccak_hex, request_fingerprint, FingerprintInput};
pub use reason::{MandateVerdict, Outcome, ReasonCode};
pub use route::{parse_price, ProviderBinding, RouteAuth, RouteError, RouteRule};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Settlement currency recorded in every receipt.
pub const CURRENCY: &str = "USDC";

/// The structured record produced for every request that reaches the
/// dispatch pipeline, admitted or not.
///
/// Invariants:
/// - `outcome == Success` implies `reason_code == Ok`, `response_hash` and
///   `latency_ms` present, and `price_usdc` equal to the matched route's
///   price at dispatch time.
/// - `outcome == Denied` always carries a non-OK `reason_code`.
/// - Receipts are append-only within a process.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Receipt {
    /// Unique identifier of the request, also exposed as `X-Request-Id`.
    pub request_id: Uuid,

    /// Stable tool identifier of the matched route. Empty when the request
    /// never matched a route (rate limit, unknown path).
    #[serde(default)]
    pub tool_id: String,

    /// Provider identifier of the matched route.
    #[serde(default)]
    pub provider_id: String,

    /// The inbound path as matched, parameter values included.
    #[serde(default)]
    pub endpoint: String,

    /// Uppercased HTTP method.
    pub method: String,

    /// UTC timestamp at receipt emission (ISO-8601).
    pub timestamp: DateTime<Utc>,

    /// Price captured for this call. `0.00` when nothing was charged.
    #[schemars(with = "String")]
    pub price_usdc: Decimal,

    /// Always [`CURRENCY`].
    pub currency: String,

    /// CAIP-2 network tag, e.g. `eip155:8453`.
    pub chain: String,

    /// Identifier of the mandate presented with the request, if any.
    pub mandate_id: Option<String>,

    /// Canonical hash of the mandate presented with the request, if any.
    pub mandate_hash: Option<String>,

    /// Verdict of the mandate stage.
    pub mandate_verdict: MandateVerdict,

    /// First failing stage, or `OK`.
    pub reason_code: ReasonCode,

    /// On-chain transaction hash reported by the facilitator settlement.
    pub payment_tx_hash: Option<String>,

    /// Facilitator-side receipt identifier, when the facilitator issues one.
    pub facilitator_receipt_id: Option<String>,

    /// Canonical fingerprint of the inbound request.
    pub request_hash: String,

    /// keccak256 of the materialised upstream response body.
    pub response_hash: Option<String>,

    /// Wall-clock latency of the full pipeline, milliseconds.
    pub latency_ms: Option<u64>,

    /// Terminal outcome of the request.
    pub outcome: Outcome,

    /// Human-readable account of what happened.
    pub explanation: String,

    /// keccak256 over the canonical JSON form of this receipt with this
    /// field nulled. Filled in by the receipt engine at emission.
    pub receipt_hash: Option<String>,
}

impl Receipt {
    /// True when this receipt describes an admitted, delivered request.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
