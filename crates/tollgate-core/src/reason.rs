// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reason-code taxonomy shared by every pipeline stage.
//!
//! A receipt's `reason_code` always identifies the *first* stage that
//! failed the request; `OK` means every stage passed.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable verdict of a single admission stage or of the whole
/// pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Every stage passed.
    Ok,
    /// No route matched the method + path.
    RouteNotFound,
    /// The per-IP rate limit was exceeded before route matching.
    RateLimited,
    /// The idempotency fingerprint was already seen within the TTL window.
    ReplayDetected,
    /// The mandate signature did not recover to the declared signer.
    InvalidSignature,
    /// The mandate (either kind) is past its expiry.
    MandateExpired,
    /// The matched tool is not on the bounded mandate's allowlist.
    EndpointNotAllowlisted,
    /// The bounded mandate's daily budget would be exceeded.
    MandateBudgetExceeded,
    /// The price is above the bounded mandate's confirmation threshold.
    MandateConfirmRequired,
    /// The intent mandate's lifetime budget would be exceeded.
    IntentBudgetExceeded,
    /// The gateway domain is not on the intent mandate's merchant list.
    MerchantNotMatched,
    /// Payment was absent or failed facilitator verification.
    InvalidPayment,
    /// The agent wallet address is blacklisted.
    AgentBlocked,
    /// The reputation oracle reported a score below the configured minimum.
    ReputationTooLow,
    /// The backend URL resolves to a private or reserved host.
    SsrfBlocked,
    /// The upstream already speaks 402 itself; proxying would double-charge.
    X402UpstreamBlocked,
    /// The upstream failed after admission; nothing was charged.
    UpstreamErrorNoCharge,
}

impl ReasonCode {
    /// True for the one code that accompanies a successful outcome.
    pub fn is_ok(self) -> bool {
        self == ReasonCode::Ok
    }

    /// Stable wire form (the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ReasonCode::RateLimited => "RATE_LIMITED",
            ReasonCode::ReplayDetected => "REPLAY_DETECTED",
            ReasonCode::InvalidSignature => "INVALID_SIGNATURE",
            ReasonCode::MandateExpired => "MANDATE_EXPIRED",
            ReasonCode::EndpointNotAllowlisted => "ENDPOINT_NOT_ALLOWLISTED",
            ReasonCode::MandateBudgetExceeded => "MANDATE_BUDGET_EXCEEDED",
            ReasonCode::MandateConfirmRequired => "MANDATE_CONFIRM_REQUIRED",
            ReasonCode::IntentBudgetExceeded => "INTENT_BUDGET_EXCEEDED",
            ReasonCode::MerchantNotMatched => "MERCHANT_NOT_MATCHED",
            ReasonCode::InvalidPayment => "INVALID_PAYMENT",
            ReasonCode::AgentBlocked => "AGENT_BLOCKED",
            ReasonCode::ReputationTooLow => "REPUTATION_TOO_LOW",
            ReasonCode::SsrfBlocked => "SSRF_BLOCKED",
            ReasonCode::X402UpstreamBlocked => "X402_UPSTREAM_BLOCKED",
            ReasonCode::UpstreamErrorNoCharge => "UPSTREAM_ERROR_NO_CHARGE",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The request was admitted, proxied, and delivered.
    Success,
    /// An admission stage rejected the request.
    Denied,
    /// The upstream (or the gateway itself) failed after admission.
    Error,
    /// A previously captured payment was returned.
    Refunded,
}

/// Verdict of the mandate stage, recorded in the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MandateVerdict {
    /// A mandate was presented and passed every check.
    Approved,
    /// A mandate was presented and failed a check.
    Denied,
    /// No mandate header was presented.
    Skipped,
}
