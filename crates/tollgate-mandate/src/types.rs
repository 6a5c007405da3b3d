// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types for both mandate kinds.
//!
//! Hashed fields are kept in their raw string form: the signer built the
//! canonical preimage from the exact values it sent, so re-rendering them
//! through typed representations would break signature recovery.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Kind A: a per-day budget bound to an allowlist of tools.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundedMandate {
    /// Caller-chosen stable identifier; keys the daily ledger.
    pub mandate_id: String,
    /// Address of the owner wallet that signed the mandate.
    pub owner_pubkey: String,
    /// Expiry instant, RFC 3339.
    pub expires_at: String,
    /// Daily spend ceiling in USDC.
    pub max_spend_usdc_per_day: String,
    /// Tools this mandate may call; `"*"` is the reserved wildcard.
    pub allowlisted_tool_ids: Vec<String>,
    /// Prices above this require out-of-band confirmation.
    #[serde(default)]
    pub require_confirm_over: Option<String>,
    /// personal-sign signature by `owner_pubkey` over the canonical hash.
    pub signature: String,
}

impl BoundedMandate {
    /// Parsed expiry, when it parses.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Parsed daily ceiling.
    pub fn max_spend(&self) -> Option<Decimal> {
        Decimal::from_str(self.max_spend_usdc_per_day.trim()).ok()
    }

    /// Parsed confirmation threshold, when present.
    pub fn confirm_over(&self) -> Option<Decimal> {
        self.require_confirm_over
            .as_deref()
            .and_then(|raw| Decimal::from_str(raw.trim()).ok())
    }
}

/// Budget block of an intent mandate.
#[derive(Debug, Clone, Deserialize)]
pub struct MandateBudget {
    /// Lifetime ceiling.
    pub amount: Value,
    /// Currency tag; USD and USDC are treated as equivalent.
    #[serde(default)]
    pub currency: Option<String>,
}

impl MandateBudget {
    /// Budget amount as a decimal, accepting both JSON numbers and strings.
    pub fn amount_decimal(&self) -> Option<Decimal> {
        decimal_from_value(&self.amount)
    }
}

/// Typed view of an intent mandate's `contents`.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentContents {
    /// What the user asked the agent to do.
    pub natural_language_description: String,
    /// Lifetime budget.
    pub budget: MandateBudget,
    /// Merchants the agent may pay; `"*"` is the reserved wildcard.
    pub merchants: Vec<String>,
    /// Expiry instant, RFC 3339.
    pub intent_expiry: String,
    /// Whether the user demanded refundable payments.
    #[serde(default)]
    pub requires_refundability: bool,
    /// Free-form constraints.
    #[serde(default)]
    pub constraints: Option<Value>,
}

impl IntentContents {
    /// Parsed expiry, when it parses.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.intent_expiry)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Kind B: a lifetime budget bound to an allowlist of merchants.
#[derive(Debug, Clone, Deserialize)]
pub struct IntentMandate {
    /// Always `"IntentMandate"`.
    #[serde(rename = "type")]
    pub mandate_type: String,
    /// Signed payload, kept raw for canonical hashing.
    pub contents: Value,
    /// personal-sign signature by `signer_address` over the contents hash.
    pub user_signature: String,
    /// Client-reported issuance time; informational.
    #[serde(default)]
    pub timestamp: Option<Value>,
    /// Address that signed `contents`.
    pub signer_address: String,
}

impl IntentMandate {
    /// Typed view of `contents`.
    pub fn parsed_contents(&self) -> Result<IntentContents, serde_json::Error> {
        serde_json::from_value(self.contents.clone())
    }
}

/// A decoded mandate of either kind.
#[derive(Debug, Clone)]
pub enum Mandate {
    /// Kind A.
    Bounded(BoundedMandate),
    /// Kind B.
    Intent(IntentMandate),
}

impl Mandate {
    /// Decode a raw `X-Mandate` header: base64 of a JSON object.
    ///
    /// Shape dispatch: `type == "IntentMandate"` selects kind B even when
    /// kind-A fields are also present; anything else is kind A.
    pub fn decode(raw_header: &str) -> Result<Self, String> {
        let bytes = BASE64
            .decode(raw_header.trim())
            .map_err(|e| format!("invalid base64: {e}"))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| format!("invalid json: {e}"))?;

        let is_intent = value
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t == "IntentMandate")
            .unwrap_or(false);

        if is_intent {
            serde_json::from_value(value)
                .map(Mandate::Intent)
                .map_err(|e| format!("invalid intent mandate: {e}"))
        } else {
            serde_json::from_value(value)
                .map(Mandate::Bounded)
                .map_err(|e| format!("invalid bounded mandate: {e}"))
        }
    }
}

/// Parse a decimal out of a JSON number or string.
pub(crate) fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
