// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types shared with the facilitator, camelCase on the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version stamped on facilitator requests.
pub const X402_VERSION: u8 = 1;

/// The payment-requirements object: what a 402 challenge asks the agent
/// to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Facilitator scheme identifier, e.g. `exact`.
    pub scheme: String,

    /// Network tag, e.g. `base` or `base-sepolia`.
    pub network: String,

    /// Price of the call.
    #[serde(with = "rust_decimal::serde::str")]
    pub max_amount_required: Decimal,

    /// On-chain recipient.
    pub pay_to: String,

    /// The protected resource (the matched gateway path).
    pub resource: String,

    /// Human description of what is being bought.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Settlement deadline hint, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timeout_seconds: Option<u64>,
}

impl PaymentRequirements {
    /// Base64 form carried in the `payment-required` response header.
    pub fn to_header_value(&self) -> String {
        BASE64.encode(serde_json::to_vec(self).unwrap_or_default())
    }
}

/// Request body for facilitator `POST /verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Protocol version.
    pub x402_version: u8,
    /// The decoded `X-Payment` header payload, passed through opaquely.
    pub payment_payload: Value,
    /// The requirements the payload must satisfy.
    pub payment_requirements: PaymentRequirements,
}

/// Facilitator verdict on a payment payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payload satisfies the requirements.
    pub is_valid: bool,
    /// Machine-readable failure reason, when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// Paying wallet address, when the facilitator reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Request body for facilitator `POST /settle`; same shape as
/// verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Protocol version.
    pub x402_version: u8,
    /// The payload that already passed verification.
    pub payment_payload: Value,
    /// The requirements that were verified.
    pub payment_requirements: PaymentRequirements,
}

/// Result of on-chain settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether funds were captured.
    pub success: bool,
    /// Machine-readable failure reason, when unsuccessful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Settlement transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Network the settlement landed on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Paying wallet address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    /// Facilitator-side receipt identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
}

/// Decode the base64 JSON `X-Payment` header.
pub fn decode_payment_header(raw: &str) -> Result<Value, String> {
    let bytes = BASE64
        .decode(raw.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid json: {e}"))
}
