// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-request 402 state machine.
//!
//! `IDLE → CHALLENGED → VERIFIED → SETTLED → DONE`, plus terminal
//! `REJECTED`. State is per-response: a challenge is not remembered
//! across connections, the agent simply retries with a payment header.

use crate::facilitator::Facilitator;
use crate::types::{
    decode_payment_header, PaymentRequirements, SettleRequest, SettleResponse, VerifyRequest,
    X402_VERSION,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// States of the payment gate for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    /// No payment activity yet.
    Idle,
    /// A 402 challenge was issued.
    Challenged,
    /// The facilitator verified the payment payload.
    Verified,
    /// The facilitator captured the payment on-chain.
    Settled,
    /// The response went out; nothing more to do.
    Done,
    /// The payment payload was rejected.
    Rejected,
}

impl PaymentState {
    /// Returns the set of states that are valid successors of `self`.
    pub fn valid_transitions(&self) -> &'static [PaymentState] {
        match self {
            Self::Idle => &[Self::Challenged, Self::Verified, Self::Rejected, Self::Done],
            Self::Challenged => &[Self::Done],
            Self::Verified => &[Self::Settled, Self::Done],
            Self::Settled => &[Self::Done],
            Self::Done | Self::Rejected => &[],
        }
    }

    /// Returns `true` if transitioning from `self` to `next` is valid.
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Verification context attached to the request between `verify()` and
/// `settle()`.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    /// The decoded payment payload that passed verification.
    pub payload: Value,
    /// The requirements it was verified against.
    pub requirements: PaymentRequirements,
    /// Paying wallet, when the facilitator reported one.
    pub payer: Option<String>,
}

/// Verdict of the payment stage for one request.
#[derive(Debug)]
pub enum PaymentDecision {
    /// Free route; the stage does not apply.
    NotRequired,
    /// Paid route but the facilitator is down: pass through, record the
    /// configured price, no capture.
    PassThrough,
    /// No payment header; answer 402 with these requirements.
    Challenge(PaymentRequirements),
    /// Verified; carry this context to settlement.
    Verified(PaymentContext),
    /// Verification failed; answer 402.
    Rejected {
        /// Facilitator-reported or local failure reason.
        reason: String,
    },
}

/// The payment stage. One instance per gateway process.
#[derive(Clone)]
pub struct PaymentGate {
    facilitator: Option<Arc<dyn Facilitator>>,
    scheme: String,
    network: String,
    pay_to: String,
}

impl PaymentGate {
    /// Build the gate. `facilitator` is `None` when the configured
    /// facilitator was unreachable at startup (degraded pass-through) or
    /// no facilitator is configured at all.
    pub fn new(
        facilitator: Option<Arc<dyn Facilitator>>,
        scheme: impl Into<String>,
        network: impl Into<String>,
        pay_to: impl Into<String>,
    ) -> Self {
        Self {
            facilitator,
            scheme: scheme.into(),
            network: network.into(),
            pay_to: pay_to.into(),
        }
    }

    /// True when a facilitator is attached.
    pub fn is_active(&self) -> bool {
        self.facilitator.is_some()
    }

    /// The requirements object for a challenge on `resource`.
    pub fn requirements(
        &self,
        price: Decimal,
        resource: &str,
        description: Option<String>,
    ) -> PaymentRequirements {
        PaymentRequirements {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            max_amount_required: price,
            pay_to: self.pay_to.clone(),
            resource: resource.to_string(),
            description,
            max_timeout_seconds: Some(300),
        }
    }

    /// Run the stage for one request.
    pub async fn evaluate(
        &self,
        price: Decimal,
        resource: &str,
        description: Option<String>,
        payment_header: Option<&str>,
    ) -> PaymentDecision {
        if price <= Decimal::ZERO {
            return PaymentDecision::NotRequired;
        }

        let Some(facilitator) = &self.facilitator else {
            return PaymentDecision::PassThrough;
        };

        let requirements = self.requirements(price, resource, description);

        let Some(raw) = payment_header else {
            return PaymentDecision::Challenge(requirements);
        };

        let payload = match decode_payment_header(raw) {
            Ok(payload) => payload,
            Err(reason) => {
                return PaymentDecision::Rejected {
                    reason: format!("undecodable payment header: {reason}"),
                };
            }
        };

        let request = VerifyRequest {
            x402_version: X402_VERSION,
            payment_payload: payload.clone(),
            payment_requirements: requirements.clone(),
        };

        match facilitator.verify(&request).await {
            Ok(resp) if resp.is_valid => PaymentDecision::Verified(PaymentContext {
                payload,
                requirements,
                payer: resp.payer,
            }),
            Ok(resp) => PaymentDecision::Rejected {
                reason: resp
                    .invalid_reason
                    .unwrap_or_else(|| "payment verification failed".into()),
            },
            Err(err) => PaymentDecision::Rejected {
                reason: format!("facilitator verification error: {err}"),
            },
        }
    }

    /// Capture a verified payment after a successful upstream response.
    ///
    /// Settlement failure does not change the already-sent response; the
    /// receipt carries nulls and the failure is logged.
    pub async fn settle(&self, ctx: &PaymentContext) -> Option<SettleResponse> {
        let facilitator = self.facilitator.as_ref()?;

        let request = SettleRequest {
            x402_version: X402_VERSION,
            payment_payload: ctx.payload.clone(),
            payment_requirements: ctx.requirements.clone(),
        };

        match facilitator.settle(&request).await {
            Ok(resp) if resp.success => {
                info!(
                    tx = resp.transaction.as_deref().unwrap_or(""),
                    "payment settled"
                );
                Some(resp)
            }
            Ok(resp) => {
                warn!(
                    reason = resp.error_reason.as_deref().unwrap_or("unknown"),
                    "payment settlement refused"
                );
                None
            }
            Err(err) => {
                warn!(error = %err, "payment settlement failed");
                None
            }
        }
    }
}
