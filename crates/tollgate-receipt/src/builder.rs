// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fluent builder for constructing [`Receipt`]s.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tollgate_core::{MandateVerdict, Outcome, ReasonCode, Receipt, CURRENCY};
use uuid::Uuid;

/// Fluent builder for constructing [`Receipt`]s ergonomically.
///
/// Defaults describe a successful free call with no mandate; every
/// pipeline stage overrides what it learned.
#[derive(Debug)]
pub struct ReceiptBuilder {
    receipt: Receipt,
}

impl ReceiptBuilder {
    /// Create a new builder for a request with the given HTTP method.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            receipt: Receipt {
                request_id: Uuid::new_v4(),
                tool_id: String::new(),
                provider_id: String::new(),
                endpoint: String::new(),
                method: method.into().to_uppercase(),
                timestamp: Utc::now(),
                price_usdc: Decimal::ZERO,
                currency: CURRENCY.into(),
                chain: String::new(),
                mandate_id: None,
                mandate_hash: None,
                mandate_verdict: MandateVerdict::Skipped,
                reason_code: ReasonCode::Ok,
                payment_tx_hash: None,
                facilitator_receipt_id: None,
                request_hash: String::new(),
                response_hash: None,
                latency_ms: None,
                outcome: Outcome::Success,
                explanation: String::new(),
                receipt_hash: None,
            },
        }
    }

    /// Use a specific request id instead of a generated one.
    #[must_use]
    pub fn request_id(mut self, id: Uuid) -> Self {
        self.receipt.request_id = id;
        self
    }

    /// Set the matched tool identifier.
    #[must_use]
    pub fn tool_id(mut self, id: impl Into<String>) -> Self {
        self.receipt.tool_id = id.into();
        self
    }

    /// Set the provider identifier.
    #[must_use]
    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.receipt.provider_id = id.into();
        self
    }

    /// Set the matched endpoint path.
    #[must_use]
    pub fn endpoint(mut self, path: impl Into<String>) -> Self {
        self.receipt.endpoint = path.into();
        self
    }

    /// Set the emission timestamp (injected clock).
    #[must_use]
    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.receipt.timestamp = at;
        self
    }

    /// Set the captured price.
    #[must_use]
    pub fn price_usdc(mut self, price: Decimal) -> Self {
        self.receipt.price_usdc = price;
        self
    }

    /// Set the CAIP-2 chain tag.
    #[must_use]
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.receipt.chain = chain.into();
        self
    }

    /// Record the mandate identity and verdict.
    #[must_use]
    pub fn mandate(
        mut self,
        id: Option<String>,
        hash: Option<String>,
        verdict: MandateVerdict,
    ) -> Self {
        self.receipt.mandate_id = id;
        self.receipt.mandate_hash = hash;
        self.receipt.mandate_verdict = verdict;
        self
    }

    /// Set the terminal outcome and reason.
    #[must_use]
    pub fn outcome(mut self, outcome: Outcome, reason: ReasonCode) -> Self {
        self.receipt.outcome = outcome;
        self.receipt.reason_code = reason;
        self
    }

    /// Record settlement results.
    #[must_use]
    pub fn payment(mut self, tx_hash: Option<String>, facilitator_receipt_id: Option<String>) -> Self {
        self.receipt.payment_tx_hash = tx_hash;
        self.receipt.facilitator_receipt_id = facilitator_receipt_id;
        self
    }

    /// Set the canonical request fingerprint.
    #[must_use]
    pub fn request_hash(mut self, hash: impl Into<String>) -> Self {
        self.receipt.request_hash = hash.into();
        self
    }

    /// Record the upstream response hash.
    #[must_use]
    pub fn response_hash(mut self, hash: impl Into<String>) -> Self {
        self.receipt.response_hash = Some(hash.into());
        self
    }

    /// Record the pipeline latency.
    #[must_use]
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.receipt.latency_ms = Some(ms);
        self
    }

    /// Set the human-readable explanation.
    #[must_use]
    pub fn explanation(mut self, text: impl Into<String>) -> Self {
        self.receipt.explanation = text.into();
        self
    }

    /// Finalize the receipt. The integrity hash is left unset; the store
    /// fills it at emission.
    #[must_use]
    pub fn build(self) -> Receipt {
        self.receipt
    }
}
