// SPDX-License-Identifier: MIT OR Apache-2.0
//! The mandate stage of the admission pipeline.
//!
//! One entry point dispatches on mandate kind, verifies the signature
//! and policy, and charges the matching ledger. On approval the ledger
//! increment has already happened when this returns; the orchestrator
//! reverts it if a later stage denies the request or the upstream fails
//! without capture.

use crate::hashing::{
    intent_mandate_id, verify_bounded_signature, verify_intent_signature, SignatureFailure,
};
use crate::ledger::{SpendCharge, SpendLedgers};
use crate::types::Mandate;
use alloy_primitives::hex;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tollgate_core::{MandateVerdict, ReasonCode};
use tracing::debug;

/// Request-scoped facts the verifier needs.
#[derive(Debug, Clone)]
pub struct MandateContext<'a> {
    /// Matched tool identifier.
    pub tool_id: &'a str,
    /// Matched route price.
    pub price: Decimal,
    /// Authoritative merchant name of this gateway, already lowercased
    /// and port-stripped.
    pub gateway_domain: &'a str,
    /// Injected current time.
    pub now: DateTime<Utc>,
}

/// The header was present but undecodable; the caller answers HTTP 400
/// without a receipt.
#[derive(Debug, thiserror::Error)]
#[error("malformed mandate: {0}")]
pub struct MandateError(pub String);

/// What the mandate stage decided.
#[derive(Debug, Clone)]
pub struct MandateOutcome {
    /// Stage verdict recorded in the receipt.
    pub verdict: MandateVerdict,
    /// `Ok` on approval or skip; the denial reason otherwise.
    pub reason: ReasonCode,
    /// Ledger key of the mandate, when one was decoded.
    pub mandate_id: Option<String>,
    /// Canonical mandate hash, when one was computed.
    pub mandate_hash: Option<String>,
    /// The tentative ledger charge, present only on approval.
    pub charge: Option<SpendCharge>,
    /// Human-readable account for the receipt.
    pub explanation: String,
}

impl MandateOutcome {
    fn skipped() -> Self {
        Self {
            verdict: MandateVerdict::Skipped,
            reason: ReasonCode::Ok,
            mandate_id: None,
            mandate_hash: None,
            charge: None,
            explanation: "no mandate presented".into(),
        }
    }

    fn denied(
        reason: ReasonCode,
        mandate_id: Option<String>,
        mandate_hash: Option<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            verdict: MandateVerdict::Denied,
            reason,
            mandate_id,
            mandate_hash,
            charge: None,
            explanation: explanation.into(),
        }
    }

    /// True when the pipeline may continue past this stage.
    pub fn passes(&self) -> bool {
        self.verdict != MandateVerdict::Denied
    }
}

/// Verifies mandates and tracks their spend.
#[derive(Clone)]
pub struct MandateVerifier {
    ledgers: Arc<SpendLedgers>,
}

impl MandateVerifier {
    /// Build a verifier around shared ledgers.
    pub fn new(ledgers: Arc<SpendLedgers>) -> Self {
        Self { ledgers }
    }

    /// The shared ledgers (admin spend introspection).
    pub fn ledgers(&self) -> &SpendLedgers {
        &self.ledgers
    }

    /// Undo an earlier approval's charge.
    pub fn revert(&self, charge: &SpendCharge, now: DateTime<Utc>) {
        self.ledgers.revert(charge, now.date_naive());
    }

    /// Run the mandate stage.
    ///
    /// Absent header: SKIPPED. Undecodable header: [`MandateError`]
    /// (HTTP 400, no receipt). Otherwise a verdict with the first failing
    /// check as its reason, or an approval whose ledger charge has
    /// already been applied.
    pub fn verify(
        &self,
        header: Option<&str>,
        ctx: &MandateContext<'_>,
    ) -> Result<MandateOutcome, MandateError> {
        let Some(raw) = header else {
            return Ok(MandateOutcome::skipped());
        };

        match Mandate::decode(raw).map_err(MandateError)? {
            Mandate::Bounded(mandate) => self.verify_bounded(&mandate, ctx),
            Mandate::Intent(mandate) => self.verify_intent(&mandate, ctx),
        }
    }

    fn verify_bounded(
        &self,
        mandate: &crate::types::BoundedMandate,
        ctx: &MandateContext<'_>,
    ) -> Result<MandateOutcome, MandateError> {
        let id = Some(mandate.mandate_id.clone());

        let hash = match verify_bounded_signature(mandate) {
            Ok(hash) => hash,
            Err(failure) => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::InvalidSignature,
                    id,
                    None,
                    signature_explanation(&failure),
                ));
            }
        };
        let hash_hex = Some(hex::encode(hash));

        match mandate.expires() {
            Some(expiry) if expiry > ctx.now => {}
            _ => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::MandateExpired,
                    id,
                    hash_hex,
                    format!("mandate expired at {}", mandate.expires_at),
                ));
            }
        }

        let allowed = mandate
            .allowlisted_tool_ids
            .iter()
            .any(|t| t == ctx.tool_id || t == "*");
        if !allowed {
            return Ok(MandateOutcome::denied(
                ReasonCode::EndpointNotAllowlisted,
                id,
                hash_hex,
                format!("tool {} is not on the mandate allowlist", ctx.tool_id),
            ));
        }

        let max = mandate.max_spend().ok_or_else(|| {
            MandateError("max_spend_usdc_per_day is not a decimal".into())
        })?;

        let today = ctx.now.date_naive();
        let charge = match self
            .ledgers
            .try_charge_daily(&mandate.mandate_id, ctx.price, max, today)
        {
            Ok(charge) => charge,
            Err(spent) => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::MandateBudgetExceeded,
                    id,
                    hash_hex,
                    format!(
                        "daily budget exceeded: spent {spent} of {max}, price {}",
                        ctx.price
                    ),
                ));
            }
        };

        if let Some(threshold) = mandate.confirm_over() {
            if ctx.price > threshold {
                self.ledgers.revert(&charge, today);
                return Ok(MandateOutcome::denied(
                    ReasonCode::MandateConfirmRequired,
                    id,
                    hash_hex,
                    format!(
                        "price {} exceeds the confirmation threshold {threshold}",
                        ctx.price
                    ),
                ));
            }
        }

        debug!(mandate_id = %mandate.mandate_id, price = %ctx.price, "bounded mandate approved");
        Ok(MandateOutcome {
            verdict: MandateVerdict::Approved,
            reason: ReasonCode::Ok,
            mandate_id: id,
            mandate_hash: hash_hex,
            charge: Some(charge),
            explanation: format!("bounded mandate approved; {} charged to daily ledger", ctx.price),
        })
    }

    fn verify_intent(
        &self,
        mandate: &crate::types::IntentMandate,
        ctx: &MandateContext<'_>,
    ) -> Result<MandateOutcome, MandateError> {
        let contents = mandate
            .parsed_contents()
            .map_err(|e| MandateError(format!("invalid intent contents: {e}")))?;

        let hash = match verify_intent_signature(mandate) {
            Ok(hash) => hash,
            Err(failure) => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::InvalidSignature,
                    None,
                    None,
                    signature_explanation(&failure),
                ));
            }
        };
        let id = Some(intent_mandate_id(hash));
        let hash_hex = Some(hex::encode(hash));

        match contents.expires() {
            Some(expiry) if expiry > ctx.now => {}
            _ => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::MandateExpired,
                    id,
                    hash_hex,
                    format!("intent expired at {}", contents.intent_expiry),
                ));
            }
        }

        let merchant_ok = contents
            .merchants
            .iter()
            .any(|m| m == "*" || m.eq_ignore_ascii_case(ctx.gateway_domain));
        if !merchant_ok {
            return Ok(MandateOutcome::denied(
                ReasonCode::MerchantNotMatched,
                id,
                hash_hex,
                format!(
                    "gateway domain {} is not on the merchant list",
                    ctx.gateway_domain
                ),
            ));
        }

        // USD is treated as equivalent to USDC here; no conversion.
        let budget = contents
            .budget
            .amount_decimal()
            .ok_or_else(|| MandateError("budget.amount is not a decimal".into()))?;

        let key = id.clone().unwrap_or_default();
        let charge = match self.ledgers.try_charge_lifetime(&key, ctx.price, budget) {
            Ok(charge) => charge,
            Err(spent) => {
                return Ok(MandateOutcome::denied(
                    ReasonCode::IntentBudgetExceeded,
                    id,
                    hash_hex,
                    format!(
                        "lifetime budget exceeded: spent {spent} of {budget}, price {}",
                        ctx.price
                    ),
                ));
            }
        };

        debug!(intent_mandate_id = %key, price = %ctx.price, "intent mandate approved");
        Ok(MandateOutcome {
            verdict: MandateVerdict::Approved,
            reason: ReasonCode::Ok,
            mandate_id: id,
            mandate_hash: hash_hex,
            charge: Some(charge),
            explanation: format!(
                "intent mandate approved; {} charged to lifetime ledger",
                ctx.price
            ),
        })
    }
}

fn signature_explanation(failure: &SignatureFailure) -> String {
    match failure {
        SignatureFailure::Mismatch { .. } => "mandate signature does not recover to the declared signer".into(),
        other => format!("mandate signature invalid: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{bounded_hash, intent_hash};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ctx<'a>(tool_id: &'a str, price: &str, domain: &'a str) -> MandateContext<'a> {
        MandateContext {
            tool_id,
            price: dec(price),
            gateway_domain: domain,
            now: Utc::now(),
        }
    }

    fn verifier() -> MandateVerifier {
        MandateVerifier::new(Arc::new(SpendLedgers::new()))
    }

    /// Build a signed bounded-mandate header.
    fn bounded_header(
        signer: &PrivateKeySigner,
        max_spend: &str,
        tools: &[&str],
        confirm: Option<&str>,
        expires_at: &str,
    ) -> String {
        let mut mandate = crate::types::BoundedMandate {
            mandate_id: "m-test".into(),
            owner_pubkey: signer.address().to_string(),
            expires_at: expires_at.into(),
            max_spend_usdc_per_day: max_spend.into(),
            allowlisted_tool_ids: tools.iter().map(|s| s.to_string()).collect(),
            require_confirm_over: confirm.map(String::from),
            signature: String::new(),
        };

        let hash = bounded_hash(&mandate);
        let sig = signer.sign_message_sync(hash.as_slice()).unwrap();
        mandate.signature = format!("0x{}", hex::encode(sig.as_bytes()));

        BASE64.encode(
            json!({
                "mandate_id": mandate.mandate_id,
                "owner_pubkey": mandate.owner_pubkey,
                "expires_at": mandate.expires_at,
                "max_spend_usdc_per_day": mandate.max_spend_usdc_per_day,
                "allowlisted_tool_ids": mandate.allowlisted_tool_ids,
                "require_confirm_over": mandate.require_confirm_over,
                "signature": mandate.signature,
            })
            .to_string(),
        )
    }

    /// Build a signed intent-mandate header.
    fn intent_header(signer: &PrivateKeySigner, budget: &str, merchants: &[&str]) -> String {
        let contents = json!({
            "natural_language_description": "call some APIs",
            "budget": { "amount": budget, "currency": "USD" },
            "merchants": merchants,
            "intent_expiry": "2030-01-01T00:00:00Z",
            "requires_refundability": false,
        });

        let hash = intent_hash(&contents);
        let sig = signer.sign_message_sync(hash.as_slice()).unwrap();

        BASE64.encode(
            json!({
                "type": "IntentMandate",
                "contents": contents,
                "user_signature": format!("0x{}", hex::encode(sig.as_bytes())),
                "timestamp": "2026-08-01T00:00:00Z",
                "signer_address": signer.address().to_string(),
            })
            .to_string(),
        )
    }

    #[test]
    fn absent_header_skips() {
        let out = verifier().verify(None, &ctx("echo", "0.01", "localhost")).unwrap();
        assert_eq!(out.verdict, MandateVerdict::Skipped);
        assert_eq!(out.reason, ReasonCode::Ok);
        assert!(out.charge.is_none());
    }

    #[test]
    fn undecodable_header_is_malformed() {
        let err = verifier().verify(Some("!!"), &ctx("echo", "0.01", "localhost"));
        assert!(err.is_err());
    }

    #[test]
    fn valid_bounded_mandate_approves_and_charges() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = bounded_header(&signer, "0.05", &["echo"], None, "2030-01-01T00:00:00Z");

        let out = v
            .verify(Some(&header), &ctx("echo", "0.03", "localhost"))
            .unwrap();
        assert_eq!(out.verdict, MandateVerdict::Approved);
        assert!(out.charge.is_some());
        assert_eq!(out.mandate_id.as_deref(), Some("m-test"));
        assert_eq!(
            v.ledgers().daily_spent("m-test", Utc::now().date_naive()),
            dec("0.03")
        );
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let v = verifier();

        // Signed by `other` but declaring `signer` as owner.
        let mut mandate = crate::types::BoundedMandate {
            mandate_id: "m-test".into(),
            owner_pubkey: signer.address().to_string(),
            expires_at: "2030-01-01T00:00:00Z".into(),
            max_spend_usdc_per_day: "0.05".into(),
            allowlisted_tool_ids: vec!["echo".into()],
            require_confirm_over: None,
            signature: String::new(),
        };
        let hash = bounded_hash(&mandate);
        let sig = other.sign_message_sync(hash.as_slice()).unwrap();
        mandate.signature = format!("0x{}", hex::encode(sig.as_bytes()));

        let header = BASE64.encode(
            json!({
                "mandate_id": mandate.mandate_id,
                "owner_pubkey": mandate.owner_pubkey,
                "expires_at": mandate.expires_at,
                "max_spend_usdc_per_day": mandate.max_spend_usdc_per_day,
                "allowlisted_tool_ids": mandate.allowlisted_tool_ids,
                "signature": mandate.signature,
            })
            .to_string(),
        );

        let out = v
            .verify(Some(&header), &ctx("echo", "0.01", "localhost"))
            .unwrap();
        assert_eq!(out.reason, ReasonCode::InvalidSignature);
        assert_eq!(out.verdict, MandateVerdict::Denied);
    }

    #[test]
    fn expired_mandate_is_denied() {
        let signer = PrivateKeySigner::random();
        let header =
            bounded_header(&signer, "0.05", &["echo"], None, "2020-01-01T00:00:00Z");
        let out = verifier()
            .verify(Some(&header), &ctx("echo", "0.01", "localhost"))
            .unwrap();
        assert_eq!(out.reason, ReasonCode::MandateExpired);
    }

    #[test]
    fn allowlist_is_exact_with_wildcard() {
        let signer = PrivateKeySigner::random();
        let v = verifier();

        let header = bounded_header(&signer, "0.05", &["other"], None, "2030-01-01T00:00:00Z");
        let out = v
            .verify(Some(&header), &ctx("echo", "0.01", "localhost"))
            .unwrap();
        assert_eq!(out.reason, ReasonCode::EndpointNotAllowlisted);

        let header = bounded_header(&signer, "0.05", &["*"], None, "2030-01-01T00:00:00Z");
        let out = v
            .verify(Some(&header), &ctx("echo", "0.01", "localhost"))
            .unwrap();
        assert_eq!(out.verdict, MandateVerdict::Approved);
    }

    #[test]
    fn budget_denial_leaves_ledger_untouched() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = bounded_header(&signer, "0.05", &["echo"], None, "2030-01-01T00:00:00Z");

        let first = v
            .verify(Some(&header), &ctx("echo", "0.03", "localhost"))
            .unwrap();
        assert_eq!(first.verdict, MandateVerdict::Approved);

        let second = v
            .verify(Some(&header), &ctx("echo", "0.03", "localhost"))
            .unwrap();
        assert_eq!(second.reason, ReasonCode::MandateBudgetExceeded);
        assert_eq!(
            v.ledgers().daily_spent("m-test", Utc::now().date_naive()),
            dec("0.03")
        );
    }

    #[test]
    fn confirm_threshold_denies_and_reverts() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = bounded_header(
            &signer,
            "1.00",
            &["echo"],
            Some("0.02"),
            "2030-01-01T00:00:00Z",
        );

        let out = v
            .verify(Some(&header), &ctx("echo", "0.05", "localhost"))
            .unwrap();
        assert_eq!(out.reason, ReasonCode::MandateConfirmRequired);
        assert_eq!(
            v.ledgers().daily_spent("m-test", Utc::now().date_naive()),
            Decimal::ZERO
        );
    }

    #[test]
    fn intent_mandate_charges_lifetime_ledger() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = intent_header(&signer, "25", &["localhost"]);

        let out = v
            .verify(Some(&header), &ctx("echo", "10", "localhost"))
            .unwrap();
        assert_eq!(out.verdict, MandateVerdict::Approved);
        let id = out.mandate_id.unwrap();
        assert!(id.starts_with("intent-"));
        assert_eq!(v.ledgers().lifetime_spent(&id), dec("10"));
    }

    #[test]
    fn wrong_merchant_is_denied_with_no_charge() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = intent_header(&signer, "25", &["example.com"]);

        let out = v
            .verify(Some(&header), &ctx("echo", "1", "localhost"))
            .unwrap();
        assert_eq!(out.reason, ReasonCode::MerchantNotMatched);
        let id = out.mandate_id.unwrap();
        assert_eq!(v.ledgers().lifetime_spent(&id), Decimal::ZERO);
    }

    #[test]
    fn merchant_match_is_case_insensitive_and_supports_wildcard() {
        let signer = PrivateKeySigner::random();

        let header = intent_header(&signer, "25", &["Example.COM"]);
        let out = verifier()
            .verify(Some(&header), &ctx("echo", "1", "example.com"))
            .unwrap();
        assert_eq!(out.verdict, MandateVerdict::Approved);

        let header = intent_header(&signer, "25", &["*"]);
        let out = verifier()
            .verify(Some(&header), &ctx("echo", "1", "anything.example"))
            .unwrap();
        assert_eq!(out.verdict, MandateVerdict::Approved);
    }

    #[test]
    fn intent_budget_exhaustion_is_denied() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = intent_header(&signer, "5", &["localhost"]);

        let first = v
            .verify(Some(&header), &ctx("echo", "5", "localhost"))
            .unwrap();
        assert_eq!(first.verdict, MandateVerdict::Approved);

        let second = v
            .verify(Some(&header), &ctx("echo", "1", "localhost"))
            .unwrap();
        assert_eq!(second.reason, ReasonCode::IntentBudgetExceeded);
    }

    #[test]
    fn revert_undoes_an_approval_charge() {
        let signer = PrivateKeySigner::random();
        let v = verifier();
        let header = bounded_header(&signer, "0.05", &["echo"], None, "2030-01-01T00:00:00Z");

        let now = Utc::now();
        let out = v
            .verify(Some(&header), &ctx("echo", "0.03", "localhost"))
            .unwrap();
        v.revert(&out.charge.unwrap(), now);
        assert_eq!(v.ledgers().daily_spent("m-test", now.date_naive()), Decimal::ZERO);
    }
}
