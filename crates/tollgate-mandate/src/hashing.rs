// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical mandate hashing and personal-sign recovery.
//!
//! Both kinds hash with keccak256 and sign with EIP-191 `personal_sign`
//! over the raw 32-byte hash (the `signMessage(bytes)` convention of
//! common wallet SDKs).

use crate::types::{BoundedMandate, IntentMandate};
use alloy_primitives::{hex, keccak256, Address, Signature, B256};
use serde_json::Value;
use std::str::FromStr;
use tollgate_core::fingerprint::canonical_json;

/// Why a signature failed to verify.
#[derive(Debug, thiserror::Error)]
pub enum SignatureFailure {
    /// The signature is not 65 bytes of hex.
    #[error("malformed signature: {0}")]
    Malformed(String),

    /// The declared signer is not a valid address.
    #[error("malformed signer address: {0}")]
    BadAddress(String),

    /// Recovery produced a different address than declared.
    #[error("recovered signer {recovered} does not match declared {declared}")]
    Mismatch {
        /// Address recovered from the signature.
        recovered: String,
        /// Address the mandate claims signed it.
        declared: String,
    },
}

/// The pipe-joined canonical preimage of a bounded mandate:
/// `mandate_id|owner_pubkey|expires_at|max_spend|tools|confirm` with the
/// allowlist sorted lexicographically and comma-joined, and `confirm`
/// empty when absent.
pub fn bounded_canonical_string(mandate: &BoundedMandate) -> String {
    let mut tools = mandate.allowlisted_tool_ids.clone();
    tools.sort();

    format!(
        "{}|{}|{}|{}|{}|{}",
        mandate.mandate_id,
        mandate.owner_pubkey,
        mandate.expires_at,
        mandate.max_spend_usdc_per_day,
        tools.join(","),
        mandate.require_confirm_over.as_deref().unwrap_or(""),
    )
}

/// keccak256 of the bounded canonical string.
pub fn bounded_hash(mandate: &BoundedMandate) -> B256 {
    keccak256(bounded_canonical_string(mandate).as_bytes())
}

/// keccak256 over the deterministically sorted JSON serialization of an
/// intent mandate's `contents`.
pub fn intent_hash(contents: &Value) -> B256 {
    keccak256(canonical_json(contents).as_bytes())
}

/// Derived ledger key of an intent mandate: `intent-` plus the first 16
/// hex characters of the contents hash.
pub fn intent_mandate_id(hash: B256) -> String {
    format!("intent-{}", &hex::encode(hash)[..16])
}

/// Recover the EIP-191 signer of `hash` and compare it to `declared`.
pub fn recover_signer(
    hash: B256,
    signature_hex: &str,
    declared: &str,
) -> Result<Address, SignatureFailure> {
    let raw = hex::decode(signature_hex.trim().trim_start_matches("0x"))
        .map_err(|e| SignatureFailure::Malformed(e.to_string()))?;
    let signature =
        Signature::from_raw(&raw).map_err(|e| SignatureFailure::Malformed(e.to_string()))?;

    let expected = Address::from_str(declared.trim())
        .map_err(|e| SignatureFailure::BadAddress(e.to_string()))?;

    let recovered = signature
        .recover_address_from_msg(hash.as_slice())
        .map_err(|e| SignatureFailure::Malformed(e.to_string()))?;

    if recovered != expected {
        return Err(SignatureFailure::Mismatch {
            recovered: recovered.to_string(),
            declared: expected.to_string(),
        });
    }

    Ok(recovered)
}

/// Verify a bounded mandate's signature against its owner.
pub fn verify_bounded_signature(mandate: &BoundedMandate) -> Result<B256, SignatureFailure> {
    let hash = bounded_hash(mandate);
    recover_signer(hash, &mandate.signature, &mandate.owner_pubkey)?;
    Ok(hash)
}

/// Verify an intent mandate's signature against its signer.
pub fn verify_intent_signature(mandate: &IntentMandate) -> Result<B256, SignatureFailure> {
    let hash = intent_hash(&mandate.contents);
    recover_signer(hash, &mandate.user_signature, &mandate.signer_address)?;
    Ok(hash)
}
