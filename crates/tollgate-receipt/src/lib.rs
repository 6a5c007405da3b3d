// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Receipt canonicalization, hashing, building, and in-memory storage."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The receipt engine: a fluent [`ReceiptBuilder`], canonical JSON
//! serialization with a keccak256 integrity hash, and the bounded
//! append-only [`ReceiptStore`] with incremental statistics.

mod builder;
mod store;

pub use builder::ReceiptBuilder;
pub use store::{ReceiptQuery, ReceiptStats, ReceiptStore, DEFAULT_STORE_CAPACITY};

// Re-export the contract types so consumers can depend on this crate alone.
pub use tollgate_core::{MandateVerdict, Outcome, ReasonCode, Receipt};

use tollgate_core::fingerprint::{canonical_json, keccak_hex};

/// Serialization failure while canonicalizing a receipt.
#[derive(Debug, thiserror::Error)]
#[error("receipt serialization failed: {0}")]
pub struct CanonicalizeError(#[from] serde_json::Error);

/// Produce the canonical JSON representation of a receipt.
///
/// The `receipt_hash` field is forced to `null` before serialization so
/// the output is independent of any previously stored hash. Object keys
/// are sorted recursively, making the output deterministic.
pub fn canonicalize(receipt: &Receipt) -> Result<String, CanonicalizeError> {
    let mut v = serde_json::to_value(receipt)?;
    if let serde_json::Value::Object(map) = &mut v {
        map.insert("receipt_hash".to_string(), serde_json::Value::Null);
    }
    Ok(canonical_json(&v))
}

/// Compute the hex-encoded keccak256 hash of the canonical receipt form.
pub fn compute_hash(receipt: &Receipt) -> Result<String, CanonicalizeError> {
    let json = canonicalize(receipt)?;
    Ok(keccak_hex(json.as_bytes()))
}

/// Verify that a receipt's stored `receipt_hash` matches the recomputed
/// hash. A missing stored hash verifies trivially; a serialization failure
/// does not.
pub fn verify_hash(receipt: &Receipt) -> bool {
    match &receipt.receipt_hash {
        None => true,
        Some(stored) => match compute_hash(receipt) {
            Ok(recomputed) => *stored == recomputed,
            Err(_) => false,
        },
    }
}
