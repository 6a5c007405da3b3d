// SPDX-License-Identifier: MIT OR Apache-2.0
//! tollgate-mandate
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! AP2 mandate verification. Two mandate kinds flow through one
//! [`MandateVerifier::verify`] entry point:
//!
//! - **Bounded mandate** (kind A): per-day budget, tool allowlist,
//!   optional confirmation threshold. Charges the daily ledger.
//! - **Intent mandate** (kind B): lifetime budget, merchant allowlist.
//!   Charges the lifetime ledger.
//!
//! A mandate never touches both ledgers; their reset semantics differ
//! (UTC-date rollover vs. process lifetime).

/// Canonical hashing and personal-sign recovery.
pub mod hashing;
/// Daily and lifetime spend ledgers.
pub mod ledger;
/// Wire types for both mandate kinds.
pub mod types;
/// The verification pipeline stage.
pub mod verify;

pub use hashing::{
    bounded_canonical_string, bounded_hash, intent_hash, intent_mandate_id, recover_signer,
    SignatureFailure,
};
pub use ledger::{ChargeKind, SpendCharge, SpendLedgers};
pub use types::{BoundedMandate, IntentContents, IntentMandate, Mandate, MandateBudget};
pub use verify::{MandateContext, MandateError, MandateOutcome, MandateVerifier};
