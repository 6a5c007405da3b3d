// SPDX-License-Identifier: MIT OR Apache-2.0
//! tollgate-payment
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The 402 payment side of the gateway: the payment-requirements object
//! sent in challenges, the facilitator seam with its HTTP client, and
//! the per-request payment gate.
//!
//! The gate never talks to the chain itself. Verification and settlement
//! are delegated to an external facilitator; tests substitute in-process
//! fakes behind the [`Facilitator`] trait.

/// The facilitator seam and its HTTP implementation.
pub mod facilitator;
/// The per-request 402 state machine.
pub mod gate;
/// Wire types shared with the facilitator.
pub mod types;

pub use facilitator::{Facilitator, FacilitatorError, HttpFacilitator};
pub use gate::{PaymentContext, PaymentDecision, PaymentGate, PaymentState};
pub use types::{
    decode_payment_header, PaymentRequirements, SettleRequest, SettleResponse, VerifyRequest,
    VerifyResponse, X402_VERSION,
};
