// SPDX-License-Identifier: MIT OR Apache-2.0
//! Route rules: one priced binding from `(method, path template)` to an
//! upstream provider endpoint.

use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum fractional digits accepted in a USDC price.
pub const MAX_PRICE_SCALE: u32 = 6;

/// Validation failures for a single route rule.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// `tool_id` was empty or whitespace.
    #[error("tool_id must be non-empty")]
    EmptyToolId,

    /// A rule with the same `tool_id` already exists in the table.
    #[error("duplicate tool_id: {0}")]
    DuplicateToolId(String),

    /// The method is not a recognized HTTP method.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// The path template does not start with `/`.
    #[error("path template must start with '/': {0}")]
    InvalidPath(String),

    /// The price string failed to parse or violates the price invariants.
    #[error("invalid price {price:?}: {reason}")]
    InvalidPrice {
        /// The offending price string.
        price: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The backend URL failed to parse.
    #[error("invalid backend_url {url:?}: {reason}")]
    InvalidBackendUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The backend URL points at a private or reserved host.
    #[error("backend_url host is private or reserved: {0}")]
    SsrfBlocked(String),

    /// The referenced tool does not exist (mutation/deletion target).
    #[error("unknown tool_id: {0}")]
    UnknownToolId(String),
}

/// Parse and validate a USDC price string: a non-negative decimal with at
/// most [`MAX_PRICE_SCALE`] fractional digits.
pub fn parse_price(raw: &str) -> Result<Decimal, RouteError> {
    let price = Decimal::from_str(raw.trim()).map_err(|e| RouteError::InvalidPrice {
        price: raw.to_string(),
        reason: e.to_string(),
    })?;

    if price.is_sign_negative() {
        return Err(RouteError::InvalidPrice {
            price: raw.to_string(),
            reason: "price must be non-negative".into(),
        });
    }
    if price.scale() > MAX_PRICE_SCALE {
        return Err(RouteError::InvalidPrice {
            price: raw.to_string(),
            reason: format!("at most {MAX_PRICE_SCALE} fractional digits"),
        });
    }

    Ok(price)
}

/// Provider auth header injected into proxied requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteAuth {
    /// Header name, e.g. `Authorization` or `X-Api-Key`.
    pub header: String,
    /// Header value, stored verbatim; redacted on admin reads.
    pub value: String,
}

/// Upstream provider binding of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderBinding {
    /// Stable provider identifier recorded in receipts.
    pub provider_id: String,

    /// Base URL the matched path is appended to.
    pub backend_url: String,

    /// Optional auth header injected on proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RouteAuth>,
}

/// One dispatchable rule of the route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RouteRule {
    /// Uppercased HTTP method this rule matches.
    pub method: String,

    /// Path template; segments of the form `:name` bind parameters.
    pub path: String,

    /// Unique stable identifier of this rule.
    pub tool_id: String,

    /// Per-call price in USDC. `0` means free.
    #[schemars(with = "String")]
    pub price_usdc: Decimal,

    /// Upstream binding.
    pub provider: ProviderBinding,

    /// Optional grouping label for admin listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Restricted rules are visible to admin introspection only, never to
    /// gateway dispatch.
    #[serde(default)]
    pub restricted: bool,

    /// Escape hatch for test routes: skip the SSRF host check at compile
    /// time and at request time.
    #[serde(rename = "_skip_ssrf", default, skip_serializing_if = "is_false")]
    pub skip_ssrf: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

impl RouteRule {
    /// Validate the rule's own fields (uniqueness and SSRF are table-level
    /// checks). Normalizes the method to uppercase.
    pub fn validate(&mut self) -> Result<(), RouteError> {
        if self.tool_id.trim().is_empty() {
            return Err(RouteError::EmptyToolId);
        }

        self.method = self.method.to_uppercase();
        if !METHODS.contains(&self.method.as_str()) {
            return Err(RouteError::InvalidMethod(self.method.clone()));
        }

        if !self.path.starts_with('/') {
            return Err(RouteError::InvalidPath(self.path.clone()));
        }

        if self.price_usdc.is_sign_negative() {
            return Err(RouteError::InvalidPrice {
                price: self.price_usdc.to_string(),
                reason: "price must be non-negative".into(),
            });
        }
        if self.price_usdc.scale() > MAX_PRICE_SCALE {
            return Err(RouteError::InvalidPrice {
                price: self.price_usdc.to_string(),
                reason: format!("at most {MAX_PRICE_SCALE} fractional digits"),
            });
        }

        Ok(())
    }

    /// True when this route requires the payment stage.
    pub fn is_paid(&self) -> bool {
        self.price_usdc > Decimal::ZERO
    }
}
