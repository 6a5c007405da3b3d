// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-request admission pipeline.
//!
//! Fixed stage order for `/api/*` traffic:
//!
//! `route-match → idempotency → mandate → payment → agent-policy →
//! upstream-proxy → receipt`.
//!
//! Every terminal verdict emits exactly one receipt before responding.
//! A receipt's `reason_code` always identifies the first stage that
//! failed. The receipt travels in the `X-Receipt` header on 2xx and as
//! (part of) the JSON body otherwise.

use crate::middleware::RequestId;
use crate::proxy::ProxyError;
use crate::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tollgate_core::fingerprint::{keccak_hex, request_fingerprint, FingerprintInput};
use tollgate_core::{MandateVerdict, Outcome, ReasonCode, Receipt};
use tollgate_mandate::{MandateContext, SpendCharge};
use tollgate_payment::{PaymentContext, PaymentDecision};
use tollgate_policy::PolicyDecision;
use tollgate_receipt::ReceiptBuilder;
use uuid::Uuid;

/// Request-scoped state threaded through the stages.
struct RequestScope {
    request_id: Uuid,
    started: Instant,
    now: DateTime<Utc>,
    method: String,
    path: String,
    chain: String,
    tool_id: String,
    provider_id: String,
    price: Decimal,
    request_hash: String,
    mandate_id: Option<String>,
    mandate_hash: Option<String>,
    mandate_verdict: MandateVerdict,
}

impl RequestScope {
    fn receipt(&self) -> ReceiptBuilder {
        ReceiptBuilder::new(&self.method)
            .request_id(self.request_id)
            .timestamp(self.now)
            .endpoint(&self.path)
            .chain(&self.chain)
            .tool_id(&self.tool_id)
            .provider_id(&self.provider_id)
            .price_usdc(self.price)
            .request_hash(&self.request_hash)
            .mandate(
                self.mandate_id.clone(),
                self.mandate_hash.clone(),
                self.mandate_verdict,
            )
    }
}

/// Entry point for all `/api/*` traffic.
pub async fn dispatch(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0)
        .unwrap_or_else(Uuid::new_v4);
    let client_key = client_key(&req);

    let method = req.method().as_str().to_uppercase();
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().unwrap_or("").to_string();
    let headers = req.headers().clone();

    let mut scope = RequestScope {
        request_id,
        started: Instant::now(),
        now: state.clock.now(),
        method,
        path,
        chain: state.config.network.caip2().to_string(),
        tool_id: String::new(),
        provider_id: String::new(),
        price: Decimal::ZERO,
        request_hash: String::new(),
        mandate_id: None,
        mandate_hash: None,
        mandate_verdict: MandateVerdict::Skipped,
    };

    // Global pre-filter: rate limit, before route matching.
    if !state.limiter.check(&client_key) {
        return deny(
            &state,
            &scope,
            ReasonCode::RateLimited,
            StatusCode::TOO_MANY_REQUESTS,
            "per-client rate limit exceeded",
        );
    }

    let body = match axum::body::to_bytes(req.into_body(), state.config.body_limit_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return plain_error(
                StatusCode::BAD_REQUEST,
                "request body exceeds the configured limit",
            );
        }
    };

    // Stage 1: route match.
    let table = state.routes_snapshot().await;
    let Some(matched) = table.matches(&scope.method, &scope.path) else {
        return deny(
            &state,
            &scope,
            ReasonCode::RouteNotFound,
            StatusCode::NOT_FOUND,
            format!("no route matches {} {}", scope.method, scope.path),
        );
    };
    let rule = matched.rule;
    scope.tool_id = rule.tool_id.clone();
    scope.provider_id = rule.provider.provider_id.clone();
    scope.price = rule.price_usdc;

    let idempotency_key = header_str(&headers, "x-request-idempotency-key");
    scope.request_hash = request_fingerprint(&FingerprintInput {
        method: &scope.method,
        path: &scope.path,
        raw_query: &raw_query,
        body: &body,
        price: scope.price,
        idempotency_key: idempotency_key.unwrap_or(""),
        now_ms: state.clock.now_ms(),
        replay_ttl_ms: state.config.replay_ttl_ms,
    });

    // Stage 2: idempotency. Only active when the caller sent a key.
    if idempotency_key.is_some()
        && state.replay.check_and_remember(
            &scope.request_hash,
            state.clock.now_ms(),
            state.config.replay_ttl_ms,
        )
    {
        return deny(
            &state,
            &scope,
            ReasonCode::ReplayDetected,
            StatusCode::CONFLICT,
            "duplicate request within the replay window",
        );
    }

    // Stage 3: mandate.
    let domain = gateway_domain(&state, &headers);
    let mandate_outcome = match state.mandates.verify(
        header_str(&headers, "x-mandate"),
        &MandateContext {
            tool_id: &scope.tool_id,
            price: scope.price,
            gateway_domain: &domain,
            now: scope.now,
        },
    ) {
        Ok(outcome) => outcome,
        Err(err) => return plain_error(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    scope.mandate_id = mandate_outcome.mandate_id.clone();
    scope.mandate_hash = mandate_outcome.mandate_hash.clone();
    scope.mandate_verdict = mandate_outcome.verdict;
    if !mandate_outcome.passes() {
        return deny(
            &state,
            &scope,
            mandate_outcome.reason,
            StatusCode::FORBIDDEN,
            mandate_outcome.explanation,
        );
    }
    let charge = mandate_outcome.charge;

    // Stage 4: payment.
    let decision = state
        .payment
        .evaluate(
            scope.price,
            &scope.path,
            rule.description.clone(),
            header_str(&headers, "x-payment"),
        )
        .await;

    let mut payment_ctx: Option<PaymentContext> = None;
    let mut pass_through = false;
    match decision {
        PaymentDecision::NotRequired => {}
        PaymentDecision::PassThrough => pass_through = true,
        PaymentDecision::Challenge(requirements) => {
            revert_charge(&state, &charge, scope.now);
            return challenge_response(&state, &scope, &requirements);
        }
        PaymentDecision::Rejected { reason } => {
            revert_charge(&state, &charge, scope.now);
            return deny(
                &state,
                &scope,
                ReasonCode::InvalidPayment,
                StatusCode::PAYMENT_REQUIRED,
                reason,
            );
        }
        PaymentDecision::Verified(ctx) => payment_ctx = Some(ctx),
    }

    // Stage 5: agent policy.
    match state
        .policy
        .check(
            header_str(&headers, "x-agent-address"),
            header_str(&headers, "x-agent-id"),
        )
        .await
    {
        PolicyDecision::Allow => {}
        PolicyDecision::Blocked => {
            revert_charge(&state, &charge, scope.now);
            return deny(
                &state,
                &scope,
                ReasonCode::AgentBlocked,
                StatusCode::FORBIDDEN,
                "agent wallet address is blacklisted",
            );
        }
        PolicyDecision::LowReputation { count, score } => {
            revert_charge(&state, &charge, scope.now);
            return deny(
                &state,
                &scope,
                ReasonCode::ReputationTooLow,
                StatusCode::FORBIDDEN,
                format!("reputation too low: score {score} over {count} reviews"),
            );
        }
    }

    // Stage 6: upstream proxy.
    let upstream = match state
        .proxy
        .forward(&rule, &scope.method, &scope.path, &raw_query, &headers, body)
        .await
    {
        Ok(upstream) => upstream,
        Err(err) => {
            // Verified-but-unsettled payments are simply not captured;
            // settle() is skipped and the tentative spend reverted.
            revert_charge(&state, &charge, scope.now);
            return upstream_error(&state, &scope, &err);
        }
    };

    // Settlement, after the upstream delivered.
    let (tx_hash, facilitator_receipt_id) = match &payment_ctx {
        Some(ctx) => match state.payment.settle(ctx).await {
            Some(settled) => (settled.transaction, settled.receipt_id),
            None => (None, None),
        },
        None => (None, None),
    };

    // Stage 7: receipt.
    let explanation = if pass_through {
        "delivered; facilitator unavailable, payment not captured"
    } else if tx_hash.is_some() {
        "delivered and settled"
    } else if scope.price > Decimal::ZERO && payment_ctx.is_some() {
        "delivered; settlement failed, see gateway logs"
    } else {
        "delivered"
    };

    let latency_ms = scope.started.elapsed().as_millis() as u64;
    let receipt = state.receipts.emit(
        scope
            .receipt()
            .outcome(Outcome::Success, ReasonCode::Ok)
            .payment(tx_hash, facilitator_receipt_id)
            .response_hash(keccak_hex(&upstream.body))
            .latency_ms(latency_ms)
            .explanation(explanation)
            .build(),
    );

    success_response(upstream, &receipt)
}

// ---------------------------------------------------------------------------
// Terminal responses
// ---------------------------------------------------------------------------

fn deny(
    state: &AppState,
    scope: &RequestScope,
    reason: ReasonCode,
    status: StatusCode,
    explanation: impl Into<String>,
) -> Response {
    let receipt = state.receipts.emit(
        scope
            .receipt()
            .outcome(Outcome::Denied, reason)
            .explanation(explanation)
            .build(),
    );
    receipt_body_response(status, &receipt)
}

fn upstream_error(state: &AppState, scope: &RequestScope, err: &ProxyError) -> Response {
    let latency_ms = scope.started.elapsed().as_millis() as u64;
    let receipt = state.receipts.emit(
        scope
            .receipt()
            // Nothing was captured; the receipt must say so.
            .price_usdc(Decimal::new(0, 2))
            .outcome(Outcome::Error, ReasonCode::UpstreamErrorNoCharge)
            .latency_ms(latency_ms)
            .explanation(format!("upstream failed before capture: {err}"))
            .build(),
    );
    receipt_body_response(StatusCode::BAD_GATEWAY, &receipt)
}

fn challenge_response(
    state: &AppState,
    scope: &RequestScope,
    requirements: &tollgate_payment::PaymentRequirements,
) -> Response {
    let receipt = state.receipts.emit(
        scope
            .receipt()
            .outcome(Outcome::Denied, ReasonCode::InvalidPayment)
            .explanation("payment required: no X-Payment header presented")
            .build(),
    );

    // Body: the payment-requirements object, with the receipt attached.
    let mut body = serde_json::to_value(requirements).unwrap_or_else(|_| json!({}));
    if let serde_json::Value::Object(map) = &mut body {
        map.insert("error".into(), json!("PAYMENT_REQUIRED"));
        map.insert(
            "receipt".into(),
            serde_json::to_value(&receipt).unwrap_or_default(),
        );
    }

    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header("content-type", "application/json")
        .header("payment-required", requirements.to_header_value())
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn success_response(upstream: crate::proxy::UpstreamResponse, receipt: &Receipt) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let encoded = BASE64.encode(serde_json::to_vec(receipt).unwrap_or_default());

    let mut builder = Response::builder().status(status).header("x-receipt", encoded);
    if let Some(content_type) = &upstream.content_type {
        builder = builder.header("content-type", content_type);
    }
    builder
        .body(Body::from(upstream.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn receipt_body_response(status: StatusCode, receipt: &Receipt) -> Response {
    let bytes = serde_json::to_vec(receipt).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn plain_error(status: StatusCode, message: &str) -> Response {
    let bytes = serde_json::to_vec(&json!({ "error": message })).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn revert_charge(state: &AppState, charge: &Option<SpendCharge>, now: DateTime<Utc>) {
    if let Some(charge) = charge {
        state.mandates.revert(charge, now);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Merchant identity for intent-mandate checks: configured domain, or
/// the request `Host`, lowercased and port-stripped.
fn gateway_domain(state: &AppState, headers: &HeaderMap) -> String {
    let raw = state
        .config
        .gateway_domain
        .clone()
        .or_else(|| header_str(headers, "host").map(String::from))
        .unwrap_or_else(|| "localhost".to_string());

    let lowered = raw.to_lowercase();
    // Strip a port, careful not to cut into an IPv6 literal.
    match (lowered.rfind(':'), lowered.find(']')) {
        (Some(colon), Some(bracket)) if colon > bracket => lowered[..colon].to_string(),
        (Some(colon), None) => lowered[..colon].to_string(),
        _ => lowered,
    }
}

fn client_key(req: &Request) -> String {
    if let Some(info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return info.0.ip().to_string();
    }
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "local".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_domain_strips_ports() {
        fn strip(raw: &str) -> String {
            let lowered = raw.to_lowercase();
            match (lowered.rfind(':'), lowered.find(']')) {
                (Some(colon), Some(bracket)) if colon > bracket => lowered[..colon].to_string(),
                (Some(colon), None) => lowered[..colon].to_string(),
                _ => lowered,
            }
        }

        assert_eq!(strip("Example.COM:8080"), "example.com");
        assert_eq!(strip("localhost"), "localhost");
        assert_eq!(strip("[::1]:443"), "[::1]");
    }
}
