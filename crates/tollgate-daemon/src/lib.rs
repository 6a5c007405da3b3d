// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The Tollgate gateway daemon: the admission pipeline wired as an Axum
//! application, plus the admin control surface.

/// Admin control surface under `/admin`.
pub mod admin;
/// Request-id, logging, and rate-limit middleware.
pub mod middleware;
/// The per-request admission pipeline.
pub mod pipeline;
/// SSRF-safe upstream forwarder.
pub mod proxy;
/// Replay suppression store.
pub mod replay;

use axum::{
    body::Body,
    http::StatusCode,
    response::Response,
    routing::{any, get},
    Json, Router,
};
use middleware::{RateLimiter, RequestLogger};
use proxy::UpstreamProxy;
use replay::ReplayStore;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tollgate_core::{Clock, GatewayConfig, Outcome, ReasonCode};
use tollgate_mandate::{MandateVerifier, SpendLedgers};
use tollgate_payment::{Facilitator, PaymentGate};
use tollgate_policy::{AgentPolicy, Blacklist, ReputationOracle};
use tollgate_receipt::{ReceiptBuilder, ReceiptStore};
use tollgate_routes::RouteTable;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

/// Facilitator scheme identifier offered in challenges.
pub const PAYMENT_SCHEME: &str = "exact";

/// Process-wide shared state, initialized once at startup.
pub struct AppState {
    /// Resolved configuration.
    pub config: GatewayConfig,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
    /// Copy-on-write dispatch table; admin mutations swap the snapshot.
    pub routes: RwLock<Arc<RouteTable>>,
    /// Replay suppression.
    pub replay: ReplayStore,
    /// Mandate verification and spend tracking.
    pub mandates: MandateVerifier,
    /// The 402 payment gate.
    pub payment: PaymentGate,
    /// Blacklist and reputation checks.
    pub policy: AgentPolicy,
    /// Receipt engine.
    pub receipts: Arc<ReceiptStore>,
    /// Per-client rate limiter.
    pub limiter: RateLimiter,
    /// Upstream forwarder.
    pub proxy: UpstreamProxy,
    /// Process start, for uptime reporting.
    pub started: Instant,
}

impl AppState {
    /// Assemble process state from its injected collaborators.
    pub fn build(
        config: GatewayConfig,
        clock: Arc<dyn Clock>,
        table: RouteTable,
        facilitator: Option<Arc<dyn Facilitator>>,
        oracle: Option<Arc<dyn ReputationOracle>>,
    ) -> Result<Arc<Self>, reqwest::Error> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let min_score = config
            .reputation
            .as_ref()
            .map(|r| r.min_score)
            .unwrap_or(0);

        let payment = PaymentGate::new(
            facilitator,
            PAYMENT_SCHEME,
            config.network.wire_tag(),
            config.pay_to_address.clone(),
        );

        Ok(Arc::new(Self {
            routes: RwLock::new(Arc::new(table)),
            replay: ReplayStore::new(),
            mandates: MandateVerifier::new(Arc::new(SpendLedgers::new())),
            payment,
            policy: AgentPolicy::new(Arc::new(Blacklist::new()), oracle, min_score),
            receipts: Arc::new(ReceiptStore::default()),
            limiter: RateLimiter::new(config.rate_limit_per_min, Duration::from_secs(60)),
            proxy: UpstreamProxy::new(timeout)?,
            started: Instant::now(),
            clock,
            config,
        }))
    }

    /// Current route-table snapshot.
    pub async fn routes_snapshot(&self) -> Arc<RouteTable> {
        self.routes.read().await.clone()
    }
}

/// Build the Axum router with the gateway and (when enabled) admin
/// surfaces, wrapped in the middleware stack.
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(public_health))
        .route("/api/{*rest}", any(pipeline::dispatch));

    // No admin key, no admin surface at all.
    if state.config.admin_key.is_some() {
        app = app.nest("/admin", admin::router(state.clone()));
    }

    let receipts = state.receipts.clone();
    let chain = state.config.network.caip2().to_string();

    app.layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(RequestLogger::layer))
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn std::any::Any + Send + 'static>| {
                panic_response(&receipts, &chain, err)
            },
        ))
        .with_state(state)
}

async fn public_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Worker-boundary panic handling: log, record a synthetic ERROR
/// receipt, answer 500. The process continues.
fn panic_response(
    receipts: &ReceiptStore,
    chain: &str,
    err: Box<dyn std::any::Any + Send + 'static>,
) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "request handler panicked");

    let receipt = receipts.emit(
        ReceiptBuilder::new("UNKNOWN")
            .chain(chain)
            .outcome(Outcome::Error, ReasonCode::UpstreamErrorNoCharge)
            .explanation("internal error")
            .build(),
    );

    let body = serde_json::to_vec(&json!({
        "error": "internal error",
        "receipt": receipt,
    }))
    .unwrap_or_default();

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_default()
}
