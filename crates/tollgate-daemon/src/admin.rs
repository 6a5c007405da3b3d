// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admin control surface under `/admin`.
//!
//! Guarded by a single static bearer key; without a configured key the
//! surface is not mounted at all. Input errors answer 400 with
//! `{error, reason}` and never create dispatch receipts.

use crate::AppState;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tollgate_core::{RouteError, RouteRule};
use tollgate_receipt::ReceiptQuery;
use tollgate_routes::{admit_rule, import_openapi, save_routes, ImportDefaults, RouteTable};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Assemble the admin router. Mounted only when an admin key is set.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/routes", get(list_routes).post(create_route))
        .route("/routes/import", post(import_routes))
        .route("/routes/{tool_id}", put(update_route).delete(delete_route))
        .route("/receipts", get(list_receipts))
        .route("/receipts/stats", get(receipt_stats))
        .route("/blacklist", get(list_blacklist).post(add_to_blacklist))
        .route("/blacklist/{addr}", delete(remove_from_blacklist))
        .route("/spend/{mandate_id}", get(spend))
        .route("/reputation/{agent_id}", get(reputation))
        .layer(axum::middleware::from_fn_with_state(state, require_admin))
        .layer(CorsLayer::permissive())
}

/// Bearer-key check applied to every admin route.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_key.as_deref() else {
        // The router is only mounted with a key configured; this is a
        // hard stop in case that ever changes.
        return AdminError::unauthorized().into_response();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let ok = provided
        .strip_prefix("Bearer ")
        .map(|key| key == expected)
        .unwrap_or(false);
    if !ok {
        return AdminError::unauthorized().into_response();
    }

    next.run(req).await
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured admin error: `{error, reason?}` with a fitting status.
#[derive(Debug)]
pub struct AdminError {
    status: StatusCode,
    error: String,
    reason: Option<&'static str>,
}

impl AdminError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            reason: None,
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "admin key required")
    }

    fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, what)
    }

    fn ssrf_blocked(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: detail.into(),
            reason: Some("SSRF_BLOCKED"),
        }
    }

    fn x402_blocked() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "upstream already requires x402 payment; refusing to double-charge".into(),
            reason: Some("X402_UPSTREAM_BLOCKED"),
        }
    }
}

impl From<RouteError> for AdminError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::SsrfBlocked(host) => {
                Self::ssrf_blocked(format!("backend host is private or reserved: {host}"))
            }
            RouteError::UnknownToolId(id) => Self::not_found(format!("unknown tool_id: {id}")),
            other => Self::new(StatusCode::BAD_REQUEST, other.to_string()),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.error });
        if let Some(reason) = self.reason {
            body["reason"] = json!(reason);
        }
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let route_count = state.routes_snapshot().await.len();
    Json(json!({
        "status": "ok",
        "uptime_ms": state.started.elapsed().as_millis() as u64,
        "route_count": route_count,
        "receipt_count": state.receipts.len(),
    }))
}

async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.config.masked())
}

// ---------------------------------------------------------------------------
// Routes CRUD
// ---------------------------------------------------------------------------

fn redacted(rule: &RouteRule) -> Value {
    let mut value = serde_json::to_value(rule).unwrap_or_else(|_| json!({}));
    if let Some(auth) = value
        .get_mut("provider")
        .and_then(|p| p.get_mut("auth"))
        .filter(|a| !a.is_null())
    {
        auth["value"] = json!("***");
    }
    value
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Value> {
    let table = state.routes_snapshot().await;
    let routes: Vec<Value> = table.rules().iter().map(redacted).collect();
    Json(json!({ "routes": routes }))
}

async fn create_route(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<RouteRule>,
) -> Result<impl IntoResponse, AdminError> {
    let rule = admit_rule(rule)?;

    if !state.config.skip_x402_probe
        && state.proxy.probe_upstream_402(&rule.provider.backend_url).await
    {
        return Err(AdminError::x402_blocked());
    }

    let mut guard = state.routes.write().await;
    let next = guard.with_added(rule.clone())?;
    *guard = Arc::new(next);
    persist_routes(&state, &guard).await;

    info!(tool_id = %rule.tool_id, "route created");
    Ok((StatusCode::CREATED, Json(redacted(&rule))))
}

#[derive(Debug, Deserialize)]
struct RoutePatch {
    #[serde(default, with = "rust_decimal::serde::str_option")]
    price_usdc: Option<Decimal>,
    #[serde(default)]
    description: Option<String>,
}

async fn update_route(
    State(state): State<Arc<AppState>>,
    Path(tool_id): Path<String>,
    Json(patch): Json<RoutePatch>,
) -> Result<Json<Value>, AdminError> {
    if let Some(price) = patch.price_usdc {
        if price.is_sign_negative() {
            return Err(AdminError::new(
                StatusCode::BAD_REQUEST,
                "price must be non-negative",
            ));
        }
    }

    let mut guard = state.routes.write().await;
    let next = guard.with_updated(&tool_id, patch.price_usdc, patch.description)?;
    *guard = Arc::new(next);
    persist_routes(&state, &guard).await;

    let rule = guard
        .find(&tool_id)
        .cloned()
        .ok_or_else(|| AdminError::not_found(format!("unknown tool_id: {tool_id}")))?;
    Ok(Json(redacted(&rule)))
}

async fn delete_route(
    State(state): State<Arc<AppState>>,
    Path(tool_id): Path<String>,
) -> Result<StatusCode, AdminError> {
    let mut guard = state.routes.write().await;
    let next = guard.with_removed(&tool_id)?;
    *guard = Arc::new(next);
    persist_routes(&state, &guard).await;

    info!(tool_id = %tool_id, "route deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    document: Value,
    defaults: ImportDefaults,
}

async fn import_routes(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<Value>, AdminError> {
    tollgate_routes::check_backend_url(&request.defaults.backend_url)
        .map_err(|e| AdminError::ssrf_blocked(e.to_string()))?;

    if !state.config.skip_x402_probe
        && state
            .proxy
            .probe_upstream_402(&request.defaults.backend_url)
            .await
    {
        return Err(AdminError::x402_blocked());
    }

    let outcome = import_openapi(&request.document, &request.defaults)
        .map_err(|e| AdminError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut imported = Vec::new();
    let mut skipped: Vec<String> = outcome.skipped;

    let mut guard = state.routes.write().await;
    for rule in outcome.routes {
        match guard.with_added(rule.clone()) {
            Ok(next) => {
                *guard = Arc::new(next);
                imported.push(rule.tool_id);
            }
            Err(RouteError::DuplicateToolId(id)) => skipped.push(id),
            Err(other) => return Err(other.into()),
        }
    }
    persist_routes(&state, &guard).await;

    info!(imported = imported.len(), skipped = skipped.len(), "openapi import");
    Ok(Json(json!({ "imported": imported, "skipped": skipped })))
}

/// Rewrite the routes file when one is configured. Persistence failures
/// are logged, not surfaced; the in-memory table is already current.
async fn persist_routes(state: &AppState, table: &Arc<RouteTable>) {
    let Some(path) = state.config.routes_file.clone() else {
        return;
    };
    let rules = table.rules().to_vec();
    let result =
        tokio::task::spawn_blocking(move || save_routes(&path, &rules)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "routes file rewrite failed"),
        Err(err) => warn!(error = %err, "routes file rewrite task failed"),
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

async fn list_receipts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReceiptQuery>,
) -> Json<Value> {
    let receipts = state.receipts.query(&query);
    Json(json!({ "count": receipts.len(), "receipts": receipts }))
}

async fn receipt_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.receipts.stats()))
}

// ---------------------------------------------------------------------------
// Blacklist
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BlacklistEntry {
    address: String,
}

async fn list_blacklist(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "addresses": state.policy.blacklist().list() }))
}

async fn add_to_blacklist(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<BlacklistEntry>,
) -> Result<(StatusCode, Json<Value>), AdminError> {
    if entry.address.trim().is_empty() {
        return Err(AdminError::new(StatusCode::BAD_REQUEST, "address required"));
    }
    let added = state.policy.blacklist().add(&entry.address);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "address": entry.address.to_lowercase(), "added": added })),
    ))
}

async fn remove_from_blacklist(
    State(state): State<Arc<AppState>>,
    Path(addr): Path<String>,
) -> Result<StatusCode, AdminError> {
    if state.policy.blacklist().remove(&addr) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AdminError::not_found(format!("address not blacklisted: {addr}")))
    }
}

// ---------------------------------------------------------------------------
// Spend and reputation introspection
// ---------------------------------------------------------------------------

async fn spend(
    State(state): State<Arc<AppState>>,
    Path(mandate_id): Path<String>,
) -> Json<Value> {
    let ledgers = state.mandates.ledgers();
    if mandate_id.starts_with("intent-") {
        Json(json!({
            "mandate_id": mandate_id,
            "spent_lifetime_usdc": ledgers.lifetime_spent(&mandate_id).to_string(),
        }))
    } else {
        let today = state.clock.now().date_naive();
        Json(json!({
            "mandate_id": mandate_id,
            "spent_today_usdc": ledgers.daily_spent(&mandate_id, today).to_string(),
        }))
    }
}

async fn reputation(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<u64>,
) -> Result<Json<Value>, AdminError> {
    match state.policy.reputation_of(agent_id).await {
        Some((count, score)) => Ok(Json(json!({
            "agent_id": agent_id,
            "count": count,
            "score": score,
        }))),
        None => Err(AdminError::not_found(
            "reputation oracle not configured or agent unknown",
        )),
    }
}
