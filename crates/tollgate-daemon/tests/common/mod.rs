// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for daemon integration tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tollgate_core::{GatewayConfig, ProviderBinding, RouteRule, SystemClock};
use tollgate_daemon::AppState;
use tollgate_payment::{
    Facilitator, FacilitatorError, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse,
};
use tollgate_routes::RouteTable;

pub const PAY_TO: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBa72";
pub const ADMIN_KEY: &str = "test-admin-key";

/// Scripted in-process facilitator.
pub struct FakeFacilitator {
    pub valid: bool,
    pub settle_ok: bool,
    pub settle_calls: AtomicUsize,
}

impl FakeFacilitator {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            valid: true,
            settle_ok: true,
            settle_calls: AtomicUsize::new(0),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            valid: false,
            settle_ok: false,
            settle_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Facilitator for FakeFacilitator {
    async fn verify(&self, _req: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        Ok(VerifyResponse {
            is_valid: self.valid,
            invalid_reason: (!self.valid).then(|| "scripted rejection".to_string()),
            payer: self
                .valid
                .then(|| "0x1111111111111111111111111111111111111111".to_string()),
        })
    }

    async fn settle(&self, _req: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SettleResponse {
            success: self.settle_ok,
            error_reason: (!self.settle_ok).then(|| "scripted settle failure".to_string()),
            transaction: self.settle_ok.then(|| "0xfeedbeef".to_string()),
            network: Some("base-sepolia".into()),
            payer: None,
            receipt_id: self.settle_ok.then(|| "fr-77".to_string()),
        })
    }
}

pub fn test_config(pairs: &[(&str, &str)]) -> GatewayConfig {
    let mut vars = vec![
        ("PAY_TO_ADDRESS", PAY_TO),
        ("ADMIN_KEY", ADMIN_KEY),
        ("SKIP_X402_PROBE", "1"),
        ("BASE_NETWORK", "base-sepolia"),
        ("GATEWAY_DOMAIN", "localhost"),
    ];
    vars.extend_from_slice(pairs);
    GatewayConfig::from_vars(|name| {
        vars.iter()
            .rev()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    })
    .expect("test config")
}

pub fn route(method: &str, path: &str, tool_id: &str, price: &str, backend: &str) -> RouteRule {
    RouteRule {
        method: method.into(),
        path: path.into(),
        tool_id: tool_id.into(),
        price_usdc: Decimal::from_str(price).unwrap(),
        provider: ProviderBinding {
            provider_id: "test-provider".into(),
            backend_url: backend.into(),
            auth: None,
        },
        group: None,
        description: None,
        restricted: false,
        // Test upstreams bind loopback.
        skip_ssrf: true,
    }
}

pub fn test_state(
    config: GatewayConfig,
    rules: Vec<RouteRule>,
    facilitator: Option<Arc<dyn Facilitator>>,
) -> Arc<AppState> {
    let table = RouteTable::compile(rules).expect("route table");
    AppState::build(config, Arc::new(SystemClock), table, facilitator, None)
        .expect("app state")
}
