// SPDX-License-Identifier: MIT OR Apache-2.0
//! The facilitator seam.
//!
//! Concrete implementations are injected at construction; the gateway
//! never reaches for a global client inside the pipeline.

use crate::types::{SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Failures talking to a facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("facilitator transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The facilitator answered with a non-success status.
    #[error("facilitator returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}

/// An external service that verifies and settles micropayments.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Check that a payment payload satisfies the requirements.
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError>;

    /// Capture a previously verified payment on-chain.
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError>;
}

/// HTTP facilitator client: `POST {base}/verify` and `POST {base}/settle`.
#[derive(Debug, Clone)]
pub struct HttpFacilitator {
    base: Url,
    client: reqwest::Client,
}

impl HttpFacilitator {
    /// Build a client with a per-call deadline.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    /// Facilitator base URL.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Startup reachability probe against `GET {base}/supported`.
    ///
    /// A failed probe does not fail startup; the gate degrades to
    /// pass-through for paid routes and the caller logs the warning.
    pub async fn probe(&self) -> bool {
        let url = match self.base.join("supported") {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.client.get(url).send().await {
            Ok(resp) => {
                debug!(status = resp.status().as_u16(), "facilitator probe");
                resp.status().is_success()
            }
            Err(err) => {
                warn!(error = %err, "facilitator probe failed");
                false
            }
        }
    }

    async fn post<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, FacilitatorError> {
        let url = self
            .base
            .join(path)
            .map_err(|_| FacilitatorError::Status {
                status: 0,
                body: format!("invalid facilitator path {path}"),
            })?;

        let resp = self.client.post(url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FacilitatorError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, FacilitatorError> {
        self.post("verify", request).await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        self.post("settle", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentRequirements, X402_VERSION};
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verify_request() -> VerifyRequest {
        VerifyRequest {
            x402_version: X402_VERSION,
            payment_payload: json!({"scheme": "exact"}),
            payment_requirements: PaymentRequirements {
                scheme: "exact".into(),
                network: "base-sepolia".into(),
                max_amount_required: Decimal::from_str("0.01").unwrap(),
                pay_to: "0x8ba1f109551bD432803012645Ac136ddd64DBa72".into(),
                resource: "/api/premium".into(),
                description: None,
                max_timeout_seconds: None,
            },
        }
    }

    async fn facilitator(server: &MockServer) -> HttpFacilitator {
        HttpFacilitator::new(
            Url::parse(&format!("{}/", server.uri())).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn verify_posts_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(json!({"x402Version": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isValid": true,
                "payer": "0x1111111111111111111111111111111111111111",
            })))
            .mount(&server)
            .await;

        let resp = facilitator(&server).await.verify(&verify_request()).await.unwrap();
        assert!(resp.is_valid);
        assert!(resp.payer.is_some());
    }

    #[tokio::test]
    async fn settle_decodes_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": "0xabc",
                "network": "base-sepolia",
            })))
            .mount(&server)
            .await;

        let req = verify_request();
        let resp = facilitator(&server)
            .await
            .settle(&SettleRequest {
                x402_version: req.x402_version,
                payment_payload: req.payment_payload,
                payment_requirements: req.payment_requirements,
            })
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.transaction.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = facilitator(&server).await.verify(&verify_request()).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn probe_reports_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kinds": []})))
            .mount(&server)
            .await;

        assert!(facilitator(&server).await.probe().await);

        let unreachable = HttpFacilitator::new(
            Url::parse("http://127.0.0.1:1/").unwrap(),
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(!unreachable.probe().await);
    }
}
