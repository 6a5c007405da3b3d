// SPDX-License-Identifier: MIT OR Apache-2.0
//! SSRF-safe upstream forwarder.
//!
//! Builds `backend_url + request_path`, strips hop-by-hop headers,
//! injects the provider auth header, and re-runs the SSRF host check at
//! request time (the table checked it at compile time; admin escapes and
//! stale DNS make the second check worth its microseconds).

use axum::body::Bytes;
use axum::http::HeaderMap;
use reqwest::header::{HeaderName as UpHeaderName, HeaderValue as UpHeaderValue};
use std::time::Duration;
use tollgate_core::RouteRule;
use tollgate_routes::check_backend_url;
use tracing::{debug, warn};

/// Headers never copied through to the upstream: the hop-by-hop set plus
/// the gateway's own admission headers.
const STRIPPED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "authorization",
    "x-payment",
    "x-mandate",
    "x-request-idempotency-key",
    "x-agent-address",
    "x-agent-id",
];

/// Upstream failure; always maps to `UPSTREAM_ERROR_NO_CHARGE`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The backend URL failed the runtime SSRF re-check.
    #[error("backend url rejected at request time: {0}")]
    SsrfBlocked(String),

    /// Connect failure, timeout, or protocol error.
    #[error("upstream transport: {0}")]
    Transport(String),

    /// The upstream answered with a failure status.
    #[error("upstream returned {0}")]
    UpstreamStatus(u16),
}

/// The materialised upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    /// Status passed through to the agent.
    pub status: u16,
    /// Content type passed through verbatim.
    pub content_type: Option<String>,
    /// Full body bytes; hashed into the receipt.
    pub body: Bytes,
}

/// One shared forwarder per gateway process.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
}

impl UpstreamProxy {
    /// Build the forwarder with a per-request deadline.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Forward an admitted request upstream.
    ///
    /// Any status of 400 or above counts as an upstream failure: the
    /// gateway only charges for deliveries it stands behind.
    pub async fn forward(
        &self,
        rule: &RouteRule,
        method: &str,
        path: &str,
        raw_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, ProxyError> {
        if !rule.skip_ssrf {
            check_backend_url(&rule.provider.backend_url)
                .map_err(|e| ProxyError::SsrfBlocked(e.to_string()))?;
        }

        let mut url = format!(
            "{}{}",
            rule.provider.backend_url.trim_end_matches('/'),
            path
        );
        if !raw_query.is_empty() {
            url.push('?');
            url.push_str(raw_query);
        }

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        let has_body = !matches!(method.as_str(), "GET" | "HEAD");

        let mut upstream_headers = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            let lowered = name.as_str().to_lowercase();
            if STRIPPED_HEADERS.contains(&lowered.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                UpHeaderName::from_bytes(name.as_str().as_bytes()),
                UpHeaderValue::from_bytes(value.as_bytes()),
            ) {
                upstream_headers.append(name, value);
            }
        }

        if let Some(auth) = &rule.provider.auth {
            if let (Ok(name), Ok(value)) = (
                UpHeaderName::from_bytes(auth.header.as_bytes()),
                UpHeaderValue::from_str(&auth.value),
            ) {
                upstream_headers.insert(name, value);
            }
        }

        debug!(tool_id = %rule.tool_id, %url, "forwarding upstream");

        let mut request = self.client.request(method, &url).headers(upstream_headers);
        if has_body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status >= 400 {
            warn!(tool_id = %rule.tool_id, status, "upstream failure");
            return Err(ProxyError::UpstreamStatus(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    /// Route-creation pre-check: does the upstream itself speak 402?
    ///
    /// Proxying to an already-priced endpoint would double-charge agents,
    /// so route creation refuses such backends. Unreachable upstreams
    /// pass; reachability is not this probe's business.
    pub async fn probe_upstream_402(&self, backend_url: &str) -> bool {
        let response = match self.client.head(backend_url).send().await {
            Ok(resp) => resp,
            Err(_) => match self.client.get(backend_url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(backend_url, error = %err, "x402 probe unreachable");
                    return false;
                }
            },
        };

        response.status().as_u16() == 402
            || response.headers().contains_key("payment-required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use tollgate_core::{ProviderBinding, RouteAuth};
    use wiremock::matchers::{header, method, path as wm_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rule(backend: &str, auth: Option<RouteAuth>) -> RouteRule {
        RouteRule {
            method: "GET".into(),
            path: "/api/echo".into(),
            tool_id: "echo".into(),
            price_usdc: Decimal::ZERO,
            provider: ProviderBinding {
                provider_id: "demo".into(),
                backend_url: backend.into(),
                auth,
            },
            group: None,
            description: None,
            restricted: false,
            // Test upstreams bind loopback.
            skip_ssrf: true,
        }
    }

    fn proxy() -> UpstreamProxy {
        UpstreamProxy::new(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn forwards_path_query_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wm_path("/api/echo"))
            .and(query_param("q", "1"))
            .and(header("x-api-key", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("{\"ok\":true}"),
            )
            .mount(&server)
            .await;

        let rule = rule(
            &server.uri(),
            Some(RouteAuth {
                header: "X-Api-Key".into(),
                value: "secret".into(),
            }),
        );

        let resp = proxy()
            .forward(&rule, "GET", "/api/echo", "q=1", &HeaderMap::new(), Bytes::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type.as_deref(), Some("application/json"));
        assert_eq!(&resp.body[..], b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn strips_admission_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wm_path("/api/echo"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-payment", "cGF5".parse().unwrap());
        headers.insert("x-mandate", "bWFu".parse().unwrap());
        headers.insert("x-custom", "keep".parse().unwrap());

        proxy()
            .forward(
                &rule(&server.uri(), None),
                "GET",
                "/api/echo",
                "",
                &headers,
                Bytes::new(),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let received = &requests[0];
        assert!(received.headers.get("x-payment").is_none());
        assert!(received.headers.get("x-mandate").is_none());
        assert_eq!(
            received.headers.get("x-custom").map(|v| v.as_bytes()),
            Some(&b"keep"[..])
        );
    }

    #[tokio::test]
    async fn posts_carry_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wm_path("/api/echo"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let resp = proxy()
            .forward(
                &rule(&server.uri(), None),
                "POST",
                "/api/echo",
                "",
                &HeaderMap::new(),
                Bytes::from_static(b"{\"x\":1}"),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 201);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(&requests[0].body[..], b"{\"x\":1}");
    }

    #[tokio::test]
    async fn upstream_5xx_is_a_proxy_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = proxy()
            .forward(
                &rule(&server.uri(), None),
                "GET",
                "/api/echo",
                "",
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamStatus(500)));
    }

    #[tokio::test]
    async fn runtime_ssrf_check_blocks_unescaped_rules() {
        let mut private = rule("http://127.0.0.1:1", None);
        private.skip_ssrf = false;
        let err = proxy()
            .forward(&private, "GET", "/api/echo", "", &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        // The check fires before the dial.
        assert!(matches!(err, ProxyError::SsrfBlocked(_)));
    }

    #[tokio::test]
    async fn connect_refused_is_transport() {
        let err = proxy()
            .forward(
                &rule("http://127.0.0.1:1", None),
                "GET",
                "/api/echo",
                "",
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transport(_)));
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        // Unroutable public address: the SSRF check passes, the dial fails.
        let slow = UpstreamProxy::new(Duration::from_millis(200)).unwrap();
        let err = slow
            .forward(
                &rule("http://203.0.113.1:9", None),
                "GET",
                "/api/echo",
                "",
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transport(_)));
    }

    #[tokio::test]
    async fn probe_detects_x402_upstreams() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;
        assert!(proxy().probe_upstream_402(&server.uri()).await);

        let plain = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&plain)
            .await;
        assert!(!proxy().probe_upstream_402(&plain.uri()).await);

        // Unreachable upstreams pass the probe.
        assert!(!proxy().probe_upstream_402("http://203.0.113.1:9").await);
    }
}
