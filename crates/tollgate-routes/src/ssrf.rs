// SPDX-License-Identifier: MIT OR Apache-2.0
//! Private/reserved host guard for backend URLs.
//!
//! Applied at route compile time and again by the proxy at request time.
//! The check is purely syntactic: a URL whose host parses to a loopback,
//! private, link-local, or unique-local address (or the `localhost` name)
//! is rejected.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Rejection reasons from [`check_backend_url`].
#[derive(Debug, thiserror::Error)]
pub enum SsrfError {
    /// The URL did not parse, or uses a non-HTTP scheme.
    #[error("unparsable backend url: {0}")]
    Unparsable(String),

    /// The host is on the private/reserved list.
    #[error("private or reserved host: {0}")]
    Blocked(String),
}

/// Parse `raw` and reject private or reserved hosts.
pub fn check_backend_url(raw: &str) -> Result<Url, SsrfError> {
    let url = Url::parse(raw).map_err(|e| SsrfError::Unparsable(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SsrfError::Unparsable(format!(
            "scheme {:?} not allowed",
            url.scheme()
        )));
    }

    match url.host() {
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err(SsrfError::Blocked(domain.to_string()));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if ipv4_blocked(ip) {
                return Err(SsrfError::Blocked(ip.to_string()));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if ipv6_blocked(ip) {
                return Err(SsrfError::Blocked(ip.to_string()));
            }
        }
        None => {
            return Err(SsrfError::Unparsable("url has no host".into()));
        }
    }

    Ok(url)
}

fn ipv4_blocked(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn ipv6_blocked(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return ipv4_blocked(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // fc00::/7 unique local
        || (first & 0xffc0) == 0xfe80 // fe80::/10 link local
}
