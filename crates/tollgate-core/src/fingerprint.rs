// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical request fingerprinting.
//!
//! The fingerprint is the replay-suppression identity of a request:
//! two requests with the same observable effect inside one TTL window
//! collide; any observable change produces a different fingerprint.

use alloy_primitives::{hex, keccak256};
use rust_decimal::Decimal;
use serde_json::Value;
use url::form_urlencoded;

/// Everything that feeds the canonical fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintInput<'a> {
    /// HTTP method, any case; uppercased before hashing.
    pub method: &'a str,
    /// Request path as matched, literal segments included.
    pub path: &'a str,
    /// Raw query string, without the leading `?`. Empty when absent.
    pub raw_query: &'a str,
    /// Raw body bytes. Empty slice when there is no body.
    pub body: &'a [u8],
    /// Matched route price.
    pub price: Decimal,
    /// Value of `X-Request-Idempotency-Key`, or empty string.
    pub idempotency_key: &'a str,
    /// Current Unix time in milliseconds.
    pub now_ms: u64,
    /// Replay TTL in milliseconds; bounds the collision window.
    pub replay_ttl_ms: u64,
}

/// keccak256 of `bytes`, lowercase hex without a `0x` prefix.
pub fn keccak_hex(bytes: &[u8]) -> String {
    hex::encode(keccak256(bytes))
}

/// Compute the canonical fingerprint of a request.
///
/// Preimage: `METHOD|path|sorted_query|body_hash|price|idempotency_key|window`
/// where `sorted_query` joins `k=escape(v)` pairs with keys lowercased and
/// sorted, `body_hash` is the keccak256 hex of the raw body, and `window`
/// is `floor(now_ms / replay_ttl_ms)` in decimal.
pub fn request_fingerprint(input: &FingerprintInput<'_>) -> String {
    let window = if input.replay_ttl_ms == 0 {
        0
    } else {
        input.now_ms / input.replay_ttl_ms
    };

    let preimage = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        input.method.to_uppercase(),
        input.path,
        sorted_query(input.raw_query),
        keccak_hex(input.body),
        input.price,
        input.idempotency_key,
        window,
    );

    keccak_hex(preimage.as_bytes())
}

/// `&`-joined `k=escape(v)` with keys lowercased and sorted.
fn sorted_query(raw: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| {
            (
                k.to_lowercase(),
                form_urlencoded::byte_serialize(v.as_bytes()).collect(),
            )
        })
        .collect();
    pairs.sort();

    let mut out = String::new();
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Serialize a JSON value deterministically: object keys sorted
/// recursively, array order preserved, standard JSON escaping, no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn base_input() -> FingerprintInput<'static> {
        FingerprintInput {
            method: "get",
            path: "/api/echo",
            raw_query: "b=2&a=1",
            body: b"",
            price: Decimal::ZERO,
            idempotency_key: "K",
            now_ms: 1_000_000,
            replay_ttl_ms: 300_000,
        }
    }

    #[test]
    fn query_reordering_does_not_change_fingerprint() {
        let a = request_fingerprint(&base_input());
        let b = request_fingerprint(&FingerprintInput {
            raw_query: "a=1&b=2",
            ..base_input()
        });
        assert_eq!(a, b);
    }

    #[test]
    fn observable_changes_change_fingerprint() {
        let baseline = request_fingerprint(&base_input());

        let variants = [
            FingerprintInput {
                method: "POST",
                ..base_input()
            },
            FingerprintInput {
                path: "/api/other",
                ..base_input()
            },
            FingerprintInput {
                raw_query: "a=1&b=3",
                ..base_input()
            },
            FingerprintInput {
                body: b"x",
                ..base_input()
            },
            FingerprintInput {
                price: Decimal::new(1, 2),
                ..base_input()
            },
            FingerprintInput {
                idempotency_key: "K2",
                ..base_input()
            },
        ];

        for variant in variants {
            assert_ne!(baseline, request_fingerprint(&variant));
        }
    }

    #[test]
    fn fingerprint_changes_across_ttl_windows() {
        let a = request_fingerprint(&base_input());
        let b = request_fingerprint(&FingerprintInput {
            now_ms: 1_000_000 + 300_000,
            ..base_input()
        });
        assert_ne!(a, b);
    }

    #[test]
    fn method_case_is_insignificant() {
        let a = request_fingerprint(&base_input());
        let b = request_fingerprint(&FingerprintInput {
            method: "GET",
            ..base_input()
        });
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let v = json!({"b": {"z": 1, "a": [3, 1, 2]}, "a": "x"});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":"x","b":{"a":[3,1,2],"z":1}}"#
        );
    }

    #[test]
    fn canonical_json_escapes_strings() {
        let v = json!({"k": "a\"b\n"});
        assert_eq!(canonical_json(&v), r#"{"k":"a\"b\n"}"#);
    }

    proptest! {
        #[test]
        fn fingerprint_is_hex_64(key in "[a-zA-Z0-9-]{0,32}", body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let fp = request_fingerprint(&FingerprintInput {
                idempotency_key: &key,
                body: &body,
                ..base_input()
            });
            prop_assert_eq!(fp.len(), 64);
            prop_assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        }

        #[test]
        fn query_order_never_matters(
            k1 in "[a-z]{1,6}", v1 in "[a-z0-9]{0,6}",
            k2 in "[a-z]{1,6}", v2 in "[a-z0-9]{0,6}",
        ) {
            let fwd = format!("{k1}={v1}&{k2}={v2}");
            let rev = format!("{k2}={v2}&{k1}={v1}");
            let a = request_fingerprint(&FingerprintInput { raw_query: &fwd, ..base_input() });
            let b = request_fingerprint(&FingerprintInput { raw_query: &rev, ..base_input() });
            prop_assert_eq!(a, b);
        }
    }
}
