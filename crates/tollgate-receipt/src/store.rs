// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded append-only receipt storage with incremental statistics.

use crate::compute_hash;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tollgate_core::{Outcome, Receipt};
use tracing::warn;

/// Default ring capacity when none is configured.
pub const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Filter for [`ReceiptStore::query`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptQuery {
    /// Only receipts for this tool.
    pub tool_id: Option<String>,
    /// Only receipts with this outcome.
    pub outcome: Option<Outcome>,
    /// Page size; defaults to 50.
    pub limit: Option<usize>,
    /// Page offset from the newest receipt.
    pub offset: Option<usize>,
}

/// Aggregate statistics, computed from incremental counters rather than
/// by scanning the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptStats {
    /// Receipts emitted since process start.
    pub total_requests: u64,
    /// SUCCESS outcomes.
    pub success_count: u64,
    /// DENIED outcomes.
    pub denied_count: u64,
    /// ERROR outcomes.
    pub error_count: u64,
    /// Success share formatted as `"p.pp%"`.
    pub success_rate: String,
    /// Mean latency over receipts that recorded one.
    pub avg_latency_ms: f64,
    /// Revenue captured, USDC.
    #[serde(with = "rust_decimal::serde::str")]
    pub total_revenue_usdc: Decimal,
}

/// In-memory, append-only, ring-buffered receipt store.
///
/// The ring holds the most recent `capacity` receipts; the counters are
/// monotone for the process lifetime even after eviction.
pub struct ReceiptStore {
    ring: RwLock<VecDeque<Receipt>>,
    capacity: usize,
    total: AtomicU64,
    success: AtomicU64,
    denied: AtomicU64,
    error: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    revenue_micros: AtomicU64,
}

impl ReceiptStore {
    /// Create a store holding at most `capacity` receipts.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            error: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            revenue_micros: AtomicU64::new(0),
        }
    }

    /// Finalize and append a receipt: the integrity hash is computed, the
    /// counters advance, and the oldest receipt is evicted when the ring
    /// is full. Returns the stored receipt.
    pub fn emit(&self, mut receipt: Receipt) -> Receipt {
        match compute_hash(&receipt) {
            Ok(hash) => receipt.receipt_hash = Some(hash),
            Err(err) => {
                // Leave the hash unset rather than dropping the record.
                warn!(request_id = %receipt.request_id, error = %err, "receipt hash failed");
            }
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        match receipt.outcome {
            Outcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                if let Some(micros) = to_micros(receipt.price_usdc) {
                    self.revenue_micros.fetch_add(micros, Ordering::Relaxed);
                }
            }
            Outcome::Denied => {
                self.denied.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Error | Outcome::Refunded => {
                self.error.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Some(latency) = receipt.latency_ms {
            self.latency_sum_ms.fetch_add(latency, Ordering::Relaxed);
            self.latency_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        if ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(receipt.clone());
        drop(ring);

        receipt
    }

    /// Fetch a stored receipt by request id.
    pub fn get(&self, request_id: uuid::Uuid) -> Option<Receipt> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.iter().rev().find(|r| r.request_id == request_id).cloned()
    }

    /// Query receipts newest-first with optional tool/outcome filters.
    pub fn query(&self, q: &ReceiptQuery) -> Vec<Receipt> {
        let limit = q.limit.unwrap_or(50);
        let offset = q.offset.unwrap_or(0);
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);

        ring.iter()
            .rev()
            .filter(|r| {
                q.tool_id
                    .as_deref()
                    .map(|t| r.tool_id == t)
                    .unwrap_or(true)
                    && q.outcome.map(|o| r.outcome == o).unwrap_or(true)
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of receipts currently held in the ring.
    pub fn len(&self) -> usize {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no receipt has been stored yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate statistics from the incremental counters.
    pub fn stats(&self) -> ReceiptStats {
        let total = self.total.load(Ordering::Relaxed);
        let success = self.success.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.load(Ordering::Relaxed);

        let rate = if total == 0 {
            0.0
        } else {
            success as f64 / total as f64 * 100.0
        };

        ReceiptStats {
            total_requests: total,
            success_count: success,
            denied_count: self.denied.load(Ordering::Relaxed),
            error_count: self.error.load(Ordering::Relaxed),
            success_rate: format!("{rate:.2}%"),
            avg_latency_ms: if latency_count == 0 {
                0.0
            } else {
                latency_sum as f64 / latency_count as f64
            },
            total_revenue_usdc: Decimal::new(
                self.revenue_micros.load(Ordering::Relaxed) as i64,
                6,
            ),
        }
    }
}

impl Default for ReceiptStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

fn to_micros(price: Decimal) -> Option<u64> {
    (price * Decimal::from(1_000_000u32)).to_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReceiptBuilder;
    use tollgate_core::{parse_price, Outcome, ReasonCode};

    fn success(tool: &str, price: &str, latency: u64) -> Receipt {
        ReceiptBuilder::new("GET")
            .tool_id(tool)
            .price_usdc(parse_price(price).unwrap())
            .latency_ms(latency)
            .build()
    }

    fn denied(tool: &str, reason: ReasonCode) -> Receipt {
        ReceiptBuilder::new("GET")
            .tool_id(tool)
            .outcome(Outcome::Denied, reason)
            .build()
    }

    #[test]
    fn emit_fills_the_integrity_hash() {
        let store = ReceiptStore::default();
        let stored = store.emit(success("echo", "0", 5));
        assert!(stored.receipt_hash.is_some());
        assert!(crate::verify_hash(&stored));
    }

    #[test]
    fn ring_evicts_oldest_but_counters_are_monotone() {
        let store = ReceiptStore::new(3);
        for i in 0..5 {
            store.emit(success("echo", "0.01", i));
        }
        assert_eq!(store.len(), 3);
        let stats = store.stats();
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.success_count, 5);
        assert_eq!(stats.total_revenue_usdc, parse_price("0.05").unwrap());
    }

    #[test]
    fn query_filters_and_pages_newest_first() {
        let store = ReceiptStore::default();
        store.emit(success("alpha", "0", 1));
        store.emit(denied("alpha", ReasonCode::AgentBlocked));
        store.emit(success("beta", "0", 2));

        let all = store.query(&ReceiptQuery::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].tool_id, "beta");

        let alphas = store.query(&ReceiptQuery {
            tool_id: Some("alpha".into()),
            ..Default::default()
        });
        assert_eq!(alphas.len(), 2);

        let denials = store.query(&ReceiptQuery {
            outcome: Some(Outcome::Denied),
            ..Default::default()
        });
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].reason_code, ReasonCode::AgentBlocked);

        let paged = store.query(&ReceiptQuery {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        });
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].tool_id, "alpha");
    }

    #[test]
    fn stats_rate_and_latency() {
        let store = ReceiptStore::default();
        store.emit(success("echo", "0", 10));
        store.emit(success("echo", "0", 30));
        store.emit(denied("echo", ReasonCode::RouteNotFound));

        let stats = store.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.success_rate, "66.67%");
        assert!((stats.avg_latency_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(stats.denied_count, 1);
    }

    #[test]
    fn get_finds_by_request_id() {
        let store = ReceiptStore::default();
        let stored = store.emit(success("echo", "0", 1));
        assert!(store.get(stored.request_id).is_some());
        assert!(store.get(uuid::Uuid::new_v4()).is_none());
    }
}
