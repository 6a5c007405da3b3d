// SPDX-License-Identifier: MIT OR Apache-2.0
//! Daily and lifetime spend ledgers.
//!
//! Each ledger is a concurrent map whose per-key entry lock makes the
//! check-and-charge sequence linearizable per mandate id. A charge
//! returns a [`SpendCharge`] token so a later stage can revert it when
//! the request is denied downstream or the upstream fails without
//! capture.

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Which ledger a charge landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeKind {
    /// Daily ledger; resets when the UTC date changes.
    Daily,
    /// Lifetime ledger; resets only at process restart.
    Lifetime,
}

/// A tentative charge that can be reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendCharge {
    /// Ledger the charge landed in.
    pub kind: ChargeKind,
    /// Mandate id (daily) or intent mandate id (lifetime).
    pub key: String,
    /// Amount charged.
    pub amount: Decimal,
}

/// The two logically disjoint spend tables.
#[derive(Debug, Default)]
pub struct SpendLedgers {
    daily: DashMap<String, (NaiveDate, Decimal)>,
    lifetime: DashMap<String, Decimal>,
}

impl SpendLedgers {
    /// Fresh, empty ledgers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount spent today by a bounded mandate. Entries from earlier UTC
    /// dates read as zero.
    pub fn daily_spent(&self, mandate_id: &str, today: NaiveDate) -> Decimal {
        self.daily
            .get(mandate_id)
            .filter(|entry| entry.0 == today)
            .map(|entry| entry.1)
            .unwrap_or(Decimal::ZERO)
    }

    /// Lifetime amount spent by an intent mandate.
    pub fn lifetime_spent(&self, intent_mandate_id: &str) -> Decimal {
        self.lifetime
            .get(intent_mandate_id)
            .map(|entry| *entry)
            .unwrap_or(Decimal::ZERO)
    }

    /// Atomically check `spent + amount <= max` for today and charge.
    /// Returns the running total on refusal.
    pub fn try_charge_daily(
        &self,
        mandate_id: &str,
        amount: Decimal,
        max: Decimal,
        today: NaiveDate,
    ) -> Result<SpendCharge, Decimal> {
        let mut entry = self
            .daily
            .entry(mandate_id.to_string())
            .or_insert((today, Decimal::ZERO));

        // Roll the window when the UTC date changed.
        if entry.0 != today {
            *entry = (today, Decimal::ZERO);
        }

        if entry.1 + amount > max {
            return Err(entry.1);
        }
        entry.1 += amount;

        Ok(SpendCharge {
            kind: ChargeKind::Daily,
            key: mandate_id.to_string(),
            amount,
        })
    }

    /// Atomically check `spent + amount <= budget` and charge. Returns the
    /// running total on refusal.
    pub fn try_charge_lifetime(
        &self,
        intent_mandate_id: &str,
        amount: Decimal,
        budget: Decimal,
    ) -> Result<SpendCharge, Decimal> {
        let mut entry = self
            .lifetime
            .entry(intent_mandate_id.to_string())
            .or_insert(Decimal::ZERO);

        if *entry + amount > budget {
            return Err(*entry);
        }
        *entry += amount;

        Ok(SpendCharge {
            kind: ChargeKind::Lifetime,
            key: intent_mandate_id.to_string(),
            amount,
        })
    }

    /// Undo a tentative charge. Floors at zero; a daily entry whose date
    /// has rolled since the charge is left alone.
    pub fn revert(&self, charge: &SpendCharge, today: NaiveDate) {
        match charge.kind {
            ChargeKind::Daily => {
                if let Some(mut entry) = self.daily.get_mut(&charge.key) {
                    if entry.0 == today {
                        entry.1 = (entry.1 - charge.amount).max(Decimal::ZERO);
                    }
                }
            }
            ChargeKind::Lifetime => {
                if let Some(mut entry) = self.lifetime.get_mut(&charge.key) {
                    *entry = (*entry - charge.amount).max(Decimal::ZERO);
                }
            }
        }
    }
}
