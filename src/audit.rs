//! In-memory audit trail of routing decisions.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::endpoints::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Served, but scored below the confidence threshold.
    LowConfidence,
    Cached,
    Timeout,
    Failed,
}

/// One invoked tier (or one cache hit).
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tier: Tier,
    pub confidence: Option<f32>,
    pub latency_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: Decimal,
    pub cached: bool,
    /// Attempt made on a fallback tier.
    pub fallback: bool,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(tier: Tier, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            tier,
            confidence: None,
            latency_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost: Decimal::ZERO,
            cached: outcome == AuditOutcome::Cached,
            fallback: false,
            outcome,
            error: None,
        }
    }
}

/// Bounded ring of recent records. Oldest records drop first.
pub struct AuditLog {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn record(&self, record: AuditRecord) {
        tracing::debug!(
            tier = %record.tier,
            outcome = ?record.outcome,
            latency_ms = record.latency_ms,
            cost = %record.cost,
            "Audit"
        );
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records oldest first.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> Decimal {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.cost)
            .sum()
    }

    pub fn cost_by_tier(&self) -> BTreeMap<Tier, Decimal> {
        let mut totals = BTreeMap::new();
        for record in self.records.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            *totals.entry(record.tier).or_insert(Decimal::ZERO) += record.cost;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn costed(tier: Tier, cost: Decimal) -> AuditRecord {
        AuditRecord {
            cost,
            ..AuditRecord::new(tier, AuditOutcome::Success)
        }
    }

    #[test]
    fn drops_oldest_past_capacity() {
        let log = AuditLog::new(2);
        log.record(AuditRecord::new(Tier::FastLocal, AuditOutcome::Success));
        log.record(AuditRecord::new(Tier::Coder, AuditOutcome::Failed));
        log.record(AuditRecord::new(Tier::Remote, AuditOutcome::Cached));

        let tiers: Vec<Tier> = log.snapshot().iter().map(|r| r.tier).collect();
        assert_eq!(tiers, vec![Tier::Coder, Tier::Remote]);
        assert!(log.snapshot()[1].cached);
    }

    #[test]
    fn sums_costs() {
        let log = AuditLog::new(10);
        log.record(costed(Tier::Remote, dec!(0.0045)));
        log.record(costed(Tier::Remote, dec!(0.0015)));
        log.record(costed(Tier::FastLocal, Decimal::ZERO));

        assert_eq!(log.total_cost(), dec!(0.006));
        assert_eq!(log.cost_by_tier()[&Tier::Remote], dec!(0.006));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let log = AuditLog::new(0);
        log.record(AuditRecord::new(Tier::FastLocal, AuditOutcome::Success));
        assert!(log.is_empty());
    }
}
