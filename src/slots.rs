//! Slot manager: admission control for every tier.
//!
//! Owns the only mutable shared state in the crate: per-tier in-flight
//! counts and last-used timestamps. Both live in one map behind one mutex,
//! so a last-used update can never be lost relative to the count it belongs
//! to. The lock is held only for constant-time check-and-update; nothing
//! here awaits or performs I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::endpoints::{EndpointRegistry, Tier};

/// Source of "now" for last-used bookkeeping and idle detection.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct SlotState {
    max: usize,
    active: usize,
    last_used: Option<DateTime<Utc>>,
}

/// Observability snapshot for one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub tier: Tier,
    pub active: usize,
    pub max: usize,
    pub available: usize,
    pub last_used: Option<DateTime<Utc>>,
    /// False until first use, and again after an idle shutdown.
    pub running: bool,
}

/// Per-tier capacity gate.
pub struct SlotManager {
    slots: Mutex<HashMap<Tier, SlotState>>,
    clock: Arc<dyn Clock>,
}

impl SlotManager {
    /// Create a slot manager for every tier in the registry.
    pub fn new(registry: &EndpointRegistry) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock))
    }

    pub fn with_clock(registry: &EndpointRegistry, clock: Arc<dyn Clock>) -> Self {
        let slots = registry
            .iter()
            .map(|e| {
                (
                    e.tier,
                    SlotState {
                        max: e.max_slots,
                        active: 0,
                        last_used: None,
                    },
                )
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            clock,
        }
    }

    // A panic while holding the lock cannot leave a half-applied update,
    // every critical section is a single field write.
    fn lock(&self) -> MutexGuard<'_, HashMap<Tier, SlotState>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Take one slot if capacity remains. Never blocks.
    pub fn acquire(&self, tier: Tier) -> bool {
        let now = self.clock.now();
        let mut slots = self.lock();
        let Some(state) = slots.get_mut(&tier) else {
            tracing::warn!(tier = %tier, "Acquire on unconfigured tier");
            return false;
        };
        if state.active >= state.max {
            tracing::debug!(
                tier = %tier,
                active = state.active,
                max = state.max,
                "No slot available"
            );
            return false;
        }
        state.active += 1;
        state.last_used = Some(now);
        tracing::debug!(tier = %tier, active = state.active, max = state.max, "Slot acquired");
        true
    }

    /// Scoped acquire: the slot is released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>, tier: Tier) -> Option<SlotGuard> {
        if self.acquire(tier) {
            Some(SlotGuard {
                slots: Arc::clone(self),
                tier,
            })
        } else {
            None
        }
    }

    /// Give back one slot. Releasing with nothing held is a no-op.
    pub fn release(&self, tier: Tier) {
        let mut slots = self.lock();
        let Some(state) = slots.get_mut(&tier) else {
            return;
        };
        if state.active == 0 {
            tracing::debug!(tier = %tier, "Release with no active slot ignored");
            return;
        }
        state.active -= 1;
        tracing::debug!(tier = %tier, active = state.active, max = state.max, "Slot released");
    }

    /// When the tier last took a slot; `None` if never (or since shutdown).
    pub fn last_used(&self, tier: Tier) -> Option<DateTime<Utc>> {
        self.lock().get(&tier).and_then(|s| s.last_used)
    }

    pub fn active(&self, tier: Tier) -> usize {
        self.lock().get(&tier).map(|s| s.active).unwrap_or(0)
    }

    pub fn status(&self, tier: Tier) -> Option<EndpointStatus> {
        self.lock().get(&tier).map(|s| snapshot(tier, s))
    }

    /// Status for every configured tier, in tier order.
    pub fn status_all(&self) -> Vec<EndpointStatus> {
        let slots = self.lock();
        let mut all: Vec<EndpointStatus> = slots.iter().map(|(t, s)| snapshot(*t, s)).collect();
        all.sort_by_key(|s| s.tier);
        all
    }

    /// Clear the last-used record after a shutdown, but only if the tier is
    /// still idle and nobody used it since `seen`.
    ///
    /// Returns false if the tier was picked up in the meantime.
    pub fn clear_if_idle(&self, tier: Tier, seen: DateTime<Utc>) -> bool {
        let mut slots = self.lock();
        match slots.get_mut(&tier) {
            Some(state) if state.active == 0 && state.last_used == Some(seen) => {
                state.last_used = None;
                true
            }
            _ => false,
        }
    }

    /// Tiers with zero active slots and a last-used record, with that record.
    pub(crate) fn idle_candidates(&self) -> Vec<(Tier, DateTime<Utc>)> {
        self.lock()
            .iter()
            .filter(|(_, s)| s.active == 0)
            .filter_map(|(t, s)| s.last_used.map(|at| (*t, at)))
            .collect()
    }
}

fn snapshot(tier: Tier, state: &SlotState) -> EndpointStatus {
    EndpointStatus {
        name: tier.to_string(),
        tier,
        active: state.active,
        max: state.max,
        available: state.max.saturating_sub(state.active),
        last_used: state.last_used,
        running: state.last_used.is_some(),
    }
}

/// A held slot. Dropping it releases the slot on every exit path,
/// including errors, timeouts and task cancellation.
#[must_use = "dropping the guard releases the slot immediately"]
pub struct SlotGuard {
    slots: Arc<SlotManager>,
    tier: Tier,
}

impl SlotGuard {
    pub fn tier(&self) -> Tier {
        self.tier
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard").field("tier", &self.tier).finish()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release(self.tier);
    }
}
