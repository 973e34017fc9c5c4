//! Idle reaper: signals shutdown for tiers nobody has used in a while.
//!
//! The reaper only reads slot state and never acquires slots, so stopping
//! it at any point cannot leak capacity.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::config::ReaperConfig;
use crate::endpoints::{EndpointRegistry, Tier};
use crate::slots::SlotManager;

/// Stops the serving process behind a tier. Implemented by the process
/// supervision layer.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    async fn shutdown(&self, tier: Tier) -> anyhow::Result<()>;
}

/// Handler that only logs. Used when no supervisor is wired in.
pub struct LoggingShutdown;

#[async_trait]
impl ShutdownHandler for LoggingShutdown {
    async fn shutdown(&self, tier: Tier) -> anyhow::Result<()> {
        tracing::info!(tier = %tier, "Idle shutdown requested");
        Ok(())
    }
}

/// Periodic idle-capacity reclaimer.
pub struct IdleReaper {
    registry: Arc<EndpointRegistry>,
    slots: Arc<SlotManager>,
    handler: Arc<dyn ShutdownHandler>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleReaper {
    pub fn new(
        config: ReaperConfig,
        registry: Arc<EndpointRegistry>,
        slots: Arc<SlotManager>,
        handler: Arc<dyn ShutdownHandler>,
    ) -> Self {
        Self {
            registry,
            slots,
            handler,
            interval: config.check_interval,
            task: Mutex::new(None),
        }
    }

    /// Evaluate every tier once. Returns the tiers shut down this tick.
    pub async fn reap_once(&self) -> Vec<Tier> {
        let now = self.slots.now();
        let mut candidates = self.slots.idle_candidates();
        candidates.sort_by_key(|(tier, _)| *tier);

        let mut reaped = Vec::new();
        for (tier, last_used) in candidates {
            let Some(endpoint) = self.registry.get(tier) else {
                continue;
            };
            if endpoint.idle_shutdown_secs == 0 {
                continue;
            }

            let idle_secs = (now - last_used).num_seconds();
            if idle_secs < endpoint.idle_shutdown_secs as i64 {
                continue;
            }

            // Earlier callbacks in this tick may have yielded; re-check.
            let still_idle = self
                .slots
                .status(tier)
                .is_some_and(|s| s.active == 0 && s.last_used == Some(last_used));
            if !still_idle {
                tracing::debug!(tier = %tier, "Tier picked up before shutdown, skipping");
                continue;
            }

            tracing::info!(tier = %tier, idle_secs, "Reaping idle tier");
            let outcome = AssertUnwindSafe(self.handler.shutdown(tier))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {
                    if !self.slots.clear_if_idle(tier, last_used) {
                        tracing::warn!(tier = %tier, "Tier was used while shutting down");
                    }
                    reaped.push(tier);
                }
                Ok(Err(e)) => {
                    tracing::error!(tier = %tier, error = %e, "Shutdown callback failed");
                }
                Err(_) => {
                    tracing::error!(tier = %tier, "Shutdown callback panicked");
                }
            }
        }

        reaped
    }

    /// Start the background loop. Returns false if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("Idle reaper already running");
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip immediate first tick
            loop {
                ticker.tick().await;
                let Some(reaper) = weak.upgrade() else {
                    break;
                };
                let reaped = reaper.reap_once().await;
                if !reaped.is_empty() {
                    tracing::debug!(count = reaped.len(), "Reaper tick shut down tiers");
                }
            }
        }));

        tracing::info!(interval_secs = interval.as_secs(), "Idle reaper started");
        true
    }

    /// Cancel the background loop. Returns false if it was not running.
    pub fn stop(&self) -> bool {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) => {
                handle.abort();
                tracing::info!("Idle reaper stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
