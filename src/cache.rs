//! Response cache.
//!
//! The router treats the cache as a hint: a miss is always safe, and a hit
//! is only served inside its TTL. The built-in [`MemoryCache`] is bounded
//! and evicts expired entries first, then the oldest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::endpoints::Tier;
use crate::llm::ToolCall;
use crate::slots::{Clock, SystemClock};

/// A stored routing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub output: String,
    pub tier: Tier,
    pub confidence: f32,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub reasoning_trace: Option<String>,
}

/// Storage for routing results keyed by [`cache_key`].
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Live entry for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<CachedResponse>;

    async fn put(&self, key: String, value: CachedResponse, ttl: Duration);

    async fn invalidate(&self, key: &str);
}

/// Collapse whitespace and lower-case, so trivially different spellings of
/// the same prompt share an entry.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 fingerprint of the normalised prompt and the request context
/// that changes the answer (tier override, system prompt, sampling).
pub fn cache_key(prompt: &str, context: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hasher.update([0u8]);
    hasher.update(context.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct Entry {
    value: CachedResponse,
    expires_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Bounded in-memory TTL cache.
pub struct MemoryCache {
    store: Mutex<Store>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            max_entries,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = self.clock.now();
        let mut store = self.lock();
        let expired = match store.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                tracing::debug!(key = %short(key), "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            store.entries.remove(key);
            tracing::debug!(key = %short(key), "cache expired");
        }
        None
    }

    async fn put(&self, key: String, value: CachedResponse, ttl: Duration) {
        if self.max_entries == 0 || ttl.is_zero() {
            return;
        }
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut store = self.lock();
        if !store.entries.contains_key(&key) && store.entries.len() >= self.max_entries {
            store.entries.retain(|_, e| e.expires_at > now);
            if store.entries.len() >= self.max_entries
                && let Some(oldest) = store
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone())
            {
                store.entries.remove(&oldest);
                tracing::debug!(key = %short(&oldest), "cache evicted oldest entry");
            }
        }
        let seq = store.next_seq;
        store.next_seq += 1;
        store.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    async fn invalidate(&self, key: &str) {
        self.lock().entries.remove(key);
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
