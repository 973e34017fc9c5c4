//! Router: picks a tier for each request and runs it there.
//!
//! Per request: cache lookup, slot admission (fail fast or back off),
//! generation under the endpoint timeout, confidence scoring, and at most
//! one fallback attempt. Every invoked tier leaves exactly one audit record.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::audit::{AuditLog, AuditOutcome, AuditRecord};
use crate::cache::{CachedResponse, MemoryCache, ResponseCache, cache_key};
use crate::config::{CapacityPolicy, RouterConfig};
use crate::endpoints::{EndpointConfig, EndpointRegistry, Tier};
use crate::error::RouterError;
use crate::llm::{
    ChatMessage, Generation, GenerationRequest, ModelBackend, SamplingParams, TokenUsage, ToolCall,
};
use crate::slots::{SlotGuard, SlotManager};
use crate::tools::ToolDefinition;

/// A routing request. [`RouteRequest::new`] covers the plain
/// prompt-in, text-out case.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub prompt: String,
    /// Extra material the answer should draw on, placed before the prompt.
    pub context: Option<String>,
    /// Tier to use instead of the configured default.
    pub tier: Option<Tier>,
    /// Fallback override. Defaults to the endpoint's own fallback.
    pub fallback: Option<Tier>,
    pub system_prompt: Option<String>,
    /// Earlier conversation, sent before the prompt.
    pub messages: Vec<ChatMessage>,
    pub sampling: SamplingParams,
    /// Native tool definitions. Dropped for tiers without tool support.
    pub tools: Vec<ToolDefinition>,
    pub use_cache: bool,
}

impl RouteRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            tier: None,
            fallback: None,
            system_prompt: None,
            messages: Vec::new(),
            sampling: SamplingParams::default(),
            tools: Vec::new(),
            use_cache: true,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_fallback(mut self, tier: Option<Tier>) -> Self {
        self.fallback = tier;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    fn to_generation_request(&self) -> GenerationRequest {
        let mut messages = Vec::with_capacity(self.messages.len() + 2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.messages.iter().cloned());
        if !self.prompt.is_empty() {
            let content = match &self.context {
                Some(context) => format!("Context:\n{}\n\n{}", context, self.prompt),
                None => self.prompt.clone(),
            };
            messages.push(ChatMessage::user(content));
        }
        GenerationRequest {
            messages,
            sampling: self.sampling.clone(),
            tools: self.tools.clone(),
        }
    }
}

/// Outcome of a routed request.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub output: String,
    /// Tier that produced the output.
    pub tier: Tier,
    pub confidence: f32,
    pub latency: Duration,
    pub cached: bool,
    pub fallback_used: bool,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_trace: Option<String>,
    pub usage: TokenUsage,
    pub cost: Decimal,
}

/// One completed generation on one tier.
struct Attempt {
    tier: Tier,
    generation: Generation,
    confidence: f32,
    cost: Decimal,
}

pub struct Router {
    config: RouterConfig,
    registry: Arc<EndpointRegistry>,
    slots: Arc<SlotManager>,
    backend: Arc<dyn ModelBackend>,
    cache: Option<Arc<dyn ResponseCache>>,
    audit: Arc<AuditLog>,
    flights: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: Arc<EndpointRegistry>,
        slots: Arc<SlotManager>,
        backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let cache: Option<Arc<dyn ResponseCache>> = if config.cache_enabled {
            let cache = MemoryCache::with_clock(config.cache_max_entries, slots.clock());
            Some(Arc::new(cache))
        } else {
            None
        };
        let audit = Arc::new(AuditLog::new(config.audit_capacity));
        Self {
            config,
            registry,
            slots,
            backend,
            cache,
            audit,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the built-in memory cache.
    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Route a prompt on the default tier.
    pub async fn route(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<RouteResult, RouterError> {
        let mut request = RouteRequest::new(prompt);
        request.context = context.map(str::to_string);
        self.route_request(request).await
    }

    pub async fn route_request(&self, request: RouteRequest) -> Result<RouteResult, RouterError> {
        let started = Instant::now();
        let primary = request.tier.unwrap_or(self.config.default_tier);
        if !self.registry.contains(primary) {
            return Err(RouterError::UnknownTier { tier: primary });
        }
        let fallback = request
            .fallback
            .or_else(|| self.registry.fallback_for(primary))
            .filter(|tier| *tier != primary && self.registry.contains(*tier));

        let key = self.cache_key_for(&request, primary, fallback);
        if let Some(key) = &key
            && let Some(hit) = self.cached(key, started).await
        {
            return Ok(hit);
        }

        // Identical requests queue here; the cache is re-checked once through.
        let _turn: Option<OwnedMutexGuard<()>> = match &key {
            Some(key) if self.config.single_flight => {
                let turn = self.flight(key).lock_owned().await;
                if let Some(hit) = self.cached(key, started).await {
                    return Ok(hit);
                }
                Some(turn)
            }
            _ => None,
        };

        let generation_request = request.to_generation_request();
        let threshold = self.config.confidence_threshold;

        let chosen = match self.attempt(primary, &generation_request, false).await {
            Ok(first) if first.confidence >= threshold => (first, false),
            Ok(first) => {
                let Some(fallback) = fallback else {
                    return Ok(self.finish(first, false, key, started).await);
                };
                tracing::info!(
                    tier = %primary,
                    fallback = %fallback,
                    confidence = first.confidence,
                    "Low confidence, escalating"
                );
                match self.attempt(fallback, &generation_request, true).await {
                    Ok(second) if second.confidence > first.confidence => (second, true),
                    Ok(_) => (first, false),
                    Err(e) => {
                        tracing::warn!(
                            tier = %fallback,
                            error = %e,
                            "Fallback failed, keeping primary result"
                        );
                        (first, false)
                    }
                }
            }
            Err(primary_err) => {
                let Some(fallback) = fallback else {
                    return Err(primary_err);
                };
                tracing::info!(
                    tier = %primary,
                    fallback = %fallback,
                    error = %primary_err,
                    "Primary tier failed, falling back"
                );
                match self.attempt(fallback, &generation_request, true).await {
                    Ok(second) => (second, true),
                    Err(fallback_err) => {
                        return Err(match (primary_err.is_capacity(), fallback_err.is_capacity()) {
                            (true, true) => RouterError::NoTierAvailable {
                                tried: vec![primary, fallback],
                            },
                            (_, false) => fallback_err,
                            (false, true) => primary_err,
                        });
                    }
                }
            }
        };

        let (attempt, fallback_used) = chosen;
        Ok(self.finish(attempt, fallback_used, key, started).await)
    }

    fn cache_key_for(
        &self,
        request: &RouteRequest,
        primary: Tier,
        fallback: Option<Tier>,
    ) -> Option<String> {
        if !request.use_cache || self.cache.is_none() {
            return None;
        }
        let tools: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        let context = json!({
            "tier": primary,
            "fallback": fallback,
            "context": request.context,
            "system": request.system_prompt,
            "messages": request.messages,
            "sampling": request.sampling,
            "tools": tools,
        });
        Some(cache_key(&request.prompt, &context))
    }

    async fn cached(&self, key: &str, started: Instant) -> Option<RouteResult> {
        let hit = self.cache.as_ref()?.get(key).await?;
        tracing::debug!(tier = %hit.tier, "Serving cached response");

        let mut record = AuditRecord::new(hit.tier, AuditOutcome::Cached);
        record.confidence = Some(hit.confidence);
        record.latency_ms = started.elapsed().as_millis() as u64;
        self.audit.record(record);

        Some(RouteResult {
            output: hit.output,
            tier: hit.tier,
            confidence: hit.confidence,
            latency: started.elapsed(),
            cached: true,
            fallback_used: false,
            tool_calls: hit.tool_calls,
            reasoning_trace: hit.reasoning_trace,
            usage: TokenUsage::default(),
            cost: Decimal::ZERO,
        })
    }

    fn flight(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(|e| e.into_inner());
        flights.retain(|_, lock| lock.strong_count() > 0);
        if let Some(existing) = flights.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        flights.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Run one generation on `tier`. The slot is held for exactly the
    /// duration of this call.
    async fn attempt(
        &self,
        tier: Tier,
        request: &GenerationRequest,
        is_fallback: bool,
    ) -> Result<Attempt, RouterError> {
        let endpoint = self
            .registry
            .get(tier)
            .ok_or(RouterError::UnknownTier { tier })?;

        let Some(_slot) = self.admit(tier).await else {
            tracing::debug!(tier = %tier, "No free slot");
            return Err(RouterError::Busy {
                tier,
                max: endpoint.max_slots,
            });
        };

        let started = Instant::now();
        let timeout = endpoint.timeout();
        let request = request_for(endpoint, request);
        let outcome =
            tokio::time::timeout(timeout, self.backend.generate(tier, endpoint, request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let mut record = AuditRecord::new(tier, AuditOutcome::Success);
        record.latency_ms = latency_ms;
        record.fallback = is_fallback;

        match outcome {
            Err(_) => {
                tracing::warn!(
                    tier = %tier,
                    timeout_secs = timeout.as_secs(),
                    "Generation timed out"
                );
                record.outcome = AuditOutcome::Timeout;
                self.audit.record(record);
                Err(RouterError::Timeout { tier, timeout })
            }
            Ok(Err(e)) => {
                tracing::warn!(tier = %tier, error = %e, "Generation failed");
                record.outcome = AuditOutcome::Failed;
                record.error = Some(e.to_string());
                self.audit.record(record);
                Err(RouterError::Generation { tier, source: e })
            }
            Ok(Ok(generation)) => {
                let confidence = generation
                    .confidence
                    .map(|c| c.clamp(0.0, 1.0))
                    .unwrap_or_else(|| {
                        estimate_confidence(&generation.text, !generation.tool_calls.is_empty())
                    });
                let cost = endpoint
                    .estimate_cost(generation.usage.input_tokens, generation.usage.output_tokens);

                record.confidence = Some(confidence);
                record.input_tokens = generation.usage.input_tokens;
                record.output_tokens = generation.usage.output_tokens;
                record.cost = cost;
                if confidence < self.config.confidence_threshold {
                    record.outcome = AuditOutcome::LowConfidence;
                }
                self.audit.record(record);

                tracing::info!(tier = %tier, confidence, latency_ms, "Generation complete");
                Ok(Attempt {
                    tier,
                    generation,
                    confidence,
                    cost,
                })
            }
        }
    }

    /// Acquire a slot under the configured capacity policy.
    async fn admit(&self, tier: Tier) -> Option<SlotGuard> {
        if let Some(guard) = self.slots.try_acquire(tier) {
            return Some(guard);
        }
        let CapacityPolicy::Wait {
            max_retries,
            initial_backoff,
            max_backoff,
        } = self.config.capacity_policy
        else {
            return None;
        };

        let mut delay = initial_backoff;
        for attempt in 1..=max_retries {
            let wait = jittered(delay);
            tracing::debug!(
                tier = %tier,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "Waiting for slot"
            );
            tokio::time::sleep(wait).await;
            if let Some(guard) = self.slots.try_acquire(tier) {
                return Some(guard);
            }
            delay = (delay * 2).min(max_backoff);
        }
        None
    }

    async fn finish(
        &self,
        attempt: Attempt,
        fallback_used: bool,
        key: Option<String>,
        started: Instant,
    ) -> RouteResult {
        let Attempt {
            tier,
            generation,
            confidence,
            cost,
        } = attempt;

        // Low-confidence answers are served but never cached.
        if let (Some(key), Some(cache)) = (key, &self.cache)
            && confidence >= self.config.confidence_threshold
        {
            let value = CachedResponse {
                output: generation.text.clone(),
                tier,
                confidence,
                tool_calls: generation.tool_calls.clone(),
                reasoning_trace: generation.reasoning_trace.clone(),
            };
            cache.put(key, value, self.config.cache_ttl).await;
        }

        RouteResult {
            output: generation.text,
            tier,
            confidence,
            latency: started.elapsed(),
            cached: false,
            fallback_used,
            tool_calls: generation.tool_calls,
            reasoning_trace: generation.reasoning_trace,
            usage: generation.usage,
            cost,
        }
    }
}

/// Tailor a request to one tier. Native tool definitions only reach tiers
/// that support function calling.
fn request_for(endpoint: &EndpointConfig, request: &GenerationRequest) -> GenerationRequest {
    let mut request = request.clone();
    if !endpoint.capabilities.tools && !request.tools.is_empty() {
        tracing::debug!(tier = %endpoint.tier, "Tier has no native tool calling, omitting tools");
        request.tools.clear();
    }
    request
}

/// Backoff with jitter in `[delay / 2, delay]`.
fn jittered(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    delay.mul_f64(factor)
}

const REFUSALS: &[&str] = &[
    "i cannot",
    "i can't",
    "i am unable",
    "i'm unable",
    "as an ai",
];

const HEDGES: &[&str] = &[
    "i'm not sure",
    "i am not sure",
    "i don't know",
    "not certain",
    "might be",
    "possibly",
    "perhaps",
    "i think",
];

/// Deterministic confidence for backends that do not report one.
pub fn estimate_confidence(text: &str, has_tool_calls: bool) -> f32 {
    let text = text.trim();
    if text.is_empty() {
        return if has_tool_calls { 0.7 } else { 0.0 };
    }
    let lower = text.to_lowercase();
    if REFUSALS.iter().any(|r| lower.contains(r)) {
        return 0.2;
    }

    let mut score: f32 = 0.85;
    let hedges = HEDGES.iter().filter(|h| lower.contains(*h)).count();
    score -= 0.15 * hedges as f32;
    if text.split_whitespace().count() < 3 && !has_tool_calls {
        score -= 0.1;
    }
    score.clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::Capabilities;
    use crate::error::LlmError;
    use crate::slots::ManualClock;
    use async_trait::async_trait;
    use chrono::Utc;

    #[derive(Clone)]
    enum Reply {
        Text(&'static str, f32),
        Fail,
        Hang,
        Slow(&'static str, Duration),
    }

    struct ScriptedBackend {
        replies: HashMap<Tier, Reply>,
        calls: Mutex<Vec<Tier>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[(Tier, Reply)]) -> Arc<Self> {
            Arc::new(Self {
                replies: replies.iter().cloned().collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Tier> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        async fn generate(
            &self,
            tier: Tier,
            _endpoint: &crate::endpoints::EndpointConfig,
            _request: GenerationRequest,
        ) -> Result<Generation, LlmError> {
            self.calls.lock().unwrap().push(tier);
            match self.replies.get(&tier).cloned() {
                Some(Reply::Text(text, confidence)) => Ok(Generation::text(text)
                    .with_confidence(confidence)
                    .with_usage(1000, 1000)),
                Some(Reply::Slow(text, delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(Generation::text(text).with_confidence(0.9))
                }
                Some(Reply::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Some(Reply::Fail) | None => Err(LlmError::RequestFailed {
                    tier,
                    reason: "connection refused".into(),
                }),
            }
        }
    }

    fn registry() -> Arc<EndpointRegistry> {
        Arc::new(
            EndpointRegistry::new(vec![
                EndpointConfig::new(Tier::FastLocal, "http://fast", "small")
                    .with_slots(2)
                    .with_fallback(Tier::HeavyLocal)
                    .with_timeout(Duration::from_secs(5)),
                EndpointConfig::new(Tier::HeavyLocal, "http://heavy", "big")
                    .with_fallback(Tier::Remote),
                EndpointConfig::new(Tier::Coder, "http://coder", "code"),
                EndpointConfig::new(Tier::Remote, "https://api", "frontier")
                    .with_slots(4)
                    .with_costs(
                        rust_decimal_macros::dec!(0.003),
                        rust_decimal_macros::dec!(0.015),
                    ),
            ])
            .unwrap(),
        )
    }

    fn fail_fast() -> RouterConfig {
        RouterConfig {
            capacity_policy: CapacityPolicy::FailFast,
            ..RouterConfig::default()
        }
    }

    fn router(config: RouterConfig, backend: Arc<ScriptedBackend>) -> Router {
        let registry = registry();
        let slots = Arc::new(SlotManager::new(&registry));
        Router::new(config, registry, slots, backend)
    }

    #[tokio::test]
    async fn routes_to_default_tier() {
        let backend = ScriptedBackend::new(&[(Tier::FastLocal, Reply::Text("Paris", 0.9))]);
        let router = router(fail_fast(), backend.clone());

        let result = router.route("Capital of France?", None).await.unwrap();
        assert_eq!(result.output, "Paris");
        assert_eq!(result.tier, Tier::FastLocal);
        assert!(!result.cached && !result.fallback_used);
        assert_eq!(router.slots().active(Tier::FastLocal), 0);
        assert_eq!(router.audit().len(), 1);
    }

    #[tokio::test]
    async fn cache_hit_leaves_slot_counters_unchanged() {
        let registry = registry();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let slots = Arc::new(SlotManager::with_clock(&registry, clock.clone()));
        let backend = ScriptedBackend::new(&[(Tier::FastLocal, Reply::Text("Paris", 0.9))]);
        let router = Router::new(fail_fast(), registry, slots.clone(), backend.clone());

        router.route("Capital of France?", None).await.unwrap();
        let first_use = slots.last_used(Tier::FastLocal);
        clock.advance(chrono::Duration::seconds(30));

        let hit = router.route("  capital of   FRANCE? ", None).await.unwrap();
        assert!(hit.cached);
        assert_eq!(hit.output, "Paris");
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(slots.active(Tier::FastLocal), 0);
        assert_eq!(slots.last_used(Tier::FastLocal), first_use);

        let records = router.audit().snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].outcome, AuditOutcome::Cached);
    }

    #[tokio::test]
    async fn cached_answers_expire_on_the_injected_clock() {
        let registry = registry();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let slots = Arc::new(SlotManager::with_clock(&registry, clock.clone()));
        let backend = ScriptedBackend::new(&[(Tier::FastLocal, Reply::Text("Paris", 0.9))]);
        let config = RouterConfig {
            cache_ttl: Duration::from_secs(60),
            ..fail_fast()
        };
        let router = Router::new(config, registry, slots, backend.clone());

        router.route("Capital of France?", None).await.unwrap();
        clock.advance(chrono::Duration::seconds(59));
        assert!(router.route("Capital of France?", None).await.unwrap().cached);

        clock.advance(chrono::Duration::seconds(2));
        let fresh = router.route("Capital of France?", None).await.unwrap();
        assert!(!fresh.cached);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn context_changes_cache_key() {
        let backend = ScriptedBackend::new(&[(Tier::FastLocal, Reply::Text("ok", 0.9))]);
        let router = router(fail_fast(), backend.clone());

        router.route("Summarize", Some("doc A")).await.unwrap();
        router.route("Summarize", Some("doc B")).await.unwrap();
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn low_confidence_makes_exactly_one_fallback_attempt() {
        let backend = ScriptedBackend::new(&[
            (Tier::FastLocal, Reply::Text("maybe", 0.2)),
            (Tier::HeavyLocal, Reply::Text("probably", 0.4)),
            (Tier::Remote, Reply::Text("certainly", 0.99)),
        ]);
        let router = router(fail_fast(), backend.clone());

        let result = router.route("hard question", None).await.unwrap();
        // HeavyLocal's own fallback is never chained.
        assert_eq!(backend.calls(), vec![Tier::FastLocal, Tier::HeavyLocal]);
        assert_eq!(result.tier, Tier::HeavyLocal);
        assert!(result.fallback_used);
        assert_eq!(router.audit().len(), 2);
    }

    #[tokio::test]
    async fn keeps_primary_when_fallback_scores_lower() {
        let backend = ScriptedBackend::new(&[
            (Tier::FastLocal, Reply::Text("maybe", 0.5)),
            (Tier::HeavyLocal, Reply::Text("worse", 0.3)),
        ]);
        let router = router(fail_fast(), backend.clone());

        let result = router.route("q", None).await.unwrap();
        assert_eq!(result.tier, Tier::FastLocal);
        assert!(!result.fallback_used);
    }

    #[tokio::test]
    async fn low_confidence_results_are_not_cached() {
        let backend = ScriptedBackend::new(&[(Tier::Coder, Reply::Text("unsure", 0.1))]);
        let router = router(fail_fast(), backend.clone());
        let request = || RouteRequest::new("q").with_tier(Tier::Coder);

        router.route_request(request()).await.unwrap();
        let again = router.route_request(request()).await.unwrap();
        assert!(!again.cached);
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn generation_error_falls_back() {
        let backend = ScriptedBackend::new(&[
            (Tier::FastLocal, Reply::Fail),
            (Tier::HeavyLocal, Reply::Text("recovered", 0.9)),
        ]);
        let router = router(fail_fast(), backend.clone());

        let result = router.route("q", None).await.unwrap();
        assert_eq!(result.output, "recovered");
        assert!(result.fallback_used);
        assert_eq!(router.slots().active(Tier::FastLocal), 0);
        assert_eq!(router.slots().active(Tier::HeavyLocal), 0);
    }

    #[tokio::test]
    async fn busy_without_fallback_is_busy() {
        let backend = ScriptedBackend::new(&[(Tier::Coder, Reply::Text("x", 0.9))]);
        let router = router(fail_fast(), backend.clone());
        let _held = router.slots().try_acquire(Tier::Coder).unwrap();

        let err = router
            .route_request(RouteRequest::new("q").with_tier(Tier::Coder))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Busy { tier: Tier::Coder, max: 1 }));
        assert!(backend.calls().is_empty());
        assert!(router.audit().is_empty());
    }

    #[tokio::test]
    async fn both_tiers_busy_is_no_tier_available() {
        let backend = ScriptedBackend::new(&[]);
        let router = router(fail_fast(), backend.clone());
        let _a = router.slots().try_acquire(Tier::FastLocal).unwrap();
        let _b = router.slots().try_acquire(Tier::FastLocal).unwrap();
        let _c = router.slots().try_acquire(Tier::HeavyLocal).unwrap();

        let err = router.route("q", None).await.unwrap_err();
        match err {
            RouterError::NoTierAvailable { tried } => {
                assert_eq!(tried, vec![Tier::FastLocal, Tier::HeavyLocal])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_picks_up_released_slot() {
        let backend = ScriptedBackend::new(&[(Tier::Coder, Reply::Text("done", 0.9))]);
        let router = router(RouterConfig::default(), backend.clone());
        let held = router.slots().try_acquire(Tier::Coder).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            drop(held);
        });

        let result = router
            .route_request(RouteRequest::new("q").with_tier(Tier::Coder))
            .await
            .unwrap();
        assert_eq!(result.output, "done");
        assert_eq!(router.slots().active(Tier::Coder), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_slot() {
        let backend = ScriptedBackend::new(&[(Tier::Coder, Reply::Hang)]);
        let router = router(fail_fast(), backend.clone());

        let err = router
            .route_request(RouteRequest::new("q").with_tier(Tier::Coder))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Timeout { tier: Tier::Coder, .. }));
        assert_eq!(router.slots().active(Tier::Coder), 0);
        assert_eq!(router.audit().snapshot()[0].outcome, AuditOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_collapses_identical_requests() {
        let backend = ScriptedBackend::new(&[(
            Tier::FastLocal,
            Reply::Slow("once", Duration::from_millis(200)),
        )]);
        let router = router(
            RouterConfig {
                single_flight: true,
                ..fail_fast()
            },
            backend.clone(),
        );

        let (a, b) = tokio::join!(router.route("same", None), router.route("same", None));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(backend.calls().len(), 1);
        assert!(a.cached ^ b.cached);
    }

    #[tokio::test]
    async fn unknown_tier_rejected() {
        let backend = ScriptedBackend::new(&[]);
        let router = router(fail_fast(), backend);
        let err = router
            .route_request(RouteRequest::new("q").with_tier(Tier::Vision))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownTier { tier: Tier::Vision }));
    }

    #[tokio::test]
    async fn records_cost_estimate() {
        let backend = ScriptedBackend::new(&[(Tier::Remote, Reply::Text("answer", 0.9))]);
        let router = router(fail_fast(), backend);
        let result = router
            .route_request(RouteRequest::new("q").with_tier(Tier::Remote))
            .await
            .unwrap();
        assert_eq!(result.cost, rust_decimal_macros::dec!(0.018));
        assert_eq!(router.audit().total_cost(), rust_decimal_macros::dec!(0.018));
    }

    /// Records how many native tools each tier was offered.
    #[derive(Default)]
    struct ToolsSeen {
        seen: Mutex<Vec<(Tier, usize)>>,
    }

    #[async_trait]
    impl ModelBackend for ToolsSeen {
        async fn generate(
            &self,
            tier: Tier,
            _endpoint: &EndpointConfig,
            request: GenerationRequest,
        ) -> Result<Generation, LlmError> {
            self.seen.lock().unwrap().push((tier, request.tools.len()));
            let confidence = if tier == Tier::FastLocal { 0.1 } else { 0.9 };
            Ok(Generation::text("done").with_confidence(confidence))
        }
    }

    #[tokio::test]
    async fn native_tools_only_reach_tiers_that_support_them() {
        let tool_calling = Capabilities {
            tools: true,
            ..Capabilities::default()
        };
        let registry = Arc::new(
            EndpointRegistry::new(vec![
                EndpointConfig::new(Tier::FastLocal, "http://fast", "small")
                    .with_capabilities(tool_calling)
                    .with_fallback(Tier::Summary),
                EndpointConfig::new(Tier::Summary, "http://summary", "tiny"),
            ])
            .unwrap(),
        );
        let slots = Arc::new(SlotManager::new(&registry));
        let backend = Arc::new(ToolsSeen::default());
        let router = Router::new(fail_fast(), registry, slots, backend.clone());

        let request =
            RouteRequest::new("q").with_tools(vec![ToolDefinition::new("web_search", "Search")]);
        let result = router.route_request(request).await.unwrap();

        assert!(result.fallback_used);
        assert_eq!(
            *backend.seen.lock().unwrap(),
            vec![(Tier::FastLocal, 1), (Tier::Summary, 0)]
        );
    }

    #[test]
    fn heuristic_confidence() {
        assert_eq!(estimate_confidence("", false), 0.0);
        assert_eq!(estimate_confidence("", true), 0.7);
        assert_eq!(estimate_confidence("I cannot help with that.", false), 0.2);
        let confident = estimate_confidence("The capital of France is Paris.", false);
        let hedged = estimate_confidence("I think it might be Paris, perhaps.", false);
        assert!(confident > hedged);
        assert!(confident >= RouterConfig::default().confidence_threshold);
    }
}
