//! Endpoint registry: static description of every model tier.
//!
//! Loaded once at startup and shared read-only. Live counters are owned by
//! the [`SlotManager`](crate::slots::SlotManager), not by this registry.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A named class of model-serving capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FastLocal,
    HeavyLocal,
    Vision,
    Coder,
    Summary,
    Remote,
}

impl Tier {
    pub const ALL: [Tier; 6] = [
        Tier::FastLocal,
        Tier::HeavyLocal,
        Tier::Vision,
        Tier::Coder,
        Tier::Summary,
        Tier::Remote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastLocal => "fast_local",
            Self::HeavyLocal => "heavy_local",
            Self::Vision => "vision",
            Self::Coder => "coder",
            Self::Summary => "summary",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownTier(s.to_string()))
    }
}

/// Capability flags advertised by an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub vision: bool,
    /// Emits an internal reasoning trace (`<think>` blocks).
    #[serde(default)]
    pub thinking: bool,
}

/// Static configuration for one tier's serving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub tier: Tier,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Hard concurrency ceiling.
    pub max_slots: usize,
    /// Seconds idle before the reaper shuts the endpoint down (0 = never).
    #[serde(default)]
    pub idle_shutdown_secs: u64,
    /// Tier to escalate to on failure or low confidence.
    #[serde(default)]
    pub fallback: Option<Tier>,
    /// Cost per 1k input tokens.
    #[serde(default)]
    pub input_cost_per_1k: Decimal,
    /// Cost per 1k output tokens.
    #[serde(default)]
    pub output_cost_per_1k: Decimal,
    /// Per-call generation timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl EndpointConfig {
    pub fn new(tier: Tier, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            tier,
            base_url: base_url.into(),
            model: model.into(),
            capabilities: Capabilities::default(),
            max_slots: 1,
            idle_shutdown_secs: 0,
            fallback: None,
            input_cost_per_1k: Decimal::ZERO,
            output_cost_per_1k: Decimal::ZERO,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    pub fn with_idle_shutdown(mut self, secs: u64) -> Self {
        self.idle_shutdown_secs = secs;
        self
    }

    pub fn with_fallback(mut self, tier: Tier) -> Self {
        self.fallback = Some(tier);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_costs(mut self, input_per_1k: Decimal, output_per_1k: Decimal) -> Self {
        self.input_cost_per_1k = input_per_1k;
        self.output_cost_per_1k = output_per_1k;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Estimated cost of a call with the given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> Decimal {
        let thousand = dec!(1000);
        self.input_cost_per_1k * Decimal::from(input_tokens) / thousand
            + self.output_cost_per_1k * Decimal::from(output_tokens) / thousand
    }
}

/// Read-only table of endpoint configurations, one per tier.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: BTreeMap<Tier, EndpointConfig>,
}

impl EndpointRegistry {
    /// Build a registry, rejecting duplicate tiers, zero capacity and
    /// dangling fallbacks.
    pub fn new(endpoints: Vec<EndpointConfig>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for endpoint in endpoints {
            if endpoint.max_slots == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}.max_slots", endpoint.tier),
                    message: "must be at least 1".to_string(),
                });
            }
            if endpoint.fallback == Some(endpoint.tier) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}.fallback", endpoint.tier),
                    message: "a tier cannot fall back to itself".to_string(),
                });
            }
            let tier = endpoint.tier;
            if map.insert(tier, endpoint).is_some() {
                return Err(ConfigError::InvalidValue {
                    key: tier.to_string(),
                    message: "tier configured twice".to_string(),
                });
            }
        }

        for endpoint in map.values() {
            if let Some(fallback) = endpoint.fallback
                && !map.contains_key(&fallback)
            {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}.fallback", endpoint.tier),
                    message: format!("fallback tier {fallback} is not configured"),
                });
            }
        }

        Ok(Self { endpoints: map })
    }

    /// The default local fleet plus a remote escape hatch.
    pub fn defaults() -> Self {
        let local_tools = Capabilities {
            tools: true,
            vision: false,
            thinking: false,
        };
        let endpoints = vec![
            EndpointConfig::new(Tier::FastLocal, "http://127.0.0.1:8080/v1", "qwen2.5-3b-instruct")
                .with_slots(4)
                .with_capabilities(local_tools)
                .with_fallback(Tier::HeavyLocal)
                .with_timeout(Duration::from_secs(60)),
            EndpointConfig::new(
                Tier::HeavyLocal,
                "http://127.0.0.1:8081/v1",
                "qwen2.5-32b-instruct",
            )
            .with_slots(1)
            .with_capabilities(Capabilities {
                thinking: true,
                ..local_tools
            })
            .with_idle_shutdown(900)
            .with_fallback(Tier::Remote),
            EndpointConfig::new(Tier::Vision, "http://127.0.0.1:8082/v1", "qwen2.5-vl-7b")
                .with_slots(1)
                .with_capabilities(Capabilities {
                    vision: true,
                    ..Capabilities::default()
                })
                .with_idle_shutdown(600)
                .with_fallback(Tier::Remote),
            EndpointConfig::new(Tier::Coder, "http://127.0.0.1:8083/v1", "qwen2.5-coder-14b")
                .with_slots(2)
                .with_capabilities(local_tools)
                .with_idle_shutdown(900)
                .with_fallback(Tier::HeavyLocal),
            EndpointConfig::new(Tier::Summary, "http://127.0.0.1:8084/v1", "llama-3.2-3b")
                .with_slots(2)
                .with_idle_shutdown(600)
                .with_fallback(Tier::FastLocal),
            EndpointConfig::new(Tier::Remote, "https://api.anthropic.com/v1", "claude-sonnet-4")
                .with_slots(8)
                .with_capabilities(Capabilities {
                    tools: true,
                    vision: true,
                    thinking: true,
                })
                .with_costs(dec!(0.003), dec!(0.015)),
        ];
        // Static table above is known-valid.
        Self {
            endpoints: endpoints.into_iter().map(|e| (e.tier, e)).collect(),
        }
    }

    pub fn get(&self, tier: Tier) -> Option<&EndpointConfig> {
        self.endpoints.get(&tier)
    }

    pub fn contains(&self, tier: Tier) -> bool {
        self.endpoints.contains_key(&tier)
    }

    pub fn tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.endpoints.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn fallback_for(&self, tier: Tier) -> Option<Tier> {
        self.endpoints.get(&tier).and_then(|e| e.fallback)
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_parses_both_spellings() {
        assert_eq!("fast-local".parse::<Tier>().unwrap(), Tier::FastLocal);
        assert_eq!("HEAVY_LOCAL".parse::<Tier>().unwrap(), Tier::HeavyLocal);
        assert!("gpu".parse::<Tier>().is_err());
    }

    #[test]
    fn tier_serializes_snake_case() {
        let json = serde_json::to_string(&Tier::HeavyLocal).unwrap();
        assert_eq!(json, "\"heavy_local\"");
    }

    #[test]
    fn defaults_pass_validation() {
        let defaults = EndpointRegistry::defaults();
        let rebuilt = EndpointRegistry::new(defaults.iter().cloned().collect());
        assert!(rebuilt.is_ok());
        assert_eq!(defaults.len(), Tier::ALL.len());
    }

    #[test]
    fn rejects_zero_slots() {
        let endpoint = EndpointConfig::new(Tier::Coder, "http://x", "m").with_slots(0);
        assert!(EndpointRegistry::new(vec![endpoint]).is_err());
    }

    #[test]
    fn rejects_dangling_fallback() {
        let endpoint =
            EndpointConfig::new(Tier::Coder, "http://x", "m").with_fallback(Tier::Remote);
        let err = EndpointRegistry::new(vec![endpoint]).unwrap_err();
        assert!(err.to_string().contains("remote"));
    }

    #[test]
    fn rejects_duplicate_tier() {
        let a = EndpointConfig::new(Tier::Coder, "http://a", "m");
        let b = EndpointConfig::new(Tier::Coder, "http://b", "m");
        assert!(EndpointRegistry::new(vec![a, b]).is_err());
    }

    #[test]
    fn estimate_cost_scales_per_thousand() {
        let endpoint = EndpointConfig::new(Tier::Remote, "http://x", "m")
            .with_costs(dec!(0.003), dec!(0.015));
        assert_eq!(endpoint.estimate_cost(1000, 2000), dec!(0.033));
        assert_eq!(endpoint.estimate_cost(0, 0), Decimal::ZERO);
    }

    #[test]
    fn endpoint_config_deserializes_with_defaults() {
        let json = r#"{
            "tier": "vision",
            "base_url": "http://127.0.0.1:9000/v1",
            "model": "llava",
            "max_slots": 2
        }"#;
        let endpoint: EndpointConfig = serde_json::from_str(json).unwrap();
        assert_eq!(endpoint.tier, Tier::Vision);
        assert_eq!(endpoint.idle_shutdown_secs, 0);
        assert_eq!(endpoint.timeout_secs, 120);
        assert!(endpoint.fallback.is_none());
        assert!(!endpoint.capabilities.tools);
    }
}
