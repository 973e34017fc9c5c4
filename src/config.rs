//! Configuration types.
//!
//! Every section has a `Default`. [`Config::from_env`] layers
//! `TIER_ROUTER_*` environment overrides on top, and an optional JSON file
//! replaces the built-in endpoint table.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::endpoints::{EndpointConfig, EndpointRegistry, Tier};
use crate::error::ConfigError;

/// What the router does when the chosen tier has no free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Give up on the tier immediately (then try its fallback).
    FailFast,
    /// Retry with exponential backoff before falling back.
    Wait {
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    },
}

impl Default for CapacityPolicy {
    fn default() -> Self {
        Self::Wait {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Tier used when a request does not name one.
    pub default_tier: Tier,
    /// Results scoring below this escalate to the fallback tier.
    pub confidence_threshold: f32,
    pub capacity_policy: CapacityPolicy,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    /// Maximum entries in the built-in memory cache.
    pub cache_max_entries: usize,
    /// Serialize identical in-flight requests so only one reaches a model.
    pub single_flight: bool,
    /// Audit records kept in memory.
    pub audit_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_tier: Tier::FastLocal,
            confidence_threshold: 0.6,
            capacity_policy: CapacityPolicy::default(),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600), // 1 hour
            cache_max_entries: 1000,
            single_flight: false,
            audit_capacity: 1000,
        }
    }
}

/// Idle reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often the background loop checks for idle tiers.
    pub check_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Reasoning loop configuration.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    /// Steps replayed into the prompt each round.
    pub history_window: usize,
    /// Tool forced when freshness is required and the model skipped tools.
    pub freshness_tool: String,
    /// Argument of the freshness tool that receives the task text.
    pub freshness_arg: String,
    pub tool_timeout: Duration,
    /// Observations longer than this are truncated in the prompt.
    pub max_observation_chars: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            history_window: 6,
            freshness_tool: "web_search".to_string(),
            freshness_arg: "query".to_string(),
            tool_timeout: Duration::from_secs(60),
            max_observation_chars: 4000,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub endpoints: EndpointRegistry,
    pub router: RouterConfig,
    pub reaper: ReaperConfig,
    pub agent: AgentLoopConfig,
}

impl Config {
    /// Defaults overlaid with `TIER_ROUTER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("TIER_ROUTER_ENDPOINTS_FILE") {
            config.endpoints = load_endpoints(Path::new(&path))?;
        }

        let router = &mut config.router;
        if let Some(tier) = parse_var::<Tier>(&lookup, "TIER_ROUTER_DEFAULT_TIER")? {
            router.default_tier = tier;
        }
        if let Some(threshold) = parse_var::<f32>(&lookup, "TIER_ROUTER_CONFIDENCE_THRESHOLD")? {
            router.confidence_threshold = threshold;
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "TIER_ROUTER_CACHE_ENABLED")? {
            router.cache_enabled = enabled;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TIER_ROUTER_CACHE_TTL_SECS")? {
            router.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(single) = parse_var::<bool>(&lookup, "TIER_ROUTER_SINGLE_FLIGHT")? {
            router.single_flight = single;
        }
        if let Some(policy) = lookup("TIER_ROUTER_CAPACITY_POLICY") {
            router.capacity_policy = match policy.trim() {
                "fail_fast" | "fail-fast" => CapacityPolicy::FailFast,
                "wait" => {
                    let max_retries =
                        parse_var::<u32>(&lookup, "TIER_ROUTER_MAX_RETRIES")?.unwrap_or(3);
                    let initial_ms =
                        parse_var::<u64>(&lookup, "TIER_ROUTER_BACKOFF_MS")?.unwrap_or(100);
                    CapacityPolicy::Wait {
                        max_retries,
                        initial_backoff: Duration::from_millis(initial_ms),
                        max_backoff: Duration::from_secs(2),
                    }
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "TIER_ROUTER_CAPACITY_POLICY".to_string(),
                        message: format!("expected fail_fast or wait, got {other:?}"),
                    });
                }
            };
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "TIER_ROUTER_REAPER_INTERVAL_SECS")? {
            config.reaper.check_interval = Duration::from_secs(secs);
        }

        let agent = &mut config.agent;
        if let Some(max) = parse_var::<usize>(&lookup, "TIER_ROUTER_MAX_ITERATIONS")? {
            agent.max_iterations = max;
        }
        if let Some(window) = parse_var::<usize>(&lookup, "TIER_ROUTER_HISTORY_WINDOW")? {
            agent.history_window = window;
        }
        if let Some(tool) = lookup("TIER_ROUTER_FRESHNESS_TOOL") {
            agent.freshness_tool = tool;
        }

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoints.contains(self.router.default_tier) {
            return Err(ConfigError::InvalidValue {
                key: "router.default_tier".to_string(),
                message: format!("tier {} has no endpoint", self.router.default_tier),
            });
        }
        if !(0.0..=1.0).contains(&self.router.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "router.confidence_threshold".to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }
        if self.reaper.check_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "reaper.check_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.max_iterations".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load an endpoint table from a JSON array of [`EndpointConfig`].
pub fn load_endpoints(path: &Path) -> Result<EndpointRegistry, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let endpoints: Vec<EndpointConfig> = serde_json::from_str(&raw)
        .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
    EndpointRegistry::new(endpoints)
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let config = Config::from_lookup(lookup_from(&[
            ("TIER_ROUTER_DEFAULT_TIER", "heavy-local"),
            ("TIER_ROUTER_CONFIDENCE_THRESHOLD", "0.75"),
            ("TIER_ROUTER_CAPACITY_POLICY", "fail_fast"),
            ("TIER_ROUTER_MAX_ITERATIONS", "4"),
            ("TIER_ROUTER_FRESHNESS_TOOL", "news_lookup"),
            ("TIER_ROUTER_SINGLE_FLIGHT", "true"),
        ]))
        .unwrap();

        assert_eq!(config.router.default_tier, Tier::HeavyLocal);
        assert!((config.router.confidence_threshold - 0.75).abs() < f32::EPSILON);
        assert_eq!(config.router.capacity_policy, CapacityPolicy::FailFast);
        assert!(config.router.single_flight);
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.freshness_tool, "news_lookup");
    }

    #[test]
    fn wait_policy_reads_retry_settings() {
        let config = Config::from_lookup(lookup_from(&[
            ("TIER_ROUTER_CAPACITY_POLICY", "wait"),
            ("TIER_ROUTER_MAX_RETRIES", "7"),
            ("TIER_ROUTER_BACKOFF_MS", "25"),
        ]))
        .unwrap();
        match config.router.capacity_policy {
            CapacityPolicy::Wait {
                max_retries,
                initial_backoff,
                ..
            } => {
                assert_eq!(max_retries, 7);
                assert_eq!(initial_backoff, Duration::from_millis(25));
            }
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("TIER_ROUTER_MAX_ITERATIONS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TIER_ROUTER_MAX_ITERATIONS"));

        assert!(
            Config::from_lookup(lookup_from(&[("TIER_ROUTER_CONFIDENCE_THRESHOLD", "1.5")]))
                .is_err()
        );
        assert!(
            Config::from_lookup(lookup_from(&[("TIER_ROUTER_CAPACITY_POLICY", "yolo")])).is_err()
        );
        assert!(Config::from_lookup(lookup_from(&[("TIER_ROUTER_DEFAULT_TIER", "gpu")])).is_err());
    }

    #[test]
    fn zero_reaper_interval_is_rejected() {
        let mut config = Config::default();
        config.reaper.check_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reaper.check_interval"));

        assert!(
            Config::from_lookup(lookup_from(&[("TIER_ROUTER_REAPER_INTERVAL_SECS", "0")])).is_err()
        );
    }

    #[test]
    fn endpoints_file_replaces_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"tier": "fast_local", "base_url": "http://127.0.0.1:9000/v1", "model": "tiny", "max_slots": 2}},
                {{"tier": "remote", "base_url": "https://example.invalid/v1", "model": "big", "max_slots": 16,
                  "input_cost_per_1k": "0.001", "output_cost_per_1k": "0.002"}}
            ]"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config =
            Config::from_lookup(lookup_from(&[("TIER_ROUTER_ENDPOINTS_FILE", path.as_str())]))
                .unwrap();

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints.get(Tier::Remote).unwrap().max_slots, 16);
        assert!(config.endpoints.get(Tier::Vision).is_none());
    }

    #[test]
    fn endpoints_file_must_cover_default_tier() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"tier": "remote", "base_url": "https://x", "model": "big", "max_slots": 1}}]"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();
        let err = Config::from_lookup(lookup_from(&[("TIER_ROUTER_ENDPOINTS_FILE", path.as_str())]))
            .unwrap_err();
        assert!(err.to_string().contains("default_tier"));
    }

    #[test]
    fn malformed_endpoints_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = load_endpoints(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
