//! Error types for the tier router.

use std::time::Duration;

use crate::endpoints::Tier;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Model backend (transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Endpoint {tier} request failed: {reason}")]
    RequestFailed { tier: Tier, reason: String },

    #[error("Endpoint {tier} is not running")]
    NotRunning { tier: Tier },
}

/// Routing errors. Capacity errors are handled inside the router wherever a
/// fallback exists; these are the ones that reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Tier {tier} is busy ({max} of {max} slots in use)")]
    Busy { tier: Tier, max: usize },

    #[error("Tier {tier} is not configured")]
    UnknownTier { tier: Tier },

    #[error("Generation on {tier} timed out after {timeout:?}")]
    Timeout { tier: Tier, timeout: Duration },

    #[error("No tier available (tried: {})", format_tiers(tried))]
    NoTierAvailable { tried: Vec<Tier> },

    #[error("Generation on {tier} failed: {source}")]
    Generation {
        tier: Tier,
        #[source]
        source: LlmError,
    },
}

impl RouterError {
    /// Capacity errors can be retried later or on another tier.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::NoTierAvailable { .. })
    }
}

fn format_tiers(tiers: &[Tier]) -> String {
    tiers
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tool execution errors reported by a tool backend.
#[derive(Debug, thiserror::Error)]
pub enum ToolExecError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// Agent-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown agent role: {0}")]
    UnknownRole(String),

    #[error("Task is empty")]
    EmptyTask,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tier_available_lists_tiers() {
        let err = RouterError::NoTierAvailable {
            tried: vec![Tier::FastLocal, Tier::Remote],
        };
        assert_eq!(
            err.to_string(),
            "No tier available (tried: fast_local, remote)"
        );
        assert!(err.is_capacity());
    }

    #[test]
    fn timeout_is_not_capacity() {
        let err = RouterError::Timeout {
            tier: Tier::Coder,
            timeout: Duration::from_secs(3),
        };
        assert!(!err.is_capacity());
    }
}
