//! Agent roles: named reasoning personas with a preferred tier, a tool
//! allowlist and sampling parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::endpoints::{EndpointRegistry, Tier};
use crate::error::{AgentError, ConfigError};
use crate::tools::ToolDefinition;

/// Role used by [`TierService::run_agent`](crate::service::TierService::run_agent).
pub const DEFAULT_ROLE: &str = "general";

/// One named role. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    pub label: String,
    pub expertise: String,
    /// Supports `{label}`, `{expertise}` and `{tools}` placeholders.
    pub system_prompt: String,
    pub tier: Tier,
    /// Overrides the endpoint's own fallback when set.
    #[serde(default)]
    pub fallback: Option<Tier>,
    /// Empty means every tool in the catalog.
    #[serde(default)]
    pub tools: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl AgentRole {
    pub fn new(name: impl Into<String>, label: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            expertise: String::new(),
            system_prompt: BASE_PROMPT.to_string(),
            tier,
            fallback: None,
            tools: Vec::new(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    pub fn with_expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = expertise.into();
        self
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = template.into();
        self
    }

    pub fn with_fallback(mut self, tier: Tier) -> Self {
        self.fallback = Some(tier);
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == name)
    }

    /// Restrict a caller-supplied catalog to this role's allowlist.
    pub fn filter_catalog(&self, catalog: &[ToolDefinition]) -> Vec<ToolDefinition> {
        catalog
            .iter()
            .filter(|def| self.allows_tool(&def.name))
            .cloned()
            .collect()
    }

    /// Fill the prompt template for a run with the given tools.
    pub fn render_system_prompt(&self, catalog: &[ToolDefinition]) -> String {
        let tools = if catalog.is_empty() {
            "(no tools available)".to_string()
        } else {
            catalog
                .iter()
                .map(|def| {
                    let params: Vec<String> = def.parameters.iter().map(|p| p.summary()).collect();
                    format!("- {}: {} [{}]", def.name, def.description, params.join("; "))
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.system_prompt
            .replace("{label}", &self.label)
            .replace("{expertise}", &self.expertise)
            .replace("{tools}", &tools)
    }
}

const BASE_PROMPT: &str = "You are {label}. {expertise}

You can use these tools:
{tools}

Use this format:
Thought: your reasoning
Action: the tool name
Action Input: the tool arguments as a JSON object

After a tool result arrives as an Observation, continue reasoning.
When you know the answer, reply with:
Final Answer: the answer";

/// Read-only set of roles, keyed by name.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    roles: BTreeMap<String, AgentRole>,
}

impl AgentRegistry {
    pub fn new(roles: Vec<AgentRole>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for role in roles {
            if role.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "agents".into(),
                    message: "role name must not be empty".into(),
                });
            }
            if role.fallback == Some(role.tier) {
                return Err(ConfigError::InvalidValue {
                    key: format!("agents.{}.fallback", role.name),
                    message: "fallback must differ from the primary tier".into(),
                });
            }
            let name = role.name.clone();
            if map.insert(name.clone(), role).is_some() {
                return Err(ConfigError::InvalidValue {
                    key: format!("agents.{name}"),
                    message: "duplicate role".into(),
                });
            }
        }
        Ok(Self { roles: map })
    }

    /// Built-in roles: a general assistant, a researcher, a coder, a vision
    /// analyst and a summarizer.
    pub fn defaults() -> Self {
        let roles = [
            AgentRole::new(DEFAULT_ROLE, "a helpful assistant", Tier::FastLocal)
                .with_expertise("Answer concisely and use tools when facts may be stale.")
                .with_sampling(1024, 0.7),
            AgentRole::new("researcher", "a research analyst", Tier::HeavyLocal)
                .with_expertise("You verify claims against current sources before answering.")
                .with_fallback(Tier::Remote)
                .with_tools(["web_search", "fetch_url"])
                .with_sampling(2048, 0.3),
            AgentRole::new("coder", "a senior software engineer", Tier::Coder)
                .with_expertise("You write correct, idiomatic code and explain trade-offs briefly.")
                .with_fallback(Tier::HeavyLocal)
                .with_sampling(4096, 0.2),
            AgentRole::new("vision", "an image analyst", Tier::Vision)
                .with_expertise("You describe and reason about images precisely.")
                .with_fallback(Tier::Remote)
                .with_sampling(1024, 0.4),
            AgentRole::new("summarizer", "a summarization specialist", Tier::Summary)
                .with_expertise("You condense long material without losing key facts.")
                .with_sampling(768, 0.3),
        ];
        let roles = roles.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { roles }
    }

    pub fn get(&self, name: &str) -> Option<&AgentRole> {
        self.roles.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&AgentRole, AgentError> {
        self.get(name)
            .ok_or_else(|| AgentError::UnknownRole(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Every role must point at configured tiers.
    pub fn check_tiers(&self, endpoints: &EndpointRegistry) -> Result<(), ConfigError> {
        for role in self.roles.values() {
            for tier in std::iter::once(role.tier).chain(role.fallback) {
                if !endpoints.contains(tier) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("agents.{}", role.name),
                        message: format!("tier {tier} is not configured"),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::defaults()
    }
}
