//! Service facade: one object wiring the registry, slots, router, reaper
//! and reasoning loop together.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::agent::{AgentRun, ReasoningLoop};
use crate::agents::{AgentRegistry, DEFAULT_ROLE};
use crate::audit::AuditRecord;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::endpoints::{EndpointConfig, EndpointRegistry};
use crate::error::{AgentError, Error, RouterError};
use crate::llm::ModelBackend;
use crate::reaper::{IdleReaper, LoggingShutdown, ShutdownHandler};
use crate::router::{RouteRequest, RouteResult, Router};
use crate::slots::{Clock, EndpointStatus, SlotManager, SystemClock};
use crate::tools::{ToolDefinition, ToolExecutor};

/// External collaborators of the service.
///
/// Bundles the injected components to reduce argument count.
pub struct ServiceDeps {
    pub backend: Arc<dyn ModelBackend>,
    pub tools: Arc<dyn ToolExecutor>,
    pub shutdown: Arc<dyn ShutdownHandler>,
    /// Replaces the built-in memory cache when set.
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub clock: Arc<dyn Clock>,
    pub agents: AgentRegistry,
}

impl ServiceDeps {
    pub fn new(backend: Arc<dyn ModelBackend>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            backend,
            tools,
            shutdown: Arc::new(LoggingShutdown),
            cache: None,
            clock: Arc::new(SystemClock),
            agents: AgentRegistry::defaults(),
        }
    }

    pub fn with_shutdown(mut self, handler: Arc<dyn ShutdownHandler>) -> Self {
        self.shutdown = handler;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }
}

/// The public surface of the crate.
pub struct TierService {
    registry: Arc<EndpointRegistry>,
    agents: AgentRegistry,
    slots: Arc<SlotManager>,
    router: Arc<Router>,
    reasoning: ReasoningLoop,
    reaper: Arc<IdleReaper>,
}

impl TierService {
    /// Validate the configuration and wire every component. Does not start
    /// the reaper.
    pub fn new(config: Config, deps: ServiceDeps) -> Result<Self, Error> {
        config.validate()?;
        deps.agents.check_tiers(&config.endpoints)?;

        let Config {
            endpoints,
            router: router_config,
            reaper: reaper_config,
            agent: agent_config,
        } = config;

        let registry = Arc::new(endpoints);
        let slots = Arc::new(SlotManager::with_clock(&registry, deps.clock));
        let mut router = Router::new(
            router_config,
            Arc::clone(&registry),
            Arc::clone(&slots),
            deps.backend,
        );
        if let Some(cache) = deps.cache {
            router = router.with_cache(cache);
        }
        let router = Arc::new(router);
        let reasoning = ReasoningLoop::new(Arc::clone(&router), deps.tools, agent_config);
        let reaper = Arc::new(IdleReaper::new(
            reaper_config,
            Arc::clone(&registry),
            Arc::clone(&slots),
            deps.shutdown,
        ));

        tracing::info!(
            tiers = registry.len(),
            roles = deps.agents.len(),
            "Tier service ready"
        );

        Ok(Self {
            registry,
            agents: deps.agents,
            slots,
            router,
            reasoning,
            reaper,
        })
    }

    pub async fn route(
        &self,
        prompt: &str,
        context: Option<&str>,
    ) -> Result<RouteResult, RouterError> {
        self.router.route(prompt, context).await
    }

    pub async fn route_request(&self, request: RouteRequest) -> Result<RouteResult, RouterError> {
        self.router.route_request(request).await
    }

    /// Run the default role on `task`.
    pub async fn run_agent(
        &self,
        task: &str,
        freshness_required: bool,
        catalog: &[ToolDefinition],
    ) -> Result<AgentRun, AgentError> {
        self.run_agent_as(DEFAULT_ROLE, task, freshness_required, catalog)
            .await
    }

    pub async fn run_agent_as(
        &self,
        role: &str,
        task: &str,
        freshness_required: bool,
        catalog: &[ToolDefinition],
    ) -> Result<AgentRun, AgentError> {
        let role = self.agents.require(role)?;
        self.reasoning
            .run(role, task, freshness_required, catalog)
            .await
    }

    /// Slot status for every tier.
    pub fn status(&self) -> Vec<EndpointStatus> {
        self.slots.status_all()
    }

    pub fn list_endpoints(&self) -> Vec<EndpointConfig> {
        self.registry.iter().cloned().collect()
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.router.audit().snapshot()
    }

    pub fn total_cost(&self) -> Decimal {
        self.router.audit().total_cost()
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn reaper(&self) -> &Arc<IdleReaper> {
        &self.reaper
    }

    /// Start the idle reaper. Must be called inside a tokio runtime.
    pub fn start_reaper(&self) -> bool {
        self.reaper.start()
    }

    pub fn stop_reaper(&self) -> bool {
        self.reaper.stop()
    }
}
