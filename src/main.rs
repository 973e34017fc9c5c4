use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use tier_router::config::Config;
use tier_router::error::LlmError;
use tier_router::llm::{Generation, GenerationRequest, ModelBackend};
use tier_router::tools::ToolRegistry;
use tier_router::{EndpointConfig, ServiceDeps, Tier, TierService};

/// The binary only checks configuration; no model server is attached.
struct Detached;

#[async_trait]
impl ModelBackend for Detached {
    async fn generate(
        &self,
        tier: Tier,
        _endpoint: &EndpointConfig,
        _request: GenerationRequest,
    ) -> Result<Generation, LlmError> {
        Err(LlmError::NotRunning { tier })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;

    eprintln!("Tier Router v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Capacity policy: {:?}", config.router.capacity_policy);
    eprintln!(
        "   Reaper interval: {}s",
        config.reaper.check_interval.as_secs()
    );

    let service = TierService::new(
        config,
        ServiceDeps::new(Arc::new(Detached), Arc::new(ToolRegistry::new())),
    )?;

    for endpoint in service.list_endpoints() {
        tracing::info!(
            tier = %endpoint.tier,
            model = %endpoint.model,
            url = %endpoint.base_url,
            max_slots = endpoint.max_slots,
            idle_shutdown_secs = endpoint.idle_shutdown_secs,
            fallback = ?endpoint.fallback,
            "Endpoint configured"
        );
    }

    let report = json!({
        "endpoints": service.list_endpoints(),
        "roles": service.agents().len(),
        "status": service.status(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
