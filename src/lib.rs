//! Tier Router: capacity-aware routing across a fleet of model endpoints,
//! with a bounded tool-using reasoning loop on top.

pub mod agent;
pub mod agents;
pub mod audit;
pub mod cache;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod llm;
pub mod reaper;
pub mod router;
pub mod service;
pub mod slots;
pub mod tools;

pub use config::Config;
pub use endpoints::{EndpointConfig, EndpointRegistry, Tier};
pub use error::{Error, Result};
pub use router::{RouteRequest, RouteResult, Router};
pub use service::{ServiceDeps, TierService};
