//! The agent platform under test
//!
//! The orchestrator only sees the platform through [`AgentPlatform`]. Agents
//! come in four tagged roles; every role answers the same five operations.

mod simulated;

pub use simulated::{SimulatedPlatform, SimulationProfile};

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{AgentId, AgentMetricsSnapshot, AgentRole, EventEnvelope, PublishAck};

/// Handle returned by `create`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentHandle {
    pub id: AgentId,
    pub role: AgentRole,
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Remote operations exposed by the agent platform
#[async_trait]
pub trait AgentPlatform: Send + Sync {
    /// Activate (or look up) the agent with this id and role
    async fn create(&self, id: AgentId, role: AgentRole) -> PlatformResult<AgentHandle>;

    /// Register `children` as recipients of `parent`
    async fn register(&self, parent: AgentId, children: &[AgentId]) -> PlatformResult<()>;

    /// Hand one event to an entry agent
    async fn publish(&self, target: AgentId, envelope: EventEnvelope) -> PlatformResult<PublishAck>;

    async fn get_metrics(&self, id: AgentId) -> PlatformResult<AgentMetricsSnapshot>;

    async fn reset_metrics(&self, id: AgentId) -> PlatformResult<()>;
}
