//! Broadcast and layered topologies
//!
//! The builder reuses previously stored agent ids before minting new ones,
//! so rebuilding the same shape never creates duplicates.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::platform::AgentPlatform;
use crate::types::{AgentId, AgentRole};

/// Which communication shape is benchmarked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Publisher agents fan every event out to all subscribers
    #[default]
    Broadcast,
    /// One leader relays every event to its sub-agents
    Layered,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Broadcast => "broadcast",
            TopologyKind::Layered => "layered",
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyKind {
    type Err = BenchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(TopologyKind::Broadcast),
            "layered" => Ok(TopologyKind::Layered),
            other => Err(BenchError::Config(format!(
                "unknown topology '{}', use broadcast or layered",
                other
            ))),
        }
    }
}

/// Agent ids kept between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredAgentIds {
    pub publishers: Vec<AgentId>,
    pub subscribers: Vec<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<AgentId>,
    pub sub_agents: Vec<AgentId>,
}

impl StoredAgentIds {
    /// Load stored ids; a missing file yields an empty set
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let ids: StoredAgentIds = serde_json::from_str(&content)?;
        Ok(ids)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Take the first `count` ids from `stored`, minting and appending any missing
fn take_or_extend(stored: &mut Vec<AgentId>, count: usize) -> Vec<AgentId> {
    while stored.len() < count {
        stored.push(AgentId::new());
    }
    stored[..count].to_vec()
}

/// A provisioned topology for one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub kind: TopologyKind,
    /// Agents producers publish to
    pub entry_agents: Vec<AgentId>,
    /// Agents whose receipt counters make up the delivered total
    pub receivers: Vec<AgentId>,
    pub leader: Option<AgentId>,
}

impl Topology {
    /// Receipts expected at the receiving tier per published event
    pub fn fan_out(&self) -> usize {
        self.receivers.len()
    }

    pub fn all_agents(&self) -> Vec<AgentId> {
        let mut all = self.entry_agents.clone();
        all.extend(self.receivers.iter().copied());
        all
    }
}

/// Provisions topologies against an [`AgentPlatform`]
pub struct TopologyBuilder {
    platform: Arc<dyn AgentPlatform>,
    stored: StoredAgentIds,
}

impl TopologyBuilder {
    pub fn new(platform: Arc<dyn AgentPlatform>, stored: StoredAgentIds) -> Self {
        Self { platform, stored }
    }

    pub fn stored(&self) -> &StoredAgentIds {
        &self.stored
    }

    /// `publishers` publisher agents, each registered to all `subscribers`
    pub async fn build_broadcast(&mut self, publishers: u32, subscribers: u32) -> Result<Topology> {
        let publisher_ids = take_or_extend(&mut self.stored.publishers, publishers as usize);
        let subscriber_ids = take_or_extend(&mut self.stored.subscribers, subscribers as usize);

        for id in &publisher_ids {
            self.create(*id, AgentRole::BroadcastPublisher).await?;
        }
        for id in &subscriber_ids {
            self.create(*id, AgentRole::BroadcastSubscriber).await?;
        }
        for id in &publisher_ids {
            self.platform
                .register(*id, &subscriber_ids)
                .await
                .map_err(|e| BenchError::Setup(format!("registering subscribers under {}: {}", id, e)))?;
        }

        info!(
            publishers = publisher_ids.len(),
            subscribers = subscriber_ids.len(),
            "Broadcast topology ready"
        );
        Ok(Topology {
            kind: TopologyKind::Broadcast,
            entry_agents: publisher_ids,
            receivers: subscriber_ids,
            leader: None,
        })
    }

    /// One leader with `sub_agents` registered under it
    pub async fn build_layered(&mut self, sub_agents: u32) -> Result<Topology> {
        let leader = *self.stored.leader.get_or_insert_with(AgentId::new);
        let sub_agent_ids = take_or_extend(&mut self.stored.sub_agents, sub_agents as usize);

        self.create(leader, AgentRole::LayeredLeader).await?;
        for id in &sub_agent_ids {
            self.create(*id, AgentRole::LayeredSubAgent).await?;
        }
        self.platform
            .register(leader, &sub_agent_ids)
            .await
            .map_err(|e| BenchError::Setup(format!("registering sub-agents under {}: {}", leader, e)))?;

        info!(leader = %leader.short(), sub_agents = sub_agent_ids.len(), "Layered topology ready");
        Ok(Topology {
            kind: TopologyKind::Layered,
            entry_agents: vec![leader],
            receivers: sub_agent_ids,
            leader: Some(leader),
        })
    }

    pub async fn build(&mut self, kind: TopologyKind, publishers: u32, level: u32) -> Result<Topology> {
        match kind {
            TopologyKind::Broadcast => self.build_broadcast(publishers, level).await,
            TopologyKind::Layered => self.build_layered(level).await,
        }
    }

    async fn create(&self, id: AgentId, role: AgentRole) -> Result<()> {
        self.platform
            .create(id, role)
            .await
            .map_err(|e| BenchError::Setup(format!("creating {} {}: {}", role, id, e)))?;
        debug!(agent = %id.short(), role = %role, "Agent ready");
        Ok(())
    }
}
