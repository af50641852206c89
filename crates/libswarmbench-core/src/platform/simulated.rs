//! In-process agent platform
//!
//! Stands in for a real actor runtime. Delivery is immediate when no hop
//! delay is configured; otherwise every hop is a spawned timer task, so
//! receipts trail the publish acknowledgement the way a remote system's do.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AgentHandle, AgentPlatform, PlatformResult};
use crate::error::{BenchError, PlatformError, Result};
use crate::types::{
    now_micros, AgentId, AgentMetricsSnapshot, AgentRole, EventEnvelope, LatencySample, PublishAck,
};

/// Behaviour knobs for the simulated platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationProfile {
    /// Fixed delay per hop
    pub hop_delay_ms: u64,
    /// Uniform extra delay in `0..=jitter_ms` per hop
    pub jitter_ms: u64,
    /// Probability that a publish call is rejected
    pub failure_rate: f64,
    /// Offset added to every receiver's clock
    pub clock_skew_ms: i64,
    /// Refuse to activate more than this many agents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_agents: Option<usize>,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            hop_delay_ms: 0,
            jitter_ms: 0,
            failure_rate: 0.0,
            clock_skew_ms: 0,
            max_agents: None,
        }
    }
}

impl SimulationProfile {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(BenchError::Config(format!(
                "failure rate must be between 0.0 and 1.0, got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }

    fn hop_delay(&self) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.hop_delay_ms + jitter)
    }

    fn should_reject(&self) -> bool {
        self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate)
    }
}

struct SimAgent {
    id: AgentId,
    role: AgentRole,
    children: RwLock<Vec<AgentId>>,
    received: AtomicU64,
    forwarded: AtomicU64,
    samples: Mutex<Vec<LatencySample>>,
    seen: Mutex<HashSet<String>>,
    offline: AtomicBool,
}

impl SimAgent {
    fn new(id: AgentId, role: AgentRole) -> Self {
        Self {
            id,
            role,
            children: RwLock::new(Vec::new()),
            received: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Record a receipt; false for a duplicate correlation id
    fn record_receipt(&self, envelope: &EventEnvelope, received_at_us: i64) -> bool {
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen.insert(envelope.correlation_id.clone()),
            Err(_) => return false,
        };
        if !fresh {
            debug!(
                agent = %self.id.short(),
                correlation_id = %envelope.correlation_id,
                "Duplicate delivery ignored"
            );
            return false;
        }

        self.received.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.lock() {
            samples.push(LatencySample {
                correlation_id: envelope.correlation_id.clone(),
                event_number: envelope.sequence,
                latency_ms: envelope.latency_ms(received_at_us),
            });
        }
        true
    }

    fn children(&self) -> Vec<AgentId> {
        self.children.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn snapshot(&self) -> AgentMetricsSnapshot {
        let samples = self.samples.lock().map(|s| s.clone()).unwrap_or_default();
        AgentMetricsSnapshot::from_samples(
            self.received.load(Ordering::Relaxed),
            self.forwarded.load(Ordering::Relaxed),
            samples,
        )
    }

    fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.forwarded.store(0, Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.lock() {
            samples.clear();
        }
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }

    fn ensure_online(&self) -> PlatformResult<()> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(PlatformError::Unavailable(format!("agent {} is offline", self.id)));
        }
        Ok(())
    }
}

struct Shared {
    agents: RwLock<HashMap<AgentId, Arc<SimAgent>>>,
    profile: SimulationProfile,
}

impl Shared {
    fn agent(&self, id: AgentId) -> PlatformResult<Arc<SimAgent>> {
        self.agents
            .read()
            .ok()
            .and_then(|agents| agents.get(&id).cloned())
            .ok_or(PlatformError::UnknownAgent(id))
    }

    /// Send `envelope` one hop to `agent`
    fn dispatch(self: &Arc<Self>, agent: Arc<SimAgent>, envelope: EventEnvelope) {
        let delay = self.profile.hop_delay();
        if delay.is_zero() {
            self.arrive(&agent, envelope);
        } else {
            let shared = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.arrive(&agent, envelope);
            });
        }
    }

    fn arrive(self: &Arc<Self>, agent: &SimAgent, envelope: EventEnvelope) {
        let received_at = now_micros() + self.profile.clock_skew_ms * 1000;
        if !agent.record_receipt(&envelope, received_at) {
            return;
        }
        if agent.role == AgentRole::LayeredLeader {
            self.fan_out(agent, envelope.restamped());
        }
    }

    fn fan_out(self: &Arc<Self>, from: &SimAgent, envelope: EventEnvelope) -> usize {
        let children = from.children();
        from.forwarded.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        for child_id in children {
            match self.agent(child_id) {
                Ok(child) => {
                    self.dispatch(child, envelope.clone());
                    delivered += 1;
                }
                Err(e) => warn!(from = %from.id.short(), "Dropping delivery: {}", e),
            }
        }
        delivered
    }
}

/// Agent platform simulated inside this process
#[derive(Clone)]
pub struct SimulatedPlatform {
    shared: Arc<Shared>,
}

impl SimulatedPlatform {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            shared: Arc::new(Shared {
                agents: RwLock::new(HashMap::new()),
                profile,
            }),
        }
    }

    pub fn profile(&self) -> &SimulationProfile {
        &self.shared.profile
    }

    /// Number of activated agents
    pub fn agent_count(&self) -> usize {
        self.shared.agents.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Registered children of `parent`
    pub fn children_of(&self, parent: AgentId) -> Vec<AgentId> {
        self.shared
            .agent(parent)
            .map(|a| a.children())
            .unwrap_or_default()
    }

    /// Make metrics calls against `id` fail until brought back online
    pub fn set_offline(&self, id: AgentId, offline: bool) -> PlatformResult<()> {
        let agent = self.shared.agent(id)?;
        agent.offline.store(offline, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(SimulationProfile::default())
    }
}

fn expected_child_role(parent: AgentRole) -> Option<AgentRole> {
    match parent {
        AgentRole::BroadcastPublisher => Some(AgentRole::BroadcastSubscriber),
        AgentRole::LayeredLeader => Some(AgentRole::LayeredSubAgent),
        _ => None,
    }
}

#[async_trait]
impl AgentPlatform for SimulatedPlatform {
    async fn create(&self, id: AgentId, role: AgentRole) -> PlatformResult<AgentHandle> {
        let mut agents = self
            .shared
            .agents
            .write()
            .map_err(|_| PlatformError::Unavailable("agent table poisoned".to_string()))?;

        if let Some(existing) = agents.get(&id) {
            if existing.role != role {
                return Err(PlatformError::RoleMismatch {
                    id,
                    expected: role,
                    actual: existing.role,
                });
            }
            return Ok(AgentHandle { id, role });
        }

        if let Some(max) = self.shared.profile.max_agents {
            if agents.len() >= max {
                return Err(PlatformError::Unavailable(format!(
                    "agent limit of {} reached",
                    max
                )));
            }
        }

        agents.insert(id, Arc::new(SimAgent::new(id, role)));
        debug!(agent = %id.short(), role = %role, "Agent activated");
        Ok(AgentHandle { id, role })
    }

    async fn register(&self, parent: AgentId, children: &[AgentId]) -> PlatformResult<()> {
        let parent_agent = self.shared.agent(parent)?;
        let child_role = expected_child_role(parent_agent.role).ok_or(PlatformError::RoleMismatch {
            id: parent,
            expected: AgentRole::LayeredLeader,
            actual: parent_agent.role,
        })?;

        for child in children {
            let agent = self.shared.agent(*child)?;
            if agent.role != child_role {
                return Err(PlatformError::RoleMismatch {
                    id: *child,
                    expected: child_role,
                    actual: agent.role,
                });
            }
        }

        let mut registered = parent_agent
            .children
            .write()
            .map_err(|_| PlatformError::Unavailable("registration table poisoned".to_string()))?;
        for child in children {
            if !registered.contains(child) {
                registered.push(*child);
            }
        }
        Ok(())
    }

    async fn publish(&self, target: AgentId, envelope: EventEnvelope) -> PlatformResult<PublishAck> {
        let agent = self.shared.agent(target)?;
        if !agent.role.is_entry() {
            let expected = match agent.role {
                AgentRole::LayeredSubAgent => AgentRole::LayeredLeader,
                _ => AgentRole::BroadcastPublisher,
            };
            return Err(PlatformError::RoleMismatch {
                id: target,
                expected,
                actual: agent.role,
            });
        }
        if self.shared.profile.should_reject() {
            return Err(PlatformError::Rejected(target));
        }

        let correlation_id = envelope.correlation_id.clone();
        let delivered_to = match agent.role {
            AgentRole::BroadcastPublisher => self.shared.fan_out(&agent, envelope),
            _ => {
                self.shared.dispatch(Arc::clone(&agent), envelope);
                1
            }
        };

        Ok(PublishAck {
            correlation_id,
            delivered_to,
        })
    }

    async fn get_metrics(&self, id: AgentId) -> PlatformResult<AgentMetricsSnapshot> {
        let agent = self.shared.agent(id)?;
        agent.ensure_online()?;
        Ok(agent.snapshot())
    }

    async fn reset_metrics(&self, id: AgentId) -> PlatformResult<()> {
        let agent = self.shared.agent(id)?;
        agent.ensure_online()?;
        agent.reset();
        Ok(())
    }
}
