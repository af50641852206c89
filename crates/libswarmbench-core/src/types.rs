//! Identifiers and wire types exchanged with the agent platform

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque agent identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex chars, for log lines
    pub fn short(&self) -> String {
        let s = self.0.simple().to_string();
        s[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The capability variant an agent is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    BroadcastPublisher,
    BroadcastSubscriber,
    LayeredLeader,
    LayeredSubAgent,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::BroadcastPublisher => "broadcast-publisher",
            AgentRole::BroadcastSubscriber => "broadcast-subscriber",
            AgentRole::LayeredLeader => "layered-leader",
            AgentRole::LayeredSubAgent => "layered-sub-agent",
        }
    }

    /// Roles that accept `publish` calls from a producer
    pub fn is_entry(&self) -> bool {
        matches!(self, AgentRole::BroadcastPublisher | AgentRole::LayeredLeader)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event as sent by a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub publisher_id: u32,
    pub correlation_id: String,
    /// Wall-clock send time, microseconds since the Unix epoch
    pub sent_at_us: i64,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time and a fresh correlation id
    pub fn new(publisher_id: u32, sequence: u64) -> Self {
        Self::with_correlation(publisher_id, sequence, Uuid::new_v4().to_string())
    }

    pub fn with_correlation(publisher_id: u32, sequence: u64, correlation_id: String) -> Self {
        Self {
            sequence,
            publisher_id,
            correlation_id,
            sent_at_us: now_micros(),
        }
    }

    /// Copy of this envelope with a new send timestamp, used when relaying a hop
    pub fn restamped(&self) -> Self {
        Self {
            sent_at_us: now_micros(),
            ..self.clone()
        }
    }

    /// Latency in milliseconds between the send stamp and `received_at_us`.
    /// Negative when the receiver's clock is behind the sender's.
    pub fn latency_ms(&self, received_at_us: i64) -> f64 {
        (received_at_us - self.sent_at_us) as f64 / 1000.0
    }
}

/// A receive-side latency measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub correlation_id: String,
    pub event_number: u64,
    pub latency_ms: f64,
}

impl LatencySample {
    pub fn is_clock_skewed(&self) -> bool {
        self.latency_ms < 0.0
    }
}

/// Counters and samples reported by one agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetricsSnapshot {
    pub events_received: u64,
    pub events_forwarded: u64,
    pub samples: Vec<LatencySample>,
    pub average_latency_ms: f64,
}

impl AgentMetricsSnapshot {
    pub fn from_samples(events_received: u64, events_forwarded: u64, samples: Vec<LatencySample>) -> Self {
        let average_latency_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.latency_ms).sum::<f64>() / samples.len() as f64
        };
        Self {
            events_received,
            events_forwarded,
            samples,
            average_latency_ms,
        }
    }
}

/// Acknowledgement of an accepted publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub correlation_id: String,
    /// Number of downstream agents the event was handed to
    pub delivered_to: usize,
}

/// Current wall-clock time in microseconds since the Unix epoch
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_roundtrip() {
        let id = AgentId::new();
        let parsed: AgentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_latency_sign() {
        let env = EventEnvelope {
            sequence: 1,
            publisher_id: 0,
            correlation_id: "c".into(),
            sent_at_us: 10_000,
        };
        assert_eq!(env.latency_ms(12_500), 2.5);
        assert!(env.latency_ms(9_000) < 0.0);
    }

    #[test]
    fn test_restamp_keeps_identity() {
        let env = EventEnvelope::new(3, 7);
        let relayed = env.restamped();
        assert_eq!(relayed.correlation_id, env.correlation_id);
        assert_eq!(relayed.sequence, 7);
        assert!(relayed.sent_at_us >= env.sent_at_us);
    }

    #[test]
    fn test_snapshot_average() {
        let samples = vec![
            LatencySample { correlation_id: "a".into(), event_number: 1, latency_ms: 2.0 },
            LatencySample { correlation_id: "b".into(), event_number: 2, latency_ms: 4.0 },
        ];
        let snap = AgentMetricsSnapshot::from_samples(2, 0, samples);
        assert_eq!(snap.average_latency_ms, 3.0);
        assert_eq!(AgentMetricsSnapshot::from_samples(0, 0, vec![]).average_latency_ms, 0.0);
    }
}
