//! Benchmark orchestration for agent event delivery
//!
//! Measures latency and throughput of a platform's event delivery under two
//! topologies: broadcast fan-out and a layered leader/sub-agent relay.
//! Rate-limited publishers drive load, a completion watcher infers when
//! delivery has drained, and a sweep controller compares concurrency levels.

pub mod cancel;
pub mod config;
pub mod error;
pub mod platform;
pub mod pool;
pub mod publisher;
pub mod report;
pub mod runner;
pub mod stats;
pub mod sweep;
pub mod topology;
pub mod types;
pub mod watcher;

pub use cancel::CancelSignal;
pub use config::{BenchmarkConfig, BenchmarkSettings, ConfigFile};
pub use error::{BenchError, PlatformError, Result};
pub use platform::{AgentHandle, AgentPlatform, SimulatedPlatform, SimulationProfile};
pub use pool::PublisherPool;
pub use publisher::{PublisherMetricsSnapshot, PublisherState, RateLimitedEventPublisher};
pub use report::{BenchmarkReport, ConcurrencyLevelResult, LevelErrorKind, ReportMode, ReportSummary};
pub use runner::BenchmarkRunner;
pub use stats::LatencyStats;
pub use sweep::ConcurrencySweepController;
pub use topology::{StoredAgentIds, Topology, TopologyBuilder, TopologyKind};
pub use types::{AgentId, AgentRole, EventEnvelope};
pub use watcher::{CompletionOutcome, CompletionWatcher, ProgressProbe};
