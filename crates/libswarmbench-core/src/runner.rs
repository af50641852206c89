//! Single-level benchmark run
//!
//! Setup -> Warmup -> Measure -> AwaitCompletion -> Collect -> Done | Failed.
//! Every failure is captured in the returned `ConcurrencyLevelResult`; a
//! level never aborts the sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::BenchmarkConfig;
use crate::error::BenchError;
use crate::platform::AgentPlatform;
use crate::pool::PublisherPool;
use crate::report::{ConcurrencyLevelResult, HopStats, LevelError, LevelErrorKind, RunPhase};
use crate::stats::LatencyStats;
use crate::topology::{StoredAgentIds, Topology, TopologyBuilder, TopologyKind};
use crate::types::{AgentId, EventEnvelope};
use crate::watcher::{CompletionOutcome, CompletionWatcher, ProgressProbe};

/// Correlation id of the single event sent in debug-trace mode
pub const DEBUG_CORRELATION_ID: &str = "DEBUG-TRACE-001";

/// Sums `events_received` over a set of agents; unreachable agents count as zero
struct ReceiverProbe {
    platform: Arc<dyn AgentPlatform>,
    agents: Vec<AgentId>,
}

#[async_trait]
impl ProgressProbe for ReceiverProbe {
    async fn processed(&self) -> u64 {
        let mut total = 0;
        for id in &self.agents {
            if let Ok(metrics) = self.platform.get_metrics(*id).await {
                total += metrics.events_received;
            }
        }
        total
    }
}

/// Receiver-side figures gathered in the Collect phase
#[derive(Default)]
struct Collected {
    received: u64,
    forwarded: u64,
    samples: Vec<f64>,
    leader: Option<HopStats>,
    gaps: usize,
}

/// Runs one level at a time against a platform
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    platform: Arc<dyn AgentPlatform>,
    builder: TopologyBuilder,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig, platform: Arc<dyn AgentPlatform>, stored: StoredAgentIds) -> Self {
        let builder = TopologyBuilder::new(Arc::clone(&platform), stored);
        Self {
            config,
            platform,
            builder,
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Agent ids provisioned so far, including any reused from storage
    pub fn stored_ids(&self) -> &StoredAgentIds {
        self.builder.stored()
    }

    fn watcher(&self, timeout: Duration) -> CompletionWatcher {
        CompletionWatcher::new(self.config.check_interval(), self.config.stable_threshold(), timeout)
    }

    /// Run one measurement level; failures are recorded, never returned
    pub async fn run_level(&mut self, level: u32, cancel: &CancelSignal) -> ConcurrencyLevelResult {
        let started = Instant::now();
        let mut result = ConcurrencyLevelResult::pending(level, &self.config);
        info!(level, topology = %self.config.topology(), "Starting level");

        if let Err(error) = self.execute(level, cancel, &mut result).await {
            match error.kind {
                LevelErrorKind::Cancelled => warn!(level, "Level cancelled: {}", error.message),
                _ => warn!(level, phase = ?error.phase, "Level failed: {}", error.message),
            }
            result.phase = RunPhase::Failed;
            result.error = Some(error);
        } else {
            result.phase = RunPhase::Done;
            result.success = true;
        }

        result.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            level,
            sent = result.events_sent,
            received = result.events_received,
            throughput = result.throughput,
            p95_ms = result.latency.p95,
            success = result.success,
            "Level finished"
        );
        result
    }

    async fn execute(
        &mut self,
        level: u32,
        cancel: &CancelSignal,
        result: &mut ConcurrencyLevelResult,
    ) -> Result<(), LevelError> {
        // Setup
        let topology = self
            .builder
            .build(self.config.topology(), self.config.publisher_count(), level)
            .await
            .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Setup, e))?;
        result.fan_out = topology.fan_out();
        self.reset_agents(&topology)
            .await
            .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Setup, e))?;
        let pool = PublisherPool::new(
            Arc::clone(&self.platform),
            &topology.entry_agents,
            self.config.publisher_count(),
            self.config.events_per_second(),
        )
        .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Setup, e))?;

        // Warmup
        if !self.config.warmup().is_zero() {
            result.phase = RunPhase::Warmup;
            let active = self.config.warmup_publishers() as usize;
            debug!(level, publishers = active, "Warmup");
            pool.run(active, self.config.warmup(), cancel)
                .await
                .map_err(|e| fail(LevelErrorKind::Publish, RunPhase::Warmup, e))?;
            if cancel.is_cancelled() {
                return Err(cancelled(RunPhase::Warmup));
            }

            // Let in-flight warmup events land before the counters are cleared
            let expected = pool.total_sent() * topology.fan_out() as u64;
            self.await_delivery(&topology, expected, cancel).await;

            pool.reset_all_metrics();
            self.reset_agents(&topology)
                .await
                .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Warmup, e))?;
        }

        // Measure
        result.phase = RunPhase::Measure;
        let measure_started = Instant::now();
        let measured = pool
            .run(self.config.publisher_count() as usize, self.config.duration(), cancel)
            .await;
        let measured_for = measure_started.elapsed();
        result.events_sent = pool.total_sent();
        result.events_failed = pool.total_failed();
        result.publishers = pool.get_all_metrics();
        result.expected_events = result.events_sent * topology.fan_out() as u64;
        if let Err(e) = measured {
            self.collect_into(&topology, measured_for, result).await;
            return Err(fail(LevelErrorKind::Publish, RunPhase::Measure, e));
        }

        let ceiling = self.config.expected_events_for_level(level);
        if result.expected_events < ceiling && !cancel.is_cancelled() {
            info!(
                level,
                sent = result.events_sent,
                expected = result.expected_events,
                ceiling,
                "Publishers fell short of the configured rate"
            );
        }
        if result.events_failed > 0 {
            result.warnings.push(format!("{} publish calls failed", result.events_failed));
        }

        // AwaitCompletion
        result.phase = RunPhase::AwaitCompletion;
        let outcome = if cancel.is_cancelled() {
            None
        } else {
            Some(self.await_delivery(&topology, result.expected_events, cancel).await)
        };
        let interrupted_in = match outcome {
            None => RunPhase::Measure,
            Some(_) => RunPhase::AwaitCompletion,
        };
        if let Some(outcome) = outcome {
            if outcome.is_timeout() {
                result.warnings.push(format!(
                    "completion timed out after {:.0}s with {}/{} events delivered",
                    outcome.elapsed_secs(),
                    outcome.processed(),
                    result.expected_events
                ));
            }
            result.completion = Some(outcome);
        }

        // Collect, partial data included when cancelled
        result.phase = RunPhase::Collect;
        self.collect_into(&topology, measured_for, result).await;

        if cancel.is_cancelled() {
            return Err(cancelled(interrupted_in));
        }
        Ok(())
    }

    async fn await_delivery(&self, topology: &Topology, expected: u64, cancel: &CancelSignal) -> CompletionOutcome {
        let probe = ReceiverProbe {
            platform: Arc::clone(&self.platform),
            agents: topology.receivers.clone(),
        };
        self.watcher(self.config.completion_timeout())
            .watch(&probe, expected, cancel)
            .await
    }

    async fn reset_agents(&self, topology: &Topology) -> crate::error::Result<()> {
        for id in topology.all_agents() {
            self.platform
                .reset_metrics(id)
                .await
                .map_err(|e| BenchError::Setup(format!("resetting metrics of {}: {}", id, e)))?;
        }
        Ok(())
    }

    async fn collect(&self, topology: &Topology) -> Collected {
        let mut collected = Collected::default();

        for id in &topology.receivers {
            match self.platform.get_metrics(*id).await {
                Ok(metrics) => {
                    collected.received += metrics.events_received;
                    collected.samples.extend(metrics.samples.iter().map(|s| s.latency_ms));
                }
                Err(e) => {
                    let err = BenchError::Collection(format!("agent {}: {}", id, e));
                    warn!(agent = %id.short(), "Excluding agent from aggregate: {}", err);
                    collected.gaps += 1;
                }
            }
        }

        for id in &topology.entry_agents {
            match self.platform.get_metrics(*id).await {
                Ok(metrics) => {
                    collected.forwarded += metrics.events_forwarded;
                    if topology.kind == TopologyKind::Layered {
                        let samples: Vec<f64> = metrics.samples.iter().map(|s| s.latency_ms).collect();
                        collected.leader = Some(HopStats {
                            events_received: metrics.events_received,
                            events_forwarded: metrics.events_forwarded,
                            latency: LatencyStats::from_samples(&samples),
                        });
                    }
                }
                Err(e) => {
                    let err = BenchError::Collection(format!("agent {}: {}", id, e));
                    warn!(agent = %id.short(), "Excluding agent from aggregate: {}", err);
                    collected.gaps += 1;
                }
            }
        }

        collected
    }

    /// Fold receiver metrics into `result`. Throughput is taken over
    /// `measured_for` when the measure phase ended early.
    async fn collect_into(&self, topology: &Topology, measured_for: Duration, result: &mut ConcurrencyLevelResult) {
        let collected = self.collect(topology).await;
        let latency = LatencyStats::from_samples(&collected.samples);
        let duration = measured_for.min(self.config.duration()).as_secs_f64();

        if latency.negative_samples > 0 {
            warn!(
                level = result.level,
                samples = latency.negative_samples,
                "Negative latency samples (clock skew between sender and receiver)"
            );
            result
                .warnings
                .push(format!("{} samples with negative latency", latency.negative_samples));
        }
        if collected.gaps > 0 {
            result
                .warnings
                .push(format!("metrics unavailable for {} agents", collected.gaps));
        }

        result.events_received = collected.received;
        result.events_forwarded = collected.forwarded;
        result.throughput = if duration > 0.0 {
            collected.received as f64 / duration
        } else {
            0.0
        };
        result.throughput_achieved = result.throughput >= self.config.target_throughput();
        result.success_rate = if result.expected_events > 0 {
            collected.received as f64 / result.expected_events as f64 * 100.0
        } else {
            0.0
        };
        result.clock_skew_samples = latency.negative_samples
            + collected
                .leader
                .as_ref()
                .map_or(0, |l| l.latency.negative_samples);
        result.latency = latency;
        result.leader = collected.leader;
        result.collection_gaps = collected.gaps;
    }

    /// Send exactly one event through a minimal topology and report where it got to
    pub async fn trace_single_event(&mut self, cancel: &CancelSignal) -> ConcurrencyLevelResult {
        let started = Instant::now();
        let mut result = ConcurrencyLevelResult::pending(1, &self.config);
        result.publisher_count = 1;
        info!(topology = %self.config.topology(), "Tracing a single event");

        match self.trace(cancel, &mut result).await {
            Ok(diagnosis) => {
                info!("Trace result: {}", diagnosis);
                result.diagnosis = Some(diagnosis);
                result.phase = RunPhase::Done;
                result.success = true;
            }
            Err(error) => {
                warn!(phase = ?error.phase, "Trace failed: {}", error.message);
                result.diagnosis = Some(match error.kind {
                    LevelErrorKind::Publish => format!("not sent: {}", error.message),
                    _ => error.message.clone(),
                });
                result.phase = RunPhase::Failed;
                result.error = Some(error);
            }
        }
        result.elapsed_secs = started.elapsed().as_secs_f64();
        result
    }

    async fn trace(&mut self, cancel: &CancelSignal, result: &mut ConcurrencyLevelResult) -> Result<String, LevelError> {
        let topology = self
            .builder
            .build(self.config.topology(), 1, 1)
            .await
            .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Setup, e))?;
        result.fan_out = topology.fan_out();
        self.reset_agents(&topology)
            .await
            .map_err(|e| fail(LevelErrorKind::Setup, RunPhase::Setup, e))?;

        result.phase = RunPhase::Measure;
        let envelope = EventEnvelope::with_correlation(0, 1, DEBUG_CORRELATION_ID.to_string());
        let target = topology.entry_agents[0];
        debug!(target = %target.short(), sent_at_us = envelope.sent_at_us, "Publishing trace event");
        self.platform
            .publish(target, envelope)
            .await
            .map_err(|e| fail(LevelErrorKind::Publish, RunPhase::Measure, BenchError::from(e)))?;
        result.events_sent = 1;
        result.expected_events = topology.fan_out() as u64;

        result.phase = RunPhase::AwaitCompletion;
        let probe = ReceiverProbe {
            platform: Arc::clone(&self.platform),
            agents: topology.receivers.clone(),
        };
        let outcome = self
            .watcher(self.config.debug_wait())
            .watch(&probe, result.expected_events, cancel)
            .await;
        result.completion = Some(outcome);

        result.phase = RunPhase::Collect;
        self.collect_into(&topology, self.config.duration(), result).await;
        if cancel.is_cancelled() {
            return Err(cancelled(RunPhase::AwaitCompletion));
        }

        Ok(diagnose(result))
    }
}

fn diagnose(result: &ConcurrencyLevelResult) -> String {
    if result.events_received >= result.expected_events && result.expected_events > 0 {
        return format!("delivered ({:.2} ms)", result.latency.mean);
    }
    match &result.leader {
        Some(leader) if leader.events_received == 0 => "sent but not received at leader".to_string(),
        Some(leader) if leader.events_forwarded == 0 => {
            "received at leader but not forwarded".to_string()
        }
        Some(_) => "forwarded by leader but not received by sub-agent".to_string(),
        None => "sent but not received".to_string(),
    }
}

fn fail(kind: LevelErrorKind, phase: RunPhase, error: BenchError) -> LevelError {
    LevelError {
        kind,
        phase,
        code: error.error_code().to_string(),
        message: error.to_string(),
    }
}

fn cancelled(phase: RunPhase) -> LevelError {
    LevelError {
        kind: LevelErrorKind::Cancelled,
        phase,
        code: "cancelled".to_string(),
        message: "cancelled".to_string(),
    }
}
