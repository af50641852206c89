//! Concurrency sweep
//!
//! Levels run strictly one after another with a settle delay in between;
//! overlapping levels would share platform capacity and skew both.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::config::BenchmarkConfig;
use crate::platform::AgentPlatform;
use crate::report::{BenchmarkReport, ReportMode};
use crate::runner::BenchmarkRunner;
use crate::topology::StoredAgentIds;

/// Drives a [`BenchmarkRunner`] over every configured level
pub struct ConcurrencySweepController {
    runner: BenchmarkRunner,
}

impl ConcurrencySweepController {
    pub fn new(config: BenchmarkConfig, platform: Arc<dyn AgentPlatform>, stored: StoredAgentIds) -> Self {
        Self {
            runner: BenchmarkRunner::new(config, platform, stored),
        }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        self.runner.config()
    }

    pub fn stored_ids(&self) -> &StoredAgentIds {
        self.runner.stored_ids()
    }

    /// Run every level; the report holds whatever finished before cancellation
    pub async fn run(&mut self, cancel: &CancelSignal) -> BenchmarkReport {
        let started = Instant::now();
        let levels = self.config().concurrency_levels();
        let settle = self.config().settle_delay();
        let mut results = Vec::with_capacity(levels.len());

        info!(
            topology = %self.config().topology(),
            levels = ?levels,
            target_eps = self.config().min_events_per_second_for_daily_target(),
            "Starting concurrency sweep"
        );

        for (index, level) in levels.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            if index > 0 && !settle.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settle) => {}
                }
            }

            let result = self.runner.run_level(level, cancel).await;
            results.push(result);
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(completed = results.len(), total = levels.len(), "Sweep cancelled");
        }

        let report = BenchmarkReport::new(
            ReportMode::Sweep,
            self.config(),
            results,
            started.elapsed().as_secs_f64(),
            cancelled,
        );
        match report.summary.optimal_level {
            Some(level) => info!(level, "Optimal concurrency level"),
            None => info!("No level met the throughput target"),
        }
        report
    }

    /// Single-event trace instead of a sweep
    pub async fn trace(&mut self, cancel: &CancelSignal) -> BenchmarkReport {
        let started = Instant::now();
        let result = self.runner.trace_single_event(cancel).await;
        BenchmarkReport::new(
            ReportMode::DebugTrace,
            self.config(),
            vec![result],
            started.elapsed().as_secs_f64(),
            cancel.is_cancelled(),
        )
    }
}
