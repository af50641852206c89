//! Per-level results and the sweep report

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BenchmarkConfig, BenchmarkSettings};
use crate::error::Result;
use crate::publisher::PublisherMetricsSnapshot;
use crate::stats::LatencyStats;
use crate::topology::TopologyKind;
use crate::watcher::CompletionOutcome;

/// Phases of a single level run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Setup,
    Warmup,
    Measure,
    AwaitCompletion,
    Collect,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelErrorKind {
    Setup,
    Publish,
    Cancelled,
}

/// Why a level did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelError {
    pub kind: LevelErrorKind,
    /// Phase the level was in when it failed
    pub phase: RunPhase,
    /// Code of the underlying error (`BenchError::error_code`)
    pub code: String,
    pub message: String,
}

/// Counters and latency for the leader hop of a layered topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HopStats {
    pub events_received: u64,
    pub events_forwarded: u64,
    pub latency: LatencyStats,
}

/// Outcome of one concurrency level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyLevelResult {
    pub level: u32,
    pub topology: TopologyKind,
    pub fan_out: usize,
    pub publisher_count: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,

    pub events_sent: u64,
    pub events_failed: u64,
    pub expected_events: u64,
    pub events_received: u64,
    pub events_forwarded: u64,

    /// Events per second received at the receiving tier
    pub throughput: f64,
    pub target_throughput: f64,
    pub throughput_achieved: bool,
    /// Received as a percentage of sent × fan-out
    pub success_rate: f64,

    pub latency: LatencyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<HopStats>,
    pub publishers: Vec<PublisherMetricsSnapshot>,

    pub collection_gaps: usize,
    pub clock_skew_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionOutcome>,

    pub phase: RunPhase,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LevelError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
}

impl ConcurrencyLevelResult {
    /// Empty result for `level`, filled in as the run progresses
    pub fn pending(level: u32, config: &BenchmarkConfig) -> Self {
        Self {
            level,
            topology: config.topology(),
            fan_out: 0,
            publisher_count: config.publisher_count(),
            started_at: Utc::now(),
            elapsed_secs: 0.0,
            events_sent: 0,
            events_failed: 0,
            expected_events: 0,
            events_received: 0,
            events_forwarded: 0,
            throughput: 0.0,
            target_throughput: config.target_throughput(),
            throughput_achieved: false,
            success_rate: 0.0,
            latency: LatencyStats::default(),
            leader: None,
            publishers: Vec::new(),
            collection_gaps: 0,
            clock_skew_samples: 0,
            completion: None,
            phase: RunPhase::Setup,
            success: false,
            error: None,
            warnings: Vec::new(),
            diagnosis: None,
        }
    }

    pub fn is_setup_failure(&self) -> bool {
        matches!(&self.error, Some(e) if e.kind == LevelErrorKind::Setup)
    }

    /// Eligible for the optimal-level pick
    pub fn meets_target(&self) -> bool {
        self.success && self.throughput_achieved && !self.latency.is_empty()
    }
}

/// What produced the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    Sweep,
    DebugTrace,
}

/// Cross-level comparison figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_levels: usize,
    pub successful_levels: usize,
    pub failed_levels: usize,
    pub max_throughput: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub best_p95_ms: Option<f64>,
    pub best_p99_ms: Option<f64>,
    /// Lowest mean latency among levels meeting the throughput target
    pub optimal_level: Option<u32>,
    pub target_events_per_second: f64,
    pub required_concurrency: u64,
}

impl ReportSummary {
    pub fn from_results(results: &[ConcurrencyLevelResult], config: &BenchmarkConfig) -> Self {
        let successful: Vec<&ConcurrencyLevelResult> = results.iter().filter(|r| r.success).collect();
        let measured: Vec<&LatencyStats> = successful
            .iter()
            .map(|r| &r.latency)
            .filter(|l| !l.is_empty())
            .collect();

        let min_of = |f: fn(&LatencyStats) -> f64| measured.iter().map(|&l| f(l)).min_by(f64::total_cmp);

        let optimal_level = results
            .iter()
            .filter(|r| r.meets_target())
            .min_by(|a, b| a.latency.mean.total_cmp(&b.latency.mean))
            .map(|r| r.level);

        Self {
            total_levels: results.len(),
            successful_levels: successful.len(),
            failed_levels: results.len() - successful.len(),
            max_throughput: successful.iter().map(|r| r.throughput).fold(0.0, f64::max),
            min_latency_ms: min_of(|l| l.min),
            max_latency_ms: measured.iter().map(|l| l.max).max_by(f64::total_cmp),
            best_p95_ms: min_of(|l| l.p95),
            best_p99_ms: min_of(|l| l.p99),
            optimal_level,
            target_events_per_second: config.min_events_per_second_for_daily_target(),
            required_concurrency: config.required_concurrency(),
        }
    }
}

/// Everything written at the end of a sweep or debug trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub mode: ReportMode,
    pub config: BenchmarkSettings,
    pub results: Vec<ConcurrencyLevelResult>,
    pub summary: ReportSummary,
    pub total_elapsed_secs: f64,
    pub generated_at: DateTime<Utc>,
    pub cancelled: bool,
}

impl BenchmarkReport {
    pub fn new(
        mode: ReportMode,
        config: &BenchmarkConfig,
        results: Vec<ConcurrencyLevelResult>,
        total_elapsed_secs: f64,
        cancelled: bool,
    ) -> Self {
        let summary = ReportSummary::from_results(&results, config);
        Self {
            mode,
            config: config.settings().clone(),
            results,
            summary,
            total_elapsed_secs,
            generated_at: Utc::now(),
            cancelled,
        }
    }

    pub fn optimal(&self) -> Option<&ConcurrencyLevelResult> {
        let level = self.summary.optimal_level?;
        self.results.iter().find(|r| r.level == level)
    }

    /// True when the very first level failed while provisioning
    pub fn first_level_setup_failed(&self) -> bool {
        self.results.first().map_or(false, |r| r.is_setup_failure())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let report = serde_json::to_string_pretty(self)?;
        std::fs::write(path, report)?;
        info!(path = %path.display(), levels = self.results.len(), "Report written");
        Ok(())
    }
}
