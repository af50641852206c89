//! swarmbench - event delivery benchmark for broadcast and layered agent topologies

mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use libswarmbench_core::{
    BenchError, BenchmarkConfig, BenchmarkSettings, CancelSignal, ConcurrencySweepController,
    ConfigFile, Result, SimulatedPlatform, SimulationProfile, StoredAgentIds, TopologyKind,
};

#[derive(Parser)]
#[command(name = "swarmbench")]
#[command(about = "Benchmark event delivery latency and throughput across agent topologies")]
#[command(version)]
struct Cli {
    /// Topology: broadcast or layered
    #[arg(short = 't', long, value_parser = parse_topology)]
    topology: Option<TopologyKind>,

    /// First concurrency level
    #[arg(long)]
    base_concurrency: Option<u32>,

    /// Highest concurrency level
    #[arg(long)]
    max_concurrency: Option<u32>,

    /// Multiplier between consecutive levels
    #[arg(long)]
    scale_factor: Option<u32>,

    /// Skip levels below this value
    #[arg(long)]
    start_from_level: Option<u32>,

    /// Skip levels above this value
    #[arg(long)]
    stop_at_level: Option<u32>,

    /// Concurrent producers per level
    #[arg(short = 'p', long)]
    publishers: Option<u32>,

    /// Events per second per producer
    #[arg(short = 'r', long)]
    events_per_second: Option<u32>,

    /// Measurement duration per level, in seconds
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Warmup duration per level, in seconds (0 = no warmup)
    #[arg(long)]
    warmup_duration: Option<u64>,

    /// Daily event volume the platform should sustain
    #[arg(long)]
    target_daily_events: Option<u64>,

    /// Seconds to wait for in-flight events after each level
    #[arg(long)]
    completion_timeout: Option<u64>,

    /// Seconds between completion polls
    #[arg(long)]
    completion_check_interval: Option<u64>,

    /// Pause between levels, in milliseconds
    #[arg(long)]
    settle_delay_ms: Option<u64>,

    /// JSON report path
    #[arg(short = 'o', long, default_value = "benchmark-report.json")]
    output_file: PathBuf,

    /// JSON file of agent ids to reuse and update
    #[arg(long)]
    agent_ids_file: Option<PathBuf>,

    /// TOML config file with [benchmark] and [simulation] tables
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Send a single traced event instead of running the sweep
    #[arg(long)]
    debug_trace: bool,

    /// Simulated delay per hop, in milliseconds
    #[arg(long)]
    hop_delay_ms: Option<u64>,

    /// Simulated uniform jitter per hop, in milliseconds
    #[arg(long)]
    jitter_ms: Option<u64>,

    /// Simulated probability that a publish is rejected (0.0 - 1.0)
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_topology(s: &str) -> std::result::Result<TopologyKind, String> {
    s.parse::<TopologyKind>().map_err(|e| e.to_string())
}

impl Cli {
    /// Layer CLI flags over file/default settings
    fn benchmark_settings(&self, base: BenchmarkSettings) -> BenchmarkSettings {
        BenchmarkSettings {
            topology: self.topology.unwrap_or(base.topology),
            base_concurrency: self.base_concurrency.unwrap_or(base.base_concurrency),
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            start_from_level: self.start_from_level.or(base.start_from_level),
            stop_at_level: self.stop_at_level.or(base.stop_at_level),
            publisher_count: self.publishers.unwrap_or(base.publisher_count),
            events_per_second: self.events_per_second.unwrap_or(base.events_per_second),
            duration_secs: self.duration.unwrap_or(base.duration_secs),
            warmup_secs: self.warmup_duration.unwrap_or(base.warmup_secs),
            target_daily_events: self.target_daily_events.unwrap_or(base.target_daily_events),
            completion_timeout_secs: self.completion_timeout.unwrap_or(base.completion_timeout_secs),
            completion_check_interval_secs: self
                .completion_check_interval
                .unwrap_or(base.completion_check_interval_secs),
            settle_delay_ms: self.settle_delay_ms.unwrap_or(base.settle_delay_ms),
            ..base
        }
    }

    fn simulation_profile(&self, base: SimulationProfile) -> SimulationProfile {
        SimulationProfile {
            hop_delay_ms: self.hop_delay_ms.unwrap_or(base.hop_delay_ms),
            jitter_ms: self.jitter_ms.unwrap_or(base.jitter_ms),
            failure_rate: self.failure_rate.unwrap_or(base.failure_rate),
            ..base
        }
    }

    fn log_filter(&self) -> String {
        match &self.log_level {
            Some(level) => level.clone(),
            None if self.verbose => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for the results table
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(cli.log_filter()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    let profile = cli.simulation_profile(file.simulation.clone());
    profile.validate()?;
    let config = BenchmarkConfig::new(cli.benchmark_settings(file.benchmark.clone()))?;

    let stored = match &cli.agent_ids_file {
        Some(path) => StoredAgentIds::load(path)?,
        None => StoredAgentIds::default(),
    };

    info!(
        topology = %config.topology(),
        levels = ?config.concurrency_levels(),
        publishers = config.publisher_count(),
        events_per_second = config.events_per_second(),
        "swarmbench starting"
    );

    let platform = Arc::new(SimulatedPlatform::new(profile));
    let mut controller = ConcurrencySweepController::new(config, platform, stored);
    let cancel = CancelSignal::new();

    let report = {
        let work = async {
            if cli.debug_trace {
                controller.trace(&cancel).await
            } else {
                controller.run(&cancel).await
            }
        };
        tokio::pin!(work);

        tokio::select! {
            report = &mut work => report,
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!("Interrupt received, stopping after the current phase");
                    cancel.cancel();
                }
                work.await
            }
        }
    };

    report.write_to(&cli.output_file)?;
    println!("Report saved to {}", cli.output_file.display());

    if let Some(path) = &cli.agent_ids_file {
        controller.stored_ids().save(path)?;
    }

    output::print_report(&report);

    if report.first_level_setup_failed() {
        let reason = report.results[0]
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        let err = BenchError::Setup(reason);
        eprintln!("error: {}", err);
        return Ok(ExitCode::from(err.exit_code() as u8));
    }
    Ok(ExitCode::SUCCESS)
}
