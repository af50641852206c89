//! End-to-end runs against the simulated platform

use std::sync::Arc;
use std::time::Duration;

use libswarmbench_core::{
    BenchmarkConfig, BenchmarkRunner, BenchmarkSettings, CancelSignal, CompletionOutcome,
    ConcurrencySweepController, LevelErrorKind, SimulatedPlatform, SimulationProfile, StoredAgentIds,
    TopologyKind,
};

fn settings(topology: TopologyKind, events_per_second: u32, duration_secs: u64) -> BenchmarkSettings {
    BenchmarkSettings {
        topology,
        events_per_second,
        duration_secs,
        warmup_secs: 0,
        settle_delay_ms: 0,
        ..Default::default()
    }
}

fn runner(settings: BenchmarkSettings, profile: SimulationProfile) -> BenchmarkRunner {
    let config = BenchmarkConfig::new(settings).unwrap();
    BenchmarkRunner::new(
        config,
        Arc::new(SimulatedPlatform::new(profile)),
        StoredAgentIds::default(),
    )
}

/// 1 publisher at 5 ev/s for 4s into 10 subscribers
#[tokio::test(start_paused = true)]
async fn test_broadcast_fan_out() {
    let mut runner = runner(
        settings(TopologyKind::Broadcast, 5, 4),
        SimulationProfile::default(),
    );

    let result = runner.run_level(10, &CancelSignal::new()).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.fan_out, 10);
    assert_eq!(result.events_sent, 20);
    assert_eq!(result.expected_events, 200);
    assert_eq!(result.events_received, 200);
    assert_eq!(result.success_rate, 100.0);
    assert_eq!(result.latency.count, 200);
    assert_eq!(result.throughput, 50.0);
    assert!(matches!(result.completion, Some(CompletionOutcome::TargetReached { .. })));
    assert!(result.warnings.is_empty());
}

/// 1 leader + 4 sub-agents, leader receives 12 events
#[tokio::test(start_paused = true)]
async fn test_layered_relay() {
    let mut runner = runner(
        settings(TopologyKind::Layered, 3, 4),
        SimulationProfile::default(),
    );

    let result = runner.run_level(4, &CancelSignal::new()).await;

    assert!(result.success, "{:?}", result.error);
    let leader = result.leader.as_ref().unwrap();
    assert_eq!(leader.events_received, 12);
    assert_eq!(leader.events_forwarded, 12);
    assert_eq!(leader.latency.count, 12);
    assert_eq!(result.events_forwarded, 12);
    assert_eq!(result.events_received, 48);
    assert_eq!(result.success_rate, 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_warmup_is_discarded() {
    let mut runner = runner(
        BenchmarkSettings {
            warmup_secs: 3,
            ..settings(TopologyKind::Broadcast, 5, 2)
        },
        SimulationProfile::default(),
    );

    let result = runner.run_level(2, &CancelSignal::new()).await;

    assert!(result.success);
    assert_eq!(result.events_sent, 10);
    assert_eq!(result.events_received, 20);
    assert_eq!(result.publishers[0].events_sent, 10);
}

#[tokio::test(start_paused = true)]
async fn test_warmup_uses_capped_publishers() {
    let mut runner = runner(
        BenchmarkSettings {
            publisher_count: 3,
            warmup_publisher_cap: 1,
            warmup_secs: 2,
            ..settings(TopologyKind::Broadcast, 2, 1)
        },
        SimulationProfile::default(),
    );

    let result = runner.run_level(1, &CancelSignal::new()).await;

    assert!(result.success);
    // Only the measurement phase is visible after the reset
    assert_eq!(result.events_sent, 6);
    assert_eq!(result.publishers.len(), 3);
    assert!(result.publishers.iter().all(|p| p.events_sent == 2));
}

#[tokio::test(start_paused = true)]
async fn test_completion_timeout_is_a_warning() {
    let mut runner = runner(
        BenchmarkSettings {
            completion_timeout_secs: 2,
            stable_threshold: 10,
            ..settings(TopologyKind::Layered, 2, 1)
        },
        SimulationProfile {
            hop_delay_ms: 3_600_000,
            ..Default::default()
        },
    );

    let result = runner.run_level(2, &CancelSignal::new()).await;

    assert!(result.success);
    assert!(result.error.is_none());
    assert!(result.completion.unwrap().is_timeout());
    assert_eq!(result.events_sent, 2);
    assert_eq!(result.events_received, 0);
    assert!(result.warnings.iter().any(|w| w.contains("timed out")));
}

/// Real timers: hop delay must show up in measured latency
#[tokio::test]
async fn test_hop_delay_shows_in_latency() {
    let mut runner = runner(
        settings(TopologyKind::Layered, 2, 1),
        SimulationProfile {
            hop_delay_ms: 50,
            ..Default::default()
        },
    );

    let result = runner.run_level(2, &CancelSignal::new()).await;

    assert!(result.success);
    assert_eq!(result.events_received, 4);
    assert!(result.latency.min >= 50.0, "{:?}", result.latency);
    assert!(result.leader.unwrap().latency.min >= 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_clock_skew_is_flagged() {
    let mut runner = runner(
        settings(TopologyKind::Broadcast, 1, 1),
        SimulationProfile {
            clock_skew_ms: -10_000,
            ..Default::default()
        },
    );

    let result = runner.run_level(2, &CancelSignal::new()).await;

    assert!(result.success);
    assert_eq!(result.clock_skew_samples, 2);
    assert!(result.latency.min < 0.0);
    assert!(result.warnings.iter().any(|w| w.contains("negative latency")));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_runs_every_level_in_order() {
    let config = BenchmarkConfig::new(BenchmarkSettings {
        max_concurrency: 4,
        target_daily_events: 86_400,
        ..settings(TopologyKind::Broadcast, 2, 1)
    })
    .unwrap();
    let platform = SimulatedPlatform::default();
    let mut sweep = ConcurrencySweepController::new(
        config,
        Arc::new(platform.clone()),
        StoredAgentIds::default(),
    );

    let report = sweep.run(&CancelSignal::new()).await;

    let levels: Vec<u32> = report.results.iter().map(|r| r.level).collect();
    assert_eq!(levels, vec![1, 2, 4]);
    assert!(report.results.iter().all(|r| r.success));
    assert_eq!(report.summary.total_levels, 3);
    assert_eq!(report.summary.successful_levels, 3);
    assert_eq!(report.summary.max_throughput, 8.0);
    assert!(report.summary.optimal_level.is_some());
    assert!(!report.cancelled);

    // Subscribers are reused across levels: 1 publisher + 4 subscribers
    assert_eq!(platform.agent_count(), 5);
    assert_eq!(sweep.stored_ids().subscribers.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_does_not_abort_sweep() {
    let config = BenchmarkConfig::new(BenchmarkSettings {
        max_concurrency: 4,
        ..settings(TopologyKind::Broadcast, 1, 1)
    })
    .unwrap();
    let platform = SimulatedPlatform::new(SimulationProfile {
        max_agents: Some(3),
        ..Default::default()
    });
    let mut sweep = ConcurrencySweepController::new(config, Arc::new(platform), StoredAgentIds::default());

    let report = sweep.run(&CancelSignal::new()).await;

    assert_eq!(report.results.len(), 3);
    assert!(report.results[0].success);
    assert!(report.results[1].success);
    assert!(report.results[2].is_setup_failure());
    assert_eq!(report.summary.failed_levels, 1);
    assert!(!report.first_level_setup_failed());
}

#[tokio::test(start_paused = true)]
async fn test_first_level_setup_failure_is_reported() {
    let config = BenchmarkConfig::new(settings(TopologyKind::Layered, 1, 1)).unwrap();
    let platform = SimulatedPlatform::new(SimulationProfile {
        max_agents: Some(1),
        ..Default::default()
    });
    let mut sweep = ConcurrencySweepController::new(config, Arc::new(platform), StoredAgentIds::default());

    let report = sweep.run(&CancelSignal::new()).await;

    assert!(report.first_level_setup_failed());
    assert_eq!(report.results.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_sweep_keeps_partial_results() {
    let config = BenchmarkConfig::new(BenchmarkSettings {
        max_concurrency: 4,
        ..settings(TopologyKind::Broadcast, 5, 10)
    })
    .unwrap();
    let mut sweep = ConcurrencySweepController::new(
        config,
        Arc::new(SimulatedPlatform::default()),
        StoredAgentIds::default(),
    );
    let cancel = CancelSignal::new();

    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { sweep.run(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(15_500)).await;
    cancel.cancel();
    let report = handle.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.results.len(), 2);
    assert!(report.results[0].success);
    assert_eq!(report.results[0].events_sent, 50);

    let partial = &report.results[1];
    assert!(!partial.success);
    assert_eq!(partial.error.as_ref().unwrap().kind, LevelErrorKind::Cancelled);
    assert!(partial.events_sent > 0);
    assert_eq!(partial.events_received, partial.events_sent * 2);
}

#[tokio::test(start_paused = true)]
async fn test_debug_trace_report() {
    let config = BenchmarkConfig::new(settings(TopologyKind::Broadcast, 1, 1)).unwrap();
    let mut sweep = ConcurrencySweepController::new(
        config,
        Arc::new(SimulatedPlatform::default()),
        StoredAgentIds::default(),
    );

    let report = sweep.trace(&CancelSignal::new()).await;

    assert_eq!(report.results.len(), 1);
    let trace = &report.results[0];
    assert!(trace.success);
    assert_eq!(trace.events_received, 1);
    assert!(trace.diagnosis.as_deref().unwrap().starts_with("delivered"));
}
