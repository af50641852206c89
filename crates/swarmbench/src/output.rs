//! Terminal summary of a benchmark report

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};

use libswarmbench_core::{BenchmarkReport, ConcurrencyLevelResult, ReportMode};

fn ms(value: f64) -> String {
    format!("{:.2}", value)
}

/// Worst publisher ack latency for a level, as "p50/p99" in ms
fn ack(result: &ConcurrencyLevelResult) -> String {
    let (p50, p99) = result
        .publishers
        .iter()
        .map(|p| (p.ack_latency.p50_ms(), p.ack_latency.p99_ms()))
        .fold((0.0f64, 0.0f64), |(a, b), (c, d)| (a.max(c), b.max(d)));
    format!("{:.2}/{:.2}", p50, p99)
}

fn status(result: &ConcurrencyLevelResult) -> String {
    match &result.error {
        Some(error) => format!("{:?}", error.kind).to_lowercase(),
        None if !result.warnings.is_empty() => "ok (warn)".to_string(),
        None => "ok".to_string(),
    }
}

/// Per-level comparison table
pub fn comparison_table(report: &BenchmarkReport) -> Table {
    let optimal = report.summary.optimal_level;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            "Level", "Sent", "Received", "Delivered %", "Events/s", "Mean ms", "P50 ms", "P95 ms",
            "P99 ms", "Ack P50/P99 ms", "Target", "Status",
        ]);

    for r in &report.results {
        let level = if Some(r.level) == optimal {
            format!("{} *", r.level)
        } else {
            r.level.to_string()
        };
        table.add_row(vec![
            Cell::new(level),
            Cell::new(r.events_sent).set_alignment(CellAlignment::Right),
            Cell::new(r.events_received).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", r.success_rate)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", r.throughput)).set_alignment(CellAlignment::Right),
            Cell::new(ms(r.latency.mean)).set_alignment(CellAlignment::Right),
            Cell::new(ms(r.latency.p50)).set_alignment(CellAlignment::Right),
            Cell::new(ms(r.latency.p95)).set_alignment(CellAlignment::Right),
            Cell::new(ms(r.latency.p99)).set_alignment(CellAlignment::Right),
            Cell::new(ack(r)).set_alignment(CellAlignment::Right),
            Cell::new(if r.throughput_achieved { "met" } else { "-" }),
            Cell::new(status(r)),
        ]);
    }
    table
}

pub fn print_report(report: &BenchmarkReport) {
    if report.mode == ReportMode::DebugTrace {
        print_trace(report);
        return;
    }

    println!("=== RESULTS ({}) ===", report.config.topology);
    println!("{}", comparison_table(report));

    let s = &report.summary;
    println!(
        "Levels: {} total, {} ok, {} failed",
        s.total_levels, s.successful_levels, s.failed_levels
    );
    println!(
        "Target: {:.1} events/s ({} concurrent publishers at {} events/s)",
        s.target_events_per_second, s.required_concurrency, report.config.events_per_second
    );
    println!("Peak throughput: {:.1} events/s", s.max_throughput);
    if let (Some(p95), Some(p99)) = (s.best_p95_ms, s.best_p99_ms) {
        println!("Best latency: P95={:.2}ms P99={:.2}ms", p95, p99);
    }
    match report.optimal() {
        Some(best) => println!(
            "Optimal level: {} (mean {:.2}ms, {:.1} events/s)",
            best.level, best.latency.mean, best.throughput
        ),
        None => println!("Optimal level: none met the throughput target"),
    }

    for r in &report.results {
        for warning in &r.warnings {
            println!("  level {}: {}", r.level, warning);
        }
    }
    if report.cancelled {
        println!("Sweep was interrupted; results are partial");
    }
}

fn print_trace(report: &BenchmarkReport) {
    println!("=== DEBUG TRACE ({}) ===", report.config.topology);
    for r in &report.results {
        println!("Diagnosis: {}", r.diagnosis.as_deref().unwrap_or("unknown"));
        println!("Sent: {}  Received: {}/{}", r.events_sent, r.events_received, r.expected_events);
        if let Some(leader) = &r.leader {
            println!(
                "Leader: received {} forwarded {} (client->leader {:.2}ms)",
                leader.events_received, leader.events_forwarded, leader.latency.mean
            );
        }
        if !r.latency.is_empty() {
            println!("Delivery latency: {:.2}ms", r.latency.mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libswarmbench_core::publisher::AckLatency;
    use libswarmbench_core::{AgentId, BenchmarkConfig, BenchmarkSettings, PublisherMetricsSnapshot, PublisherState};

    fn publisher(id: u32, p50_us: u64, p99_us: u64) -> PublisherMetricsSnapshot {
        PublisherMetricsSnapshot {
            publisher_id: id,
            target: AgentId::new(),
            state: PublisherState::Stopped,
            events_sent: 10,
            events_failed: 0,
            ack_latency: AckLatency { p50_us, p95_us: p99_us, p99_us, max_us: p99_us },
        }
    }

    #[test]
    fn test_ack_column_takes_worst_publisher() {
        let config = BenchmarkConfig::new(BenchmarkSettings::default()).unwrap();
        let mut result = ConcurrencyLevelResult::pending(4, &config);
        result.publishers = vec![publisher(0, 250, 1_500), publisher(1, 750, 900)];
        assert_eq!(ack(&result), "0.75/1.50");

        let report = BenchmarkReport::new(ReportMode::Sweep, &config, vec![result], 1.0, false);
        let rendered = comparison_table(&report).to_string();
        assert!(rendered.contains("0.75/1.50"));
    }
}
