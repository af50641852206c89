//! Benchmark configuration
//!
//! `BenchmarkSettings` is the raw, mergeable parameter set (defaults, TOML
//! file, CLI flags). `BenchmarkConfig` is the validated, frozen form every
//! other component consumes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::platform::SimulationProfile;
use crate::topology::TopologyKind;

/// Seconds in one day, used to turn a daily volume into a rate
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Longest a single phase or wait may be configured to last
pub const MAX_PHASE_SECS: u64 = 86_400;

/// Share of the target rate a level must reach to count as meeting it
pub const TARGET_MET_RATIO: f64 = 0.95;

/// Raw benchmark parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSettings {
    pub topology: TopologyKind,
    pub base_concurrency: u32,
    pub max_concurrency: u32,
    pub scale_factor: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_from_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_at_level: Option<u32>,
    /// Producer tasks per level (and publisher agents for broadcast)
    pub publisher_count: u32,
    pub events_per_second: u32,
    pub duration_secs: u64,
    /// Zero skips warmup
    pub warmup_secs: u64,
    pub warmup_publisher_cap: u32,
    pub target_daily_events: u64,
    pub completion_timeout_secs: u64,
    pub completion_check_interval_secs: u64,
    pub stable_threshold: u32,
    /// Zero disables the pause between levels
    pub settle_delay_ms: u64,
    pub debug_wait_secs: u64,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            topology: TopologyKind::Broadcast,
            base_concurrency: 1,
            max_concurrency: 16,
            scale_factor: 2,
            start_from_level: None,
            stop_at_level: None,
            publisher_count: 1,
            events_per_second: 10,
            duration_secs: 60,
            warmup_secs: 10,
            warmup_publisher_cap: 10,
            target_daily_events: 10_000_000,
            completion_timeout_secs: 60,
            completion_check_interval_secs: 1,
            stable_threshold: 3,
            settle_delay_ms: 2_000,
            debug_wait_secs: 10,
        }
    }
}

/// On-disk configuration file: `[benchmark]` and `[simulation]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub benchmark: BenchmarkSettings,
    pub simulation: SimulationProfile,
}

impl ConfigFile {
    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&content)?;
        Ok(file)
    }
}

/// Validated, immutable benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BenchmarkConfig {
    settings: BenchmarkSettings,
}

impl BenchmarkConfig {
    /// Validate `settings` and freeze them
    pub fn new(settings: BenchmarkSettings) -> Result<Self> {
        validate(&settings)?;
        let config = Self { settings };
        if config.concurrency_levels().is_empty() {
            return Err(BenchError::Config(format!(
                "no concurrency levels between {} and {} fall inside the start/stop range",
                config.settings.base_concurrency, config.settings.max_concurrency
            )));
        }
        Ok(config)
    }

    pub fn settings(&self) -> &BenchmarkSettings {
        &self.settings
    }

    pub fn topology(&self) -> TopologyKind {
        self.settings.topology
    }

    pub fn publisher_count(&self) -> u32 {
        self.settings.publisher_count
    }

    pub fn events_per_second(&self) -> u32 {
        self.settings.events_per_second
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.settings.duration_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.settings.warmup_secs)
    }

    /// Publishers used during warmup
    pub fn warmup_publishers(&self) -> u32 {
        self.settings
            .publisher_count
            .min(self.settings.warmup_publisher_cap)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.completion_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.settings.completion_check_interval_secs)
    }

    pub fn stable_threshold(&self) -> u32 {
        self.settings.stable_threshold
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settings.settle_delay_ms)
    }

    pub fn debug_wait(&self) -> Duration {
        Duration::from_secs(self.settings.debug_wait_secs)
    }

    /// Events the receiving tier would see for one level if every publisher
    /// sustained its full rate. This is the configured ceiling; completion is
    /// awaited against what was actually sent.
    pub fn expected_events_for_level(&self, level: u32) -> u64 {
        u64::from(self.settings.publisher_count)
            .saturating_mul(u64::from(self.settings.events_per_second))
            .saturating_mul(self.settings.duration_secs)
            .saturating_mul(u64::from(level))
    }

    /// Sustained rate needed to reach the daily target
    pub fn min_events_per_second_for_daily_target(&self) -> f64 {
        self.settings.target_daily_events as f64 / SECONDS_PER_DAY
    }

    /// Throughput a level must reach to count as meeting the target
    pub fn target_throughput(&self) -> f64 {
        self.min_events_per_second_for_daily_target() * TARGET_MET_RATIO
    }

    /// Concurrency needed at the configured per-publisher rate
    pub fn required_concurrency(&self) -> u64 {
        let needed = self.min_events_per_second_for_daily_target()
            / f64::from(self.settings.events_per_second);
        needed.ceil() as u64
    }

    /// Geometric level sequence `base, base*f, base*f², ...` up to `max`,
    /// filtered by the optional start/stop bounds
    pub fn concurrency_levels(&self) -> Vec<u32> {
        let s = &self.settings;
        let lower = s.start_from_level.unwrap_or(0);
        let upper = s.stop_at_level.unwrap_or(u32::MAX);

        let mut levels = Vec::new();
        let mut current = Some(s.base_concurrency);
        while let Some(level) = current {
            if level > s.max_concurrency {
                break;
            }
            if level >= lower && level <= upper {
                levels.push(level);
            }
            current = level.checked_mul(s.scale_factor);
        }
        levels
    }
}

fn validate(s: &BenchmarkSettings) -> Result<()> {
    fn at_least_one(name: &str, value: u64) -> Result<()> {
        if value < 1 {
            return Err(BenchError::Config(format!("{} must be at least 1", name)));
        }
        Ok(())
    }

    at_least_one("base concurrency", u64::from(s.base_concurrency))?;
    if s.max_concurrency < s.base_concurrency {
        return Err(BenchError::Config(format!(
            "max concurrency ({}) must be >= base concurrency ({})",
            s.max_concurrency, s.base_concurrency
        )));
    }
    if s.scale_factor < 2 {
        return Err(BenchError::Config(format!(
            "scale factor must be at least 2, got {}",
            s.scale_factor
        )));
    }
    if let Some(start) = s.start_from_level {
        at_least_one("start-from level", u64::from(start))?;
    }
    if let Some(stop) = s.stop_at_level {
        at_least_one("stop-at level", u64::from(stop))?;
    }
    if let (Some(start), Some(stop)) = (s.start_from_level, s.stop_at_level) {
        if start > stop {
            return Err(BenchError::Config(format!(
                "start-from level ({}) must be <= stop-at level ({})",
                start, stop
            )));
        }
    }
    at_least_one("publisher count", u64::from(s.publisher_count))?;
    at_least_one("events per second", u64::from(s.events_per_second))?;
    at_least_one("duration", s.duration_secs)?;
    at_least_one("warmup publisher cap", u64::from(s.warmup_publisher_cap))?;
    at_least_one("target daily events", s.target_daily_events)?;
    at_least_one("completion timeout", s.completion_timeout_secs)?;
    at_least_one("completion check interval", s.completion_check_interval_secs)?;
    at_least_one("stable threshold", u64::from(s.stable_threshold))?;
    at_least_one("debug wait", s.debug_wait_secs)?;

    for (name, secs) in [
        ("duration", s.duration_secs),
        ("warmup", s.warmup_secs),
        ("completion timeout", s.completion_timeout_secs),
        ("completion check interval", s.completion_check_interval_secs),
        ("debug wait", s.debug_wait_secs),
        ("settle delay", s.settle_delay_ms / 1000),
    ] {
        if secs > MAX_PHASE_SECS {
            return Err(BenchError::Config(format!(
                "{} must be at most {}s, got {}s",
                name, MAX_PHASE_SECS, secs
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(base: u32, max: u32, factor: u32) -> BenchmarkSettings {
        BenchmarkSettings {
            base_concurrency: base,
            max_concurrency: max,
            scale_factor: factor,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_levels() {
        let config = BenchmarkConfig::new(BenchmarkSettings::default()).unwrap();
        assert_eq!(config.concurrency_levels(), vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_levels_are_geometric_and_bounded() {
        let cases = [
            (1, 16, 2, None, None),
            (3, 500, 3, None, None),
            (1, 1000, 10, Some(5), None),
            (2, 1024, 2, Some(8), Some(200)),
            (5, 5, 4, None, None),
            (1, u32::MAX, 7, None, None),
        ];

        for (base, max, factor, start, stop) in cases {
            let config = BenchmarkConfig::new(BenchmarkSettings {
                start_from_level: start,
                stop_at_level: stop,
                ..settings(base, max, factor)
            })
            .unwrap();
            let levels = config.concurrency_levels();
            let lower = base.max(start.unwrap_or(0));
            let upper = stop.unwrap_or(max).min(max);

            assert!(!levels.is_empty());
            for pair in levels.windows(2) {
                assert_eq!(pair[1], pair[0] * factor, "case base={} factor={}", base, factor);
            }
            for level in &levels {
                assert!(*level >= lower && *level <= upper);
            }
        }
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let bad = [
            settings(0, 16, 2),
            settings(8, 4, 2),
            settings(1, 16, 1),
            BenchmarkSettings { duration_secs: 0, ..Default::default() },
            BenchmarkSettings { events_per_second: 0, ..Default::default() },
            BenchmarkSettings { completion_timeout_secs: 0, ..Default::default() },
            BenchmarkSettings { completion_check_interval_secs: 0, ..Default::default() },
            BenchmarkSettings {
                start_from_level: Some(8),
                stop_at_level: Some(4),
                ..Default::default()
            },
            BenchmarkSettings { start_from_level: Some(100), ..Default::default() },
        ];

        for s in bad {
            let err = BenchmarkConfig::new(s.clone()).unwrap_err();
            assert!(matches!(err, BenchError::Config(_)), "accepted {:?}", s);
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn test_rejects_phases_longer_than_a_day() {
        let bad = [
            BenchmarkSettings { duration_secs: u64::MAX / 2, ..Default::default() },
            BenchmarkSettings { completion_timeout_secs: u64::MAX / 2, ..Default::default() },
            BenchmarkSettings { warmup_secs: MAX_PHASE_SECS + 1, ..Default::default() },
            BenchmarkSettings { completion_check_interval_secs: u64::MAX, ..Default::default() },
            BenchmarkSettings { debug_wait_secs: u64::MAX, ..Default::default() },
            BenchmarkSettings { settle_delay_ms: u64::MAX, ..Default::default() },
        ];
        for s in bad {
            let err = BenchmarkConfig::new(s.clone()).unwrap_err();
            assert!(matches!(err, BenchError::Config(ref m) if m.contains("at most")), "accepted {:?}", s);
        }

        let config = BenchmarkConfig::new(BenchmarkSettings {
            duration_secs: MAX_PHASE_SECS,
            completion_timeout_secs: MAX_PHASE_SECS,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.duration(), Duration::from_secs(MAX_PHASE_SECS));
    }

    #[test]
    fn test_zero_warmup_and_settle_are_allowed() {
        let config = BenchmarkConfig::new(BenchmarkSettings {
            warmup_secs: 0,
            settle_delay_ms: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.warmup(), Duration::ZERO);
        assert_eq!(config.settle_delay(), Duration::ZERO);
    }

    #[test]
    fn test_derived_values() {
        let config = BenchmarkConfig::new(BenchmarkSettings {
            publisher_count: 2,
            events_per_second: 5,
            duration_secs: 4,
            target_daily_events: 8_640_000,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.expected_events_for_level(10), 400);
        assert_eq!(config.min_events_per_second_for_daily_target(), 100.0);
        assert_eq!(config.target_throughput(), 95.0);
        assert_eq!(config.required_concurrency(), 20);
        assert_eq!(config.warmup_publishers(), 2);
    }

    #[test]
    fn test_expected_events_ceiling_saturates() {
        let config = BenchmarkConfig::new(BenchmarkSettings {
            publisher_count: u32::MAX,
            events_per_second: u32::MAX,
            duration_secs: MAX_PHASE_SECS,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.expected_events_for_level(u32::MAX), u64::MAX);
    }

    #[test]
    fn test_warmup_publishers_capped() {
        let config = BenchmarkConfig::new(BenchmarkSettings {
            publisher_count: 50,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.warmup_publishers(), 10);
    }

    #[test]
    fn test_config_file_partial_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(
            &path,
            "[benchmark]\ntopology = \"layered\"\nmax_concurrency = 32\n\n[simulation]\nhop_delay_ms = 3\n",
        )
        .unwrap();

        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.benchmark.topology, TopologyKind::Layered);
        assert_eq!(file.benchmark.max_concurrency, 32);
        assert_eq!(file.benchmark.scale_factor, 2);
        assert_eq!(file.simulation.hop_delay_ms, 3);
    }

    #[test]
    fn test_config_file_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "[benchmark\n").unwrap();
        let err = ConfigFile::load(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
