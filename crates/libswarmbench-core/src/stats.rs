//! Latency distribution statistics
//!
//! Percentiles use linear interpolation at rank `p * (n - 1)` between the
//! two bracketing sorted samples. This is the only percentile method in the
//! crate; the publish-ack histogram in `publisher` reports its own HDR
//! quantiles and is never mixed with these figures.

use serde::{Deserialize, Serialize};

/// Summary statistics over a set of latency samples (milliseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    /// Samples below zero; kept in the figures and reported as clock skew
    pub negative_samples: usize,
}

impl LatencyStats {
    /// Compute statistics; an empty input yields the all-zero sentinel
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            variance,
            std_dev: variance.sqrt(),
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            negative_samples: sorted.iter().filter(|v| **v < 0.0).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Percentile `p` (0.0..=1.0) of an ascending slice
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = p.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                return sorted[lower];
            }
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}
