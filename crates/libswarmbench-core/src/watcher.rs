//! Completion detection
//!
//! The platform never says "done", so the watcher polls an aggregate
//! processed counter. Completion is declared when the counter reaches the
//! expected total, or when it has not moved for `stable_threshold`
//! consecutive polls. A lull longer than that window is indistinguishable
//! from the end of the stream and will end the wait early.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cancel::CancelSignal;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Stand-in for "no deadline" when `now + after` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating to a far-future instant instead of overflowing
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Source of the aggregate processed count
#[async_trait]
pub trait ProgressProbe: Send + Sync {
    async fn processed(&self) -> u64;
}

/// How a completion wait ended
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompletionOutcome {
    TargetReached { processed: u64, elapsed_secs: f64 },
    Stabilized { processed: u64, elapsed_secs: f64 },
    TimedOut { processed: u64, elapsed_secs: f64 },
    Cancelled { processed: u64, elapsed_secs: f64 },
}

impl CompletionOutcome {
    pub fn processed(&self) -> u64 {
        match *self {
            CompletionOutcome::TargetReached { processed, .. }
            | CompletionOutcome::Stabilized { processed, .. }
            | CompletionOutcome::TimedOut { processed, .. }
            | CompletionOutcome::Cancelled { processed, .. } => processed,
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        match *self {
            CompletionOutcome::TargetReached { elapsed_secs, .. }
            | CompletionOutcome::Stabilized { elapsed_secs, .. }
            | CompletionOutcome::TimedOut { elapsed_secs, .. }
            | CompletionOutcome::Cancelled { elapsed_secs, .. } => elapsed_secs,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CompletionOutcome::TimedOut { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionOutcome::TargetReached { .. } => "target reached",
            CompletionOutcome::Stabilized { .. } => "stabilized",
            CompletionOutcome::TimedOut { .. } => "timed out",
            CompletionOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Polls a [`ProgressProbe`] until the count settles
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    check_interval: Duration,
    stable_threshold: u32,
    timeout: Duration,
}

impl CompletionWatcher {
    pub fn new(check_interval: Duration, stable_threshold: u32, timeout: Duration) -> Self {
        Self {
            check_interval,
            stable_threshold,
            timeout,
        }
    }

    pub async fn watch(&self, probe: &dyn ProgressProbe, expected: u64, cancel: &CancelSignal) -> CompletionOutcome {
        let started = Instant::now();
        let deadline = deadline_after(started, self.timeout);
        let secs = |at: Instant| at.duration_since(started).as_secs_f64();

        if expected == 0 {
            return CompletionOutcome::TargetReached {
                processed: 0,
                elapsed_secs: 0.0,
            };
        }

        let mut last: Option<u64> = None;
        let mut stable = 0u32;
        let mut last_log = started;

        loop {
            let processed = probe.processed().await;
            let now = Instant::now();

            if processed >= expected {
                debug!(processed, expected, "Completion target reached");
                return CompletionOutcome::TargetReached {
                    processed,
                    elapsed_secs: secs(now),
                };
            }

            if last == Some(processed) {
                stable += 1;
                if stable >= self.stable_threshold {
                    info!(processed, expected, stable, "Progress stabilized below target");
                    return CompletionOutcome::Stabilized {
                        processed,
                        elapsed_secs: secs(now),
                    };
                }
            } else {
                stable = 0;
            }
            last = Some(processed);

            if now.duration_since(last_log) >= PROGRESS_LOG_INTERVAL {
                let pct = processed as f64 / expected as f64 * 100.0;
                info!(processed, expected, "Awaiting completion: {:.1}%", pct);
                last_log = now;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return CompletionOutcome::Cancelled {
                        processed,
                        elapsed_secs: secs(Instant::now()),
                    };
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let processed = probe.processed().await;
                    if processed >= expected {
                        return CompletionOutcome::TargetReached {
                            processed,
                            elapsed_secs: secs(Instant::now()),
                        };
                    }
                    return CompletionOutcome::TimedOut {
                        processed,
                        elapsed_secs: secs(Instant::now()),
                    };
                }
                _ = tokio::time::sleep(self.check_interval) => {}
            }
        }
    }
}
