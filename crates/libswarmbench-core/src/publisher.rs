//! Rate-limited event publisher
//!
//! A publisher draws one permit per event from a semaphore that a sibling
//! future tops up to `rate` once per second. Both futures run joined inside
//! `run`, so neither outlives the call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::{BenchError, Result};
use crate::platform::AgentPlatform;
use crate::types::{AgentId, EventEnvelope};
use crate::watcher::deadline_after;

const REPLENISH_PERIOD: Duration = Duration::from_secs(1);

/// Publisher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PublisherState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl PublisherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublisherState::Idle => "Idle",
            PublisherState::Running => "Running",
            PublisherState::Stopping => "Stopping",
            PublisherState::Stopped => "Stopped",
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, PublisherState::Running | PublisherState::Stopping)
    }
}

/// Publish-call acknowledgement latency percentiles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckLatency {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl AckLatency {
    pub fn p50_ms(&self) -> f64 {
        self.p50_us as f64 / 1000.0
    }

    pub fn p99_ms(&self) -> f64 {
        self.p99_us as f64 / 1000.0
    }
}

/// Thread-safe per-publisher counters
pub struct PublisherMetrics {
    events_sent: AtomicU64,
    events_failed: AtomicU64,

    // Ack latency in microseconds (requires lock for HDR updates)
    ack_latency: RwLock<Histogram<u64>>,
}

impl PublisherMetrics {
    pub fn new() -> Result<Self> {
        // 1 microsecond to 60 seconds, 3 significant figures
        let histogram = Histogram::new_with_bounds(1, 60_000_000, 3)
            .map_err(|e| BenchError::PublisherPool(format!("latency histogram: {}", e)))?;
        Ok(Self {
            events_sent: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            ack_latency: RwLock::new(histogram),
        })
    }

    pub fn record_sent(&self, ack_latency: Duration) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut hist) = self.ack_latency.write() {
            let _ = hist.record(ack_latency.as_micros() as u64);
        }
    }

    pub fn record_failed(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed.load(Ordering::Relaxed)
    }

    /// Zero all counters; returns the sent count that was drained
    pub fn reset(&self) -> u64 {
        let drained = self.events_sent.swap(0, Ordering::Relaxed);
        self.events_failed.store(0, Ordering::Relaxed);
        if let Ok(mut hist) = self.ack_latency.write() {
            hist.reset();
        }
        drained
    }

    pub fn ack_latency(&self) -> AckLatency {
        if let Ok(hist) = self.ack_latency.read() {
            if hist.is_empty() {
                return AckLatency::default();
            }
            AckLatency {
                p50_us: hist.value_at_quantile(0.50),
                p95_us: hist.value_at_quantile(0.95),
                p99_us: hist.value_at_quantile(0.99),
                max_us: hist.max(),
            }
        } else {
            AckLatency::default()
        }
    }
}

/// Point-in-time view of one publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherMetricsSnapshot {
    pub publisher_id: u32,
    pub target: AgentId,
    pub state: PublisherState,
    pub events_sent: u64,
    pub events_failed: u64,
    pub ack_latency: AckLatency,
}

/// One logical producer bound to a single target agent
pub struct RateLimitedEventPublisher {
    id: u32,
    target: AgentId,
    rate: u32,
    platform: Arc<dyn AgentPlatform>,
    metrics: PublisherMetrics,
    sequence: AtomicU64,
    state: watch::Sender<PublisherState>,
    // Guards the Idle/Stopped -> Running transition together with the scope
    scope: Mutex<Option<CancelSignal>>,
}

impl RateLimitedEventPublisher {
    pub fn new(id: u32, target: AgentId, rate: u32, platform: Arc<dyn AgentPlatform>) -> Result<Self> {
        if rate == 0 {
            return Err(BenchError::Config("publisher rate must be at least 1".to_string()));
        }
        let (state, _) = watch::channel(PublisherState::Idle);
        Ok(Self {
            id,
            target,
            rate,
            platform,
            metrics: PublisherMetrics::new()?,
            sequence: AtomicU64::new(0),
            state,
            scope: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn target(&self) -> AgentId {
        self.target
    }

    pub fn state(&self) -> PublisherState {
        *self.state.borrow()
    }

    pub fn metrics(&self) -> &PublisherMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> PublisherMetricsSnapshot {
        PublisherMetricsSnapshot {
            publisher_id: self.id,
            target: self.target,
            state: self.state(),
            events_sent: self.metrics.events_sent(),
            events_failed: self.metrics.events_failed(),
            ack_latency: self.metrics.ack_latency(),
        }
    }

    /// Publish at the configured rate until `duration` elapses or `cancel` fires
    pub async fn run(&self, duration: Duration, cancel: &CancelSignal) -> Result<()> {
        let scope = self.begin(cancel)?;
        let semaphore = Semaphore::new(self.rate as usize);
        let deadline = deadline_after(Instant::now(), duration);

        debug!(publisher = self.id, target = %self.target.short(), rate = self.rate, "Publisher started");

        tokio::join!(
            self.publish_loop(&semaphore, deadline, &scope),
            self.replenish(&semaphore, &scope),
        );

        match self.scope.lock() {
            Ok(mut slot) => {
                *slot = None;
                self.state.send_replace(PublisherState::Stopped);
            }
            Err(_) => {
                self.state.send_replace(PublisherState::Stopped);
            }
        }

        debug!(
            publisher = self.id,
            sent = self.metrics.events_sent(),
            failed = self.metrics.events_failed(),
            "Publisher stopped"
        );
        Ok(())
    }

    /// Cancel a running publisher and wait until both its loops have exited
    pub async fn stop(&self) {
        let scope = match self.scope.lock() {
            Ok(slot) => slot.as_ref().cloned(),
            Err(_) => None,
        };
        if let Some(scope) = scope {
            self.state.send_if_modified(|state| {
                if *state == PublisherState::Running {
                    *state = PublisherState::Stopping;
                    true
                } else {
                    false
                }
            });
            scope.cancel();
        }

        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_active()).await;
    }

    fn begin(&self, cancel: &CancelSignal) -> Result<CancelSignal> {
        let mut slot = self
            .scope
            .lock()
            .map_err(|_| BenchError::PublisherPool(format!("publisher {} lock poisoned", self.id)))?;

        let started = self.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = PublisherState::Running;
                true
            }
        });
        if !started {
            return Err(BenchError::PublisherPool(format!(
                "publisher {} is already running",
                self.id
            )));
        }

        let scope = cancel.child();
        *slot = Some(scope.clone());
        Ok(scope)
    }

    async fn publish_loop(&self, semaphore: &Semaphore, deadline: Instant, scope: &CancelSignal) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                permit = semaphore.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if Instant::now() >= deadline {
                break;
            }
            permit.forget();

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let envelope = EventEnvelope::new(self.id, sequence);
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                result = self.platform.publish(self.target, envelope) => result,
            };

            match result {
                Ok(_) => self.metrics.record_sent(started.elapsed()),
                Err(e) => {
                    warn!(publisher = self.id, sequence, "Publish failed: {}", e);
                    self.metrics.record_failed();
                }
            }
        }

        // Stops the replenisher
        scope.cancel();
    }

    async fn replenish(&self, semaphore: &Semaphore, scope: &CancelSignal) {
        let mut ticker = tokio::time::interval(REPLENISH_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; the pool starts full
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    let rate = self.rate as usize;
                    let available = semaphore.available_permits();
                    if available < rate {
                        semaphore.add_permits(rate - available);
                    }
                }
            }
        }
    }
}
