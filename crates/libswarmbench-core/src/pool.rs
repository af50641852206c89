//! Concurrent publisher pool

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::cancel::CancelSignal;
use crate::error::{BenchError, Result};
use crate::platform::AgentPlatform;
use crate::publisher::{PublisherMetricsSnapshot, RateLimitedEventPublisher};
use crate::types::AgentId;

/// Owns N publishers and runs them as one unit
pub struct PublisherPool {
    publishers: RwLock<Vec<Arc<RateLimitedEventPublisher>>>,
}

impl PublisherPool {
    /// Publisher `i` is pinned to `targets[i % targets.len()]`
    pub fn new(
        platform: Arc<dyn AgentPlatform>,
        targets: &[AgentId],
        count: u32,
        rate: u32,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(BenchError::Setup("publisher pool needs at least one target".to_string()));
        }

        let publishers = (0..count)
            .map(|i| {
                let target = targets[i as usize % targets.len()];
                RateLimitedEventPublisher::new(i, target, rate, Arc::clone(&platform)).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            publishers: RwLock::new(publishers),
        })
    }

    pub fn len(&self) -> usize {
        self.publishers.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publishers(&self) -> Vec<Arc<RateLimitedEventPublisher>> {
        self.publishers.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Run the first `active` publishers concurrently for `duration`.
    ///
    /// Returns once every publisher has finished. If any publisher fails the
    /// others are cancelled and the first failure is returned.
    pub async fn run(&self, active: usize, duration: Duration, cancel: &CancelSignal) -> Result<()> {
        let scope = cancel.child();
        let mut tasks = JoinSet::new();

        for publisher in self.publishers().into_iter().take(active) {
            let scope = scope.clone();
            tasks.spawn(async move { publisher.run(duration, &scope).await });
        }
        debug!(active = tasks.len(), ?duration, "Publisher pool running");

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            let reason = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("publisher task failed: {}", e),
            };
            error!("Publisher pool member failed: {}", reason);
            if failure.is_none() {
                scope.cancel();
                failure = Some(reason);
            }
        }

        match failure {
            Some(reason) => Err(BenchError::PublisherPool(reason)),
            None => Ok(()),
        }
    }

    /// Drain every publisher's counters; returns the total sent count drained
    pub fn reset_all_metrics(&self) -> u64 {
        // Write lock keeps snapshots out while the drain is in progress
        match self.publishers.write() {
            Ok(publishers) => publishers.iter().map(|p| p.metrics().reset()).sum(),
            Err(_) => 0,
        }
    }

    pub fn get_all_metrics(&self) -> Vec<PublisherMetricsSnapshot> {
        match self.publishers.read() {
            Ok(publishers) => publishers.iter().map(|p| p.snapshot()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.get_all_metrics().iter().map(|m| m.events_sent).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.get_all_metrics().iter().map(|m| m.events_failed).sum()
    }

    /// Stop every running publisher and wait for them to exit
    pub async fn stop_all(&self) {
        for publisher in self.publishers() {
            publisher.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SimulatedPlatform;
    use crate::publisher::PublisherState;
    use crate::types::AgentRole;

    async fn leaders(platform: &SimulatedPlatform, n: usize) -> Vec<AgentId> {
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = AgentId::new();
            platform.create(id, AgentRole::LayeredLeader).await.unwrap();
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn test_sticky_targeting() {
        let platform = SimulatedPlatform::default();
        let targets = leaders(&platform, 3).await;
        let pool = PublisherPool::new(Arc::new(platform), &targets, 7, 1).unwrap();

        let metrics = pool.get_all_metrics();
        assert_eq!(metrics.len(), 7);
        for m in metrics {
            assert_eq!(m.target, targets[m.publisher_id as usize % 3]);
        }
    }

    #[test]
    fn test_empty_targets_is_setup_error() {
        let platform: Arc<dyn AgentPlatform> = Arc::new(SimulatedPlatform::default());
        let err = PublisherPool::new(platform, &[], 2, 1).err().unwrap();
        assert!(matches!(err, BenchError::Setup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_subset_then_reset() {
        let platform = SimulatedPlatform::default();
        let targets = leaders(&platform, 1).await;
        let pool = PublisherPool::new(Arc::new(platform), &targets, 4, 3).unwrap();

        pool.run(2, Duration::from_secs(2), &CancelSignal::new()).await.unwrap();
        let metrics = pool.get_all_metrics();
        assert_eq!(metrics[0].events_sent, 6);
        assert_eq!(metrics[1].events_sent, 6);
        assert_eq!(metrics[2].events_sent, 0);
        assert_eq!(metrics[0].state, PublisherState::Stopped);
        assert_eq!(metrics[3].state, PublisherState::Idle);

        assert_eq!(pool.reset_all_metrics(), 12);
        assert_eq!(pool.total_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_all_members() {
        let platform = SimulatedPlatform::default();
        let targets = leaders(&platform, 2).await;
        let pool = Arc::new(PublisherPool::new(Arc::new(platform), &targets, 3, 5).unwrap());
        let cancel = CancelSignal::new();

        let run = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.run(3, Duration::from_secs(600), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(pool.total_sent(), 30);
        assert!(pool
            .get_all_metrics()
            .iter()
            .all(|m| m.state == PublisherState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let platform = SimulatedPlatform::default();
        let targets = leaders(&platform, 1).await;
        let pool = Arc::new(PublisherPool::new(Arc::new(platform), &targets, 2, 1).unwrap());

        let run = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(2, Duration::from_secs(600), &CancelSignal::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.stop_all().await;
        run.await.unwrap().unwrap();
        assert_eq!(pool.total_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_failure_cancels_siblings() {
        let platform = SimulatedPlatform::default();
        let targets = leaders(&platform, 1).await;
        let pool = Arc::new(PublisherPool::new(Arc::new(platform), &targets, 3, 2).unwrap());

        // Publisher 0 is busy in an earlier run, so the second run's member 0 fails
        let cancel = CancelSignal::new();
        let first = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.run(1, Duration::from_secs(600), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        let err = pool
            .run(3, Duration::from_secs(600), &CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::PublisherPool(ref m) if m.contains("already running")));
        assert!(started.elapsed() < Duration::from_secs(1));
        let metrics = pool.get_all_metrics();
        assert_eq!(metrics[0].state, PublisherState::Running);
        assert_eq!(metrics[1].state, PublisherState::Stopped);
        assert_eq!(metrics[2].state, PublisherState::Stopped);

        cancel.cancel();
        first.await.unwrap().unwrap();
        assert_eq!(pool.get_all_metrics()[0].state, PublisherState::Stopped);
    }
}
