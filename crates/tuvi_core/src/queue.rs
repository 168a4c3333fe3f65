//! crates/tuvi_core/src/queue.rs
//!
//! Retry policy shared by every queue backend, plus `MemoryQueue`, an
//! in-process `JobQueue` with the same lease/attempt semantics as the
//! durable one.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::domain::ReadingJob;
use crate::ports::{JobQueue, PortError, PortResult};

/// Attempt budget and exponential backoff for reading jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): the base delay,
    /// doubled for every earlier retry.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    job: ReadingJob,
    ready_at: Instant,
    leased_until: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    buried: Vec<(ReadingJob, String)>,
}

/// In-process queue. A leased job that is neither completed nor retried
/// becomes deliverable again once its visibility timeout elapses.
pub struct MemoryQueue {
    policy: RetryPolicy,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            visibility_timeout: Duration::from_secs(300),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// Jobs not yet completed or buried, leased or not.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Jobs parked after exhausting their attempts, with the last error.
    pub async fn buried(&self) -> Vec<(ReadingJob, String)> {
        self.state.lock().await.buried.clone()
    }

    fn not_found(job: &ReadingJob) -> PortError {
        PortError::NotFound(format!("Job {} is not in the queue", job.id))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, reading_id: Uuid) -> PortResult<ReadingJob> {
        let job = ReadingJob {
            id: Uuid::new_v4(),
            reading_id,
            attempt: 0,
            max_attempts: self.policy.max_attempts,
        };
        self.state.lock().await.entries.push_back(Entry {
            job: job.clone(),
            ready_at: Instant::now(),
            leased_until: None,
        });
        debug!(job_id = %job.id, reading_id = %reading_id, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self) -> PortResult<Option<ReadingJob>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let next = state.entries.iter_mut().find(|entry| match entry.leased_until {
            Some(until) => until <= now,
            None => entry.ready_at <= now,
        });
        Ok(next.map(|entry| {
            entry.job.attempt += 1;
            entry.leased_until = Some(now + self.visibility_timeout);
            entry.job.clone()
        }))
    }

    async fn complete(&self, job: &ReadingJob) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|entry| entry.job.id != job.id);
        if state.entries.len() == before {
            return Err(Self::not_found(job));
        }
        Ok(())
    }

    async fn retry(&self, job: &ReadingJob, delay: Duration, error: &str) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .iter_mut()
            .find(|entry| entry.job.id == job.id)
            .ok_or_else(|| Self::not_found(job))?;
        entry.leased_until = None;
        entry.ready_at = Instant::now() + delay;
        debug!(job_id = %job.id, ?delay, error, "Job scheduled for retry");
        Ok(())
    }

    async fn bury(&self, job: &ReadingJob, error: &str) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let position = state
            .entries
            .iter()
            .position(|entry| entry.job.id == job.id)
            .ok_or_else(|| Self::not_found(job))?;
        if let Some(entry) = state.entries.remove(position) {
            state.buried.push((entry.job, error.to_string()));
        }
        Ok(())
    }

    async fn has_live_job(&self, reading_id: Uuid) -> PortResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .entries
            .iter()
            .any(|entry| entry.job.reading_id == reading_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_each_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_dequeue_counts_attempts_and_hides_leased_jobs() {
        let queue = MemoryQueue::new(RetryPolicy::default());
        let reading_id = Uuid::new_v4();
        queue.enqueue(reading_id).await.unwrap();

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.reading_id, reading_id);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 3);
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.retry(&job, Duration::ZERO, "transient").await.unwrap();
        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempt, 2);

        assert!(queue.has_live_job(reading_id).await.unwrap());
        queue.complete(&again).await.unwrap();
        assert_eq!(queue.pending().await, 0);
        assert!(!queue.has_live_job(reading_id).await.unwrap());
        assert!(queue.complete(&again).await.is_err());
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let queue = MemoryQueue::new(RetryPolicy::default());
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();

        queue.retry(&job, Duration::from_secs(60), "transient").await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new(RetryPolicy::default()).with_visibility_timeout(Duration::ZERO);
        queue.enqueue(Uuid::new_v4()).await.unwrap();

        let first = queue.dequeue().await.unwrap().unwrap();
        let redelivered = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(first.id, redelivered.id);
        assert_eq!(redelivered.attempt, 2);
    }

    #[tokio::test]
    async fn test_bury_removes_job_and_keeps_error() {
        let queue = MemoryQueue::new(RetryPolicy::default());
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        let job = queue.dequeue().await.unwrap().unwrap();

        queue.bury(&job, "provider down").await.unwrap();
        assert_eq!(queue.pending().await, 0);
        let buried = queue.buried().await;
        assert_eq!(buried.len(), 1);
        assert_eq!(buried[0].1, "provider down");
        assert!(queue.complete(&job).await.is_err());
    }
}
