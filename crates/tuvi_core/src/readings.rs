//! crates/tuvi_core/src/readings.rs
//!
//! Reading requests: pins the active prompt version onto a new `QUEUED`
//! reading and hands its id to the job queue. Results are polled.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{NewReading, Reading};
use crate::ports::{DatabaseService, JobQueue, PortError, PortResult};

#[derive(Clone)]
pub struct ReadingRequests {
    db: Arc<dyn DatabaseService>,
    queue: Arc<dyn JobQueue>,
    model_name: String,
}

impl ReadingRequests {
    pub fn new(db: Arc<dyn DatabaseService>, queue: Arc<dyn JobQueue>, model_name: String) -> Self {
        Self {
            db,
            queue,
            model_name,
        }
    }

    /// Creates a `QUEUED` reading for `submission_id` and enqueues it.
    ///
    /// Fails with `NoActivePrompt`, leaving no record and no message, when no
    /// prompt version is active.
    pub async fn request(&self, submission_id: Uuid) -> PortResult<Reading> {
        let submission = self.db.get_submission_by_id(submission_id).await?;
        let prompt = self
            .db
            .get_active_prompt_version()
            .await?
            .ok_or(PortError::NoActivePrompt)?;

        let reading = self
            .db
            .create_reading(NewReading {
                submission_id: submission.id,
                prompt_version_id: prompt.id,
                model_name: self.model_name.clone(),
            })
            .await?;

        if let Err(e) = self.queue.enqueue(reading.id).await {
            error!(reading_id = %reading.id, error = %e, "Failed to enqueue reading");
            let message = format!("Failed to enqueue reading: {}", e);
            self.db.fail_reading(reading.id, None, &message).await?;
            return Err(e);
        }

        info!(
            reading_id = %reading.id,
            submission_id = %submission.id,
            prompt_version = %prompt.name,
            "Reading queued"
        );
        Ok(reading)
    }

    /// Enqueues again every `QUEUED` reading older than `grace` that has no
    /// waiting or in-flight job. A crash between `create_reading` and
    /// `enqueue` leaves exactly such a reading. Returns how many were requeued.
    pub async fn requeue_orphans(&self, grace: Duration) -> PortResult<usize> {
        let grace = chrono::Duration::from_std(grace).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let mut requeued = 0;
        for reading in self.db.list_queued_readings(Utc::now() - grace).await? {
            if self.queue.has_live_job(reading.id).await? {
                continue;
            }
            let job = self.queue.enqueue(reading.id).await?;
            warn!(reading_id = %reading.id, job_id = %job.id, "Requeued reading that had no job");
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Current state of a reading, for polling clients.
    pub async fn poll(&self, reading_id: Uuid) -> PortResult<Reading> {
        self.db.get_reading_by_id(reading_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BirthInput, NewPromptVersion, ReadingJob, ReadingStatus};
    use crate::intake::SubmissionIntake;
    use crate::memory::MemoryStore;
    use crate::prompts::PromptRegistry;
    use crate::queue::{MemoryQueue, RetryPolicy};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Fixture {
        db: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        registry: PromptRegistry,
        requests: ReadingRequests,
        submission_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));
        let submission = SubmissionIntake::new(db.clone())
            .submit(BirthInput::new("1990-01-01"))
            .await
            .unwrap();
        Fixture {
            registry: PromptRegistry::new(db.clone()),
            requests: ReadingRequests::new(db.clone(), queue.clone(), "gpt-5-mini".to_string()),
            db,
            queue,
            submission_id: submission.id,
        }
    }

    fn prompt(name: &str) -> NewPromptVersion {
        NewPromptVersion {
            name: name.to_string(),
            system_prompt: "system".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_active_prompt_creates_nothing() {
        let f = fixture().await;
        f.registry.create(prompt("reading_v1")).await.unwrap();

        let err = f.requests.request(f.submission_id).await.unwrap_err();
        assert_eq!(err, PortError::NoActivePrompt);
        assert!(f.db.get_readings_for_submission(f.submission_id).await.unwrap().is_empty());
        assert_eq!(f.queue.pending().await, 0);
    }

    #[tokio::test]
    async fn test_request_queues_reading_with_active_prompt() {
        let f = fixture().await;
        let v1 = f.registry.create(prompt("reading_v1")).await.unwrap();
        f.registry.activate(v1.id).await.unwrap();

        let reading = f.requests.request(f.submission_id).await.unwrap();
        assert_eq!(reading.status, ReadingStatus::Queued);
        assert_eq!(reading.prompt_version_id, v1.id);
        assert_eq!(reading.model_name, "gpt-5-mini");

        let job = f.queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.reading_id, reading.id);
    }

    #[tokio::test]
    async fn test_pinned_prompt_survives_later_activation() {
        let f = fixture().await;
        let v1 = f.registry.create(prompt("reading_v1")).await.unwrap();
        f.registry.activate(v1.id).await.unwrap();
        let reading = f.requests.request(f.submission_id).await.unwrap();

        let v2 = f.registry.create(prompt("reading_v2")).await.unwrap();
        f.registry.activate(v2.id).await.unwrap();

        assert_eq!(f.requests.poll(reading.id).await.unwrap().prompt_version_id, v1.id);
        let next = f.requests.request(f.submission_id).await.unwrap();
        assert_eq!(next.prompt_version_id, v2.id);
    }

    #[tokio::test]
    async fn test_unknown_submission_is_not_found() {
        let f = fixture().await;
        let err = f.requests.request(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    struct BrokenQueue;

    #[async_trait]
    impl JobQueue for BrokenQueue {
        async fn enqueue(&self, _reading_id: Uuid) -> PortResult<ReadingJob> {
            Err(PortError::Unexpected("queue unavailable".to_string()))
        }
        async fn dequeue(&self) -> PortResult<Option<ReadingJob>> {
            Ok(None)
        }
        async fn complete(&self, _job: &ReadingJob) -> PortResult<()> {
            Ok(())
        }
        async fn retry(&self, _job: &ReadingJob, _delay: Duration, _error: &str) -> PortResult<()> {
            Ok(())
        }
        async fn bury(&self, _job: &ReadingJob, _error: &str) -> PortResult<()> {
            Ok(())
        }
        async fn has_live_job(&self, _reading_id: Uuid) -> PortResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_reading_failed() {
        let f = fixture().await;
        let v1 = f.registry.create(prompt("reading_v1")).await.unwrap();
        f.registry.activate(v1.id).await.unwrap();
        let requests = ReadingRequests::new(f.db.clone(), Arc::new(BrokenQueue), "gpt-5-mini".to_string());

        assert!(requests.request(f.submission_id).await.is_err());
        let readings = f.db.get_readings_for_submission(f.submission_id).await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].status, ReadingStatus::Failed);
        assert!(readings[0].error_message.as_deref().unwrap().contains("queue unavailable"));
    }

    #[tokio::test]
    async fn test_reading_left_without_job_is_requeued_once() {
        let f = fixture().await;
        let v1 = f.registry.create(prompt("reading_v1")).await.unwrap();
        f.registry.activate(v1.id).await.unwrap();
        let queued = f.requests.request(f.submission_id).await.unwrap();

        // A reading row whose enqueue never happened.
        let orphan = f
            .db
            .create_reading(NewReading {
                submission_id: f.submission_id,
                prompt_version_id: v1.id,
                model_name: "gpt-5-mini".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(f.requests.requeue_orphans(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(f.requests.requeue_orphans(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(f.requests.requeue_orphans(Duration::ZERO).await.unwrap(), 0);
        assert_eq!(f.queue.pending().await, 2);

        let mut delivered = Vec::new();
        while let Some(job) = f.queue.dequeue().await.unwrap() {
            delivered.push(job.reading_id);
        }
        delivered.sort();
        let mut expected = vec![queued.id, orphan.id];
        expected.sort();
        assert_eq!(delivered, expected);
    }
}
