//! crates/tuvi_core/src/worker.rs
//!
//! The reading worker. Each dequeued job drives one reading through
//! `QUEUED -> RUNNING -> {DONE, FAILED}`:
//!
//! 1. Load the reading; a missing one is a poison message and is dropped.
//! 2. Without provider configuration, fail the reading at once and do not retry.
//! 3. Claim the reading (`RUNNING`) before any external call.
//! 4. Call the provider with the pinned prompt version and persist the result.
//!
//! Errors from steps 3 and 4 leave the reading `RUNNING`; the job goes back to
//! the queue with exponential backoff. Once the attempt budget is spent the
//! exhaustion hook forces the reading to `FAILED` with the last error.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{ClaimOutcome, GenerationRequest, ReadingJob};
use crate::ports::{DatabaseService, JobQueue, PortError, PortResult, ReadingGenerationService};
use crate::queue::RetryPolicy;

/// Question sent with every payload: a general overview reading.
pub const DEFAULT_QUESTION: &str = "Luận quẻ tổng quan";

/// What one attempt did with its job. Every variant acknowledges the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The reading reached `DONE`.
    Completed,
    /// The reading no longer exists.
    Dropped,
    /// The reading is finished or owned by another job.
    Skipped,
    /// The provider is not configured; the reading was failed directly.
    Misconfigured,
}

#[derive(Clone)]
pub struct ReadingWorker {
    db: Arc<dyn DatabaseService>,
    queue: Arc<dyn JobQueue>,
    provider: Arc<dyn ReadingGenerationService>,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl ReadingWorker {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        queue: Arc<dyn JobQueue>,
        provider: Arc<dyn ReadingGenerationService>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            queue,
            provider,
            policy,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Consumes jobs until `shutdown` is cancelled. A job that has been
    /// dequeued is always processed to the end before the loop checks again.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Reading worker started");
        while !shutdown.is_cancelled() {
            let idle = match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    self.handle(job).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue reading job");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        info!("Reading worker stopped");
    }

    /// Processes jobs until the queue has nothing ready. Returns how many
    /// deliveries were handled.
    pub async fn drain(&self) -> PortResult<usize> {
        let mut handled = 0;
        while let Some(job) = self.queue.dequeue().await? {
            self.handle(job).await;
            handled += 1;
        }
        Ok(handled)
    }

    /// Runs one delivery and settles it with the queue: acknowledge, retry
    /// with backoff, or bury and fire the exhaustion hook.
    pub async fn handle(&self, job: ReadingJob) {
        if job.attempt > job.max_attempts {
            let message = format!("attempt budget of {} exhausted", job.max_attempts);
            self.exhaust(&job, &message).await;
            return;
        }

        let settled = match self.process(&job).await {
            Ok(outcome) => {
                debug!(job_id = %job.id, ?outcome, "Job settled");
                self.queue.complete(&job).await
            }
            Err(e) if e.is_retryable() && !job.is_last_attempt() => {
                let delay = self.policy.delay_after(job.attempt);
                warn!(
                    job_id = %job.id,
                    reading_id = %job.reading_id,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    ?delay,
                    error = %e,
                    "Reading attempt failed, will retry"
                );
                self.queue.retry(&job, delay, &e.to_string()).await
            }
            Err(e) => {
                self.exhaust(&job, &e.to_string()).await;
                Ok(())
            }
        };

        if let Err(e) = settled {
            // The lease will expire and the queue will deliver the job again.
            error!(job_id = %job.id, error = %e, "Failed to settle job with the queue");
        }
    }

    /// One attempt of the state machine for `job.reading_id`.
    #[instrument(skip(self, job), fields(job_id = %job.id, reading_id = %job.reading_id, attempt = job.attempt))]
    pub async fn process(&self, job: &ReadingJob) -> PortResult<JobOutcome> {
        let reading = match self.db.get_reading_by_id(job.reading_id).await {
            Ok(reading) => reading,
            Err(PortError::NotFound(_)) => {
                warn!("Reading not found, dropping job");
                return Ok(JobOutcome::Dropped);
            }
            Err(e) => return Err(e),
        };

        if reading.status.is_terminal() {
            debug!(status = %reading.status, "Reading already finished");
            return Ok(JobOutcome::Skipped);
        }

        if let Err(e) = self.provider.ensure_configured() {
            error!(kind = "configuration", error = %e, "Generation provider is not configured");
            let message = match e {
                PortError::Configuration(message) => message,
                other => other.to_string(),
            };
            self.db.fail_reading(reading.id, Some(job.id), &message).await?;
            return Ok(JobOutcome::Misconfigured);
        }

        let reading = match self.db.claim_reading(reading.id, job.id).await? {
            ClaimOutcome::Claimed(reading) => reading,
            ClaimOutcome::Busy(status) => {
                info!(%status, "Reading is owned by another job, skipping");
                return Ok(JobOutcome::Skipped);
            }
        };

        let submission = self.db.get_submission_by_id(reading.submission_id).await?;
        let prompt = self.db.get_prompt_version_by_id(reading.prompt_version_id).await?;

        let request = GenerationRequest {
            system_prompt: prompt.system_prompt,
            user_payload: json!({
                "birthInput": submission.birth_input,
                "chartJson": submission.chart,
                "question": DEFAULT_QUESTION,
            }),
            model: reading.model_name.clone(),
            temperature: prompt.temperature,
            max_output_tokens: prompt.max_output_tokens,
        };

        let output = self.provider.generate_reading(&request).await?;
        if output.text.trim().is_empty() {
            return Err(PortError::Unexpected(
                "Generation provider returned an empty reading".to_string(),
            ));
        }

        if !self.db.complete_reading(reading.id, job.id, &output).await? {
            warn!("Lost the claim before the result could be stored");
            return Ok(JobOutcome::Skipped);
        }

        info!(
            model = %output.model,
            input_tokens = ?output.input_tokens,
            output_tokens = ?output.output_tokens,
            latency_ms = output.latency_ms,
            "Reading completed"
        );
        Ok(JobOutcome::Completed)
    }

    /// Exhaustion hook: parks the job and forces its reading to `FAILED`,
    /// independently of whatever the attempt itself managed to write.
    async fn exhaust(&self, job: &ReadingJob, last_error: &str) {
        error!(
            job_id = %job.id,
            reading_id = %job.reading_id,
            attempt = job.attempt,
            error = last_error,
            "Reading job failed permanently"
        );
        if let Err(e) = self.queue.bury(job, last_error).await {
            error!(job_id = %job.id, error = %e, "Failed to bury job");
        }
        let message = format!("Worker error: {}", last_error);
        match self.db.fail_reading(job.reading_id, Some(job.id), &message).await {
            Ok(_) => {}
            Err(PortError::NotFound(_)) => {
                warn!(reading_id = %job.reading_id, "Exhausted job refers to a missing reading");
            }
            Err(e) => {
                error!(reading_id = %job.reading_id, error = %e, "Failed to mark reading as failed");
            }
        }
    }
}
