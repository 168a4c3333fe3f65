//! services/api/src/adapters/queue.rs
//!
//! A durable `JobQueue` on top of the `reading_jobs` table.
//!
//! Delivery is at-least-once. `dequeue` leases one ready row with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive the same job
//! at the same time; a lease older than the visibility timeout is considered
//! abandoned and the row becomes deliverable again under the same job id.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::debug;
use tuvi_core::domain::ReadingJob;
use tuvi_core::ports::{JobQueue, PortError, PortResult};
use tuvi_core::queue::RetryPolicy;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    policy: RetryPolicy,
    visibility_timeout: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, policy: RetryPolicy, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            policy,
            visibility_timeout,
        }
    }

    /// Checks that `job` is still leased; a settled job cannot be settled twice.
    fn settled(rows_affected: u64, job: &ReadingJob) -> PortResult<()> {
        if rows_affected == 0 {
            return Err(PortError::NotFound(format!("Job {} is not in flight", job.id)));
        }
        Ok(())
    }
}

#[derive(FromRow)]
struct JobRecord {
    id: Uuid,
    reading_id: Uuid,
    attempt: i32,
    max_attempts: i32,
}
impl JobRecord {
    fn to_domain(self) -> ReadingJob {
        ReadingJob {
            id: self.id,
            reading_id: self.reading_id,
            attempt: u32::try_from(self.attempt).unwrap_or(0),
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(0),
        }
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, reading_id: Uuid) -> PortResult<ReadingJob> {
        let record = sqlx::query_as::<_, JobRecord>(
            "INSERT INTO reading_jobs (id, reading_id, max_attempts) VALUES ($1, $2, $3) \
             RETURNING id, reading_id, attempt, max_attempts",
        )
        .bind(Uuid::new_v4())
        .bind(reading_id)
        .bind(i32::try_from(self.policy.max_attempts).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        let job = record.to_domain();
        debug!(job_id = %job.id, reading_id = %reading_id, "Job enqueued");
        Ok(job)
    }

    async fn dequeue(&self) -> PortResult<Option<ReadingJob>> {
        let record = sqlx::query_as::<_, JobRecord>(
            "UPDATE reading_jobs SET state = 'active', attempt = attempt + 1, locked_at = now(), updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM reading_jobs \
                 WHERE (state = 'pending' AND run_at <= now()) \
                    OR (state = 'active' AND locked_at < now() - make_interval(secs => $1::double precision / 1000)) \
                 ORDER BY run_at \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, reading_id, attempt, max_attempts",
        )
        .bind(millis(self.visibility_timeout))
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(JobRecord::to_domain))
    }

    async fn complete(&self, job: &ReadingJob) -> PortResult<()> {
        // Acknowledged jobs carry nothing worth keeping; only dead rows stay.
        let result = sqlx::query("DELETE FROM reading_jobs WHERE id = $1 AND state = 'active'")
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Self::settled(result.rows_affected(), job)
    }

    async fn retry(&self, job: &ReadingJob, delay: Duration, error: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE reading_jobs SET state = 'pending', locked_at = NULL, last_error = $2, \
             run_at = now() + make_interval(secs => $3::double precision / 1000), updated_at = now() \
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job.id)
        .bind(error)
        .bind(millis(delay))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Self::settled(result.rows_affected(), job)
    }

    async fn bury(&self, job: &ReadingJob, error: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE reading_jobs SET state = 'dead', locked_at = NULL, last_error = $2, updated_at = now() \
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job.id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Self::settled(result.rows_affected(), job)
    }

    async fn has_live_job(&self, reading_id: Uuid) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reading_jobs WHERE reading_id = $1 AND state IN ('pending', 'active'))",
        )
        .bind(reading_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }
}
