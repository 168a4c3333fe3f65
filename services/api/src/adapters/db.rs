//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Reading status changes are conditional `UPDATE`s keyed on the expected
//! status and claim, so concurrent workers cannot overwrite each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, FromRow, PgPool};
use tuvi_core::domain::{
    BirthInput, Chart, ClaimOutcome, Correction, GenerationOutput, NewCorrection, NewPromptVersion,
    NewReading, PromptVersion, Reading, ReadingStatus, Reviewer, ScoreVector, Submission,
    SUBMISSION_CHART_READY,
};
use tuvi_core::ports::{DatabaseService, PortError, PortResult};
use uuid::Uuid;

/// Key for the transaction-scoped advisory lock serializing prompt activation.
const PROMPT_ACTIVATION_LOCK: i64 = 0x7475_7669_7072_6f6d;

const SUBMISSION_COLUMNS: &str = "id, birth_input, status, chart_json, created_at";
const PROMPT_COLUMNS: &str = "id, name, system_prompt, rubric, temperature, max_output_tokens, notes, \
     is_active, activated_at, created_at";
const READING_COLUMNS: &str = "id, submission_id, prompt_version_id, model_name, status, reading_text, \
     error_message, input_tokens, output_tokens, latency_ms, claimed_by, created_at, started_at, finished_at";
const REVIEWER_COLUMNS: &str = "id, email, display_name, is_admin, created_at";
const CORRECTION_COLUMNS: &str = "c.id, c.reading_id, c.reviewer_id, c.correction_type, c.severity, \
     c.corrected_text, c.notes, c.scores, c.span, c.original_excerpt, c.created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps a unique-key violation to `Conflict`, everything else to `Unexpected`.
fn conflict_or_unexpected(e: sqlx::Error, conflict: impl FnOnce() -> String) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => PortError::Conflict(conflict()),
        _ => unexpected(e),
    }
}

fn to_i32(value: Option<u32>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SubmissionRecord {
    id: Uuid,
    birth_input: Json<BirthInput>,
    status: String,
    chart_json: Json<Chart>,
    created_at: DateTime<Utc>,
}
impl SubmissionRecord {
    fn to_domain(self) -> Submission {
        Submission {
            id: self.id,
            birth_input: self.birth_input.0,
            chart: self.chart_json.0,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct PromptVersionRecord {
    id: Uuid,
    name: String,
    system_prompt: String,
    rubric: Option<Value>,
    temperature: Option<f32>,
    max_output_tokens: Option<i32>,
    notes: Option<String>,
    is_active: bool,
    activated_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}
impl PromptVersionRecord {
    fn to_domain(self) -> PromptVersion {
        PromptVersion {
            id: self.id,
            name: self.name,
            system_prompt: self.system_prompt,
            rubric: self.rubric,
            temperature: self.temperature,
            max_output_tokens: to_u32(self.max_output_tokens),
            notes: self.notes,
            is_active: self.is_active,
            activated_at: self.activated_at,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReadingRecord {
    id: Uuid,
    submission_id: Uuid,
    prompt_version_id: Uuid,
    model_name: String,
    status: String,
    reading_text: Option<String>,
    error_message: Option<String>,
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
    latency_ms: Option<i64>,
    claimed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}
impl ReadingRecord {
    fn to_domain(self) -> PortResult<Reading> {
        Ok(Reading {
            id: self.id,
            submission_id: self.submission_id,
            prompt_version_id: self.prompt_version_id,
            model_name: self.model_name,
            status: self.status.parse()?,
            reading_text: self.reading_text,
            error_message: self.error_message,
            input_tokens: to_u32(self.input_tokens),
            output_tokens: to_u32(self.output_tokens),
            latency_ms: self.latency_ms.and_then(|v| u64::try_from(v).ok()),
            claimed_by: self.claimed_by,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(FromRow)]
struct ReviewerRecord {
    id: Uuid,
    email: String,
    display_name: Option<String>,
    is_admin: bool,
    created_at: DateTime<Utc>,
}
impl ReviewerRecord {
    fn to_domain(self) -> Reviewer {
        Reviewer {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            is_admin: self.is_admin,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CorrectionRecord {
    id: Uuid,
    reading_id: Uuid,
    reviewer_id: Uuid,
    correction_type: String,
    severity: i16,
    corrected_text: String,
    notes: Option<String>,
    scores: Option<Json<ScoreVector>>,
    span: Option<Value>,
    original_excerpt: Option<String>,
    created_at: DateTime<Utc>,
}
impl CorrectionRecord {
    fn to_domain(self) -> PortResult<Correction> {
        let severity = u8::try_from(self.severity)
            .map_err(|_| PortError::Unexpected(format!("Stored severity {} is out of range", self.severity)))?;
        Ok(Correction {
            id: self.id,
            reading_id: self.reading_id,
            reviewer_id: self.reviewer_id,
            correction_type: self.correction_type.parse()?,
            severity,
            corrected_text: self.corrected_text,
            notes: self.notes,
            scores: self.scores.map(|s| s.0),
            span: self.span,
            original_excerpt: self.original_excerpt,
            created_at: self.created_at,
        })
    }
}

fn readings_to_domain(records: Vec<ReadingRecord>) -> PortResult<Vec<Reading>> {
    records.into_iter().map(ReadingRecord::to_domain).collect()
}

fn corrections_to_domain(records: Vec<CorrectionRecord>) -> PortResult<Vec<Correction>> {
    records.into_iter().map(CorrectionRecord::to_domain).collect()
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_submission(&self, birth_input: &BirthInput, chart: &Chart) -> PortResult<Submission> {
        let sql = format!(
            "INSERT INTO submissions (id, birth_input, status, engine_version, chart_json) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SUBMISSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SubmissionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(Json(birth_input))
            .bind(SUBMISSION_CHART_READY)
            .bind(&chart.engine_version)
            .bind(Json(chart))
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_submission_by_id(&self, submission_id: Uuid) -> PortResult<Submission> {
        let sql = format!("SELECT {} FROM submissions WHERE id = $1", SUBMISSION_COLUMNS);
        sqlx::query_as::<_, SubmissionRecord>(&sql)
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(SubmissionRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn list_submissions(&self) -> PortResult<Vec<Submission>> {
        let sql = format!("SELECT {} FROM submissions ORDER BY created_at DESC", SUBMISSION_COLUMNS);
        let records = sqlx::query_as::<_, SubmissionRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(SubmissionRecord::to_domain).collect())
    }

    async fn create_prompt_version(&self, new_version: NewPromptVersion) -> PortResult<PromptVersion> {
        let sql = format!(
            "INSERT INTO prompt_versions (id, name, system_prompt, rubric, temperature, max_output_tokens, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            PROMPT_COLUMNS
        );
        let name = new_version.name.clone();
        let record = sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_version.name)
            .bind(new_version.system_prompt)
            .bind(new_version.rubric)
            .bind(new_version.temperature)
            .bind(to_i32(new_version.max_output_tokens))
            .bind(new_version.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or_unexpected(e, || format!("Prompt version '{}' already exists", name)))?;
        Ok(record.to_domain())
    }

    async fn activate_prompt_version(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Concurrent activations queue up here; the last to commit wins.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PROMPT_ACTIVATION_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        sqlx::query("UPDATE prompt_versions SET is_active = FALSE WHERE is_active AND id <> $1")
            .bind(prompt_version_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let sql = format!(
            "UPDATE prompt_versions SET is_active = TRUE, activated_at = now() WHERE id = $1 RETURNING {}",
            PROMPT_COLUMNS
        );
        let record = sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .bind(prompt_version_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?;

        // Dropping `tx` without committing rolls the deactivation back.
        let record = record
            .ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))?;
        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_active_prompt_version(&self) -> PortResult<Option<PromptVersion>> {
        let sql = format!(
            "SELECT {} FROM prompt_versions WHERE is_active \
             ORDER BY activated_at DESC NULLS LAST, created_at DESC LIMIT 1",
            PROMPT_COLUMNS
        );
        let record = sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(PromptVersionRecord::to_domain))
    }

    async fn get_prompt_version_by_id(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion> {
        let sql = format!("SELECT {} FROM prompt_versions WHERE id = $1", PROMPT_COLUMNS);
        sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .bind(prompt_version_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(PromptVersionRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))
    }

    async fn get_prompt_version_by_name(&self, name: &str) -> PortResult<Option<PromptVersion>> {
        let sql = format!("SELECT {} FROM prompt_versions WHERE name = $1", PROMPT_COLUMNS);
        let record = sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(PromptVersionRecord::to_domain))
    }

    async fn list_prompt_versions(&self) -> PortResult<Vec<PromptVersion>> {
        let sql = format!("SELECT {} FROM prompt_versions ORDER BY created_at DESC", PROMPT_COLUMNS);
        let records = sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(PromptVersionRecord::to_domain).collect())
    }

    async fn refresh_prompt_version(
        &self,
        prompt_version_id: Uuid,
        new_version: NewPromptVersion,
    ) -> PortResult<PromptVersion> {
        let sql = format!(
            "UPDATE prompt_versions SET system_prompt = $2, rubric = $3, temperature = $4, \
             max_output_tokens = $5, notes = $6 WHERE id = $1 RETURNING {}",
            PROMPT_COLUMNS
        );
        sqlx::query_as::<_, PromptVersionRecord>(&sql)
            .bind(prompt_version_id)
            .bind(new_version.system_prompt)
            .bind(new_version.rubric)
            .bind(new_version.temperature)
            .bind(to_i32(new_version.max_output_tokens))
            .bind(new_version.notes)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(PromptVersionRecord::to_domain)
            .ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))
    }

    async fn create_reading(&self, new_reading: NewReading) -> PortResult<Reading> {
        let sql = format!(
            "INSERT INTO readings (id, submission_id, prompt_version_id, model_name, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            READING_COLUMNS
        );
        let record = sqlx::query_as::<_, ReadingRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_reading.submission_id)
            .bind(new_reading.prompt_version_id)
            .bind(new_reading.model_name)
            .bind(ReadingStatus::Queued.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => PortError::NotFound(format!(
                    "Submission {} not found",
                    new_reading.submission_id
                )),
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn get_reading_by_id(&self, reading_id: Uuid) -> PortResult<Reading> {
        let sql = format!("SELECT {} FROM readings WHERE id = $1", READING_COLUMNS);
        sqlx::query_as::<_, ReadingRecord>(&sql)
            .bind(reading_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("Reading {} not found", reading_id)))?
            .to_domain()
    }

    async fn get_readings_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Reading>> {
        let sql = format!(
            "SELECT {} FROM readings WHERE submission_id = $1 ORDER BY created_at DESC",
            READING_COLUMNS
        );
        let records = sqlx::query_as::<_, ReadingRecord>(&sql)
            .bind(submission_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        readings_to_domain(records)
    }

    async fn list_queued_readings(&self, created_before: DateTime<Utc>) -> PortResult<Vec<Reading>> {
        let sql = format!(
            "SELECT {} FROM readings WHERE status = 'QUEUED' AND created_at <= $1 ORDER BY created_at",
            READING_COLUMNS
        );
        let records = sqlx::query_as::<_, ReadingRecord>(&sql)
            .bind(created_before)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        readings_to_domain(records)
    }

    async fn claim_reading(&self, reading_id: Uuid, job_id: Uuid) -> PortResult<ClaimOutcome> {
        let sql = format!(
            "UPDATE readings SET status = 'RUNNING', claimed_by = $2, started_at = now() \
             WHERE id = $1 AND (status = 'QUEUED' OR (status = 'RUNNING' AND claimed_by = $2)) \
             RETURNING {}",
            READING_COLUMNS
        );
        let claimed = sqlx::query_as::<_, ReadingRecord>(&sql)
            .bind(reading_id)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        match claimed {
            Some(record) => Ok(ClaimOutcome::Claimed(record.to_domain()?)),
            None => {
                let current = self.get_reading_by_id(reading_id).await?;
                Ok(ClaimOutcome::Busy(current.status))
            }
        }
    }

    async fn complete_reading(
        &self,
        reading_id: Uuid,
        job_id: Uuid,
        output: &GenerationOutput,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE readings SET status = 'DONE', reading_text = $3, model_name = $4, \
             input_tokens = $5, output_tokens = $6, latency_ms = $7, error_message = NULL, finished_at = now() \
             WHERE id = $1 AND status = 'RUNNING' AND claimed_by = $2",
        )
        .bind(reading_id)
        .bind(job_id)
        .bind(&output.text)
        .bind(&output.model)
        .bind(to_i32(output.input_tokens))
        .bind(to_i32(output.output_tokens))
        .bind(i64::try_from(output.latency_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_reading(
        &self,
        reading_id: Uuid,
        job_id: Option<Uuid>,
        error_message: &str,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE readings SET status = 'FAILED', error_message = $3, finished_at = now() \
             WHERE id = $1 AND status IN ('QUEUED', 'RUNNING') \
             AND (claimed_by IS NULL OR claimed_by = $2)",
        )
        .bind(reading_id)
        .bind(job_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_acting_reviewer(&self, reviewer_id: Option<Uuid>) -> PortResult<Option<Reviewer>> {
        let record = match reviewer_id {
            Some(id) => {
                let sql = format!("SELECT {} FROM reviewers WHERE id = $1 AND is_admin", REVIEWER_COLUMNS);
                sqlx::query_as::<_, ReviewerRecord>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM reviewers WHERE is_admin ORDER BY created_at ASC LIMIT 1",
                    REVIEWER_COLUMNS
                );
                sqlx::query_as::<_, ReviewerRecord>(&sql).fetch_optional(&self.pool).await
            }
        }
        .map_err(unexpected)?;
        Ok(record.map(ReviewerRecord::to_domain))
    }

    async fn upsert_reviewer(
        &self,
        email: &str,
        display_name: Option<&str>,
        is_admin: bool,
    ) -> PortResult<Reviewer> {
        let sql = format!(
            "INSERT INTO reviewers (id, email, display_name, is_admin) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (email) DO UPDATE SET display_name = EXCLUDED.display_name, is_admin = EXCLUDED.is_admin \
             RETURNING {}",
            REVIEWER_COLUMNS
        );
        let record = sqlx::query_as::<_, ReviewerRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(display_name)
            .bind(is_admin)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn create_correction(&self, new_correction: NewCorrection) -> PortResult<Correction> {
        let sql = format!(
            "INSERT INTO corrections AS c (id, reading_id, reviewer_id, correction_type, severity, corrected_text, \
             notes, scores, span, original_excerpt) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            CORRECTION_COLUMNS
        );
        let reading_id = new_correction.reading_id;
        let record = sqlx::query_as::<_, CorrectionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(new_correction.reading_id)
            .bind(new_correction.reviewer_id)
            .bind(new_correction.correction_type.as_str())
            .bind(i16::from(new_correction.severity))
            .bind(new_correction.corrected_text)
            .bind(new_correction.notes)
            .bind(new_correction.scores.map(Json))
            .bind(new_correction.span)
            .bind(new_correction.original_excerpt)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    PortError::NotFound(format!("Reading {} not found", reading_id))
                }
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn get_corrections_for_reading(&self, reading_id: Uuid) -> PortResult<Vec<Correction>> {
        let sql = format!(
            "SELECT {} FROM corrections c WHERE c.reading_id = $1 ORDER BY c.created_at ASC",
            CORRECTION_COLUMNS
        );
        let records = sqlx::query_as::<_, CorrectionRecord>(&sql)
            .bind(reading_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        corrections_to_domain(records)
    }

    async fn get_corrections_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Correction>> {
        let sql = format!(
            "SELECT {} FROM corrections c JOIN readings r ON r.id = c.reading_id \
             WHERE r.submission_id = $1 ORDER BY c.created_at ASC",
            CORRECTION_COLUMNS
        );
        let records = sqlx::query_as::<_, CorrectionRecord>(&sql)
            .bind(submission_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        corrections_to_domain(records)
    }
}
