//! crates/tuvi_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the reading pipeline.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the relational store, the durable queue and the
//! text-generation provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Chart, BirthInput, ClaimOutcome, Correction, GenerationOutput, GenerationRequest, NewCorrection,
    NewPromptVersion, NewReading, PromptVersion, Reading, ReadingJob, Reviewer, Submission,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("No active prompt version")]
    NoActivePrompt,
    #[error("Admin user not found")]
    NoReviewer,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Only transient failures are worth another attempt; everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Unexpected(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Submissions ---
    async fn create_submission(&self, birth_input: &BirthInput, chart: &Chart) -> PortResult<Submission>;

    async fn get_submission_by_id(&self, submission_id: Uuid) -> PortResult<Submission>;

    /// All submissions, newest first.
    async fn list_submissions(&self) -> PortResult<Vec<Submission>>;

    // --- Prompt Versions ---

    /// Inserts an inactive version. Fails with `Conflict` on a duplicate name.
    async fn create_prompt_version(&self, new_version: NewPromptVersion) -> PortResult<PromptVersion>;

    /// Deactivates every version and activates `prompt_version_id` as one
    /// atomic unit of work.
    async fn activate_prompt_version(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion>;

    /// The most recently activated active version, if any.
    async fn get_active_prompt_version(&self) -> PortResult<Option<PromptVersion>>;

    async fn get_prompt_version_by_id(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion>;

    async fn get_prompt_version_by_name(&self, name: &str) -> PortResult<Option<PromptVersion>>;

    /// All versions, newest first.
    async fn list_prompt_versions(&self) -> PortResult<Vec<PromptVersion>>;

    /// Overwrites the instructions and parameters of an existing version,
    /// keeping its name, id and active flag.
    async fn refresh_prompt_version(
        &self,
        prompt_version_id: Uuid,
        new_version: NewPromptVersion,
    ) -> PortResult<PromptVersion>;

    // --- Readings ---

    /// Inserts a reading in `QUEUED`.
    async fn create_reading(&self, new_reading: NewReading) -> PortResult<Reading>;

    async fn get_reading_by_id(&self, reading_id: Uuid) -> PortResult<Reading>;

    /// All readings of a submission, newest first.
    async fn get_readings_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Reading>>;

    /// `QUEUED` readings created at or before `created_before`, oldest first.
    async fn list_queued_readings(&self, created_before: DateTime<Utc>) -> PortResult<Vec<Reading>>;

    /// Conditional `-> RUNNING` write on behalf of `job_id`. Succeeds when the
    /// stored status is `QUEUED`, or `RUNNING` already claimed by the same job.
    async fn claim_reading(&self, reading_id: Uuid, job_id: Uuid) -> PortResult<ClaimOutcome>;

    /// Conditional `RUNNING -> DONE` write. Returns `false` when `job_id` no
    /// longer holds the claim.
    async fn complete_reading(
        &self,
        reading_id: Uuid,
        job_id: Uuid,
        output: &GenerationOutput,
    ) -> PortResult<bool>;

    /// Conditional `-> FAILED` write. Applies only to a non-terminal reading
    /// that is unclaimed or, when `job_id` is given, claimed by that job.
    async fn fail_reading(
        &self,
        reading_id: Uuid,
        job_id: Option<Uuid>,
        error_message: &str,
    ) -> PortResult<bool>;

    // --- Reviewers ---

    /// Resolves the admin reviewer acting on a request: the given id when
    /// present, otherwise the earliest-created admin.
    async fn find_acting_reviewer(&self, reviewer_id: Option<Uuid>) -> PortResult<Option<Reviewer>>;

    async fn upsert_reviewer(
        &self,
        email: &str,
        display_name: Option<&str>,
        is_admin: bool,
    ) -> PortResult<Reviewer>;

    // --- Corrections ---
    async fn create_correction(&self, new_correction: NewCorrection) -> PortResult<Correction>;

    /// Corrections of one reading, oldest first.
    async fn get_corrections_for_reading(&self, reading_id: Uuid) -> PortResult<Vec<Correction>>;

    /// Corrections across every reading of a submission, oldest first.
    async fn get_corrections_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Correction>>;
}

/// A durable, at-least-once work queue carrying reading ids.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Admits a message for up to the configured number of attempts. Repeated
    /// calls for the same reading are not deduplicated.
    async fn enqueue(&self, reading_id: Uuid) -> PortResult<ReadingJob>;

    /// Leases the next ready job, counting this delivery as an attempt.
    async fn dequeue(&self) -> PortResult<Option<ReadingJob>>;

    /// Acknowledges a job; it will not be delivered again.
    async fn complete(&self, job: &ReadingJob) -> PortResult<()>;

    /// Returns a job to the queue, ready again after `delay`.
    async fn retry(&self, job: &ReadingJob, delay: Duration, error: &str) -> PortResult<()>;

    /// Parks a job whose attempt budget is spent.
    async fn bury(&self, job: &ReadingJob, error: &str) -> PortResult<()>;

    /// Whether a job for `reading_id` is waiting or in flight.
    async fn has_live_job(&self, reading_id: Uuid) -> PortResult<bool>;
}

#[async_trait]
pub trait ReadingGenerationService: Send + Sync {
    /// Fails with `Configuration` when the provider cannot be called at all,
    /// e.g. because its credential is missing.
    fn ensure_configured(&self) -> PortResult<()>;

    /// Produces one reading from a system prompt and a structured payload.
    async fn generate_reading(&self, request: &GenerationRequest) -> PortResult<GenerationOutput>;
}
