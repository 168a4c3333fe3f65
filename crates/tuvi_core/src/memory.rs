//! crates/tuvi_core/src/memory.rs
//!
//! An in-process implementation of `DatabaseService`. Every method takes one
//! lock over the whole state, so each call is atomic the same way a single
//! transaction is against the relational store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    BirthInput, Chart, ClaimOutcome, Correction, GenerationOutput, NewCorrection, NewPromptVersion,
    NewReading, PromptVersion, Reading, ReadingStatus, Reviewer, Submission, SUBMISSION_CHART_READY,
};
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Default)]
struct State {
    submissions: Vec<Submission>,
    prompt_versions: Vec<PromptVersion>,
    readings: Vec<Reading>,
    reviewers: Vec<Reviewer>,
    corrections: Vec<Correction>,
}

impl State {
    fn reading_mut(&mut self, reading_id: Uuid) -> PortResult<&mut Reading> {
        self.readings
            .iter_mut()
            .find(|r| r.id == reading_id)
            .ok_or_else(|| PortError::NotFound(format!("Reading {} not found", reading_id)))
    }
}

/// Vectors are kept in insertion order; "newest first" reads iterate in reverse.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseService for MemoryStore {
    async fn create_submission(&self, birth_input: &BirthInput, chart: &Chart) -> PortResult<Submission> {
        let submission = Submission {
            id: Uuid::new_v4(),
            birth_input: birth_input.clone(),
            chart: chart.clone(),
            status: SUBMISSION_CHART_READY.to_string(),
            created_at: Utc::now(),
        };
        self.state.lock().await.submissions.push(submission.clone());
        Ok(submission)
    }

    async fn get_submission_by_id(&self, submission_id: Uuid) -> PortResult<Submission> {
        self.state
            .lock()
            .await
            .submissions
            .iter()
            .find(|s| s.id == submission_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Submission {} not found", submission_id)))
    }

    async fn list_submissions(&self) -> PortResult<Vec<Submission>> {
        Ok(self.state.lock().await.submissions.iter().rev().cloned().collect())
    }

    async fn create_prompt_version(&self, new_version: NewPromptVersion) -> PortResult<PromptVersion> {
        let mut state = self.state.lock().await;
        if state.prompt_versions.iter().any(|p| p.name == new_version.name) {
            return Err(PortError::Conflict(format!(
                "Prompt version '{}' already exists",
                new_version.name
            )));
        }
        let version = PromptVersion {
            id: Uuid::new_v4(),
            name: new_version.name,
            system_prompt: new_version.system_prompt,
            rubric: new_version.rubric,
            temperature: new_version.temperature,
            max_output_tokens: new_version.max_output_tokens,
            notes: new_version.notes,
            is_active: false,
            activated_at: None,
            created_at: Utc::now(),
        };
        state.prompt_versions.push(version.clone());
        Ok(version)
    }

    async fn activate_prompt_version(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion> {
        let mut state = self.state.lock().await;
        if !state.prompt_versions.iter().any(|p| p.id == prompt_version_id) {
            return Err(PortError::NotFound(format!(
                "Prompt version {} not found",
                prompt_version_id
            )));
        }
        let now = Utc::now();
        let mut activated = None;
        for version in state.prompt_versions.iter_mut() {
            if version.id == prompt_version_id {
                version.is_active = true;
                version.activated_at = Some(now);
                activated = Some(version.clone());
            } else {
                version.is_active = false;
            }
        }
        activated.ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))
    }

    async fn get_active_prompt_version(&self) -> PortResult<Option<PromptVersion>> {
        let state = self.state.lock().await;
        Ok(state
            .prompt_versions
            .iter()
            .filter(|p| p.is_active)
            .max_by_key(|p| (p.activated_at, p.created_at))
            .cloned())
    }

    async fn get_prompt_version_by_id(&self, prompt_version_id: Uuid) -> PortResult<PromptVersion> {
        self.state
            .lock()
            .await
            .prompt_versions
            .iter()
            .find(|p| p.id == prompt_version_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))
    }

    async fn get_prompt_version_by_name(&self, name: &str) -> PortResult<Option<PromptVersion>> {
        Ok(self
            .state
            .lock()
            .await
            .prompt_versions
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn list_prompt_versions(&self) -> PortResult<Vec<PromptVersion>> {
        Ok(self.state.lock().await.prompt_versions.iter().rev().cloned().collect())
    }

    async fn refresh_prompt_version(
        &self,
        prompt_version_id: Uuid,
        new_version: NewPromptVersion,
    ) -> PortResult<PromptVersion> {
        let mut state = self.state.lock().await;
        let version = state
            .prompt_versions
            .iter_mut()
            .find(|p| p.id == prompt_version_id)
            .ok_or_else(|| PortError::NotFound(format!("Prompt version {} not found", prompt_version_id)))?;
        version.system_prompt = new_version.system_prompt;
        version.rubric = new_version.rubric;
        version.temperature = new_version.temperature;
        version.max_output_tokens = new_version.max_output_tokens;
        version.notes = new_version.notes;
        Ok(version.clone())
    }

    async fn create_reading(&self, new_reading: NewReading) -> PortResult<Reading> {
        let mut state = self.state.lock().await;
        if !state.submissions.iter().any(|s| s.id == new_reading.submission_id) {
            return Err(PortError::NotFound(format!(
                "Submission {} not found",
                new_reading.submission_id
            )));
        }
        let reading = Reading {
            id: Uuid::new_v4(),
            submission_id: new_reading.submission_id,
            prompt_version_id: new_reading.prompt_version_id,
            model_name: new_reading.model_name,
            status: ReadingStatus::Queued,
            reading_text: None,
            error_message: None,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            claimed_by: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.readings.push(reading.clone());
        Ok(reading)
    }

    async fn get_reading_by_id(&self, reading_id: Uuid) -> PortResult<Reading> {
        Ok(self.state.lock().await.reading_mut(reading_id)?.clone())
    }

    async fn get_readings_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Reading>> {
        Ok(self
            .state
            .lock()
            .await
            .readings
            .iter()
            .rev()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn list_queued_readings(&self, created_before: DateTime<Utc>) -> PortResult<Vec<Reading>> {
        Ok(self
            .state
            .lock()
            .await
            .readings
            .iter()
            .filter(|r| r.status == ReadingStatus::Queued && r.created_at <= created_before)
            .cloned()
            .collect())
    }

    async fn claim_reading(&self, reading_id: Uuid, job_id: Uuid) -> PortResult<ClaimOutcome> {
        let mut state = self.state.lock().await;
        let reading = state.reading_mut(reading_id)?;
        let claimable = reading.status.can_transition_to(ReadingStatus::Running)
            && (reading.status == ReadingStatus::Queued || reading.claimed_by == Some(job_id));
        if !claimable {
            return Ok(ClaimOutcome::Busy(reading.status));
        }
        reading.status = ReadingStatus::Running;
        reading.claimed_by = Some(job_id);
        reading.started_at = Some(Utc::now());
        Ok(ClaimOutcome::Claimed(reading.clone()))
    }

    async fn complete_reading(
        &self,
        reading_id: Uuid,
        job_id: Uuid,
        output: &GenerationOutput,
    ) -> PortResult<bool> {
        let mut state = self.state.lock().await;
        let reading = state.reading_mut(reading_id)?;
        if !reading.status.can_transition_to(ReadingStatus::Done) || reading.claimed_by != Some(job_id) {
            return Ok(false);
        }
        reading.status = ReadingStatus::Done;
        reading.reading_text = Some(output.text.clone());
        reading.model_name = output.model.clone();
        reading.input_tokens = output.input_tokens;
        reading.output_tokens = output.output_tokens;
        reading.latency_ms = Some(output.latency_ms);
        reading.error_message = None;
        reading.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail_reading(
        &self,
        reading_id: Uuid,
        job_id: Option<Uuid>,
        error_message: &str,
    ) -> PortResult<bool> {
        let mut state = self.state.lock().await;
        let reading = state.reading_mut(reading_id)?;
        let owner_matches = match (reading.claimed_by, job_id) {
            (None, _) => true,
            (Some(owner), Some(job_id)) => owner == job_id,
            (Some(_), None) => false,
        };
        if !reading.status.can_transition_to(ReadingStatus::Failed) || !owner_matches {
            return Ok(false);
        }
        reading.status = ReadingStatus::Failed;
        reading.error_message = Some(error_message.to_string());
        reading.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn find_acting_reviewer(&self, reviewer_id: Option<Uuid>) -> PortResult<Option<Reviewer>> {
        let state = self.state.lock().await;
        let mut admins = state.reviewers.iter().filter(|r| r.is_admin);
        let found = match reviewer_id {
            Some(id) => admins.find(|r| r.id == id),
            None => admins.next(),
        };
        Ok(found.cloned())
    }

    async fn upsert_reviewer(
        &self,
        email: &str,
        display_name: Option<&str>,
        is_admin: bool,
    ) -> PortResult<Reviewer> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.reviewers.iter_mut().find(|r| r.email == email) {
            existing.display_name = display_name.map(str::to_string);
            existing.is_admin = is_admin;
            return Ok(existing.clone());
        }
        let reviewer = Reviewer {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            is_admin,
            created_at: Utc::now(),
        };
        state.reviewers.push(reviewer.clone());
        Ok(reviewer)
    }

    async fn create_correction(&self, new_correction: NewCorrection) -> PortResult<Correction> {
        let mut state = self.state.lock().await;
        state.reading_mut(new_correction.reading_id)?;
        let correction = Correction {
            id: Uuid::new_v4(),
            reading_id: new_correction.reading_id,
            reviewer_id: new_correction.reviewer_id,
            correction_type: new_correction.correction_type,
            severity: new_correction.severity,
            corrected_text: new_correction.corrected_text,
            notes: new_correction.notes,
            scores: new_correction.scores,
            span: new_correction.span,
            original_excerpt: new_correction.original_excerpt,
            created_at: Utc::now(),
        };
        state.corrections.push(correction.clone());
        Ok(correction)
    }

    async fn get_corrections_for_reading(&self, reading_id: Uuid) -> PortResult<Vec<Correction>> {
        Ok(self
            .state
            .lock()
            .await
            .corrections
            .iter()
            .filter(|c| c.reading_id == reading_id)
            .cloned()
            .collect())
    }

    async fn get_corrections_for_submission(&self, submission_id: Uuid) -> PortResult<Vec<Correction>> {
        let state = self.state.lock().await;
        let reading_ids: Vec<Uuid> = state
            .readings
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .map(|r| r.id)
            .collect();
        Ok(state
            .corrections
            .iter()
            .filter(|c| reading_ids.contains(&c.reading_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::derive_chart;

    async fn store_with_reading() -> (MemoryStore, Reading) {
        let store = MemoryStore::new();
        let input = BirthInput::new("1990-01-01");
        let submission = store
            .create_submission(&input, &derive_chart(&input).unwrap())
            .await
            .unwrap();
        let reading = store
            .create_reading(NewReading {
                submission_id: submission.id,
                prompt_version_id: Uuid::new_v4(),
                model_name: "gpt-5-mini".to_string(),
            })
            .await
            .unwrap();
        (store, reading)
    }

    #[tokio::test]
    async fn test_claim_is_single_winner() {
        let (store, reading) = store_with_reading().await;
        let (job_a, job_b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(matches!(
            store.claim_reading(reading.id, job_a).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        assert_eq!(
            store.claim_reading(reading.id, job_b).await.unwrap(),
            ClaimOutcome::Busy(ReadingStatus::Running)
        );
        // The owning job may re-enter after a crash.
        assert!(matches!(
            store.claim_reading(reading.id, job_a).await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn test_terminal_writes_require_the_claim() {
        let (store, reading) = store_with_reading().await;
        let (owner, intruder) = (Uuid::new_v4(), Uuid::new_v4());
        store.claim_reading(reading.id, owner).await.unwrap();

        let output = GenerationOutput {
            text: "ok".to_string(),
            model: "gpt-5-mini".to_string(),
            input_tokens: Some(1),
            output_tokens: Some(2),
            latency_ms: 3,
        };
        assert!(!store.complete_reading(reading.id, intruder, &output).await.unwrap());
        assert!(!store.fail_reading(reading.id, Some(intruder), "boom").await.unwrap());
        assert!(store.complete_reading(reading.id, owner, &output).await.unwrap());
        assert!(!store.fail_reading(reading.id, Some(owner), "late").await.unwrap());

        let stored = store.get_reading_by_id(reading.id).await.unwrap();
        assert_eq!(stored.status, ReadingStatus::Done);
        assert_eq!(stored.error_message, None);
    }

    #[tokio::test]
    async fn test_writes_follow_the_status_table() {
        let (store, reading) = store_with_reading().await;
        let job = Uuid::new_v4();
        let output = GenerationOutput {
            text: "ok".to_string(),
            model: "gpt-5-mini".to_string(),
            input_tokens: None,
            output_tokens: None,
            latency_ms: 1,
        };

        // QUEUED cannot jump to DONE, even for a job that names itself.
        assert!(!store.complete_reading(reading.id, job, &output).await.unwrap());
        assert!(store.fail_reading(reading.id, None, "enqueue failed").await.unwrap());
        assert_eq!(
            store.claim_reading(reading.id, job).await.unwrap(),
            ClaimOutcome::Busy(ReadingStatus::Failed)
        );
        assert!(!store.fail_reading(reading.id, None, "again").await.unwrap());

        let stored = store.get_reading_by_id(reading.id).await.unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("enqueue failed"));
    }

    #[tokio::test]
    async fn test_acting_reviewer_prefers_requested_admin() {
        let store = MemoryStore::new();
        assert_eq!(store.find_acting_reviewer(None).await.unwrap(), None);

        let first = store.upsert_reviewer("a@tuvi.local", None, true).await.unwrap();
        let second = store.upsert_reviewer("b@tuvi.local", None, true).await.unwrap();
        let guest = store.upsert_reviewer("c@tuvi.local", None, false).await.unwrap();

        assert_eq!(store.find_acting_reviewer(None).await.unwrap(), Some(first));
        assert_eq!(
            store.find_acting_reviewer(Some(second.id)).await.unwrap(),
            Some(second)
        );
        assert_eq!(store.find_acting_reviewer(Some(guest.id)).await.unwrap(), None);
    }
}
