//! crates/tuvi_core/src/corrections.rs
//!
//! Reviewer corrections. Append-only: creating one never touches the reading.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Correction, CorrectionType, NewCorrection, ScoreVector};
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::scores::DecodedNotes;

/// Correction payload as submitted by a reviewer, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionDraft {
    #[serde(rename = "type")]
    pub correction_type: String,
    pub severity: i64,
    pub corrected_text: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub scores: Option<ScoreVector>,
    #[serde(default)]
    pub span: Option<serde_json::Value>,
    #[serde(default)]
    pub original_excerpt: Option<String>,
}

#[derive(Clone)]
pub struct CorrectionService {
    db: Arc<dyn DatabaseService>,
}

impl CorrectionService {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Appends a correction to `reading_id` on behalf of the acting reviewer.
    pub async fn create(
        &self,
        reading_id: Uuid,
        reviewer_id: Option<Uuid>,
        draft: CorrectionDraft,
    ) -> PortResult<Correction> {
        let correction_type: CorrectionType = draft.correction_type.parse()?;
        let severity = validate_severity(draft.severity)?;
        if draft.corrected_text.trim().is_empty() {
            return Err(PortError::validation("correctedText", "must not be empty"));
        }
        if let Some(scores) = &draft.scores {
            scores.validate()?;
        }

        let reviewer = self
            .db
            .find_acting_reviewer(reviewer_id)
            .await?
            .ok_or(PortError::NoReviewer)?;
        let reading = self.db.get_reading_by_id(reading_id).await?;

        let (notes, scores) = split_notes(draft.notes, draft.scores);
        let correction = self
            .db
            .create_correction(NewCorrection {
                reading_id: reading.id,
                reviewer_id: reviewer.id,
                correction_type,
                severity,
                corrected_text: draft.corrected_text,
                notes,
                scores,
                span: draft.span,
                original_excerpt: draft.original_excerpt,
            })
            .await?;

        info!(
            correction_id = %correction.id,
            reading_id = %reading.id,
            reviewer_id = %reviewer.id,
            correction_type = %correction.correction_type,
            severity = correction.severity,
            "Correction recorded"
        );
        Ok(correction)
    }

    pub async fn for_reading(&self, reading_id: Uuid) -> PortResult<Vec<Correction>> {
        self.db.get_corrections_for_reading(reading_id).await
    }
}

fn validate_severity(severity: i64) -> PortResult<u8> {
    match u8::try_from(severity) {
        Ok(value @ 1..=5) => Ok(value),
        _ => Err(PortError::validation("severity", "must be an integer between 1 and 5")),
    }
}

/// Lifts scores out of a legacy `notes` envelope into the structured field.
/// Explicit scores take precedence; a malformed envelope is kept verbatim as
/// free text.
fn split_notes(
    notes: Option<String>,
    scores: Option<ScoreVector>,
) -> (Option<String>, Option<ScoreVector>) {
    let Some(raw) = notes else {
        return (None, scores);
    };
    match DecodedNotes::decode(&raw) {
        DecodedNotes::Envelope(envelope) => (envelope.notes, scores.or(envelope.scores)),
        DecodedNotes::Malformed(reason) => {
            debug!(%reason, "Notes look like a score envelope but do not decode");
            (Some(raw), scores)
        }
        DecodedNotes::Plain(text) => (Some(text), scores),
    }
}
