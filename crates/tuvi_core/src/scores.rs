//! crates/tuvi_core/src/scores.rs
//!
//! Score payloads attached to corrections, and the aggregator that averages
//! them per submission.
//!
//! Scores normally live in the correction's own `scores` field. Older clients
//! embedded them in `notes` as a JSON envelope:
//!
//! ```json
//! { "notes": "free text", "scores": { "logic": 7, "facts": 6, "style": 8, "completeness": 5, "consistency": 7 } }
//! ```
//!
//! Such envelopes are still decoded. Anything that does not decode to a
//! complete in-range vector is treated as "no score data".

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Correction, ScoreVector};
use crate::ports::{DatabaseService, PortResult};

/// The legacy `notes` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotesEnvelope {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub scores: Option<ScoreVector>,
}

/// Outcome of decoding a `notes` string.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedNotes {
    /// Free text, including JSON that is not shaped like an envelope.
    Plain(String),
    /// A well-formed envelope.
    Envelope(NotesEnvelope),
    /// Looks like an envelope but does not decode to a valid one.
    Malformed(String),
}

impl DecodedNotes {
    pub fn decode(notes: &str) -> Self {
        let trimmed = notes.trim_start();
        if !trimmed.starts_with('{') {
            return DecodedNotes::Plain(notes.to_string());
        }
        let value = match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => value,
            Err(e) => return DecodedNotes::Malformed(e.to_string()),
        };
        // Any other JSON object is the reviewer's own text, not an envelope.
        let is_envelope = value.as_object().is_some_and(|fields| {
            !fields.is_empty() && fields.keys().all(|k| k == "notes" || k == "scores")
        });
        if !is_envelope {
            return DecodedNotes::Plain(notes.to_string());
        }
        match serde_json::from_value::<NotesEnvelope>(value) {
            Ok(envelope) => match envelope.scores {
                Some(scores) if scores.validate().is_err() => {
                    DecodedNotes::Malformed("score axis out of range".to_string())
                }
                _ => DecodedNotes::Envelope(envelope),
            },
            Err(e) => DecodedNotes::Malformed(e.to_string()),
        }
    }

    pub fn scores(&self) -> Option<ScoreVector> {
        match self {
            DecodedNotes::Envelope(envelope) => envelope.scores,
            _ => None,
        }
    }
}

/// The score vector a correction carries, if any.
pub fn correction_scores(correction: &Correction) -> Option<ScoreVector> {
    if let Some(scores) = correction.scores {
        return scores.validate().ok().map(|_| scores);
    }
    let notes = correction.notes.as_deref()?;
    match DecodedNotes::decode(notes) {
        DecodedNotes::Malformed(reason) => {
            debug!(correction_id = %correction.id, %reason, "Ignoring undecodable score payload");
            None
        }
        decoded => decoded.scores(),
    }
}

/// Per-axis arithmetic mean, or the neutral vector when `vectors` is empty.
pub fn average<I>(vectors: I) -> ScoreVector
where
    I: IntoIterator<Item = ScoreVector>,
{
    let mut count = 0usize;
    let mut total = ScoreVector {
        logic: 0.0,
        facts: 0.0,
        style: 0.0,
        completeness: 0.0,
        consistency: 0.0,
    };
    for v in vectors {
        count += 1;
        total.logic += v.logic;
        total.facts += v.facts;
        total.style += v.style;
        total.completeness += v.completeness;
        total.consistency += v.consistency;
    }
    if count == 0 {
        return ScoreVector::NEUTRAL;
    }
    let n = count as f64;
    ScoreVector {
        logic: total.logic / n,
        facts: total.facts / n,
        style: total.style / n,
        completeness: total.completeness / n,
        consistency: total.consistency / n,
    }
}

/// Aggregate plus how much of the input actually carried scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub average: ScoreVector,
    pub scored_corrections: usize,
    pub total_corrections: usize,
}

#[derive(Clone)]
pub struct ScoreAggregator {
    db: Arc<dyn DatabaseService>,
}

impl ScoreAggregator {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    /// Mean score vector over every decodable correction of the submission.
    pub async fn summarize(&self, submission_id: Uuid) -> PortResult<ScoreVector> {
        Ok(self.report(submission_id).await?.average)
    }

    pub async fn report(&self, submission_id: Uuid) -> PortResult<ScoreReport> {
        let corrections = self.db.get_corrections_for_submission(submission_id).await?;
        let vectors: Vec<ScoreVector> = corrections.iter().filter_map(correction_scores).collect();
        Ok(ScoreReport {
            average: average(vectors.iter().copied()),
            scored_corrections: vectors.len(),
            total_corrections: corrections.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::derive_chart;
    use crate::domain::{BirthInput, CorrectionType, NewCorrection, NewReading};
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn vector(value: f64) -> ScoreVector {
        ScoreVector {
            logic: value,
            facts: value,
            style: value,
            completeness: value,
            consistency: value,
        }
    }

    fn correction(notes: Option<&str>, scores: Option<ScoreVector>) -> Correction {
        Correction {
            id: Uuid::new_v4(),
            reading_id: Uuid::new_v4(),
            reviewer_id: Uuid::new_v4(),
            correction_type: CorrectionType::Fact,
            severity: 3,
            corrected_text: "fixed".to_string(),
            notes: notes.map(str::to_string),
            scores,
            span: None,
            original_excerpt: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_input_is_neutral() {
        assert_eq!(average(Vec::new()), ScoreVector::NEUTRAL);
    }

    #[test]
    fn test_average_is_per_axis_mean() {
        let a = ScoreVector {
            logic: 2.0,
            facts: 4.0,
            style: 6.0,
            completeness: 8.0,
            consistency: 10.0,
        };
        let b = vector(4.0);
        let avg = average([a, b]);
        assert_eq!(avg.logic, 3.0);
        assert_eq!(avg.facts, 4.0);
        assert_eq!(avg.style, 5.0);
        assert_eq!(avg.completeness, 6.0);
        assert_eq!(avg.consistency, 7.0);
    }

    #[test]
    fn test_decodes_legacy_envelope() {
        let notes = r#"{"notes":"too vague","scores":{"logic":7,"facts":6,"style":8,"completeness":5,"consistency":7}}"#;
        let c = correction(Some(notes), None);
        let scores = correction_scores(&c).unwrap();
        assert_eq!(scores.logic, 7.0);
        assert_eq!(scores.completeness, 5.0);
    }

    #[test]
    fn test_undecodable_payloads_carry_no_scores() {
        for notes in [
            "just a comment",
            "{not json",
            r#"{"scores":{"logic":7}}"#,
            r#"{"scores":{"logic":70,"facts":6,"style":8,"completeness":5,"consistency":7}}"#,
            r#"{"notes":"no scores here"}"#,
        ] {
            assert_eq!(correction_scores(&correction(Some(notes), None)), None, "{}", notes);
        }
        assert_eq!(correction_scores(&correction(None, None)), None);
    }

    #[test]
    fn test_foreign_json_objects_are_plain_text() {
        for notes in [r#"{"source":"sách Tử Vi Đẩu Số, chương 3"}"#, "{}", r#"{"notes":"a","extra":1}"#] {
            assert_eq!(DecodedNotes::decode(notes), DecodedNotes::Plain(notes.to_string()), "{}", notes);
        }
        assert!(matches!(DecodedNotes::decode("{not json"), DecodedNotes::Malformed(_)));
    }

    #[test]
    fn test_structured_field_wins_over_notes() {
        let notes = r#"{"scores":{"logic":1,"facts":1,"style":1,"completeness":1,"consistency":1}}"#;
        let c = correction(Some(notes), Some(vector(9.0)));
        assert_eq!(correction_scores(&c), Some(vector(9.0)));
    }

    async fn seeded_submission(db: &MemoryStore, readings: usize) -> (Uuid, Vec<Uuid>) {
        let input = BirthInput::new("1990-01-01");
        let submission = db
            .create_submission(&input, &derive_chart(&input).unwrap())
            .await
            .unwrap();
        let mut ids = Vec::new();
        for _ in 0..readings {
            let reading = db
                .create_reading(NewReading {
                    submission_id: submission.id,
                    prompt_version_id: Uuid::new_v4(),
                    model_name: "gpt-5-mini".to_string(),
                })
                .await
                .unwrap();
            ids.push(reading.id);
        }
        (submission.id, ids)
    }

    async fn add_correction(db: &MemoryStore, reading_id: Uuid, notes: Option<&str>, scores: Option<ScoreVector>) {
        db.create_correction(NewCorrection {
            reading_id,
            reviewer_id: Uuid::new_v4(),
            correction_type: CorrectionType::Logic,
            severity: 2,
            corrected_text: "fixed".to_string(),
            notes: notes.map(str::to_string),
            scores,
            span: None,
            original_excerpt: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_summarize_without_corrections_is_neutral() {
        let db = Arc::new(MemoryStore::new());
        let (submission_id, _) = seeded_submission(&db, 1).await;
        let aggregator = ScoreAggregator::new(db);
        assert_eq!(aggregator.summarize(submission_id).await.unwrap(), ScoreVector::NEUTRAL);
        assert_eq!(aggregator.summarize(Uuid::new_v4()).await.unwrap(), ScoreVector::NEUTRAL);
    }

    #[tokio::test]
    async fn test_summarize_spans_readings_and_skips_undecodable() {
        let db = Arc::new(MemoryStore::new());
        let (submission_id, readings) = seeded_submission(&db, 2).await;
        let low = ScoreVector {
            logic: 2.0,
            ..ScoreVector::NEUTRAL
        };
        add_correction(&db, readings[0], None, Some(low)).await;
        add_correction(&db, readings[0], Some("{bad"), None).await;
        add_correction(
            &db,
            readings[1],
            Some(r#"{"scores":{"logic":6,"facts":5,"style":5,"completeness":5,"consistency":5}}"#),
            None,
        )
        .await;
        add_correction(&db, readings[1], Some("{bad"), None).await;

        // Corrections on another submission stay out of the average.
        let (_, other) = seeded_submission(&db, 1).await;
        add_correction(&db, other[0], None, Some(vector(10.0))).await;

        let aggregator = ScoreAggregator::new(db);
        let summary = aggregator.summarize(submission_id).await.unwrap();
        assert_eq!(summary.logic, 4.0);
        assert_eq!(summary.facts, 5.0);

        let report = aggregator.report(submission_id).await.unwrap();
        assert_eq!(report.scored_corrections, 2);
        assert_eq!(report.total_corrections, 4);
    }
}
