//! crates/tuvi_core/src/domain.rs
//!
//! Defines the pure, core data structures for the reading pipeline.
//! These structs are independent of any database or transport; they derive
//! `serde` only so adapters can store and ship them as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ports::PortError;

//=========================================================================================
// Submissions and Charts
//=========================================================================================

/// Timezone assumed when the client does not send one.
pub const DEFAULT_TIMEZONE: &str = "Asia/Bangkok";

/// Status tag stored on a submission once its chart has been derived.
pub const SUBMISSION_CHART_READY: &str = "CHART_READY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Calendar {
    Solar,
    Lunar,
}

impl FromStr for Calendar {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solar" => Ok(Calendar::Solar),
            "lunar" => Ok(Calendar::Lunar),
            other => Err(PortError::validation(
                "calendar",
                format!("'{}' is not one of: solar, lunar", other),
            )),
        }
    }
}

/// Birth data captured by the intake form. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthInput {
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<Calendar>,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl BirthInput {
    /// Builds a birth input with the default timezone and no optional fields.
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            time: None,
            gender: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            location_name: None,
            calendar: None,
        }
    }

    /// Checks the invariants the intake boundary guarantees.
    pub fn validate(&self) -> Result<(), PortError> {
        if self.date.chars().count() < 10 {
            return Err(PortError::validation(
                "date",
                "must be at least 10 characters (YYYY-MM-DD)",
            ));
        }
        if self.timezone.trim().is_empty() {
            return Err(PortError::validation("timezone", "must not be empty"));
        }
        Ok(())
    }
}

/// One palace of a derived chart and the stars placed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPalace {
    pub name: String,
    pub stars: Vec<String>,
}

/// The output of chart derivation, versioned by the engine that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub engine_version: String,
    pub seed: String,
    pub palaces: Vec<ChartPalace>,
}

/// A birth input snapshot together with its derived chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub birth_input: BirthInput,
    pub chart: Chart,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Prompt Versions
//=========================================================================================

/// A named set of generation instructions. At most one is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVersion {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    pub rubric: Option<serde_json::Value>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Admin input for a new prompt version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPromptVersion {
    pub name: String,
    pub system_prompt: String,
    #[serde(default)]
    pub rubric: Option<serde_json::Value>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

//=========================================================================================
// Readings
//=========================================================================================

/// Lifecycle of a reading: `QUEUED -> RUNNING -> {DONE, FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Queued => "QUEUED",
            ReadingStatus::Running => "RUNNING",
            ReadingStatus::Done => "DONE",
            ReadingStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadingStatus::Done | ReadingStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `RUNNING -> RUNNING` is allowed so a retried attempt of the same job can
    /// re-enter the flow; the claim check in the store decides who may do so.
    pub fn can_transition_to(&self, next: ReadingStatus) -> bool {
        use ReadingStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Failed) | (Running, Running) | (Running, Done) | (Running, Failed)
        )
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(ReadingStatus::Queued),
            "RUNNING" => Ok(ReadingStatus::Running),
            "DONE" => Ok(ReadingStatus::Done),
            "FAILED" => Ok(ReadingStatus::Failed),
            other => Err(PortError::Unexpected(format!(
                "Unknown reading status '{}'",
                other
            ))),
        }
    }
}

/// One AI-generated reading for a submission, pinned to the prompt version
/// that was active when it was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub prompt_version_id: Uuid,
    pub model_name: String,
    pub status: ReadingStatus,
    pub reading_text: Option<String>,
    pub error_message: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: Option<u64>,
    /// Id of the queue job currently allowed to drive this reading.
    #[serde(skip)]
    pub claimed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReading {
    pub submission_id: Uuid,
    pub prompt_version_id: Uuid,
    pub model_name: String,
}

/// Result of trying to move a reading into `RUNNING` on behalf of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the reading; carries the updated record.
    Claimed(Reading),
    /// Another job owns the reading, or it already finished.
    Busy(ReadingStatus),
}

//=========================================================================================
// Generation Provider Boundary
//=========================================================================================

/// Everything the provider needs to produce one reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_payload: serde_json::Value,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// The provider's answer plus its usage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: u64,
}

//=========================================================================================
// Queue Messages
//=========================================================================================

/// A dequeued unit of work. `attempt` is 1-based and counts this delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingJob {
    pub id: Uuid,
    pub reading_id: Uuid,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ReadingJob {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

//=========================================================================================
// Reviewers, Corrections and Scores
//=========================================================================================

/// A person allowed to critique readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionType {
    Fact,
    Logic,
    Style,
    Missing,
    Other,
}

impl CorrectionType {
    pub const ALL: [CorrectionType; 5] = [
        CorrectionType::Fact,
        CorrectionType::Logic,
        CorrectionType::Style,
        CorrectionType::Missing,
        CorrectionType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionType::Fact => "FACT",
            CorrectionType::Logic => "LOGIC",
            CorrectionType::Style => "STYLE",
            CorrectionType::Missing => "MISSING",
            CorrectionType::Other => "OTHER",
        }
    }
}

impl fmt::Display for CorrectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CorrectionType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                PortError::validation(
                    "type",
                    format!("'{}' is not one of: FACT, LOGIC, STYLE, MISSING, OTHER", s),
                )
            })
    }
}

/// Five-axis quality rating on a 1 to 10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector {
    pub logic: f64,
    pub facts: f64,
    pub style: f64,
    pub completeness: f64,
    pub consistency: f64,
}

impl ScoreVector {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 10.0;

    /// Midpoint of the scale on every axis; used when nothing has been scored.
    pub const NEUTRAL: ScoreVector = ScoreVector {
        logic: 5.0,
        facts: 5.0,
        style: 5.0,
        completeness: 5.0,
        consistency: 5.0,
    };

    pub fn axes(&self) -> [(&'static str, f64); 5] {
        [
            ("logic", self.logic),
            ("facts", self.facts),
            ("style", self.style),
            ("completeness", self.completeness),
            ("consistency", self.consistency),
        ]
    }

    /// Rejects vectors with an axis outside `[1, 10]` or a non-finite value.
    pub fn validate(&self) -> Result<(), PortError> {
        for (axis, value) in self.axes() {
            if !value.is_finite() || !(Self::MIN..=Self::MAX).contains(&value) {
                return Err(PortError::validation(
                    format!("scores.{}", axis),
                    format!("must be between {} and {}", Self::MIN, Self::MAX),
                ));
            }
        }
        Ok(())
    }
}

/// A reviewer's critique of a reading. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub id: Uuid,
    pub reading_id: Uuid,
    pub reviewer_id: Uuid,
    #[serde(rename = "type")]
    pub correction_type: CorrectionType,
    pub severity: u8,
    pub corrected_text: String,
    pub notes: Option<String>,
    pub scores: Option<ScoreVector>,
    pub span: Option<serde_json::Value>,
    pub original_excerpt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated input for a correction row, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCorrection {
    pub reading_id: Uuid,
    pub reviewer_id: Uuid,
    pub correction_type: CorrectionType,
    pub severity: u8,
    pub corrected_text: String,
    pub notes: Option<String>,
    pub scores: Option<ScoreVector>,
    pub span: Option<serde_json::Value>,
    pub original_excerpt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in [
            ReadingStatus::Queued,
            ReadingStatus::Running,
            ReadingStatus::Done,
            ReadingStatus::Failed,
        ] {
            assert!(!ReadingStatus::Done.can_transition_to(next));
            assert!(!ReadingStatus::Failed.can_transition_to(next));
        }
        assert!(ReadingStatus::Queued.can_transition_to(ReadingStatus::Running));
        assert!(!ReadingStatus::Queued.can_transition_to(ReadingStatus::Done));
    }

    #[test]
    fn test_status_round_trips_through_its_column_value() {
        for status in [
            ReadingStatus::Queued,
            ReadingStatus::Running,
            ReadingStatus::Done,
            ReadingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReadingStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn test_correction_type_rejects_unknown_kinds() {
        assert_eq!("LOGIC".parse::<CorrectionType>().unwrap(), CorrectionType::Logic);
        assert!(matches!(
            "logic".parse::<CorrectionType>(),
            Err(PortError::Validation { .. })
        ));
        assert!("TYPO".parse::<CorrectionType>().is_err());
    }

    #[test]
    fn test_birth_input_requires_full_date() {
        assert!(BirthInput::new("1990-01-01").validate().is_ok());
        let err = BirthInput::new("1990-1-1").validate().unwrap_err();
        assert!(matches!(err, PortError::Validation { ref field, .. } if field == "date"));
    }

    #[test]
    fn test_birth_input_defaults_timezone_when_absent() {
        let input: BirthInput = serde_json::from_str(r#"{"date":"1990-01-01","calendar":"solar"}"#).unwrap();
        assert_eq!(input.calendar, Some(Calendar::Solar));
        assert_eq!(input.timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_score_vector_bounds() {
        assert!(ScoreVector::NEUTRAL.validate().is_ok());
        let mut bad = ScoreVector::NEUTRAL;
        bad.style = 11.0;
        assert!(bad.validate().is_err());
        bad.style = f64::NAN;
        assert!(bad.validate().is_err());
    }
}
