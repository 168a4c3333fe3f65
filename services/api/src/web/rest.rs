//! services/api/src/web/rest.rs
//!
//! Contains the response views shared by the REST handlers, the health check,
//! and the master definition for the OpenAPI specification.
//!
//! Field names are camelCase on the wire.

use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tuvi_core::domain::{BirthInput, Chart, Correction, PromptVersion, Reading, ScoreVector, Submission};
use tuvi_core::scores::ScoreReport;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::{admin, submissions};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        submissions::create_submission,
        submissions::get_submission,
        submissions::request_reading,
        submissions::get_reading,
        admin::list_submissions,
        admin::get_submission_detail,
        admin::submission_scores,
        admin::create_correction,
        admin::create_prompt_version,
        admin::list_prompt_versions,
        admin::activate_prompt_version,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorBody,
            SubmissionView,
            ChartView,
            ReadingView,
            CorrectionView,
            PromptVersionView,
            ScoreVectorView,
            ScoreReportView,
            submissions::BirthInputPayload,
            submissions::CreateSubmissionRequest,
            submissions::SubmissionCreated,
            submissions::ReadingRequested,
            admin::CreateCorrectionRequest,
            admin::CreatePromptVersionRequest,
        )
    ),
    tags(
        (name = "Tuvi Reading API", description = "Birth chart intake, asynchronous AI readings and reviewer feedback.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
}

/// Body of every non-2xx response.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartView {
    pub engine_version: String,
    #[schema(value_type = Object)]
    pub chart_json: Chart,
}

/// A submission with its chart and the readings the endpoint chose to include.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub birth_input: BirthInput,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub chart: ChartView,
    pub readings: Vec<ReadingView>,
}

impl SubmissionView {
    pub fn new(submission: Submission, readings: Vec<ReadingView>) -> Self {
        Self {
            id: submission.id,
            birth_input: submission.birth_input,
            status: submission.status,
            created_at: submission.created_at,
            chart: ChartView {
                engine_version: submission.chart.engine_version.clone(),
                chart_json: submission.chart,
            },
            readings,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingView {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub prompt_version_id: Uuid,
    pub model_name: String,
    /// One of `QUEUED`, `RUNNING`, `DONE`, `FAILED`.
    pub status: String,
    pub reading_text: Option<String>,
    pub error_message: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrections: Option<Vec<CorrectionView>>,
}

impl From<Reading> for ReadingView {
    fn from(reading: Reading) -> Self {
        Self {
            id: reading.id,
            submission_id: reading.submission_id,
            prompt_version_id: reading.prompt_version_id,
            model_name: reading.model_name,
            status: reading.status.as_str().to_string(),
            reading_text: reading.reading_text,
            error_message: reading.error_message,
            input_tokens: reading.input_tokens,
            output_tokens: reading.output_tokens,
            latency_ms: reading.latency_ms,
            created_at: reading.created_at,
            started_at: reading.started_at,
            finished_at: reading.finished_at,
            corrections: None,
        }
    }
}

impl ReadingView {
    pub fn with_corrections(mut self, corrections: Vec<Correction>) -> Self {
        self.corrections = Some(corrections.into_iter().map(CorrectionView::from).collect());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoreVectorView {
    pub logic: f64,
    pub facts: f64,
    pub style: f64,
    pub completeness: f64,
    pub consistency: f64,
}

impl From<ScoreVector> for ScoreVectorView {
    fn from(v: ScoreVector) -> Self {
        Self {
            logic: v.logic,
            facts: v.facts,
            style: v.style,
            completeness: v.completeness,
            consistency: v.consistency,
        }
    }
}

impl From<ScoreVectorView> for ScoreVector {
    fn from(v: ScoreVectorView) -> Self {
        Self {
            logic: v.logic,
            facts: v.facts,
            style: v.style,
            completeness: v.completeness,
            consistency: v.consistency,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionView {
    pub id: Uuid,
    pub reading_id: Uuid,
    pub reviewer_id: Uuid,
    #[serde(rename = "type")]
    pub correction_type: String,
    pub severity: u8,
    pub corrected_text: String,
    pub notes: Option<String>,
    pub scores: Option<ScoreVectorView>,
    #[schema(value_type = Option<Object>)]
    pub span: Option<Value>,
    pub original_excerpt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Correction> for CorrectionView {
    fn from(c: Correction) -> Self {
        Self {
            id: c.id,
            reading_id: c.reading_id,
            reviewer_id: c.reviewer_id,
            correction_type: c.correction_type.as_str().to_string(),
            severity: c.severity,
            corrected_text: c.corrected_text,
            notes: c.notes,
            scores: c.scores.map(ScoreVectorView::from),
            span: c.span,
            original_excerpt: c.original_excerpt,
            created_at: c.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptVersionView {
    pub id: Uuid,
    pub name: String,
    pub system_prompt: String,
    #[schema(value_type = Option<Object>)]
    pub rubric: Option<Value>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<PromptVersion> for PromptVersionView {
    fn from(p: PromptVersion) -> Self {
        Self {
            id: p.id,
            name: p.name,
            system_prompt: p.system_prompt,
            rubric: p.rubric,
            temperature: p.temperature,
            max_output_tokens: p.max_output_tokens,
            notes: p.notes,
            is_active: p.is_active,
            activated_at: p.activated_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReportView {
    pub submission_id: Uuid,
    pub average: ScoreVectorView,
    pub scored_corrections: usize,
    pub total_corrections: usize,
}

impl ScoreReportView {
    pub fn new(submission_id: Uuid, report: ScoreReport) -> Self {
        Self {
            submission_id,
            average: report.average.into(),
            scored_corrections: report.scored_corrections,
            total_corrections: report.total_corrections,
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
