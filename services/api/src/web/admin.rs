//! services/api/src/web/admin.rs
//!
//! Admin handlers behind the `x-admin-token` middleware: review listings,
//! corrections, score summaries and prompt-version management.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tuvi_core::corrections::CorrectionDraft;
use tuvi_core::domain::NewPromptVersion;
use tuvi_core::ports::{PortError, PortResult};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::web::rest::{
    CorrectionView, ErrorBody, PromptVersionView, ReadingView, ScoreReportView, ScoreVectorView,
    SubmissionView,
};
use crate::web::state::AppState;

/// Selects the acting reviewer; the earliest admin acts when absent.
pub const REVIEWER_ID_HEADER: &str = "x-reviewer-id";

//=========================================================================================
// Request Payloads
//=========================================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCorrectionRequest {
    /// One of `FACT`, `LOGIC`, `STYLE`, `MISSING`, `OTHER`.
    #[serde(rename = "type")]
    pub correction_type: String,
    #[validate(range(min = 1, max = 5, message = "must be an integer between 1 and 5"))]
    pub severity: i64,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub corrected_text: String,
    pub notes: Option<String>,
    pub scores: Option<ScoreVectorView>,
    #[schema(value_type = Option<Object>)]
    pub span: Option<Value>,
    pub original_excerpt: Option<String>,
}

impl From<CreateCorrectionRequest> for CorrectionDraft {
    fn from(r: CreateCorrectionRequest) -> Self {
        CorrectionDraft {
            correction_type: r.correction_type,
            severity: r.severity,
            corrected_text: r.corrected_text,
            notes: r.notes,
            scores: r.scores.map(Into::into),
            span: r.span,
            original_excerpt: r.original_excerpt,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromptVersionRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub system_prompt: String,
    #[schema(value_type = Option<Object>)]
    pub rubric: Option<Value>,
    #[validate(range(min = 0.0, message = "must not be negative"))]
    pub temperature: Option<f32>,
    #[validate(range(min = 1, message = "must be positive"))]
    pub max_output_tokens: Option<u32>,
    pub notes: Option<String>,
}

impl From<CreatePromptVersionRequest> for NewPromptVersion {
    fn from(r: CreatePromptVersionRequest) -> Self {
        NewPromptVersion {
            name: r.name,
            system_prompt: r.system_prompt,
            rubric: r.rubric,
            temperature: r.temperature,
            max_output_tokens: r.max_output_tokens,
            notes: r.notes,
        }
    }
}

fn reviewer_id(headers: &HeaderMap) -> PortResult<Option<Uuid>> {
    match headers.get(REVIEWER_ID_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Some)
            .ok_or_else(|| PortError::validation(REVIEWER_ID_HEADER, "must be a UUID")),
    }
}

//=========================================================================================
// Review Handlers
//=========================================================================================

/// Submissions, newest first, each with its latest reading.
#[utoipa::path(
    get,
    path = "/admin/submissions",
    params(("x-admin-token" = String, Header, description = "Admin shared secret")),
    responses(
        (status = 200, description = "Submissions", body = [SubmissionView]),
        (status = 401, description = "Missing or wrong admin token", body = ErrorBody)
    )
)]
pub async fn list_submissions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    let submissions = state.db.list_submissions().await?;
    let mut views = Vec::with_capacity(submissions.len());
    for submission in submissions {
        let latest = state
            .db
            .get_readings_for_submission(submission.id)
            .await?
            .into_iter()
            .take(1)
            .map(ReadingView::from)
            .collect();
        views.push(SubmissionView::new(submission, latest));
    }
    Ok(Json(views))
}

/// One submission with every reading, newest first, and their corrections.
#[utoipa::path(
    get,
    path = "/admin/submissions/{id}",
    params(
        ("id" = Uuid, Path, description = "Submission id"),
        ("x-admin-token" = String, Header, description = "Admin shared secret")
    ),
    responses(
        (status = 200, description = "Submission detail", body = SubmissionView),
        (status = 404, description = "Unknown submission", body = ErrorBody)
    )
)]
pub async fn get_submission_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionView>, ApiError> {
    let submission = state.db.get_submission_by_id(id).await?;
    let mut readings = Vec::new();
    for reading in state.db.get_readings_for_submission(id).await? {
        let corrections = state.corrections.for_reading(reading.id).await?;
        readings.push(ReadingView::from(reading).with_corrections(corrections));
    }
    Ok(Json(SubmissionView::new(submission, readings)))
}

/// Mean score vector over the submission's scored corrections.
#[utoipa::path(
    get,
    path = "/admin/submissions/{id}/scores",
    params(
        ("id" = Uuid, Path, description = "Submission id"),
        ("x-admin-token" = String, Header, description = "Admin shared secret")
    ),
    responses(
        (status = 200, description = "Score summary", body = ScoreReportView),
        (status = 404, description = "Unknown submission", body = ErrorBody)
    )
)]
pub async fn submission_scores(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScoreReportView>, ApiError> {
    let submission = state.db.get_submission_by_id(id).await?;
    let report = state.scores.report(submission.id).await?;
    Ok(Json(ScoreReportView::new(submission.id, report)))
}

/// File a correction against a reading.
#[utoipa::path(
    post,
    path = "/admin/readings/{id}/corrections",
    request_body = CreateCorrectionRequest,
    params(
        ("id" = Uuid, Path, description = "Reading id"),
        ("x-admin-token" = String, Header, description = "Admin shared secret"),
        ("x-reviewer-id" = Option<Uuid>, Header, description = "Acting admin reviewer; defaults to the earliest admin")
    ),
    responses(
        (status = 201, description = "Correction recorded", body = CorrectionView),
        (status = 400, description = "Invalid payload or no admin reviewer", body = ErrorBody),
        (status = 404, description = "Unknown reading", body = ErrorBody)
    )
)]
pub async fn create_correction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<CreateCorrectionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CorrectionView>), ApiError> {
    let Json(request) = payload?;
    request.validate()?;
    let reviewer_id = reviewer_id(&headers)?;

    let correction = state.corrections.create(id, reviewer_id, request.into()).await?;
    Ok((StatusCode::CREATED, Json(CorrectionView::from(correction))))
}

//=========================================================================================
// Prompt Version Handlers
//=========================================================================================

/// Create an inactive prompt version.
#[utoipa::path(
    post,
    path = "/admin/prompt-versions",
    request_body = CreatePromptVersionRequest,
    params(("x-admin-token" = String, Header, description = "Admin shared secret")),
    responses(
        (status = 201, description = "Prompt version created", body = PromptVersionView),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 409, description = "Name already taken", body = ErrorBody)
    )
)]
pub async fn create_prompt_version(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePromptVersionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PromptVersionView>), ApiError> {
    let Json(request) = payload?;
    request.validate()?;
    let version = state.prompts.create(request.into()).await?;
    Ok((StatusCode::CREATED, Json(PromptVersionView::from(version))))
}

/// Every prompt version, newest first.
#[utoipa::path(
    get,
    path = "/admin/prompt-versions",
    params(("x-admin-token" = String, Header, description = "Admin shared secret")),
    responses((status = 200, description = "Prompt versions", body = [PromptVersionView]))
)]
pub async fn list_prompt_versions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PromptVersionView>>, ApiError> {
    let versions = state.prompts.list().await?;
    Ok(Json(versions.into_iter().map(PromptVersionView::from).collect()))
}

/// Make a version the only active one.
#[utoipa::path(
    patch,
    path = "/admin/prompt-versions/{id}/activate",
    params(
        ("id" = Uuid, Path, description = "Prompt version id"),
        ("x-admin-token" = String, Header, description = "Admin shared secret")
    ),
    responses(
        (status = 200, description = "Activated version", body = PromptVersionView),
        (status = 404, description = "Unknown prompt version", body = ErrorBody)
    )
)]
pub async fn activate_prompt_version(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PromptVersionView>, ApiError> {
    let version = state.prompts.activate(id).await?;
    Ok(Json(PromptVersionView::from(version)))
}
