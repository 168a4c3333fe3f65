//! services/api/src/web/submissions.rs
//!
//! Public handlers: birth-data intake, reading requests and polling.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tuvi_core::domain::{BirthInput, Calendar, DEFAULT_TIMEZONE};
use tuvi_core::ports::PortResult;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiError;
use crate::web::rest::{ErrorBody, ReadingView, SubmissionView};
use crate::web::state::AppState;

//=========================================================================================
// Request and Response Payloads
//=========================================================================================

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BirthInputPayload {
    /// ISO-like date, at least `YYYY-MM-DD`.
    #[validate(length(min = 10, message = "must be at least 10 characters (YYYY-MM-DD)"))]
    pub date: String,
    pub time: Option<String>,
    pub gender: Option<String>,
    #[serde(default = "default_timezone")]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub timezone: String,
    pub location_name: Option<String>,
    /// `solar` or `lunar`.
    pub calendar: Option<String>,
}

impl BirthInputPayload {
    fn into_domain(self) -> PortResult<BirthInput> {
        let calendar = self.calendar.as_deref().map(str::parse::<Calendar>).transpose()?;
        Ok(BirthInput {
            date: self.date,
            time: self.time,
            gender: self.gender,
            timezone: self.timezone,
            location_name: self.location_name,
            calendar,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionRequest {
    pub birth_input: BirthInputPayload,
}

#[derive(Serialize, ToSchema)]
pub struct SubmissionCreated {
    pub id: Uuid,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRequested {
    pub reading_id: Uuid,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Store birth input and its derived chart.
#[utoipa::path(
    post,
    path = "/submissions",
    request_body = CreateSubmissionRequest,
    responses(
        (status = 201, description = "Submission created", body = SubmissionCreated),
        (status = 400, description = "Invalid payload", body = ErrorBody)
    )
)]
pub async fn create_submission(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateSubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionCreated>), ApiError> {
    let Json(request) = payload?;
    request.birth_input.validate()?;
    let birth_input = request.birth_input.into_domain()?;

    let submission = state.intake.submit(birth_input).await?;
    Ok((StatusCode::CREATED, Json(SubmissionCreated { id: submission.id })))
}

/// A submission with its chart and latest reading.
#[utoipa::path(
    get,
    path = "/submissions/{id}",
    params(("id" = Uuid, Path, description = "Submission id")),
    responses(
        (status = 200, description = "Submission found", body = SubmissionView),
        (status = 404, description = "Unknown submission", body = ErrorBody)
    )
)]
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionView>, ApiError> {
    let submission = state.db.get_submission_by_id(id).await?;
    let latest = state
        .db
        .get_readings_for_submission(id)
        .await?
        .into_iter()
        .take(1)
        .map(ReadingView::from)
        .collect();
    Ok(Json(SubmissionView::new(submission, latest)))
}

/// Queue a reading of the submission with the active prompt version.
#[utoipa::path(
    post,
    path = "/submissions/{id}/readings",
    params(("id" = Uuid, Path, description = "Submission id")),
    responses(
        (status = 202, description = "Reading queued; poll /readings/{id}", body = ReadingRequested),
        (status = 400, description = "No active prompt version", body = ErrorBody),
        (status = 404, description = "Unknown submission", body = ErrorBody)
    )
)]
pub async fn request_reading(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ReadingRequested>), ApiError> {
    let reading = state.readings.request(id).await?;
    Ok((StatusCode::ACCEPTED, Json(ReadingRequested { reading_id: reading.id })))
}

/// Current status of a reading, with its text once `DONE`.
#[utoipa::path(
    get,
    path = "/readings/{id}",
    params(("id" = Uuid, Path, description = "Reading id")),
    responses(
        (status = 200, description = "Reading found", body = ReadingView),
        (status = 404, description = "Unknown reading", body = ErrorBody)
    )
)]
pub async fn get_reading(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReadingView>, ApiError> {
    let reading = state.readings.poll(id).await?;
    Ok(Json(ReadingView::from(reading)))
}
