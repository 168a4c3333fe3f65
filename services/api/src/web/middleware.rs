//! services/api/src/web/middleware.rs
//!
//! Shared-secret middleware for protecting the admin routes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tuvi_core::ports::PortError;

use crate::error::ApiError;
use crate::web::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Middleware that compares the `x-admin-token` header with the configured
/// `ADMIN_TOKEN`.
///
/// Without a configured token every admin request fails with 500; a missing
/// or different header value returns 401 Unauthorized.
pub async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| PortError::Configuration("ADMIN_TOKEN is not configured".to_string()))?;

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided != Some(expected) {
        return Err(PortError::Unauthorized.into());
    }

    Ok(next.run(req).await)
}
