pub mod admin;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod submissions;

use axum::{
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use middleware::require_admin_token;
use rest::ApiDoc;
use state::AppState;

/// Builds the full HTTP application: public routes, token-guarded admin
/// routes and the Swagger UI.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(rest::health))
        .route("/submissions", post(submissions::create_submission))
        .route("/submissions/{id}", get(submissions::get_submission))
        .route("/submissions/{id}/readings", post(submissions::request_reading))
        .route("/readings/{id}", get(submissions::get_reading));

    let admin_routes = Router::new()
        .route("/admin/submissions", get(admin::list_submissions))
        .route("/admin/submissions/{id}", get(admin::get_submission_detail))
        .route("/admin/submissions/{id}/scores", get(admin::submission_scores))
        .route("/admin/readings/{id}/corrections", post(admin::create_correction))
        .route(
            "/admin/prompt-versions",
            get(admin::list_prompt_versions).post(admin::create_prompt_version),
        )
        .route(
            "/admin/prompt-versions/{id}/activate",
            patch(admin::activate_prompt_version),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(cors)
        .with_state(state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use tuvi_core::memory::MemoryStore;
    use tuvi_core::ports::DatabaseService;
    use tuvi_core::queue::{MemoryQueue, RetryPolicy};

    const TOKEN: &str = "test-admin-token";

    fn test_config(admin_token: Option<&str>) -> Config {
        let admin_token = admin_token.map(str::to_string);
        Config::from_lookup(move |name| match name {
            "DATABASE_URL" => Some("postgres://localhost/tuvi_test".to_string()),
            "ADMIN_TOKEN" => admin_token.clone(),
            _ => None,
        })
        .unwrap()
    }

    fn test_app(db: Arc<MemoryStore>, admin_token: Option<&str>) -> Router {
        let queue = Arc::new(MemoryQueue::new(RetryPolicy::default()));
        let state = AppState::new(db, queue, Arc::new(test_config(admin_token)));
        router(Arc::new(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-admin-token", token);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_submission(app: &Router) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/submissions",
            None,
            Some(json!({ "birthInput": { "date": "1990-05-17", "time": "08:30", "gender": "female" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn activate_prompt(app: &Router, name: &str) -> Value {
        let (status, created) = send(
            app,
            "POST",
            "/admin/prompt-versions",
            Some(TOKEN),
            Some(json!({ "name": name, "systemPrompt": "Luận quẻ tổng quan." })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap();
        let (status, activated) = send(
            app,
            "PATCH",
            &format!("/admin/prompt-versions/{}/activate", id),
            Some(TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        activated
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_submission_is_stored_with_chart() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let id = create_submission(&app).await;

        let (status, body) = send(&app, "GET", &format!("/submissions/{}", id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["birthInput"]["date"], "1990-05-17");
        assert_eq!(body["birthInput"]["timezone"], "Asia/Bangkok");
        assert_eq!(body["status"], "CHART_READY");
        assert!(body["chart"]["engineVersion"].is_string());
        assert_eq!(body["readings"], json!([]));
    }

    #[tokio::test]
    async fn test_short_date_is_rejected_with_field_errors() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, body) = send(
            &app,
            "POST",
            "/submissions",
            None,
            Some(json!({ "birthInput": { "date": "1990" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid payload");
        assert!(body["details"]["fieldErrors"]["date"].is_array());
    }

    #[tokio::test]
    async fn test_unknown_submission_is_not_found() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let uri = format!("/submissions/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_reading_request_requires_active_prompt() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        let id = create_submission(&app).await;

        let uri = format!("/submissions/{}/readings", id);
        let (status, body) = send(&app, "POST", &uri, None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No active prompt version");
    }

    #[tokio::test]
    async fn test_reading_request_is_accepted_and_pollable() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        activate_prompt(&app, "reading_v1").await;
        let id = create_submission(&app).await;

        let (status, body) = send(&app, "POST", &format!("/submissions/{}/readings", id), None, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let reading_id = body["readingId"].as_str().unwrap();

        let (status, reading) = send(&app, "GET", &format!("/readings/{}", reading_id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reading["status"], "QUEUED");
        assert_eq!(reading["submissionId"], id.as_str());

        let (_, submission) = send(&app, "GET", &format!("/submissions/{}", id), None, None).await;
        assert_eq!(submission["readings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_routes_fail_without_configured_token() {
        let app = test_app(Arc::new(MemoryStore::new()), None);
        let (status, body) = send(&app, "GET", "/admin/submissions", Some("anything"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "ADMIN_TOKEN is not configured");
    }

    #[tokio::test]
    async fn test_admin_routes_reject_wrong_or_missing_token() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        let (status, _) = send(&app, "GET", "/admin/submissions", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/admin/submissions", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, "GET", "/admin/submissions", Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_prompt_activation_leaves_one_active() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        let first = activate_prompt(&app, "reading_v1").await;
        let second = activate_prompt(&app, "reading_v2").await;
        assert_eq!(second["isActive"], true);

        let (status, body) = send(&app, "GET", "/admin/prompt-versions", Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
        let versions = body.as_array().unwrap();
        assert_eq!(versions.len(), 2);
        let active: Vec<&Value> = versions.iter().filter(|v| v["isActive"] == true).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["id"], second["id"]);
        assert_ne!(active[0]["id"], first["id"]);
    }

    #[tokio::test]
    async fn test_duplicate_prompt_name_conflicts() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        activate_prompt(&app, "reading_v1").await;
        let (status, _) = send(
            &app,
            "POST",
            "/admin/prompt-versions",
            Some(TOKEN),
            Some(json!({ "name": "reading_v1", "systemPrompt": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_correction_without_admin_reviewer_is_rejected() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        activate_prompt(&app, "reading_v1").await;
        let id = create_submission(&app).await;
        let (_, body) = send(&app, "POST", &format!("/submissions/{}/readings", id), None, None).await;
        let reading_id = body["readingId"].as_str().unwrap();

        let (status, body) = send(
            &app,
            "POST",
            &format!("/admin/readings/{}/corrections", reading_id),
            Some(TOKEN),
            Some(json!({ "type": "FACT", "severity": 2, "correctedText": "Cung Mệnh ở Dần." })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Admin user not found");
    }

    #[tokio::test]
    async fn test_correction_flow_feeds_score_summary() {
        let db = Arc::new(MemoryStore::new());
        db.upsert_reviewer("admin@tuvi.local", Some("Admin"), true)
            .await
            .unwrap();
        let app = test_app(db, Some(TOKEN));
        activate_prompt(&app, "reading_v1").await;
        let id = create_submission(&app).await;
        let (_, body) = send(&app, "POST", &format!("/submissions/{}/readings", id), None, None).await;
        let reading_id = body["readingId"].as_str().unwrap().to_string();
        let corrections_uri = format!("/admin/readings/{}/corrections", reading_id);

        let (status, _) = send(
            &app,
            "POST",
            &corrections_uri,
            Some(TOKEN),
            Some(json!({ "type": "NOPE", "severity": 2, "correctedText": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            &corrections_uri,
            Some(TOKEN),
            Some(json!({ "type": "FACT", "severity": 9, "correctedText": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, correction) = send(
            &app,
            "POST",
            &corrections_uri,
            Some(TOKEN),
            Some(json!({
                "type": "LOGIC",
                "severity": 3,
                "correctedText": "Đại vận này thuận lợi hơn.",
                "scores": { "logic": 8.0, "facts": 6.0, "style": 7.0, "completeness": 4.0, "consistency": 9.0 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(correction["type"], "LOGIC");
        assert_eq!(correction["readingId"], reading_id.as_str());

        let (status, detail) = send(&app, "GET", &format!("/admin/submissions/{}", id), Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["readings"][0]["corrections"].as_array().unwrap().len(), 1);

        let (status, report) = send(&app, "GET", &format!("/admin/submissions/{}/scores", id), Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["scoredCorrections"], 1);
        assert_eq!(report["totalCorrections"], 1);
        assert_eq!(report["average"]["logic"], 8.0);
        assert_eq!(report["average"]["completeness"], 4.0);
    }

    #[tokio::test]
    async fn test_scores_are_neutral_without_corrections() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        let id = create_submission(&app).await;
        let (status, report) = send(&app, "GET", &format!("/admin/submissions/{}/scores", id), Some(TOKEN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["scoredCorrections"], 0);
        assert_eq!(report["average"]["style"], 5.0);
    }

    #[tokio::test]
    async fn test_invalid_reviewer_header_is_rejected() {
        let app = test_app(Arc::new(MemoryStore::new()), Some(TOKEN));
        let request = Request::builder()
            .method("POST")
            .uri(format!("/admin/readings/{}/corrections", uuid::Uuid::new_v4()))
            .header("x-admin-token", TOKEN)
            .header("x-reviewer-id", "not-a-uuid")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "type": "FACT", "severity": 2, "correctedText": "x" }).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
