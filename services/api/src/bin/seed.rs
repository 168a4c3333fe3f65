//! services/api/src/bin/seed.rs
//!
//! Idempotently creates the admin reviewer and the default active prompt
//! version.

use api_lib::{adapters::DbAdapter, config::Config, error::ApiError};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tuvi_core::domain::NewPromptVersion;
use tuvi_core::ports::DatabaseService;
use tuvi_core::prompts::PromptRegistry;

const DEFAULT_PROMPT_NAME: &str = "reading_v1";
const DEFAULT_SYSTEM_PROMPT: &str =
    "Bạn là trợ lý tử vi. Hãy luận quẻ tổng quan, rõ ràng, ngắn gọn, có cấu trúc.";

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    db_adapter.run_migrations().await?;

    let admin = db_adapter
        .upsert_reviewer(&config.seed_admin_email, Some("Admin"), true)
        .await?;
    info!(reviewer_id = %admin.id, email = %admin.email, "Admin reviewer ready");

    let prompt = PromptRegistry::new(db_adapter)
        .ensure_active(NewPromptVersion {
            name: DEFAULT_PROMPT_NAME.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            notes: Some("Seeded prompt version".to_string()),
            ..Default::default()
        })
        .await?;
    info!(prompt_version_id = %prompt.id, name = %prompt.name, "Active prompt version ready");

    db_pool.close().await;
    Ok(())
}
