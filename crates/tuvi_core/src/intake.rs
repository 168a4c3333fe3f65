//! crates/tuvi_core/src/intake.rs
//!
//! Accepts birth input, derives its chart and stores both as one submission.

use std::sync::Arc;
use tracing::info;

use crate::chart::derive_chart;
use crate::domain::{BirthInput, Submission};
use crate::ports::{DatabaseService, PortResult};

#[derive(Clone)]
pub struct SubmissionIntake {
    db: Arc<dyn DatabaseService>,
}

impl SubmissionIntake {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self { db }
    }

    pub async fn submit(&self, birth_input: BirthInput) -> PortResult<Submission> {
        birth_input.validate()?;
        let chart = derive_chart(&birth_input)?;
        let submission = self.db.create_submission(&birth_input, &chart).await?;
        info!(
            submission_id = %submission.id,
            engine_version = %chart.engine_version,
            "Submission created"
        );
        Ok(submission)
    }
}
