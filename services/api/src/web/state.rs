//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use tuvi_core::corrections::CorrectionService;
use tuvi_core::intake::SubmissionIntake;
use tuvi_core::ports::{DatabaseService, JobQueue};
use tuvi_core::prompts::PromptRegistry;
use tuvi_core::readings::ReadingRequests;
use tuvi_core::scores::ScoreAggregator;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub intake: SubmissionIntake,
    pub readings: ReadingRequests,
    pub prompts: PromptRegistry,
    pub corrections: CorrectionService,
    pub scores: ScoreAggregator,
}

impl AppState {
    /// Wires the core services onto the given store and queue.
    pub fn new(db: Arc<dyn DatabaseService>, queue: Arc<dyn JobQueue>, config: Arc<Config>) -> Self {
        Self {
            intake: SubmissionIntake::new(db.clone()),
            readings: ReadingRequests::new(db.clone(), queue, config.ai_model.clone()),
            prompts: PromptRegistry::new(db.clone()),
            corrections: CorrectionService::new(db.clone()),
            scores: ScoreAggregator::new(db.clone()),
            db,
            config,
        }
    }
}
