pub mod chart;
pub mod corrections;
pub mod domain;
pub mod intake;
pub mod memory;
pub mod ports;
pub mod prompts;
pub mod queue;
pub mod readings;
pub mod scores;
pub mod worker;

pub use domain::{
    BirthInput, Chart, Correction, CorrectionType, PromptVersion, Reading, ReadingJob, ReadingStatus,
    Reviewer, ScoreVector, Submission,
};
pub use ports::{DatabaseService, JobQueue, PortError, PortResult, ReadingGenerationService};
