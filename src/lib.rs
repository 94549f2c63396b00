//! Plan-then-execute document reorganization.
//!
//! An indexer fills the inventory; the pipeline groups exact duplicates,
//! links document versions into chains, asks a planner for a target layout,
//! and after review materializes that layout into a separate working tree.
//! Every execution writes a manifest that can roll it back.

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod scope_path;
pub mod services;
pub mod shell;
pub mod state;

pub use config::OrganizerConfig;
pub use error::AppError;
pub use models::job::{JobPhase, JobReport, ProcessingJob};
pub use pipeline::{
    JobOrchestrator, PipelineStage, RunOptions, RunOutcome, StageContext, StageReport,
    StageServices,
};
pub use services::decision_service::DecisionService;
pub use services::organize_service::OrganizationPlanner;
pub use state::PipelineState;
