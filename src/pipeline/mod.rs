pub mod orchestrator;
pub mod stages;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::OrganizerConfig;
use crate::data::repository;
use crate::error::AppError;
use crate::models::job::JobPhase;
use crate::services::decision_service::DecisionService;
use crate::services::organize_service::OrganizationPlanner;
use crate::state::PipelineState;

pub use orchestrator::{JobOrchestrator, RunOptions, RunOutcome};

/// External collaborators a stage may call. Absent services degrade to
/// heuristics (decisions) or fail the phase (planner).
#[derive(Clone, Default)]
pub struct StageServices {
    pub decision: Option<Arc<dyn DecisionService>>,
    pub planner: Option<Arc<dyn OrganizationPlanner>>,
}

/// Everything a stage needs, passed explicitly.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: String,
    pub config: Arc<OrganizerConfig>,
    pub state: Arc<PipelineState>,
    pub services: StageServices,
}

impl StageContext {
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.state.with_db(f)
    }

    /// Best-effort write to the processing log; failures only reach tracing.
    pub fn log_event(&self, stage: &str, action: &str, details: serde_json::Value, success: bool) {
        let result = self.with_db(|conn| {
            repository::insert_processing_log(conn, &self.job_id, stage, action, &details, success)
        });
        if let Err(err) = result {
            tracing::warn!(job_id = %self.job_id, stage, action, error = %err, "failed to write processing log");
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub details: serde_json::Value,
}

impl StageReport {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            details: serde_json::Value::Null,
            ..Self::default()
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn finish(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// One phase of a job.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn phase(&self) -> JobPhase;

    /// Checked before `run`; a failure is phase-level.
    fn validate(&self, _ctx: &StageContext) -> Result<(), AppError> {
        Ok(())
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, AppError>;
}
