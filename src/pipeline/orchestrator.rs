use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::OrganizerConfig;
use crate::data::repository;
use crate::error::AppError;
use crate::models::job::{JobPhase, JobReport, ProcessingJob, PHASE_SEQUENCE};
use crate::pipeline::stages::{DedupStage, ExecutingStage, OrganizingStage, VersioningStage};
use crate::pipeline::{PipelineStage, StageContext, StageReport, StageServices};
use crate::services::execution_service::{self, DryRunPreview, RollbackReport};
use crate::state::PipelineState;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Phases to pass through without running their stage.
    pub skip_phases: HashSet<JobPhase>,
    /// Stop before execution and return the preview instead.
    pub dry_run: bool,
}

impl RunOptions {
    pub fn skipping(phases: impl IntoIterator<Item = JobPhase>) -> Self {
        Self {
            skip_phases: phases.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    AwaitingReview {
        report: JobReport,
        stages: Vec<StageReport>,
    },
    DryRun {
        preview: DryRunPreview,
        stages: Vec<StageReport>,
    },
    Completed {
        stages: Vec<StageReport>,
    },
    Cancelled,
}

/// Drives jobs through the phase sequence, one run per job at a time.
pub struct JobOrchestrator {
    state: Arc<PipelineState>,
    config: Arc<OrganizerConfig>,
    services: StageServices,
    stages: HashMap<JobPhase, Arc<dyn PipelineStage>>,
}

impl JobOrchestrator {
    /// An orchestrator with the built-in dedup, versioning, organizing and
    /// executing stages registered.
    pub fn new(
        state: Arc<PipelineState>,
        config: Arc<OrganizerConfig>,
        services: StageServices,
    ) -> Self {
        let mut orchestrator = Self {
            state,
            config,
            services,
            stages: HashMap::new(),
        };
        orchestrator.register_stage(Arc::new(DedupStage::new()));
        orchestrator.register_stage(Arc::new(VersioningStage));
        orchestrator.register_stage(Arc::new(OrganizingStage));
        orchestrator.register_stage(Arc::new(ExecutingStage));
        orchestrator
    }

    /// Registers `stage` for its phase, replacing any stage already there.
    pub fn register_stage(&mut self, stage: Arc<dyn PipelineStage>) {
        self.stages.insert(stage.phase(), stage);
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    fn context(&self, job_id: &str) -> StageContext {
        StageContext {
            job_id: job_id.to_string(),
            config: self.config.clone(),
            state: self.state.clone(),
            services: self.services.clone(),
        }
    }

    pub fn create_job(&self) -> Result<ProcessingJob, AppError> {
        let now = Utc::now();
        let job = ProcessingJob {
            id: uuid::Uuid::new_v4().to_string(),
            source_root: self.config.source_root.to_string_lossy().to_string(),
            working_root: self.config.working_root.to_string_lossy().to_string(),
            phase: JobPhase::Pending,
            status_message: None,
            error: None,
            progress_percent: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.state.with_db(|conn| repository::insert_job(conn, &job))?;
        tracing::info!(job_id = %job.id, source_root = %job.source_root, "job created");
        Ok(job)
    }

    pub fn status(&self, job_id: &str) -> Result<ProcessingJob, AppError> {
        self.state.with_db(|conn| repository::require_job(conn, job_id))
    }

    pub fn report(&self, job_id: &str) -> Result<JobReport, AppError> {
        self.state.with_db(|conn| {
            repository::require_job(conn, job_id)?;
            repository::job_report(conn, job_id)
        })
    }

    /// Runs the job from its persisted phase until it completes, pauses for
    /// review, stops for a dry run, or is cancelled.
    pub async fn run(&self, job_id: &str, options: RunOptions) -> Result<RunOutcome, AppError> {
        let _guard = self.state.begin_run(job_id)?;
        self.drive(job_id, &options).await
    }

    /// Accepts the reviewed plan and continues through execution.
    pub async fn approve(&self, job_id: &str, options: RunOptions) -> Result<RunOutcome, AppError> {
        let _guard = self.state.begin_run(job_id)?;
        self.state.with_db(|conn| {
            let job = repository::require_job(conn, job_id)?;
            if job.phase != JobPhase::ReviewRequired {
                return Err(AppError::InvalidTransition {
                    from: job.phase,
                    to: JobPhase::Approved,
                });
            }
            repository::transition_job(conn, job_id, JobPhase::Approved, Some("Plan approved"))
        })?;
        tracing::info!(job_id, "plan approved");
        self.drive(job_id, &options).await
    }

    pub fn decline(&self, job_id: &str) -> Result<(), AppError> {
        self.state.with_db(|conn| {
            let job = repository::require_job(conn, job_id)?;
            if job.phase != JobPhase::ReviewRequired {
                return Err(AppError::InvalidTransition {
                    from: job.phase,
                    to: JobPhase::Cancelled,
                });
            }
            repository::transition_job(conn, job_id, JobPhase::Cancelled, Some("Plan declined"))
        })?;
        tracing::info!(job_id, "plan declined");
        Ok(())
    }

    /// Cancels a live job. Returns `false` when it had already finished.
    /// A run in progress stops before its next phase.
    pub fn cancel(&self, job_id: &str) -> Result<bool, AppError> {
        let cancelled = self.state.with_db(|conn| {
            let job = repository::require_job(conn, job_id)?;
            if job.phase.is_terminal() {
                return Ok(false);
            }
            repository::transition_job(conn, job_id, JobPhase::Cancelled, Some("Cancelled"))?;
            Ok(true)
        })?;
        if cancelled {
            tracing::info!(job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Undoes an execution and returns its job to the phase it ran from.
    pub fn rollback(&self, manifest_id: &str) -> Result<RollbackReport, AppError> {
        let row = self
            .state
            .with_db(|conn| repository::get_manifest(conn, manifest_id))?
            .ok_or_else(|| AppError::NotFound(format!("manifest {manifest_id}")))?;
        let _guard = self.state.begin_run(&row.job_id)?;
        self.state
            .with_db(|conn| execution_service::rollback(conn, &self.config, manifest_id))
    }

    fn dry_run_requested(&self, options: &RunOptions) -> bool {
        options.dry_run || self.config.dry_run
    }

    fn review_enabled(&self, options: &RunOptions) -> bool {
        self.config.review_required && !options.skip_phases.contains(&JobPhase::ReviewRequired)
    }

    async fn drive(&self, job_id: &str, options: &RunOptions) -> Result<RunOutcome, AppError> {
        let job = self.status(job_id)?;
        match job.phase {
            JobPhase::Cancelled => return Ok(RunOutcome::Cancelled),
            JobPhase::Completed => return Ok(RunOutcome::Completed { stages: Vec::new() }),
            JobPhase::Failed => {
                return Err(AppError::General(format!(
                    "job {job_id} failed: {}",
                    job.error.unwrap_or_default()
                )))
            }
            JobPhase::ReviewRequired => {
                return Ok(RunOutcome::AwaitingReview {
                    report: self.report(job_id)?,
                    stages: Vec::new(),
                })
            }
            _ => {}
        }

        let ctx = self.context(job_id);
        let mut reports = Vec::new();
        let remaining = PHASE_SEQUENCE
            .iter()
            .copied()
            .skip_while(|phase| *phase != job.phase)
            .skip(1);

        for phase in remaining {
            if self.status(job_id)?.phase == JobPhase::Cancelled {
                tracing::info!(job_id, "run stopped: job cancelled");
                return Ok(RunOutcome::Cancelled);
            }

            if phase == JobPhase::ReviewRequired {
                if !self.review_enabled(options) {
                    continue;
                }
                self.state.with_db(|conn| {
                    repository::transition_job(conn, job_id, phase, Some("Awaiting plan review"))
                })?;
                tracing::info!(job_id, "awaiting plan review");
                return Ok(RunOutcome::AwaitingReview {
                    report: self.report(job_id)?,
                    stages: reports,
                });
            }

            if phase == JobPhase::Executing && self.dry_run_requested(options) {
                let preview = self.state.with_db(|conn| {
                    let plan = execution_service::prepare(conn, &self.config, job_id)?;
                    Ok(execution_service::dry_run_preview(&plan))
                })?;
                ctx.log_event(
                    "executing",
                    "dry_run_preview",
                    serde_json::to_value(&preview)?,
                    true,
                );
                tracing::info!(job_id, total_operations = preview.total_operations, "dry run complete");
                return Ok(RunOutcome::DryRun {
                    preview,
                    stages: reports,
                });
            }

            self.state.with_db(|conn| repository::transition_job(conn, job_id, phase, None))?;

            let stage = match self.stages.get(&phase) {
                Some(stage) if !options.skip_phases.contains(&phase) => stage.clone(),
                _ => {
                    tracing::debug!(job_id, phase = %phase, "phase passed through");
                    continue;
                }
            };

            match self.run_stage(stage.as_ref(), &ctx).await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!(job_id, phase = %phase, error = %err, "phase failed");
                    if let Err(fail_err) = self
                        .state
                        .with_db(|conn| repository::fail_job(conn, job_id, &err.to_string()))
                    {
                        tracing::warn!(job_id, error = %fail_err, "could not mark job failed");
                    }
                    return Err(err);
                }
            }
        }

        tracing::info!(job_id, "job completed");
        Ok(RunOutcome::Completed { stages: reports })
    }

    async fn run_stage(
        &self,
        stage: &dyn PipelineStage,
        ctx: &StageContext,
    ) -> Result<StageReport, AppError> {
        tracing::info!(job_id = %ctx.job_id, stage = stage.name(), "stage started");
        stage.validate(ctx)?;
        let report = stage.run(ctx).await?;
        tracing::info!(
            job_id = %ctx.job_id,
            stage = stage.name(),
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "stage finished"
        );
        ctx.log_event(
            stage.name(),
            "stage_completed",
            serde_json::to_value(&report)?,
            report.errors.is_empty(),
        );
        Ok(report)
    }
}
