use std::time::Instant;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::job::JobPhase;
use crate::pipeline::{PipelineStage, StageContext, StageReport};
use crate::services::dedup_service::{self, DefaultScorer, PrimaryScorer};
use crate::services::{execution_service, organize_service, version_service};

pub struct DedupStage {
    scorer: Box<dyn PrimaryScorer>,
}

impl DedupStage {
    pub fn new() -> Self {
        Self::with_scorer(Box::new(DefaultScorer))
    }

    pub fn with_scorer(scorer: Box<dyn PrimaryScorer>) -> Self {
        Self { scorer }
    }
}

impl Default for DedupStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn phase(&self) -> JobPhase {
        JobPhase::Deduplicating
    }

    fn validate(&self, ctx: &StageContext) -> Result<(), AppError> {
        ctx.with_db(|conn| dedup_service::validate_prerequisites(conn, &ctx.job_id))
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, AppError> {
        dedup_service::run(ctx, self.scorer.as_ref()).await
    }
}

#[derive(Default)]
pub struct VersioningStage;

#[async_trait]
impl PipelineStage for VersioningStage {
    fn name(&self) -> &'static str {
        "versioning"
    }

    fn phase(&self) -> JobPhase {
        JobPhase::Versioning
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, AppError> {
        version_service::run(ctx).await
    }
}

#[derive(Default)]
pub struct OrganizingStage;

#[async_trait]
impl PipelineStage for OrganizingStage {
    fn name(&self) -> &'static str {
        "organizing"
    }

    fn phase(&self) -> JobPhase {
        JobPhase::Organizing
    }

    fn validate(&self, ctx: &StageContext) -> Result<(), AppError> {
        if ctx.services.planner.is_none() {
            return Err(AppError::Planner(
                "no organization planner configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, AppError> {
        organize_service::run(ctx).await
    }
}

#[derive(Default)]
pub struct ExecutingStage;

#[async_trait]
impl PipelineStage for ExecutingStage {
    fn name(&self) -> &'static str {
        "executing"
    }

    fn phase(&self) -> JobPhase {
        JobPhase::Executing
    }

    fn validate(&self, ctx: &StageContext) -> Result<(), AppError> {
        ctx.with_db(|conn| execution_service::prepare(conn, &ctx.config, &ctx.job_id))
            .map(|_| ())
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageReport, AppError> {
        let started = Instant::now();
        let mut report = StageReport::new(self.name());

        let outcome = ctx.with_db(|conn| {
            execution_service::execute(conn, &ctx.config, &ctx.job_id, JobPhase::Approved)
        })?;

        report.processed = outcome.statistics.total_files;
        report.errors = outcome.errors.clone();
        report.details = serde_json::to_value(&outcome)?;
        Ok(report.finish(started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrganizerConfig;
    use crate::data::repository::{self, tests::new_record};
    use crate::pipeline::test_support::context;
    use crate::services::organize_service::tests::FixedPlanner;
    use std::sync::Arc;

    #[test]
    fn stages_report_their_phases() {
        assert_eq!(DedupStage::new().phase(), JobPhase::Deduplicating);
        assert_eq!(VersioningStage.phase(), JobPhase::Versioning);
        assert_eq!(OrganizingStage.phase(), JobPhase::Organizing);
        assert_eq!(ExecutingStage.phase(), JobPhase::Executing);
    }

    #[test]
    fn organizing_requires_a_planner() {
        let mut ctx = context(OrganizerConfig::default());
        assert!(matches!(
            OrganizingStage.validate(&ctx),
            Err(AppError::Planner(_))
        ));
        ctx.services.planner = Some(Arc::new(FixedPlanner::new(serde_json::json!({}))));
        assert!(OrganizingStage.validate(&ctx).is_ok());
    }

    #[test]
    fn dedup_validation_needs_hashed_records() {
        let ctx = context(OrganizerConfig::default());
        assert!(matches!(
            DedupStage::new().validate(&ctx),
            Err(AppError::Prerequisite(_))
        ));
        ctx.with_db(|conn| repository::insert_record(conn, &new_record("job", "/a", "a.txt", "h1")))
            .unwrap();
        assert!(DedupStage::new().validate(&ctx).is_ok());
    }

    #[test]
    fn executing_validation_surfaces_plan_problems() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OrganizerConfig::default();
        config.source_root = dir.path().join("source");
        config.working_root = dir.path().join("source").join("inside");
        let ctx = context(config);
        assert!(matches!(
            ExecutingStage.validate(&ctx),
            Err(AppError::Validation(_))
        ));
    }
}
