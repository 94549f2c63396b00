use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::config::{OrganizerConfig, ReviewPolicy};
use crate::data::repository::{self, HashBucket};
use crate::error::AppError;
use crate::models::decision::Decision;
use crate::models::duplicate::{short_hash, DuplicateAction, GroupDecision, MemberDecision};
use crate::models::inventory::InventoryRecord;
use crate::pipeline::{StageContext, StageReport};
use crate::services::decision_service::{self, SHORTCUT_REVIEW_REASONING};

const STAGE: &str = "dedup";

const SECONDARY_PATH_MARKERS: &[&str] = &["backup", "archive", "old", "copy", "temp", "draft"];
const SECONDARY_NAME_MARKERS: &[&str] = &["backup", "copy", "_old", " copy", "(1)", "(2)", "(3)"];

const PRIMARY_REASONING: &str = "Selected as primary based on path and recency";
const AUTO_SHORTCUT_REASONING: &str = "Auto-approved for shortcut (exact duplicate)";

/// Ranks members of a duplicate group; the highest score becomes primary.
pub trait PrimaryScorer: Send + Sync {
    fn score(&self, record: &InventoryRecord, now: DateTime<Utc>) -> f64;
}

/// Prefers clean, shallow, recently modified, summarized copies.
pub struct DefaultScorer;

impl PrimaryScorer for DefaultScorer {
    fn score(&self, record: &InventoryRecord, now: DateTime<Utc>) -> f64 {
        score_member(record, now)
    }
}

pub fn score_member(record: &InventoryRecord, now: DateTime<Utc>) -> f64 {
    let full_path = record.full_path().to_lowercase();
    let name = record.current_name.to_lowercase();
    let mut score = 0.0;

    if SECONDARY_PATH_MARKERS.iter().any(|m| full_path.contains(m)) {
        score -= 20.0;
    }
    if SECONDARY_NAME_MARKERS.iter().any(|m| name.contains(m)) {
        score -= 15.0;
    }

    score -= 2.0 * full_path.matches('/').count() as f64;

    if let Some(modified) = record.modified_at {
        let days = (now - modified).num_days().clamp(0, 365);
        score -= days as f64 / 10.0;
    }

    if record.summary.as_deref().is_some_and(|s| !s.trim().is_empty()) {
        score += 5.0;
    }

    score
}

pub struct CandidateGroup {
    pub bucket: HashBucket,
    pub members: Vec<InventoryRecord>,
}

pub fn validate_prerequisites(conn: &Connection, job_id: &str) -> Result<(), AppError> {
    if repository::count_hashed_records(conn, job_id)? == 0 {
        return Err(AppError::Prerequisite(format!(
            "job {job_id} has no hashed inventory records"
        )));
    }
    Ok(())
}

pub fn find_duplicate_groups(
    conn: &Connection,
    job_id: &str,
    min_size_bytes: i64,
    min_group_size: usize,
) -> Result<Vec<CandidateGroup>, AppError> {
    let buckets = repository::find_duplicate_hashes(conn, job_id, min_size_bytes, min_group_size)?;
    let mut groups = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let members =
            repository::records_by_hash(conn, job_id, &bucket.content_hash, min_size_bytes)?;
        groups.push(CandidateGroup { bucket, members });
    }
    Ok(groups)
}

/// Highest score wins; ties keep the earliest member in input order.
pub fn heuristic_decision(
    members: &[InventoryRecord],
    scorer: &dyn PrimaryScorer,
    now: DateTime<Utc>,
    review_policy: ReviewPolicy,
) -> Decision<GroupDecision> {
    let mut best: Option<(i64, f64)> = None;
    for member in members {
        let score = scorer.score(member, now);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((member.id, score));
        }
    }
    let Some((primary_id, _)) = best else {
        return Decision::Unavailable;
    };

    let secondary_reasoning = match review_policy {
        ReviewPolicy::AutoApprove => AUTO_SHORTCUT_REASONING,
        ReviewPolicy::Manual => SHORTCUT_REVIEW_REASONING,
    };
    let decisions = members
        .iter()
        .map(|member| {
            if member.id == primary_id {
                MemberDecision {
                    record_id: member.id,
                    action: DuplicateAction::KeepPrimary,
                    reasoning: PRIMARY_REASONING.to_string(),
                }
            } else {
                MemberDecision {
                    record_id: member.id,
                    action: DuplicateAction::Shortcut,
                    reasoning: secondary_reasoning.to_string(),
                }
            }
        })
        .collect();

    Decision::Heuristic(GroupDecision {
        primary_id,
        reasoning: Some(PRIMARY_REASONING.to_string()),
        decisions,
    })
}

pub fn needs_external_decision(config: &OrganizerConfig, member_count: usize) -> bool {
    config.review_policy == ReviewPolicy::Manual && member_count > config.escalation_group_size
}

pub async fn run(ctx: &StageContext, scorer: &dyn PrimaryScorer) -> Result<StageReport, AppError> {
    let started = Instant::now();
    let mut report = StageReport::new(STAGE);
    let config = ctx.config.clone();

    let groups = ctx.with_db(|conn| {
        validate_prerequisites(conn, &ctx.job_id)?;
        find_duplicate_groups(
            conn,
            &ctx.job_id,
            config.min_duplicate_size_bytes,
            config.min_duplicate_group_size,
        )
    })?;
    tracing::info!(job_id = %ctx.job_id, groups = groups.len(), "duplicate groups found");

    let now = Utc::now();
    let mut shortcuts_planned = 0usize;
    let mut escalated = 0usize;

    for group in &groups {
        let hash = short_hash(&group.bucket.content_hash);
        let heuristic = heuristic_decision(&group.members, scorer, now, config.review_policy);
        let Decision::Heuristic(fallback) = heuristic else {
            report.skipped += 1;
            continue;
        };

        let external = match &ctx.services.decision {
            Some(service) if needs_external_decision(&config, group.members.len()) => {
                escalated += 1;
                decision_service::decide_duplicate_group(
                    service.as_ref(),
                    &group.bucket.content_hash,
                    &group.members,
                    config.service_retry_attempts,
                )
                .await
            }
            _ => Decision::Unavailable,
        };
        let (decision, decided_by) = external.resolve(fallback);

        let stored = ctx.with_db(|conn| {
            repository::upsert_duplicate_group(
                conn,
                &ctx.job_id,
                &group.bucket,
                &decision,
                decided_by,
            )
        });
        match stored {
            Ok(_) => {
                report.processed += 1;
                shortcuts_planned += decision.shortcut_count();
                ctx.log_event(
                    STAGE,
                    "process_duplicate_group",
                    serde_json::json!({
                        "hash": hash,
                        "file_count": group.members.len(),
                        "primary_id": decision.primary_id,
                        "decided_by": decided_by.to_string(),
                    }),
                    true,
                );
            }
            Err(err) => {
                tracing::error!(job_id = %ctx.job_id, hash, error = %err, "duplicate group failed");
                report.record_error(format!("{hash}: {err}"));
                ctx.log_event(
                    STAGE,
                    "process_duplicate_group",
                    serde_json::json!({"hash": hash, "error": err.to_string(), "kind": err.kind()}),
                    false,
                );
            }
        }
    }

    report.details = serde_json::json!({
        "duplicate_groups": groups.len(),
        "shortcuts_planned": shortcuts_planned,
        "escalated": escalated,
    });
    tracing::info!(
        job_id = %ctx.job_id,
        processed = report.processed,
        shortcuts_planned,
        errors = report.errors.len(),
        "deduplication complete"
    );
    Ok(report.finish(started))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::tests::new_record;
    use crate::models::decision::DecisionSource;
    use crate::models::inventory::sample_record;
    use crate::pipeline::test_support::context;
    use crate::services::decision_service::tests::ScriptedService;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    #[test]
    fn backup_copies_lose_to_clean_paths() {
        let now = Utc::now();
        let mut clean = sample_record(1, "/Projects", "Report.docx");
        clean.modified_at = Some(now - Duration::days(10));
        clean.summary = Some("quarterly report".into());
        let mut backup = sample_record(2, "/Backup/Old", "Report.docx");
        backup.modified_at = Some(now - Duration::days(300));

        assert!(score_member(&clean, now) > score_member(&backup, now));

        let decision = heuristic_decision(&[backup, clean], &DefaultScorer, now, ReviewPolicy::Manual);
        let Decision::Heuristic(decision) = decision else {
            panic!("expected heuristic decision");
        };
        assert_eq!(decision.primary_id, 1);
        assert_eq!(decision.action_for(2), Some(DuplicateAction::Shortcut));
        assert_eq!(decision.decisions[0].reasoning, SHORTCUT_REVIEW_REASONING);
    }

    #[test]
    fn score_components_add_up() {
        let now = Utc::now();
        let mut record = sample_record(1, "/a", "plan copy.docx");
        record.modified_at = Some(now - Duration::days(1000));
        // -15 name, -4 depth, -36.5 age cap; "copy" is also in the full path: -20
        assert_eq!(score_member(&record, now), -15.0 - 4.0 - 36.5 - 20.0);
    }

    #[test]
    fn ties_go_to_the_first_member() {
        let now = Utc::now();
        let members = vec![
            sample_record(7, "/x", "a.pdf"),
            sample_record(3, "/y", "a.pdf"),
        ];
        let Decision::Heuristic(decision) =
            heuristic_decision(&members, &DefaultScorer, now, ReviewPolicy::AutoApprove)
        else {
            panic!("expected heuristic decision");
        };
        assert_eq!(decision.primary_id, 7);
        assert_eq!(decision.decisions[1].reasoning, AUTO_SHORTCUT_REASONING);
    }

    #[test]
    fn escalation_only_for_large_manual_groups() {
        let mut config = OrganizerConfig::default();
        assert!(!needs_external_decision(&config, 3));
        assert!(needs_external_decision(&config, 4));
        config.review_policy = ReviewPolicy::AutoApprove;
        assert!(!needs_external_decision(&config, 10));
    }

    #[test]
    fn prerequisites_require_hashed_records() {
        let ctx = context(OrganizerConfig::default());
        let err = ctx
            .with_db(|conn| validate_prerequisites(conn, "job"))
            .unwrap_err();
        assert!(matches!(err, AppError::Prerequisite(_)));
    }

    #[tokio::test]
    async fn report_docx_duplicates_become_one_group() {
        let ctx = context(OrganizerConfig::default());
        let (primary, backup) = ctx
            .with_db(|conn| {
                let mut a = new_record("job", "/Projects", "Report.docx", "abc123");
                a.modified_at = Some(Utc::now() - Duration::days(5));
                let mut b = new_record("job", "/Backup", "Report.docx", "abc123");
                b.modified_at = Some(Utc::now() - Duration::days(200));
                b.summary = None;
                Ok((repository::insert_record(conn, &a)?, repository::insert_record(conn, &b)?))
            })
            .unwrap();

        let report = run(&ctx, &DefaultScorer).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.details["shortcuts_planned"], 1);

        let groups = ctx
            .with_db(|conn| repository::list_duplicate_groups(conn, "job"))
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].primary_id, primary);
        assert_eq!(groups[0].decided_by, DecisionSource::Heuristic);
        let shortcut = groups[0].members.iter().find(|m| m.record_id == backup).unwrap();
        assert_eq!(shortcut.action, DuplicateAction::Shortcut);
    }

    #[tokio::test]
    async fn documents_copy_beats_archived_copy_once_ages_cap() {
        let ctx = context(OrganizerConfig::default());
        let (archived, current) = ctx
            .with_db(|conn| {
                let mut old = new_record("job", "/Archive/Old", "Report.docx", "abc123");
                old.modified_at = Some(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
                let mut doc = new_record("job", "/Documents", "Report.docx", "abc123");
                doc.modified_at = Some(Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap());
                // archived copy goes in first so a tie would keep it
                Ok((repository::insert_record(conn, &old)?, repository::insert_record(conn, &doc)?))
            })
            .unwrap();

        run(&ctx, &DefaultScorer).await.unwrap();

        let groups = ctx
            .with_db(|conn| repository::list_duplicate_groups(conn, "job"))
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].primary_id, current);
        let action = |id: i64| groups[0].members.iter().find(|m| m.record_id == id).unwrap().action;
        assert_eq!(action(current), DuplicateAction::KeepPrimary);
        assert_eq!(action(archived), DuplicateAction::Shortcut);
    }

    #[tokio::test]
    async fn large_groups_take_the_external_override() {
        let mut ctx = context(OrganizerConfig::default());
        let ids = ctx
            .with_db(|conn| {
                let mut ids = Vec::new();
                for dir in ["/A", "/B", "/C", "/D"] {
                    ids.push(repository::insert_record(
                        conn,
                        &new_record("job", dir, "Deck.pptx", "samehash"),
                    )?);
                }
                Ok(ids)
            })
            .unwrap();
        let reply = format!(
            r#"{{"primary_id": {}, "reasoning": "team folder", "decisions": {{}}}}"#,
            ids[2]
        );
        ctx.services.decision = Some(Arc::new(ScriptedService::new(vec![Ok(reply.as_str())])));

        run(&ctx, &DefaultScorer).await.unwrap();
        let groups = ctx
            .with_db(|conn| repository::list_duplicate_groups(conn, "job"))
            .unwrap();
        assert_eq!(groups[0].primary_id, ids[2]);
        assert_eq!(groups[0].decided_by, DecisionSource::Confirmed);
    }
}
