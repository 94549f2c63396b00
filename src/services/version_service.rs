use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::{ArchiveStrategy, OrganizerConfig};
use crate::data::repository;
use crate::error::AppError;
use crate::models::decision::Decision;
use crate::models::inventory::InventoryRecord;
use crate::models::version::{
    ChainMember, DetectionMethod, MarkerKind, VersionChain, VersionMarker, VersionStatus,
};
use crate::pipeline::{StageContext, StageReport};
use crate::scope_path;
use crate::services::decision_service;
use crate::services::similarity;

const STAGE: &str = "versioning";

lazy_static::lazy_static! {
    static ref VERSION_PATTERNS: Vec<(Regex, MarkerKind)> = [
        (r"(?i)_v(\d+)", MarkerKind::VersionNumber),
        (r"(?i)_rev(\d+)", MarkerKind::RevisionNumber),
        (r"(?i)_version(\d+)", MarkerKind::VersionNumber),
        (r"(?i)\s*\((\d+)\)", MarkerKind::CopyNumber),
        (r"(?i)_(\d{4}-\d{2}-\d{2})", MarkerKind::Date),
        (r"(?i)_(\d{8})", MarkerKind::DateCompact),
        (r"(?i)_(draft|final|approved|review|wip)", MarkerKind::Status),
    ]
    .into_iter()
    .map(|(pattern, kind)| (Regex::new(pattern).expect("regex for version marker"), kind))
    .collect();
}

fn status_rank(value: &str) -> i64 {
    match value.to_ascii_lowercase().as_str() {
        "draft" => 1,
        "wip" => 2,
        "review" => 3,
        "approved" => 4,
        "final" => 5,
        _ => 99,
    }
}

/// Splits a file stem into its base name and the first version marker found.
/// The base name has every recognised marker removed, so `Budget_v3_final`
/// yields `Budget` with marker `_v3`.
pub fn extract_version_info(stem: &str) -> (String, Option<VersionMarker>) {
    let marker = VERSION_PATTERNS.iter().find_map(|(pattern, kind)| {
        pattern.captures(stem).map(|caps| VersionMarker {
            kind: *kind,
            value: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
            marker: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    });
    if marker.is_none() {
        return (stem.to_string(), None);
    }

    let mut base = stem.to_string();
    loop {
        let stripped = VERSION_PATTERNS
            .iter()
            .fold(base.clone(), |acc, (pattern, _)| pattern.replace_all(&acc, "").into_owned());
        if stripped == base {
            break;
        }
        base = stripped;
    }
    let base = base.trim_matches(|c: char| matches!(c, '_' | '-' | ' ')).to_string();
    if base.is_empty() {
        return (stem.to_string(), marker);
    }
    (base, marker)
}

#[derive(Debug, Clone)]
pub struct VersionCandidate {
    pub record: InventoryRecord,
    pub base_name: String,
    pub marker: Option<VersionMarker>,
}

impl VersionCandidate {
    pub fn new(record: InventoryRecord) -> Self {
        let (base_name, marker) = extract_version_info(record.stem());
        Self {
            record,
            base_name,
            marker,
        }
    }

    fn stem_lower(&self) -> String {
        self.record.stem().to_lowercase()
    }
}

#[derive(Debug, Clone)]
pub struct CandidateGroup {
    pub base_name: String,
    pub directory: String,
    pub extension: Option<String>,
    pub members: Vec<VersionCandidate>,
    pub method: DetectionMethod,
}

/// Groups marked candidates by `(base name, directory, extension)`, in
/// first-seen order. Singletons are dropped.
pub fn find_explicit_groups(candidates: &[VersionCandidate]) -> Vec<CandidateGroup> {
    let mut order: Vec<(String, String, Option<String>)> = Vec::new();
    let mut buckets: HashMap<(String, String, Option<String>), Vec<VersionCandidate>> =
        HashMap::new();

    for candidate in candidates.iter().filter(|c| c.marker.is_some()) {
        let key = (
            candidate.base_name.clone(),
            candidate.record.current_path.clone(),
            candidate.record.extension.clone(),
        );
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(candidate.clone());
    }

    order
        .into_iter()
        .filter_map(|key| {
            let members = buckets.remove(&key)?;
            (members.len() >= 2).then(|| CandidateGroup {
                base_name: key.0,
                directory: key.1,
                extension: key.2,
                members,
                method: DetectionMethod::ExplicitMarker,
            })
        })
        .collect()
}

/// Single greedy pass over unmarked candidates, per `(directory, extension)`
/// bucket. Each unconsumed record seeds a cluster and absorbs later
/// unconsumed records with a different hash and a similar enough stem.
pub fn find_similar_groups(candidates: &[VersionCandidate], threshold: f64) -> Vec<CandidateGroup> {
    let mut order: Vec<(String, Option<String>)> = Vec::new();
    let mut buckets: HashMap<(String, Option<String>), Vec<&VersionCandidate>> = HashMap::new();
    for candidate in candidates.iter().filter(|c| c.marker.is_none()) {
        let key = (
            candidate.record.current_path.clone(),
            candidate.record.extension.clone(),
        );
        buckets
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(candidate);
    }

    let mut groups = Vec::new();
    for key in order {
        let Some(bucket) = buckets.remove(&key) else {
            continue;
        };
        let mut consumed = vec![false; bucket.len()];
        for i in 0..bucket.len() {
            if consumed[i] {
                continue;
            }
            let seed = bucket[i];
            let seed_stem = seed.stem_lower();
            let mut cluster = vec![i];
            for j in (i + 1)..bucket.len() {
                if consumed[j] || bucket[j].record.content_hash == seed.record.content_hash {
                    continue;
                }
                if similarity::ratio(&seed_stem, &bucket[j].stem_lower()) >= threshold {
                    cluster.push(j);
                }
            }
            if cluster.len() < 2 {
                continue;
            }
            for idx in &cluster {
                consumed[*idx] = true;
            }
            let members: Vec<VersionCandidate> =
                cluster.iter().map(|idx| bucket[*idx].clone()).collect();
            let stems: Vec<&str> = members.iter().map(|m| m.record.stem()).collect();
            groups.push(CandidateGroup {
                base_name: similarity::extract_common_name(&stems),
                directory: key.0.clone(),
                extension: key.1.clone(),
                members,
                method: DetectionMethod::NameSimilarity,
            });
        }
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    tier: u8,
    numeric: i64,
    status_rank: i64,
    when: Option<DateTime<Utc>>,
    index: usize,
}

fn sort_key(candidate: &VersionCandidate, index: usize) -> SortKey {
    let mtime = candidate.record.modified_at;
    let fallback = SortKey {
        tier: 4,
        numeric: 0,
        status_rank: 0,
        when: mtime,
        index,
    };
    let Some(marker) = &candidate.marker else {
        return fallback;
    };

    if marker.kind.is_numeric() {
        return match marker.value.parse::<i64>() {
            Ok(numeric) => SortKey {
                tier: 1,
                numeric,
                ..fallback
            },
            Err(_) => fallback,
        };
    }
    if marker.kind.is_date() {
        return match marker
            .parsed_date()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
        {
            Some(date) => SortKey {
                tier: 2,
                when: Some(date),
                ..fallback
            },
            None => fallback,
        };
    }
    SortKey {
        tier: 3,
        status_rank: status_rank(&marker.value),
        ..fallback
    }
}

/// Orders members oldest to newest: numeric markers, then dates, then
/// status words, then modification time. Input order breaks ties.
pub fn sort_by_version(members: Vec<VersionCandidate>) -> Vec<VersionCandidate> {
    let mut keyed: Vec<(SortKey, VersionCandidate)> = members
        .into_iter()
        .enumerate()
        .map(|(idx, m)| (sort_key(&m, idx), m))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, m)| m).collect()
}

pub fn archive_path(
    strategy: ArchiveStrategy,
    directory: &str,
    base_name: &str,
    config: &OrganizerConfig,
) -> String {
    match strategy {
        ArchiveStrategy::Subfolder => scope_path::join(
            &scope_path::join(directory, &config.version_folder_name),
            base_name,
        ),
        ArchiveStrategy::Inline => scope_path::normalize(directory),
        ArchiveStrategy::SeparateArchive => {
            scope_path::join(&config.separate_archive_root, base_name)
        }
    }
}

fn with_extension(name: &str, extension: Option<&str>) -> String {
    match extension {
        Some(ext) if !ext.is_empty() => format!("{name}.{ext}"),
        _ => name.to_string(),
    }
}

/// Builds the chain for `sorted` (oldest first) with `current_index` as the
/// active member.
pub fn build_chain(
    job_id: &str,
    group: &CandidateGroup,
    sorted: &[VersionCandidate],
    current_index: usize,
    config: &OrganizerConfig,
    reasoning: Option<String>,
) -> VersionChain {
    let current_index = if current_index < sorted.len() {
        current_index
    } else {
        sorted.len().saturating_sub(1)
    };
    let archive = archive_path(config.archive_strategy, &group.directory, &group.base_name, config);
    let extension = group.extension.as_deref();
    let current_name = with_extension(&group.base_name, extension);

    // archived names share one directory; inline archives share it with the current file
    let mut taken: HashSet<String> = HashSet::new();
    if config.archive_strategy == ArchiveStrategy::Inline {
        taken.insert(current_name.to_lowercase());
    }

    let members = sorted
        .iter()
        .enumerate()
        .map(|(idx, candidate)| {
            let version_number = idx as i64 + 1;
            let label = candidate
                .marker
                .as_ref()
                .map(|m| m.label().to_string())
                .unwrap_or_else(|| format!("v{version_number}"));
            let is_current = idx == current_index;
            let (name, path) = if is_current {
                (current_name.clone(), scope_path::normalize(&group.directory))
            } else {
                let stem = match candidate.record.modified_at {
                    Some(ts) => format!("{}_{label}_{}", group.base_name, ts.format("%Y-%m-%d")),
                    None => format!("{}_{label}", group.base_name),
                };
                let mut name = with_extension(&stem, extension);
                if !taken.insert(name.to_lowercase()) {
                    name = with_extension(&format!("{stem}_{version_number}"), extension);
                    taken.insert(name.to_lowercase());
                }
                (name, archive.clone())
            };
            ChainMember {
                record_id: candidate.record.id,
                version_number,
                version_label: Some(label),
                version_date: candidate.marker.as_ref().and_then(|m| m.parsed_date()),
                is_current,
                status: if is_current {
                    VersionStatus::Active
                } else {
                    VersionStatus::Superseded
                },
                proposed_version_name: name,
                proposed_version_path: path,
            }
        })
        .collect();

    VersionChain {
        id: 0,
        job_id: job_id.to_string(),
        chain_name: group.base_name.clone(),
        base_path: scope_path::normalize(&group.directory),
        extension: group.extension.clone(),
        members,
        current_index,
        detection_method: group.method,
        confidence: group.method.confidence(),
        archive_strategy: config.archive_strategy,
        archive_path: Some(archive),
        reasoning,
    }
}

fn persist_chain(ctx: &StageContext, chain: &VersionChain, report: &mut StageReport) -> usize {
    match ctx.with_db(|conn| repository::insert_version_chain(conn, chain)) {
        Ok(chain_id) => {
            report.processed += 1;
            tracing::info!(
                job_id = %ctx.job_id,
                chain_id,
                base_name = %chain.chain_name,
                versions = chain.members.len(),
                method = %chain.detection_method,
                "version chain created"
            );
            ctx.log_event(
                STAGE,
                "version_chain_created",
                serde_json::json!({
                    "chain_id": chain_id,
                    "chain_name": chain.chain_name,
                    "version_count": chain.members.len(),
                    "detection_method": chain.detection_method.to_string(),
                    "archive_strategy": chain.archive_strategy.to_string(),
                }),
                true,
            );
            chain.members.len()
        }
        Err(err) => {
            tracing::error!(job_id = %ctx.job_id, base_name = %chain.chain_name, error = %err, "version chain failed");
            report.record_error(format!("{}: {err}", chain.chain_name));
            0
        }
    }
}

pub async fn run(ctx: &StageContext) -> Result<StageReport, AppError> {
    let started = Instant::now();
    let mut report = StageReport::new(STAGE);
    let config = ctx.config.clone();

    let candidates: Vec<VersionCandidate> = ctx
        .with_db(|conn| repository::version_candidates(conn, &ctx.job_id))?
        .into_iter()
        .map(VersionCandidate::new)
        .collect();

    let explicit = find_explicit_groups(&candidates);
    let similar = find_similar_groups(&candidates, config.similarity_threshold);
    tracing::info!(
        job_id = %ctx.job_id,
        candidates = candidates.len(),
        explicit = explicit.len(),
        similar = similar.len(),
        "version groups found"
    );

    let mut versions_linked = 0usize;
    for group in &explicit {
        let sorted = sort_by_version(group.members.clone());
        let current = sorted.len().saturating_sub(1);
        let chain = build_chain(&ctx.job_id, group, &sorted, current, &config, None);
        versions_linked += persist_chain(ctx, &chain, &mut report);
    }

    let service = ctx
        .services
        .decision
        .clone()
        .filter(|_| config.confirm_similar_versions);
    match service {
        None => {
            if !similar.is_empty() {
                tracing::info!(job_id = %ctx.job_id, groups = similar.len(), "similarity groups discarded without confirmation");
            }
            report.skipped += similar.len();
        }
        Some(service) => {
            let sorted_groups: Vec<Vec<VersionCandidate>> = similar
                .iter()
                .map(|g| sort_by_version(g.members.clone()))
                .collect();
            let prompts: Vec<Vec<InventoryRecord>> = sorted_groups
                .iter()
                .map(|members| members.iter().map(|m| m.record.clone()).collect())
                .collect();
            let confirmations = decision_service::confirm_version_groups(
                service,
                prompts,
                config.decision_concurrency,
                config.service_retry_attempts,
            )
            .await?;

            for ((group, sorted), confirmation) in
                similar.iter().zip(&sorted_groups).zip(confirmations)
            {
                match confirmation {
                    Decision::Confirmed(c) if c.confirmed => {
                        let current = c
                            .current_index
                            .unwrap_or_else(|| sorted.len().saturating_sub(1));
                        let chain = build_chain(
                            &ctx.job_id,
                            group,
                            sorted,
                            current,
                            &config,
                            Some(c.reasoning),
                        );
                        versions_linked += persist_chain(ctx, &chain, &mut report);
                    }
                    other => {
                        report.skipped += 1;
                        let reason = match other {
                            Decision::Confirmed(c) => c.reasoning,
                            _ => "decision service unavailable".to_string(),
                        };
                        tracing::info!(job_id = %ctx.job_id, base_name = %group.base_name, reason = %reason, "version group rejected");
                        ctx.log_event(
                            STAGE,
                            "version_group_rejected",
                            serde_json::json!({"base_name": group.base_name, "reason": reason}),
                            true,
                        );
                    }
                }
            }
        }
    }

    report.details = serde_json::json!({
        "chains_created": report.processed,
        "versions_linked": versions_linked,
        "explicit_groups": explicit.len(),
        "similarity_groups": similar.len(),
    });
    Ok(report.finish(started))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::tests::new_record;
    use crate::models::inventory::sample_record;
    use crate::pipeline::test_support::context;
    use crate::services::decision_service::tests::ScriptedService;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn candidate(id: i64, dir: &str, name: &str) -> VersionCandidate {
        let mut record = sample_record(id, dir, name);
        record.content_hash = Some(format!("hash-{id}"));
        VersionCandidate::new(record)
    }

    #[test]
    fn extracts_first_marker_and_strips_all() {
        let (base, marker) = extract_version_info("Budget_v3_final");
        assert_eq!(base, "Budget");
        let marker = marker.unwrap();
        assert_eq!(marker.kind, MarkerKind::VersionNumber);
        assert_eq!(marker.value, "3");
        assert_eq!(marker.marker, "_v3");

        let (base, marker) = extract_version_info("Report_2024-01-15");
        assert_eq!(base, "Report");
        assert_eq!(marker.unwrap().kind, MarkerKind::Date);

        let (base, marker) = extract_version_info("Notes (2)");
        assert_eq!(base, "Notes");
        assert_eq!(marker.unwrap().kind, MarkerKind::CopyNumber);

        let (base, marker) = extract_version_info("Minutes_DRAFT");
        assert_eq!(base, "Minutes");
        assert_eq!(marker.unwrap().value, "DRAFT");

        assert_eq!(extract_version_info("plain name"), ("plain name".to_string(), None));
    }

    #[test]
    fn explicit_groups_need_same_dir_and_extension() {
        let candidates = vec![
            candidate(1, "/Finance", "Budget_v1.xlsx"),
            candidate(2, "/Finance", "Budget_v2.xlsx"),
            candidate(3, "/Other", "Budget_v3.xlsx"),
            candidate(4, "/Finance", "Budget_v4.pdf"),
            candidate(5, "/Finance", "Budget.xlsx"),
        ];
        let groups = find_explicit_groups(&candidates);
        assert_eq!(groups.len(), 1);
        let ids: Vec<i64> = groups[0].members.iter().map(|m| m.record.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn similar_groups_skip_identical_hashes_and_marked_files() {
        let mut a = candidate(1, "/Docs", "project proposal.docx");
        let mut b = candidate(2, "/Docs", "project proposal revised.docx");
        let c = candidate(3, "/Docs", "grocery list.docx");
        let d = candidate(4, "/Docs", "project proposal_v2.docx");
        let mut dup = candidate(5, "/Docs", "project proposals.docx");
        a.record.content_hash = Some("same".into());
        dup.record.content_hash = Some("same".into());
        b.record.content_hash = Some("other".into());

        let groups = find_similar_groups(&[a, b, c, d, dup], 0.7);
        assert_eq!(groups.len(), 1);
        let ids: Vec<i64> = groups[0].members.iter().map(|m| m.record.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(groups[0].base_name, "project proposal");
        assert_eq!(groups[0].method, DetectionMethod::NameSimilarity);
    }

    #[test]
    fn sorting_follows_marker_tiers() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut unmarked = candidate(1, "/", "Plan.docx");
        unmarked.record.modified_at = Some(now);
        let mut final_status = candidate(2, "/", "Plan_final.docx");
        final_status.record.modified_at = Some(now - Duration::days(30));
        let draft = candidate(3, "/", "Plan_draft.docx");
        let dated = candidate(4, "/", "Plan_2024-01-15.docx");
        let v10 = candidate(5, "/", "Plan_v10.docx");
        let v2 = candidate(6, "/", "Plan_v2.docx");

        let sorted = sort_by_version(vec![unmarked, final_status, draft, dated, v10, v2]);
        let ids: Vec<i64> = sorted.iter().map(|c| c.record.id).collect();
        assert_eq!(ids, vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn missing_mtimes_sort_first_and_ties_keep_input_order() {
        let mut newer = candidate(1, "/", "a.txt");
        newer.record.modified_at = Some(Utc::now());
        let unknown_a = candidate(2, "/", "b.txt");
        let unknown_b = candidate(3, "/", "c.txt");
        let sorted = sort_by_version(vec![newer, unknown_a, unknown_b]);
        let ids: Vec<i64> = sorted.iter().map(|c| c.record.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn archive_paths_per_strategy() {
        let config = OrganizerConfig::default();
        assert_eq!(
            archive_path(ArchiveStrategy::Subfolder, "/Finance", "Budget", &config),
            "/Finance/_versions/Budget"
        );
        assert_eq!(
            archive_path(ArchiveStrategy::Inline, "/Finance", "Budget", &config),
            "/Finance"
        );
        assert_eq!(
            archive_path(ArchiveStrategy::SeparateArchive, "/Finance", "Budget", &config),
            "/Archive/Versions/Budget"
        );
    }

    #[test]
    fn chain_names_current_and_superseded_members() {
        let config = OrganizerConfig::default();
        let mut v1 = candidate(1, "/Finance", "Budget_v1.xlsx");
        v1.record.modified_at = Some(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
        let v2 = candidate(2, "/Finance", "Budget_v2.xlsx");
        let group = CandidateGroup {
            base_name: "Budget".into(),
            directory: "/Finance".into(),
            extension: Some("xlsx".into()),
            members: vec![v1.clone(), v2.clone()],
            method: DetectionMethod::ExplicitMarker,
        };
        let chain = build_chain("job", &group, &[v1, v2], 1, &config, None);
        assert_eq!(chain.confidence, 0.95);
        assert_eq!(chain.members[0].proposed_version_name, "Budget_v1_2024-01-05.xlsx");
        assert_eq!(chain.members[0].proposed_version_path, "/Finance/_versions/Budget");
        assert_eq!(chain.members[0].status, VersionStatus::Superseded);
        assert_eq!(chain.members[1].proposed_version_name, "Budget.xlsx");
        assert_eq!(chain.members[1].proposed_version_path, "/Finance");
        assert!(chain.members[1].is_current);
    }

    #[test]
    fn archived_names_stay_unique_when_labels_repeat() {
        let config = OrganizerConfig::default();
        let day = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let mut v1 = candidate(1, "/Finance", "Budget_v1.xlsx");
        let mut v1_final = candidate(2, "/Finance", "Budget_v1_final.xlsx");
        let mut v2 = candidate(3, "/Finance", "Budget_v2.xlsx");
        for c in [&mut v1, &mut v1_final, &mut v2] {
            c.record.modified_at = Some(day);
        }
        let group = CandidateGroup {
            base_name: "Budget".into(),
            directory: "/Finance".into(),
            extension: Some("xlsx".into()),
            members: vec![v1.clone(), v1_final.clone(), v2.clone()],
            method: DetectionMethod::ExplicitMarker,
        };
        let chain = build_chain("job", &group, &[v1, v1_final, v2], 2, &config, None);
        let names: Vec<&str> = chain.members.iter().map(|m| m.proposed_version_name.as_str()).collect();
        assert_eq!(
            names,
            ["Budget_v1_2024-01-05.xlsx", "Budget_v1_2024-01-05_2.xlsx", "Budget.xlsx"]
        );
    }

    #[tokio::test]
    async fn budget_versions_form_one_chain() {
        let ctx = context(OrganizerConfig::default());
        let base = Utc::now() - Duration::days(30);
        let ids = ctx
            .with_db(|conn| {
                let mut ids = Vec::new();
                for (i, name) in ["Budget_v3_final.xlsx", "Budget_v1.xlsx", "Budget_v2.xlsx"]
                    .iter()
                    .enumerate()
                {
                    let mut record = new_record("job", "/Finance", name, &format!("h{i}"));
                    record.modified_at = Some(base + Duration::days(i as i64));
                    ids.push(repository::insert_record(conn, &record)?);
                }
                Ok(ids)
            })
            .unwrap();

        let report = run(&ctx).await.unwrap();
        assert_eq!(report.processed, 1);

        let chains = ctx
            .with_db(|conn| repository::list_version_chains(conn, "job"))
            .unwrap();
        assert_eq!(chains.len(), 1);
        let chain = &chains[0];
        assert_eq!(chain.chain_name, "Budget");
        let order: Vec<i64> = chain.members.iter().map(|m| m.record_id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
        assert_eq!(chain.current().map(|m| m.record_id), Some(ids[0]));
        assert_eq!(chain.superseded().count(), 2);

        // a second run finds nothing new
        let again = run(&ctx).await.unwrap();
        assert_eq!(again.processed, 0);
    }

    #[tokio::test]
    async fn similarity_groups_require_confirmation() {
        let mut ctx = context(OrganizerConfig::default());
        ctx.with_db(|conn| {
            repository::insert_record(conn, &new_record("job", "/Docs", "meeting notes.docx", "a"))?;
            repository::insert_record(conn, &new_record("job", "/Docs", "meeting notes final.docx", "b"))?;
            Ok(())
        })
        .unwrap();

        let skipped = run(&ctx).await.unwrap();
        assert_eq!(skipped.processed, 0);
        assert_eq!(skipped.skipped, 1);

        ctx.services.decision = Some(Arc::new(ScriptedService::new(vec![Ok(
            "CONFIRMED: yes\nCURRENT_INDEX: 0\nREASONING: the plain file is newer",
        )])));
        let confirmed = run(&ctx).await.unwrap();
        assert_eq!(confirmed.processed, 1);
        let chains = ctx
            .with_db(|conn| repository::list_version_chains(conn, "job"))
            .unwrap();
        assert_eq!(chains[0].detection_method, DetectionMethod::NameSimilarity);
        assert_eq!(chains[0].current_index, 0);
        assert_eq!(chains[0].confidence, 0.75);
    }
}
