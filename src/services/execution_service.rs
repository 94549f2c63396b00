use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::config::{ArchiveStrategy, OrganizerConfig};
use crate::data::repository;
use crate::error::AppError;
use crate::models::duplicate::{DuplicateAction, DuplicateGroup};
use crate::models::inventory::{InventoryRecord, RecordSnapshot};
use crate::models::job::JobPhase;
use crate::models::manifest::{Manifest, ManifestStatistics, Operation, OperationType, ShortcutEntry};
use crate::models::plan::PlannedDirectory;
use crate::models::version::VersionChain;
use crate::scope_path;
use crate::services::{file_service, manifest_service, shortcut_service};
use crate::shell::safety;

const STAGE: &str = "executing";
const VERSION_HISTORY_FILE: &str = "_version_history.json";

/// Everything execution reads from the store, loaded once up front.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub job_id: String,
    /// Records to materialize, in id order.
    pub records: Vec<InventoryRecord>,
    pub groups: Vec<DuplicateGroup>,
    pub chains: Vec<VersionChain>,
    pub directories: Vec<PlannedDirectory>,
    all_records: HashMap<i64, InventoryRecord>,
}

impl ExecutionPlan {
    pub fn load(conn: &Connection, job_id: &str) -> Result<Self, AppError> {
        let all_records = repository::list_records(conn, job_id)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let mut directories = repository::list_directories(conn, job_id)?;
        directories.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));
        Ok(Self {
            job_id: job_id.to_string(),
            records: repository::list_organized_records(conn, job_id)?,
            groups: repository::list_duplicate_groups(conn, job_id)?,
            chains: repository::list_version_chains(conn, job_id)?,
            directories,
            all_records,
        })
    }

    pub fn record(&self, id: i64) -> Option<&InventoryRecord> {
        self.all_records.get(&id)
    }

    /// `(group, member record)` for every shortcut not created yet.
    fn pending_shortcuts(&self) -> impl Iterator<Item = (&DuplicateGroup, &InventoryRecord)> {
        self.groups.iter().flat_map(move |group| {
            group
                .members
                .iter()
                .filter(|m| m.action == DuplicateAction::Shortcut && !m.shortcut_created)
                .filter_map(move |m| self.record(m.record_id).map(|r| (group, r)))
        })
    }

    fn archived_chains(&self) -> impl Iterator<Item = &VersionChain> {
        self.chains.iter().filter(|c| c.archive_path.is_some())
    }
}

fn source_file(config: &OrganizerConfig, record: &InventoryRecord) -> Option<PathBuf> {
    scope_path::resolve_under(
        &config.source_root,
        &scope_path::join(&record.current_path, &record.current_name),
    )
}

/// Working-tree directory and sanitized name a record lands on.
fn destination(record: &InventoryRecord) -> (String, String) {
    (
        scope_path::normalize(record.destination_path()),
        file_service::sanitize_filename(record.destination_name()),
    )
}

/// History file written next to a chain's archived versions. Inline chains
/// share their folder with other chains, so the file carries the chain name.
fn history_file(chain: &VersionChain) -> String {
    match chain.archive_strategy {
        ArchiveStrategy::Inline => {
            file_service::sanitize_filename(&format!("_{}{VERSION_HISTORY_FILE}", chain.chain_name))
        }
        _ => VERSION_HISTORY_FILE.to_string(),
    }
}

/// Checks the plan without touching anything. Every problem is collected.
pub fn validate_plan(plan: &ExecutionPlan, config: &OrganizerConfig) -> Result<(), AppError> {
    let mut problems = Vec::new();

    if let Err(err) = safety::validate_working_root(&config.working_root, &config.source_root) {
        problems.push(err.to_string());
    }

    let organized: HashSet<i64> = plan.records.iter().map(|r| r.id).collect();
    let mut destinations: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();

    for record in &plan.records {
        match source_file(config, record) {
            Some(path) if path.is_file() => {}
            Some(path) => problems.push(format!(
                "source file not found for record {}: {}",
                record.id,
                path.display()
            )),
            None => problems.push(format!(
                "source path escapes the source tree for record {}: {}",
                record.id, record.current_path
            )),
        }

        if let Some(name) = record.proposed_name.as_deref() {
            if !file_service::is_valid_filename(name) {
                problems.push(format!("invalid file name for record {}: {name}", record.id));
            }
        }
        if let Some(path) = record.proposed_path.as_deref() {
            if scope_path::resolve_under(&config.working_root, path).is_none() {
                problems.push(format!(
                    "proposed path leaves the working tree for record {}: {path}",
                    record.id
                ));
            }
        }

        destinations.entry(destination(record)).or_default().push(record.id);
    }

    for (_, member) in plan.pending_shortcuts() {
        if organized.contains(&member.id) {
            continue;
        }
        destinations.entry(destination(member)).or_default().push(member.id);
    }

    let mut histories: BTreeMap<(String, String), Vec<&str>> = BTreeMap::new();
    for chain in plan.archived_chains() {
        let Some(archive_rel) = chain.archive_path.as_deref() else {
            continue;
        };
        let archive_dir = scope_path::normalize(archive_rel);
        for member in chain.members.iter().filter(|m| !m.is_current) {
            destinations
                .entry((
                    archive_dir.clone(),
                    file_service::sanitize_filename(&member.proposed_version_name),
                ))
                .or_default()
                .push(member.record_id);
        }
        histories
            .entry((archive_dir, history_file(chain)))
            .or_default()
            .push(&chain.chain_name);
    }

    for ((dir, name), chains) in &histories {
        if chains.len() > 1 {
            problems.push(format!(
                "version history conflict: chains {} all write {}",
                chains.join(", "),
                scope_path::join(dir, name)
            ));
        }
    }

    for ((dir, name), ids) in &destinations {
        if ids.len() > 1 {
            let listed = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
            problems.push(format!(
                "path conflict: {} files target {} (records {listed})",
                ids.len(),
                scope_path::join(dir, name)
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(problems))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DryRunPreview {
    pub directories_to_create: usize,
    pub files_to_process: usize,
    pub shortcuts_to_create: usize,
    pub version_archives_to_create: usize,
    pub total_operations: usize,
}

pub fn dry_run_preview(plan: &ExecutionPlan) -> DryRunPreview {
    let directories_to_create = plan.directories.len();
    let files_to_process = plan.records.len();
    let shortcuts_to_create = plan.pending_shortcuts().count();
    let version_archives_to_create = plan.archived_chains().count();
    DryRunPreview {
        directories_to_create,
        files_to_process,
        shortcuts_to_create,
        version_archives_to_create,
        total_operations: directories_to_create
            + files_to_process
            + shortcuts_to_create
            + version_archives_to_create,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub manifest_id: String,
    pub manifest_path: String,
    pub statistics: ManifestStatistics,
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Execution steps
// ---------------------------------------------------------------------------

pub fn clear_working_tree(config: &OrganizerConfig) -> Result<usize, AppError> {
    let removed = file_service::clear_dir(&config.working_root)?;
    tracing::info!(working_root = %config.working_root.display(), removed, "working tree cleared");
    Ok(removed)
}

pub fn create_directories(plan: &ExecutionPlan, config: &OrganizerConfig, manifest: &mut Manifest) {
    for dir in &plan.directories {
        let Some(target) = scope_path::resolve_under(&config.working_root, &dir.path) else {
            manifest.record_error("directories", None, Some(dir.path.clone()), "path leaves the working tree");
            continue;
        };
        let target_text = target.to_string_lossy().to_string();
        match file_service::create_dir(&target) {
            Ok(()) => manifest.record(Operation::succeeded(OperationType::CreateDir, None, target_text)),
            Err(err) => {
                tracing::warn!(path = %dir.path, error = %err, "directory creation failed");
                manifest.record(Operation::failed(
                    OperationType::CreateDir,
                    None,
                    target_text.clone(),
                    err.to_string(),
                ));
                manifest.record_error("directories", None, Some(target_text), err.to_string());
            }
        }
    }
}

fn classify(record: &InventoryRecord, dest_dir: &str, dest_name: &str) -> (OperationType, bool) {
    let renamed = dest_name != record.current_name;
    let moved = dest_dir != scope_path::normalize(&record.current_path);
    match (moved, renamed) {
        (false, false) => (OperationType::Copy, false),
        (false, true) => (OperationType::Rename, false),
        (true, renamed) => (OperationType::Move, renamed),
    }
}

pub fn materialize_files(
    conn: &Connection,
    plan: &ExecutionPlan,
    config: &OrganizerConfig,
    manifest: &mut Manifest,
) {
    for record in &plan.records {
        let (dest_dir, dest_name) = destination(record);
        let (op_type, renamed) = classify(record, &dest_dir, &dest_name);
        let source = source_file(config, record);
        let target = scope_path::resolve_under(
            &config.working_root,
            &scope_path::join(&dest_dir, &dest_name),
        );
        let source_text = source.as_ref().map(|p| p.to_string_lossy().to_string());

        let result = match (&source, &target) {
            (Some(source), Some(target)) => file_service::copy_preserving_times(source, target)
                .and_then(|_| repository::mark_record_applied(conn, record.id, &dest_name, &dest_dir)),
            _ => Err(AppError::General("path leaves its tree".to_string())),
        };

        let target_text = target
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| scope_path::join(&dest_dir, &dest_name));
        match result {
            Ok(()) => {
                let mut op = Operation::succeeded(op_type, source_text, target_text).for_record(record.id);
                op.renamed = renamed;
                manifest.record(op);
            }
            Err(err) => {
                tracing::warn!(record_id = record.id, path = %record.current_path, error = %err, "file materialization failed");
                manifest.record(
                    Operation::failed(op_type, source_text.clone(), target_text, err.to_string())
                        .for_record(record.id),
                );
                manifest.record_error("materialize", Some(record.id), source_text, err.to_string());
            }
        }
    }
}

fn located(record: &InventoryRecord) -> (String, String) {
    match (record.final_path.as_deref(), record.final_name.as_deref()) {
        (Some(path), Some(name)) if record.applied => (scope_path::normalize(path), name.to_string()),
        _ => destination(record),
    }
}

/// Points `member`'s location at the primary's working-tree file and
/// records the link in the store.
fn link_member(
    conn: &Connection,
    plan: &ExecutionPlan,
    config: &OrganizerConfig,
    manifest_id: &str,
    group_id: i64,
    primary_id: i64,
    member: &InventoryRecord,
) -> Result<ShortcutEntry, AppError> {
    // re-read so a primary materialized in this run points at its new home
    let primary = repository::get_record(conn, primary_id)?
        .ok_or_else(|| AppError::NotFound(format!("primary record {primary_id}")))?;
    let (target_dir, target_name) = located(&primary);
    let (link_dir, link_name) = destination(member);
    let target = scope_path::resolve_under(
        &config.working_root,
        &scope_path::join(&target_dir, &target_name),
    )
    .ok_or_else(|| AppError::General("shortcut target leaves the working tree".to_string()))?;
    let link = scope_path::resolve_under(&config.working_root, &scope_path::join(&link_dir, &link_name))
        .ok_or_else(|| AppError::General("shortcut location leaves the working tree".to_string()))?;

    let (link_path, kind) = shortcut_service::create_shortcut(&target, &link, config.shortcut_kind)?;
    let entry = ShortcutEntry {
        record_id: member.id,
        group_id,
        link_path: link_path.to_string_lossy().to_string(),
        target_path: target.to_string_lossy().to_string(),
        kind: kind.to_string(),
    };
    repository::set_member_shortcut(conn, group_id, member.id, true, Some(&entry.target_path))?;
    repository::insert_shortcut_file(conn, &plan.job_id, manifest_id, &entry)?;
    Ok(entry)
}

pub fn create_shortcuts(
    conn: &Connection,
    plan: &ExecutionPlan,
    config: &OrganizerConfig,
    manifest: &mut Manifest,
) {
    let shortcuts: Vec<(i64, i64, InventoryRecord)> = plan
        .pending_shortcuts()
        .map(|(group, member)| (group.id, group.primary_id, member.clone()))
        .collect();

    for (group_id, primary_id, member) in shortcuts {
        let result = link_member(conn, plan, config, &manifest.manifest_id, group_id, primary_id, &member);

        match result {
            Ok(entry) => {
                manifest.record(
                    Operation::succeeded(
                        OperationType::CreateShortcut,
                        Some(entry.target_path.clone()),
                        entry.link_path.clone(),
                    )
                    .for_record(member.id),
                );
                manifest.record_shortcut(entry);
            }
            Err(err) => {
                tracing::warn!(record_id = member.id, group_id, error = %err, "shortcut creation failed");
                let path = scope_path::join(&member.current_path, &member.current_name);
                manifest.record(
                    Operation::failed(OperationType::CreateShortcut, None, path.clone(), err.to_string())
                        .for_record(member.id),
                );
                manifest.record_error("shortcuts", Some(member.id), Some(path), err.to_string());
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct VersionHistoryEntry {
    version: i64,
    file: String,
    date: Option<String>,
    status: String,
}

fn archive_chain(
    conn: &Connection,
    chain: &VersionChain,
    archive_rel: &str,
    config: &OrganizerConfig,
    manifest: &mut Manifest,
) -> Result<usize, AppError> {
    let archive_dir = scope_path::resolve_under(&config.working_root, archive_rel)
        .ok_or_else(|| AppError::General(format!("archive path leaves the working tree: {archive_rel}")))?;
    file_service::create_dir(&archive_dir)?;

    let mut archived = 0;
    let mut versions = Vec::with_capacity(chain.members.len());
    let mut current_file = None;
    for member in &chain.members {
        let record = repository::get_record(conn, member.record_id)?
            .ok_or_else(|| AppError::NotFound(format!("record {}", member.record_id)))?;

        if member.is_current {
            let (dir, name) = located(&record);
            let file = scope_path::join(&dir, &name);
            current_file = Some(file.clone());
            versions.push(VersionHistoryEntry {
                version: member.version_number,
                file,
                date: member.version_date.map(|d| d.to_string()),
                status: member.status.to_string(),
            });
            continue;
        }

        let archive_name = file_service::sanitize_filename(&member.proposed_version_name);
        let target = archive_dir.join(&archive_name);
        let working_copy = match (record.applied, record.final_path.as_deref(), record.final_name.as_deref()) {
            (true, Some(path), Some(name)) => {
                scope_path::resolve_under(&config.working_root, &scope_path::join(path, name))
                    .filter(|p| p.is_file())
            }
            _ => None,
        };
        let source = working_copy.or_else(|| source_file(config, &record));
        let source_text = source.as_ref().map(|p| p.to_string_lossy().to_string());
        let target_text = target.to_string_lossy().to_string();

        let copied = match &source {
            Some(source) => file_service::copy_preserving_times(source, &target).map(|_| ()),
            None => Err(AppError::General("source path leaves the source tree".to_string())),
        };
        match copied {
            Ok(()) => {
                archived += 1;
                manifest.record(
                    Operation::succeeded(OperationType::ArchiveVersion, source_text, target_text)
                        .for_record(record.id),
                );
            }
            Err(err) => {
                tracing::warn!(record_id = record.id, chain = %chain.chain_name, error = %err, "version archive copy failed");
                manifest.record(
                    Operation::failed(OperationType::ArchiveVersion, source_text.clone(), target_text, err.to_string())
                        .for_record(record.id),
                );
                manifest.record_error("archives", Some(record.id), source_text, err.to_string());
            }
        }
        versions.push(VersionHistoryEntry {
            version: member.version_number,
            file: archive_name,
            date: member.version_date.map(|d| d.to_string()),
            status: member.status.to_string(),
        });
    }

    let history = serde_json::json!({
        "document_name": chain.chain_name,
        "current_version": chain.current().map(|m| m.version_number),
        "current_file": current_file,
        "archive_path": archive_rel,
        "archive_strategy": chain.archive_strategy.to_string(),
        "versions": versions,
        "generated_at": Utc::now().to_rfc3339(),
    });
    fs::write(archive_dir.join(history_file(chain)), serde_json::to_string_pretty(&history)?)?;
    Ok(archived)
}

pub fn build_version_archives(
    conn: &Connection,
    plan: &ExecutionPlan,
    config: &OrganizerConfig,
    manifest: &mut Manifest,
) {
    for chain in plan.archived_chains() {
        let Some(archive_rel) = chain.archive_path.as_deref() else {
            continue;
        };
        match archive_chain(conn, chain, archive_rel, config, manifest) {
            Ok(archived) => {
                tracing::debug!(chain = %chain.chain_name, archived, "version archive built");
            }
            Err(err) => {
                tracing::error!(chain = %chain.chain_name, error = %err, "version archive failed");
                manifest.record_error("archives", None, Some(archive_rel.to_string()), err.to_string());
            }
        }
    }
}

/// Loads and validates the plan for `job_id`.
pub fn prepare(conn: &Connection, config: &OrganizerConfig, job_id: &str) -> Result<ExecutionPlan, AppError> {
    let plan = ExecutionPlan::load(conn, job_id)?;
    validate_plan(&plan, config)?;
    Ok(plan)
}

/// Applies the plan to the working tree and writes the manifest.
/// `prior_phase` is where rollback returns the job to.
pub fn execute(
    conn: &Connection,
    config: &OrganizerConfig,
    job_id: &str,
    prior_phase: JobPhase,
) -> Result<ExecutionReport, AppError> {
    let plan = prepare(conn, config, job_id)?;

    let mut manifest = Manifest::new(
        job_id,
        &config.source_root.to_string_lossy(),
        &config.working_root.to_string_lossy(),
        prior_phase,
    );
    manifest.snapshot_records(plan.records.iter().map(RecordSnapshot::from).collect());
    manifest.snapshot_members(repository::member_snapshots(conn, job_id)?);

    clear_working_tree(config)?;
    create_directories(&plan, config, &mut manifest);
    materialize_files(conn, &plan, config, &mut manifest);
    create_shortcuts(conn, &plan, config, &mut manifest);
    build_version_archives(conn, &plan, config, &mut manifest);

    let path = manifest_service::write_manifest(conn, &config.reports_root, &manifest)?;
    let statistics = manifest.statistics();
    tracing::info!(
        job_id,
        manifest_id = %manifest.manifest_id,
        directories = statistics.directories_created,
        files = statistics.total_files,
        shortcuts = statistics.shortcuts_created,
        archives = statistics.version_archives,
        errors = statistics.errors,
        "execution complete"
    );
    repository::insert_processing_log(
        conn,
        job_id,
        STAGE,
        "execution_completed",
        &serde_json::json!({
            "manifest_id": manifest.manifest_id,
            "statistics": statistics,
        }),
        statistics.errors == 0,
    )?;

    Ok(ExecutionReport {
        manifest_id: manifest.manifest_id.clone(),
        manifest_path: path.to_string_lossy().to_string(),
        errors: manifest.errors().iter().map(|e| e.message.clone()).collect(),
        statistics,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub manifest_id: String,
    pub records_restored: usize,
    pub shortcuts_removed: usize,
    pub phase: JobPhase,
}

/// Undoes an execution: empties the working tree and restores the store to
/// the snapshot taken before it ran. The source tree is never touched.
pub fn rollback(
    conn: &Connection,
    config: &OrganizerConfig,
    manifest_id: &str,
) -> Result<RollbackReport, AppError> {
    let row = repository::get_manifest(conn, manifest_id)?
        .ok_or_else(|| AppError::NotFound(format!("manifest {manifest_id}")))?;
    if row.rolled_back {
        return Err(AppError::General(format!(
            "manifest {manifest_id} was already rolled back"
        )));
    }
    let manifest = manifest_service::load_manifest(conn, manifest_id)?;

    let working_root = Path::new(&manifest.working_root);
    safety::validate_working_root(working_root, &config.source_root)?;
    file_service::clear_dir(working_root)?;

    let tx = conn.unchecked_transaction()?;
    for snapshot in manifest.prior_state() {
        repository::restore_record(&tx, snapshot)?;
    }
    for member in manifest.prior_members() {
        repository::set_member_shortcut(
            &tx,
            member.group_id,
            member.record_id,
            member.shortcut_created,
            member.shortcut_target_path.as_deref(),
        )?;
    }
    let shortcuts_removed = repository::delete_shortcut_files(&tx, manifest_id)?;
    repository::reset_job_phase(&tx, &manifest.job_id, manifest.prior_job_phase)?;
    repository::mark_manifest_rolled_back(&tx, manifest_id)?;
    repository::insert_processing_log(
        &tx,
        &manifest.job_id,
        STAGE,
        "rollback_completed",
        &serde_json::json!({"manifest_id": manifest_id, "records_restored": manifest.prior_state().len()}),
        true,
    )?;
    tx.commit()?;

    tracing::info!(job_id = %manifest.job_id, manifest_id, "execution rolled back");
    Ok(RollbackReport {
        manifest_id: manifest_id.to_string(),
        records_restored: manifest.prior_state().len(),
        shortcuts_removed,
        phase: manifest.prior_job_phase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShortcutKind;
    use crate::data::repository::tests::{new_record, seed_job, setup_db};
    use crate::data::repository::HashBucket;
    use crate::models::decision::DecisionSource;
    use crate::models::duplicate::{GroupDecision, MemberDecision};
    use crate::models::inventory::RecordStatus;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        conn: Connection,
        config: OrganizerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = OrganizerConfig::default();
            config.source_root = dir.path().join("source");
            config.working_root = dir.path().join("working");
            config.reports_root = dir.path().join("reports");
            config.shortcut_kind = ShortcutKind::Url;
            fs::create_dir_all(&config.source_root).unwrap();
            let conn = setup_db();
            seed_job(&conn, "job");
            Self { _dir: dir, conn, config }
        }

        fn source(&self, dir: &str, name: &str, body: &str) -> i64 {
            let path = self.config.source_root.join(dir.trim_start_matches('/'));
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join(name), body).unwrap();
            repository::insert_record(&self.conn, &new_record("job", dir, name, &format!("h-{dir}-{name}"))).unwrap()
        }

        fn propose(&self, id: i64, name: Option<&str>, path: Option<&str>) {
            repository::set_record_proposal(&self.conn, id, name, path, &[], None).unwrap();
        }

        fn working(&self, rel: &str) -> PathBuf {
            self.config.working_root.join(rel)
        }
    }

    fn shortcut_group(conn: &Connection, primary: i64, dup: i64) {
        let bucket = HashBucket {
            content_hash: "same".into(),
            file_count: 2,
            total_size_bytes: 100_000,
        };
        let decision = GroupDecision {
            primary_id: primary,
            reasoning: None,
            decisions: vec![
                MemberDecision {
                    record_id: primary,
                    action: DuplicateAction::KeepPrimary,
                    reasoning: "best".into(),
                },
                MemberDecision {
                    record_id: dup,
                    action: DuplicateAction::Shortcut,
                    reasoning: "copy".into(),
                },
            ],
        };
        repository::upsert_duplicate_group(conn, "job", &bucket, &decision, DecisionSource::Heuristic).unwrap();
    }

    #[test]
    fn validation_collects_conflicts_and_bad_names() {
        let fx = Fixture::new();
        let a = fx.source("/a", "one.txt", "1");
        let b = fx.source("/b", "two.txt", "2");
        let c = fx.source("/c", "three.txt", "3");
        let missing = repository::insert_record(&fx.conn, &new_record("job", "/gone", "x.txt", "hx")).unwrap();
        fx.propose(a, Some("same.txt"), Some("/Docs"));
        fx.propose(b, Some("same.txt"), Some("/Docs/"));
        fx.propose(c, Some("bad|name.txt"), Some("/../escape"));
        fx.propose(missing, None, None);

        let plan = ExecutionPlan::load(&fx.conn, "job").unwrap();
        let Err(AppError::Validation(problems)) = validate_plan(&plan, &fx.config) else {
            panic!("expected validation failure");
        };
        assert!(problems.iter().any(|p| p.contains("path conflict: 2 files target /Docs/same.txt")));
        assert!(problems.iter().any(|p| p.contains("invalid file name") && p.contains("bad|name.txt")));
        assert!(problems.iter().any(|p| p.contains("leaves the working tree")));
        assert!(problems.iter().any(|p| p.contains("source file not found") && p.contains("x.txt")));
    }

    #[test]
    fn validation_rejects_working_root_inside_source() {
        let mut fx = Fixture::new();
        fx.config.working_root = fx.config.source_root.join("out");
        let plan = ExecutionPlan::load(&fx.conn, "job").unwrap();
        assert!(matches!(validate_plan(&plan, &fx.config), Err(AppError::Validation(_))));
    }

    #[test]
    fn shortcut_locations_count_as_destinations() {
        let fx = Fixture::new();
        let primary = fx.source("/A", "Report.docx", "r");
        let dup = fx.source("/B", "Report.docx", "r");
        let other = fx.source("/C", "Other.docx", "o");
        shortcut_group(&fx.conn, primary, dup);
        fx.propose(primary, None, None);
        fx.propose(other, Some("Report.docx"), Some("/B"));

        let plan = ExecutionPlan::load(&fx.conn, "job").unwrap();
        let err = validate_plan(&plan, &fx.config).unwrap_err();
        assert!(err.to_string().contains("/B/Report.docx"));
    }

    #[test]
    fn dry_run_counts_without_touching_disk() {
        let fx = Fixture::new();
        let primary = fx.source("/A", "Report.docx", "r");
        let dup = fx.source("/B", "Report.docx", "r");
        shortcut_group(&fx.conn, primary, dup);
        fx.propose(primary, Some("Quarterly.docx"), Some("/Reports"));
        repository::upsert_directory(
            &fx.conn,
            "job",
            &PlannedDirectory {
                path: "/Reports".into(),
                folder_name: "Reports".into(),
                parent_path: None,
                depth: 1,
                purpose: None,
            },
            &[],
            &[],
        )
        .unwrap();

        let plan = prepare(&fx.conn, &fx.config, "job").unwrap();
        let preview = dry_run_preview(&plan);
        assert_eq!(
            preview,
            DryRunPreview {
                directories_to_create: 1,
                files_to_process: 1,
                shortcuts_to_create: 1,
                version_archives_to_create: 0,
                total_operations: 3,
            }
        );
        assert!(!fx.config.working_root.exists());
    }

    #[test]
    fn execute_then_rollback_round_trip() {
        let fx = Fixture::new();
        let primary = fx.source("/A", "Report.docx", "report body");
        let dup = fx.source("/B", "Report.docx", "report body");
        let plain = fx.source("/Notes", "todo.txt", "todo");
        shortcut_group(&fx.conn, primary, dup);
        fx.propose(primary, Some("Quarterly Report.docx"), Some("/Reports"));
        fx.propose(plain, None, None);
        fs::create_dir_all(fx.working("stale")).unwrap();
        repository::transition_job(&fx.conn, "job", JobPhase::Approved, None).unwrap();

        let report = execute(&fx.conn, &fx.config, "job", JobPhase::Approved).unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.statistics.total_files, 2);
        assert_eq!(report.statistics.files_moved, 1);
        assert_eq!(report.statistics.files_renamed, 1);
        assert_eq!(report.statistics.files_copied, 1);
        assert_eq!(report.statistics.shortcuts_created, 1);

        assert!(!fx.working("stale").exists());
        assert_eq!(
            fs::read_to_string(fx.working("Reports/Quarterly Report.docx")).unwrap(),
            "report body"
        );
        assert!(fx.working("Notes/todo.txt").is_file());
        let link = fs::read_to_string(fx.working("B/Report.docx.url")).unwrap();
        assert!(link.contains("Quarterly Report.docx"));
        assert!(Path::new(&report.manifest_path).is_file());

        let applied = repository::get_record(&fx.conn, primary).unwrap().unwrap();
        assert_eq!(applied.status, RecordStatus::Applied);
        assert_eq!(applied.final_path.as_deref(), Some("/Reports"));
        let groups = repository::list_duplicate_groups(&fx.conn, "job").unwrap();
        assert!(groups[0].members.iter().any(|m| m.shortcut_created));

        let rolled = rollback(&fx.conn, &fx.config, &report.manifest_id).unwrap();
        assert_eq!(rolled.records_restored, 2);
        assert_eq!(rolled.shortcuts_removed, 1);
        assert_eq!(rolled.phase, JobPhase::Approved);

        assert_eq!(fs::read_dir(&fx.config.working_root).unwrap().count(), 0);
        assert!(fx.config.source_root.join("A/Report.docx").is_file());
        let restored = repository::get_record(&fx.conn, primary).unwrap().unwrap();
        assert_eq!(restored.status, RecordStatus::Organized);
        assert!(!restored.applied);
        assert_eq!(restored.final_path, None);
        let groups = repository::list_duplicate_groups(&fx.conn, "job").unwrap();
        assert!(groups[0].members.iter().all(|m| !m.shortcut_created));
        assert_eq!(
            repository::get_job(&fx.conn, "job").unwrap().unwrap().phase,
            JobPhase::Approved
        );

        assert!(rollback(&fx.conn, &fx.config, &report.manifest_id).is_err());
    }

    #[test]
    fn missing_source_during_execution_is_record_level() {
        let fx = Fixture::new();
        let keep = fx.source("/", "keep.txt", "k");
        let vanish = fx.source("/", "vanish.txt", "v");
        fx.propose(keep, None, None);
        fx.propose(vanish, None, None);
        let plan = prepare(&fx.conn, &fx.config, "job").unwrap();
        fs::remove_file(fx.config.source_root.join("vanish.txt")).unwrap();

        let mut manifest = Manifest::new("job", "/s", "/w", JobPhase::Approved);
        clear_working_tree(&fx.config).unwrap();
        materialize_files(&fx.conn, &plan, &fx.config, &mut manifest);

        assert_eq!(manifest.errors().len(), 1);
        assert_eq!(manifest.errors()[0].record_id, Some(vanish));
        assert!(fx.working("keep.txt").is_file());
        let record = repository::get_record(&fx.conn, vanish).unwrap().unwrap();
        assert!(!record.applied);
    }

    /// Chains `ids` (oldest first, newest current) the way the versioning
    /// stage would.
    fn insert_chain(fx: &Fixture, base_name: &str, directory: &str, ids: &[i64]) -> VersionChain {
        use crate::models::version::DetectionMethod;
        use crate::services::version_service::{build_chain, CandidateGroup, VersionCandidate};

        let members: Vec<VersionCandidate> = ids
            .iter()
            .map(|id| VersionCandidate::new(repository::get_record(&fx.conn, *id).unwrap().unwrap()))
            .collect();
        let group = CandidateGroup {
            base_name: base_name.into(),
            directory: directory.into(),
            extension: members[0].record.extension.clone(),
            members: members.clone(),
            method: DetectionMethod::ExplicitMarker,
        };
        let chain = build_chain("job", &group, &members, ids.len() - 1, &fx.config, None);
        repository::insert_version_chain(&fx.conn, &chain).unwrap();
        chain
    }

    #[test]
    fn version_archive_copies_superseded_members_and_history() {
        let fx = Fixture::new();
        let v1 = fx.source("/Finance", "Budget_v1.xlsx", "one");
        let v2 = fx.source("/Finance", "Budget_v2.xlsx", "two");
        fx.propose(v2, Some("Budget.xlsx"), None);
        insert_chain(&fx, "Budget", "/Finance", &[v1, v2]);

        let report = execute(&fx.conn, &fx.config, "job", JobPhase::Approved).unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.statistics.version_archives, 1);

        let archive = fx.working("Finance/_versions/Budget");
        assert_eq!(fs::read_to_string(archive.join("Budget_v1.xlsx")).unwrap(), "one");
        let history: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(archive.join("_version_history.json")).unwrap()).unwrap();
        assert_eq!(history["document_name"], "Budget");
        assert_eq!(history["current_version"], 2);
        assert_eq!(history["current_file"], "/Finance/Budget.xlsx");
        assert_eq!(history["versions"][0]["file"], "Budget_v1.xlsx");
        assert_eq!(history["archive_strategy"], "subfolder");
    }

    #[test]
    fn repeated_version_labels_archive_every_member() {
        let fx = Fixture::new();
        let v1 = fx.source("/Finance", "Budget_v1.xlsx", "one");
        let v1_final = fx.source("/Finance", "Budget_v1_final.xlsx", "one final");
        let v2 = fx.source("/Finance", "Budget_v2.xlsx", "two");
        fx.propose(v2, Some("Budget.xlsx"), None);
        insert_chain(&fx, "Budget", "/Finance", &[v1, v1_final, v2]);

        let report = execute(&fx.conn, &fx.config, "job", JobPhase::Approved).unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.statistics.version_archives, 2);

        let archive = fx.working("Finance/_versions/Budget");
        let mut files: Vec<String> = fs::read_dir(&archive)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        assert_eq!(files, ["Budget_v1.xlsx", "Budget_v1_2.xlsx", "_version_history.json"]);
        assert_eq!(fs::read_to_string(archive.join("Budget_v1_2.xlsx")).unwrap(), "one final");
    }

    #[test]
    fn validation_flags_archive_name_collisions() {
        let fx = Fixture::new();
        let v1 = fx.source("/Finance", "Budget_v1.xlsx", "one");
        let v1_final = fx.source("/Finance", "Budget_v1_final.xlsx", "one final");
        let v2 = fx.source("/Finance", "Budget_v2.xlsx", "two");
        fx.propose(v2, Some("Budget.xlsx"), None);
        let chain = insert_chain(&fx, "Budget", "/Finance", &[v1, v1_final, v2]);

        // force a clash past build_chain
        let mut plan = ExecutionPlan::load(&fx.conn, "job").unwrap();
        plan.chains = vec![chain];
        plan.chains[0].members[1].proposed_version_name = "Budget_v1.xlsx".into();

        let Err(AppError::Validation(problems)) = validate_plan(&plan, &fx.config) else {
            panic!("expected validation failure");
        };
        assert!(problems
            .iter()
            .any(|p| p.contains("path conflict: 2 files target /Finance/_versions/Budget/Budget_v1.xlsx")));
    }

    #[test]
    fn inline_chains_in_one_folder_keep_separate_histories() {
        let mut fx = Fixture::new();
        fx.config.archive_strategy = ArchiveStrategy::Inline;
        let b1 = fx.source("/Finance", "Budget_v1.xlsx", "b1");
        let b2 = fx.source("/Finance", "Budget_v2.xlsx", "b2");
        let p1 = fx.source("/Finance", "Plan_v1.xlsx", "p1");
        let p2 = fx.source("/Finance", "Plan_v2.xlsx", "p2");
        fx.propose(b2, Some("Budget.xlsx"), None);
        fx.propose(p2, Some("Plan.xlsx"), None);
        insert_chain(&fx, "Budget", "/Finance", &[b1, b2]);
        insert_chain(&fx, "Plan", "/Finance", &[p1, p2]);

        let report = execute(&fx.conn, &fx.config, "job", JobPhase::Approved).unwrap();
        assert!(report.errors.is_empty(), "{:?}", report.errors);

        let finance = fx.working("Finance");
        for (file, document) in [
            ("_Budget_version_history.json", "Budget"),
            ("_Plan_version_history.json", "Plan"),
        ] {
            let history: serde_json::Value =
                serde_json::from_str(&fs::read_to_string(finance.join(file)).unwrap()).unwrap();
            assert_eq!(history["document_name"], document);
            assert_eq!(history["archive_strategy"], "inline");
        }
        assert!(!finance.join("_version_history.json").exists());
        assert_eq!(fs::read_to_string(finance.join("Budget_v1.xlsx")).unwrap(), "b1");
        assert_eq!(fs::read_to_string(finance.join("Plan.xlsx")).unwrap(), "p2");
    }
}
