use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::Connection;
use serde::Serialize;

use crate::data::repository;
use crate::error::AppError;
use crate::models::inventory::InventoryRecord;
use crate::models::plan::{
    DirectorySpec, FileAssignment, NamingSchema, OrganizationPlan, PlannedDirectory, TagTaxonomy,
};
use crate::pipeline::{StageContext, StageReport};
use crate::scope_path;
use crate::services::decision_service::{extract_json_payload, DecisionService};
use crate::services::retry;

const STAGE: &str = "organizing";
const MAX_SUMMARY_CHARS: usize = 300;
const MAX_TOPICS: usize = 5;
const MAX_PROMPT_DIRECTORIES: usize = 50;
const AUTO_ASSIGNED_TAG: &str = "uncategorized";
const AUTO_ASSIGNED_REASONING: &str = "Auto-assigned: file was not in the planner response";
const AUTO_CREATED_PURPOSE: &str = "Auto-created for file assignment";

pub const PLANNER_SYSTEM_PROMPT: &str = "You are an expert document management consultant specializing in file organization, naming conventions, and taxonomy design.\n\
\n\
Create a practical organization system that groups related files by purpose and project, uses consistent naming conventions, builds a navigable directory hierarchy and assigns tags for filtering.\n\
\n\
Rules:\n\
1. Every file must appear in file_assignments.\n\
2. When uncertain, keep the original location and name (proposed_name and proposed_path null).\n\
3. Unknown file types go to /_Uncategorized with their original names.\n\
4. Tag names are lowercase with hyphens, at most 3 levels deep.\n\
5. Directory paths start with / and stay within the allowed depth.\n\
\n\
Respond with ONLY valid JSON.";

/// Produces an organization plan for a job's inventory. Implementations
/// return the raw JSON object; validation happens on this side.
#[async_trait]
pub trait OrganizationPlanner: Send + Sync {
    async fn plan(&self, request: &PlanningRequest) -> Result<serde_json::Value, AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannerFile {
    pub id: i64,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_chain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanningRequest {
    pub job_id: String,
    pub files: Vec<PlannerFile>,
    /// Every directory holding a file, plus its ancestors, sorted.
    pub current_directories: Vec<String>,
    /// `(extension, count)`, most common first.
    pub type_distribution: Vec<(String, usize)>,
    pub max_directory_depth: usize,
}

fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        let head: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
        format!("{head}...")
    } else {
        summary.to_string()
    }
}

impl PlannerFile {
    pub fn from_record(record: &InventoryRecord, version_chain: Option<String>) -> Self {
        Self {
            id: record.id,
            name: record.current_name.clone(),
            path: record.current_path.clone(),
            extension: record.extension.clone(),
            size_bytes: record.size_bytes,
            summary: record
                .summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(truncate_summary),
            document_type: record.document_type.clone(),
            topics: record.key_topics.iter().take(MAX_TOPICS).cloned().collect(),
            version_chain,
        }
    }
}

pub fn build_request(
    job_id: &str,
    candidates: &[(InventoryRecord, Option<String>)],
    max_directory_depth: usize,
) -> PlanningRequest {
    let files: Vec<PlannerFile> = candidates
        .iter()
        .map(|(record, chain)| PlannerFile::from_record(record, chain.clone()))
        .collect();

    let mut directories: Vec<String> = files
        .iter()
        .flat_map(|f| scope_path::with_ancestors(&f.path))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    directories.sort();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for file in &files {
        let ext = file.extension.clone().unwrap_or_else(|| "unknown".to_string());
        *counts.entry(ext).or_default() += 1;
    }
    let mut type_distribution: Vec<(String, usize)> = counts.into_iter().collect();
    type_distribution.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    PlanningRequest {
        job_id: job_id.to_string(),
        files,
        current_directories: directories,
        type_distribution,
        max_directory_depth,
    }
}

pub fn render_prompt(request: &PlanningRequest) -> Result<String, AppError> {
    let inventory = serde_json::to_string_pretty(&request.files)?;

    let mut directories = request
        .current_directories
        .iter()
        .take(MAX_PROMPT_DIRECTORIES)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    if request.current_directories.len() > MAX_PROMPT_DIRECTORIES {
        directories.push_str(&format!(
            "\n... and {} more directories",
            request.current_directories.len() - MAX_PROMPT_DIRECTORIES
        ));
    }
    if directories.is_empty() {
        directories.push('/');
    }

    let distribution = request
        .type_distribution
        .iter()
        .map(|(ext, count)| format!("- {ext}: {count} files"))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!(
        "Analyze this file collection and create an organization system.\n\
\n\
## FILE INVENTORY ({file_count} files)\n\
\n\
{inventory}\n\
\n\
## CURRENT DIRECTORY STRUCTURE\n\
\n\
{directories}\n\
\n\
## FILE TYPE DISTRIBUTION\n\
\n\
{distribution}\n\
\n\
## RESPONSE FORMAT\n\
\n\
Directory paths may be at most {depth} levels deep.\n\
```json\n\
{{\n\
  \"naming_schemas\": [{{\"document_type\": \"invoice\", \"pattern\": \"{{date}}_{{vendor}}\", \"example\": \"2024-01-15_acme.pdf\", \"description\": \"...\", \"placeholders\": {{\"date\": \"...\"}}}}],\n\
  \"tag_taxonomy\": {{\"finance\": {{\"description\": \"...\", \"color\": \"#00aa00\", \"children\": {{\"invoices\": {{}}}}}}}},\n\
  \"directory_structure\": [{{\"path\": \"/Finance/Invoices\", \"purpose\": \"...\", \"expected_types\": [\"pdf\"]}}],\n\
  \"file_assignments\": [{{\"file_id\": 1, \"proposed_name\": \"new_name.pdf or null\", \"proposed_path\": \"/Finance/Invoices or null\", \"proposed_tags\": [\"finance\"], \"reasoning\": \"...\"}}]\n\
}}\n\
```\n\
Every file_id from the inventory must appear in file_assignments.",
        file_count = request.files.len(),
        depth = request.max_directory_depth,
    ))
}

// ---------------------------------------------------------------------------
// Response validation
// ---------------------------------------------------------------------------

fn array_items<'a>(value: &'a serde_json::Value, key: &str) -> &'a [serde_json::Value] {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_directory(path: &str, max_depth: usize) -> String {
    if scope_path::has_traversal(path) {
        return path.trim().to_string();
    }
    scope_path::clamp_depth(path, max_depth)
}

/// Turns the planner's JSON into a plan covering exactly the requested files.
/// Missing sections default to empty, unknown or repeated assignments are
/// dropped, unassigned files keep their location, and destination
/// directories the plan forgot to declare are added.
pub fn validate_plan_response(
    value: serde_json::Value,
    files: &[PlannerFile],
    max_depth: usize,
) -> Result<OrganizationPlan, AppError> {
    if !value.is_object() {
        return Err(AppError::Planner(
            "planner response is not a JSON object".to_string(),
        ));
    }

    let naming_schemas: Vec<NamingSchema> = array_items(&value, "naming_schemas")
        .iter()
        .filter_map(|item| serde_json::from_value::<NamingSchema>(item.clone()).ok())
        .filter(|schema| !schema.document_type.trim().is_empty())
        .collect();

    let tag_taxonomy = value
        .get("tag_taxonomy")
        .map(TagTaxonomy::from_json)
        .unwrap_or_default();

    let mut directory_structure: Vec<DirectorySpec> = Vec::new();
    let mut known_dirs: HashSet<String> = HashSet::new();
    for item in array_items(&value, "directory_structure") {
        let Ok(mut spec) = serde_json::from_value::<DirectorySpec>(item.clone()) else {
            continue;
        };
        if spec.path.trim().is_empty() {
            continue;
        }
        spec.path = clean_directory(&spec.path, max_depth);
        if known_dirs.insert(spec.path.clone()) {
            directory_structure.push(spec);
        }
    }

    let file_ids: HashSet<i64> = files.iter().map(|f| f.id).collect();
    let mut assigned: HashSet<i64> = HashSet::new();
    let mut file_assignments: Vec<FileAssignment> = Vec::new();
    let mut dropped = 0usize;
    for item in array_items(&value, "file_assignments") {
        let Ok(mut assignment) = serde_json::from_value::<FileAssignment>(item.clone()) else {
            dropped += 1;
            continue;
        };
        if !file_ids.contains(&assignment.file_id) || !assigned.insert(assignment.file_id) {
            dropped += 1;
            continue;
        }
        assignment.proposed_name = clean_optional(assignment.proposed_name);
        assignment.proposed_path =
            clean_optional(assignment.proposed_path).map(|p| clean_directory(&p, max_depth));
        file_assignments.push(assignment);
    }
    if dropped > 0 {
        tracing::warn!(dropped, "planner assignments dropped (unknown, repeated or malformed)");
    }

    let missing: Vec<i64> = files
        .iter()
        .map(|f| f.id)
        .filter(|id| !assigned.contains(id))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(count = missing.len(), "files missing from planner response");
    }
    file_assignments.extend(missing.into_iter().map(|file_id| FileAssignment {
        file_id,
        proposed_name: None,
        proposed_path: None,
        proposed_tags: vec![AUTO_ASSIGNED_TAG.to_string()],
        reasoning: Some(AUTO_ASSIGNED_REASONING.to_string()),
    }));

    for assignment in &file_assignments {
        let Some(path) = assignment.proposed_path.as_deref() else {
            continue;
        };
        if path == "/" || scope_path::has_traversal(path) || known_dirs.contains(path) {
            continue;
        }
        known_dirs.insert(path.to_string());
        directory_structure.push(DirectorySpec {
            path: path.to_string(),
            purpose: Some(AUTO_CREATED_PURPOSE.to_string()),
            ..DirectorySpec::default()
        });
    }

    Ok(OrganizationPlan {
        naming_schemas,
        tag_taxonomy,
        directory_structure,
        file_assignments,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
    pub naming_schemas: usize,
    pub tags: usize,
    pub directories: usize,
    pub files_with_changes: usize,
    pub files_unchanged: usize,
}

pub fn planned_directory(spec: &DirectorySpec) -> PlannedDirectory {
    let path = scope_path::normalize(&spec.path);
    PlannedDirectory {
        folder_name: scope_path::folder_name(&path),
        parent_path: scope_path::parent(&path).filter(|p| p != "/"),
        depth: scope_path::depth(&path),
        purpose: spec.purpose.clone(),
        path,
    }
}

pub fn store_plan(
    conn: &Connection,
    job_id: &str,
    plan: &OrganizationPlan,
) -> Result<PlanSummary, AppError> {
    let mut summary = PlanSummary::default();

    for schema in &plan.naming_schemas {
        repository::insert_naming_schema(conn, job_id, schema)?;
        summary.naming_schemas += 1;
    }

    summary.tags = repository::upsert_tag_taxonomy(conn, job_id, &plan.tag_taxonomy)?;

    for spec in &plan.directory_structure {
        if scope_path::has_traversal(&spec.path) || scope_path::normalize(&spec.path) == "/" {
            continue;
        }
        repository::upsert_directory(
            conn,
            job_id,
            &planned_directory(spec),
            &spec.expected_types,
            &spec.expected_tags,
        )?;
        summary.directories += 1;
    }

    for assignment in &plan.file_assignments {
        repository::set_record_proposal(
            conn,
            assignment.file_id,
            assignment.proposed_name.as_deref(),
            assignment.proposed_path.as_deref(),
            &assignment.proposed_tags,
            assignment.reasoning.as_deref(),
        )?;
        if assignment.has_changes() {
            summary.files_with_changes += 1;
        } else {
            summary.files_unchanged += 1;
        }
    }

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Planner backed by a text completion service
// ---------------------------------------------------------------------------

/// Renders the request as a prompt, sends it to a `DecisionService` and
/// pulls the JSON object out of the reply.
pub struct ServicePlanner {
    service: Arc<dyn DecisionService>,
    attempts: usize,
}

impl ServicePlanner {
    pub fn new(service: Arc<dyn DecisionService>, attempts: usize) -> Self {
        Self { service, attempts }
    }
}

#[async_trait]
impl OrganizationPlanner for ServicePlanner {
    async fn plan(&self, request: &PlanningRequest) -> Result<serde_json::Value, AppError> {
        let prompt = render_prompt(request)?;
        tracing::info!(job_id = %request.job_id, files = request.files.len(), prompt_len = prompt.len(), "requesting organization plan");

        let text = retry::with_retry(self.attempts, "organization plan", || {
            self.service.complete(&prompt, Some(PLANNER_SYSTEM_PROMPT))
        })
        .await
        .map_err(|err| AppError::Planner(err.to_string()))?;

        let payload = extract_json_payload(&text).ok_or_else(|| {
            AppError::Planner("planner response did not contain a JSON payload".to_string())
        })?;
        serde_json::from_str(&payload)
            .map_err(|err| AppError::Planner(format!("planner response is not valid JSON: {err}")))
    }
}

pub async fn run(ctx: &StageContext) -> Result<StageReport, AppError> {
    let started = Instant::now();
    let mut report = StageReport::new(STAGE);

    let planner = ctx
        .services
        .planner
        .clone()
        .ok_or_else(|| AppError::Planner("no organization planner configured".to_string()))?;

    let candidates = ctx.with_db(|conn| repository::planner_candidates(conn, &ctx.job_id))?;
    if candidates.is_empty() {
        tracing::info!(job_id = %ctx.job_id, "no files to organize");
        report.details = serde_json::json!({"message": "No files to organize"});
        return Ok(report.finish(started));
    }

    let request = build_request(&ctx.job_id, &candidates, ctx.config.max_directory_depth);
    let raw = planner.plan(&request).await.map_err(|err| match err {
        AppError::Planner(_) => err,
        other => AppError::Planner(other.to_string()),
    })?;
    let plan = validate_plan_response(raw, &request.files, ctx.config.max_directory_depth)?;

    let summary = ctx.with_db(|conn| store_plan(conn, &ctx.job_id, &plan))?;
    report.processed = request.files.len();
    tracing::info!(
        job_id = %ctx.job_id,
        schemas = summary.naming_schemas,
        tags = summary.tags,
        directories = summary.directories,
        changed = summary.files_with_changes,
        unchanged = summary.files_unchanged,
        "organization plan stored"
    );
    let details = serde_json::to_value(&summary)?;
    ctx.log_event(STAGE, "organization_plan_stored", details.clone(), true);
    report.details = details;
    Ok(report.finish(started))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::OrganizerConfig;
    use crate::data::repository::tests::new_record;
    use crate::models::inventory::{sample_record, RecordStatus};
    use crate::pipeline::test_support::context;
    use crate::services::decision_service::tests::ScriptedService;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns a fixed plan and keeps the last request it saw.
    pub(crate) struct FixedPlanner {
        pub(crate) response: Result<serde_json::Value, String>,
        pub(crate) seen: Mutex<Option<PlanningRequest>>,
    }

    impl FixedPlanner {
        pub(crate) fn new(response: serde_json::Value) -> Self {
            Self {
                response: Ok(response),
                seen: Mutex::new(None),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl OrganizationPlanner for FixedPlanner {
        async fn plan(&self, request: &PlanningRequest) -> Result<serde_json::Value, AppError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            self.response.clone().map_err(AppError::Service)
        }
    }

    fn file(id: i64, path: &str) -> PlannerFile {
        PlannerFile::from_record(&sample_record(id, path, &format!("f{id}.pdf")), None)
    }

    #[test]
    fn request_truncates_and_collects_directories() {
        let mut record = sample_record(1, "/Finance/2024", "budget.xlsx");
        record.summary = Some("x".repeat(400));
        record.key_topics = (0..8).map(|i| format!("t{i}")).collect();
        let other = sample_record(2, "/Notes", "todo");
        let request = build_request(
            "job",
            &[(record, Some("budget".to_string())), (other, None)],
            4,
        );

        let first = &request.files[0];
        assert_eq!(first.summary.as_ref().unwrap().chars().count(), 303);
        assert_eq!(first.topics.len(), 5);
        assert_eq!(first.version_chain.as_deref(), Some("budget"));
        assert_eq!(
            request.current_directories,
            vec!["/Finance", "/Finance/2024", "/Notes"]
        );
        assert_eq!(
            request.type_distribution,
            vec![("unknown".to_string(), 1), ("xlsx".to_string(), 1)]
        );
    }

    #[test]
    fn prompt_caps_directory_listing() {
        let candidates: Vec<(InventoryRecord, Option<String>)> = (0..60)
            .map(|i| (sample_record(i, &format!("/d{i:02}"), "a.txt"), None))
            .collect();
        let prompt = render_prompt(&build_request("job", &candidates, 4)).unwrap();
        assert!(prompt.contains("## FILE INVENTORY (60 files)"));
        assert!(prompt.contains("/d49\n... and 10 more directories"));
        assert!(!prompt.contains("/d50\n"));
        assert!(prompt.contains("- txt: 60 files"));
    }

    #[test]
    fn validation_fills_gaps_and_drops_noise() {
        let files = vec![file(1, "/"), file(2, "/"), file(3, "/")];
        let plan = validate_plan_response(
            json!({
                "naming_schemas": [{"document_type": "report", "pattern": "{date}_{title}"}, {"pattern": "x"}],
                "directory_structure": [{"path": "/Reports", "purpose": "reports"}],
                "file_assignments": [
                    {"file_id": 1, "proposed_name": "q1.pdf", "proposed_path": "/Reports"},
                    {"file_id": 1, "proposed_name": "second.pdf"},
                    {"file_id": 99, "proposed_name": "ghost.pdf"},
                    {"file_id": 2, "proposed_path": "Archive/Old/"},
                    {"file_id": "bad"}
                ]
            }),
            &files,
            4,
        )
        .unwrap();

        assert_eq!(plan.naming_schemas.len(), 1);
        assert!(plan.tag_taxonomy.is_empty());
        assert_eq!(plan.file_assignments.len(), 3);
        assert_eq!(plan.file_assignments[0].proposed_name.as_deref(), Some("q1.pdf"));
        assert_eq!(plan.file_assignments[1].proposed_path.as_deref(), Some("/Archive/Old"));

        let auto = &plan.file_assignments[2];
        assert_eq!(auto.file_id, 3);
        assert!(!auto.has_changes());
        assert_eq!(auto.proposed_tags, vec!["uncategorized".to_string()]);

        let paths: Vec<&str> = plan.directory_structure.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/Reports", "/Archive/Old"]);
        assert_eq!(
            plan.directory_structure[1].purpose.as_deref(),
            Some("Auto-created for file assignment")
        );
    }

    #[test]
    fn validation_clamps_deep_directories_and_defaults_sections() {
        let files = vec![file(1, "/")];
        let plan = validate_plan_response(
            json!({
                "directory_structure": [{"path": "/a/b/c/d/e/f"}],
                "file_assignments": [{"file_id": 1, "proposed_path": "/a/b/c/d/e/f"}]
            }),
            &files,
            4,
        )
        .unwrap();
        assert_eq!(plan.directory_structure.len(), 1);
        assert_eq!(plan.directory_structure[0].path, "/a/b/c/d_e_f");
        assert_eq!(plan.file_assignments[0].proposed_path.as_deref(), Some("/a/b/c/d_e_f"));

        let err = validate_plan_response(json!(["not", "a", "plan"]), &files, 4).unwrap_err();
        assert!(matches!(err, AppError::Planner(_)));
    }

    #[tokio::test]
    async fn stage_stores_plan_and_marks_records_organized() {
        let mut ctx = context(OrganizerConfig::default());
        let (a, b) = ctx
            .with_db(|conn| {
                let a = repository::insert_record(conn, &new_record("job", "/inbox", "scan1.pdf", "h1"))?;
                let b = repository::insert_record(conn, &new_record("job", "/inbox", "notes.txt", "h2"))?;
                Ok((a, b))
            })
            .unwrap();

        let planner = Arc::new(FixedPlanner::new(json!({
            "naming_schemas": [{"document_type": "invoice", "pattern": "{date}_{vendor}"}],
            "tag_taxonomy": {"finance": {"children": {"invoices": {}}}},
            "directory_structure": [{"path": "/Finance/Invoices", "purpose": "bills"}],
            "file_assignments": [
                {"file_id": a, "proposed_name": "2024-01_acme.pdf", "proposed_path": "/Finance/Invoices", "proposed_tags": ["invoices"]}
            ]
        })));
        ctx.services.planner = Some(planner.clone());

        let report = run(&ctx).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.details["files_with_changes"], 1);
        assert_eq!(report.details["files_unchanged"], 1);
        assert_eq!(report.details["tags"], 2);

        let seen = planner.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.files.len(), 2);

        let (ra, rb, dirs) = ctx
            .with_db(|conn| {
                Ok((
                    repository::get_record(conn, a)?.unwrap(),
                    repository::get_record(conn, b)?.unwrap(),
                    repository::list_directories(conn, "job")?,
                ))
            })
            .unwrap();
        assert_eq!(ra.status, RecordStatus::Organized);
        assert_eq!(ra.proposed_path.as_deref(), Some("/Finance/Invoices"));
        assert_eq!(rb.status, RecordStatus::Organized);
        assert_eq!(rb.proposed_name, None);
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].parent_path.as_deref(), Some("/Finance"));
        assert_eq!(dirs[0].depth, 2);

        // planning again over organized records is allowed
        assert_eq!(run(&ctx).await.unwrap().processed, 2);
    }

    #[tokio::test]
    async fn planner_failures_are_phase_level() {
        let mut ctx = context(OrganizerConfig::default());
        ctx.with_db(|conn| {
            repository::insert_record(conn, &new_record("job", "/", "a.pdf", "h1"))?;
            Ok(())
        })
        .unwrap();

        let missing = run(&ctx).await.unwrap_err();
        assert!(matches!(missing, AppError::Planner(_)));

        ctx.services.planner = Some(Arc::new(FixedPlanner::failing("boom")));
        let failed = run(&ctx).await.unwrap_err();
        assert!(matches!(failed, AppError::Planner(ref msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn service_planner_extracts_json_from_reply() {
        let service = Arc::new(ScriptedService::new(vec![Ok(
            "Here is the plan:\n```json\n{\"file_assignments\": []}\n```",
        )]));
        let planner = ServicePlanner::new(service, 1);
        let request = build_request("job", &[(sample_record(1, "/", "a.txt"), None)], 4);
        let value = planner.plan(&request).await.unwrap();
        assert_eq!(value, json!({"file_assignments": []}));

        let silent = ServicePlanner::new(Arc::new(ScriptedService::new(vec![Ok("no json here")])), 1);
        assert!(matches!(silent.plan(&request).await, Err(AppError::Planner(_))));
    }
}
