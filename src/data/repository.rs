use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::AppError;
use crate::models::decision::DecisionSource;
use crate::models::duplicate::{DuplicateAction, DuplicateGroup, DuplicateMember, GroupDecision};
use crate::models::inventory::{InventoryRecord, NewInventoryRecord, RecordSnapshot, RecordStatus};
use crate::models::job::{JobPhase, JobReport, ProcessingJob};
use crate::models::manifest::{MemberSnapshot, ShortcutEntry};
use crate::models::plan::{NamingSchema, PlannedDirectory, TagTaxonomy};
use crate::models::version::{ChainMember, VersionChain, VersionStatus};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

const JOB_COLUMNS: &str = "id, source_root, working_root, phase, status_message, error, progress_percent, created_at, updated_at, completed_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessingJob> {
    let phase: String = row.get(3)?;
    Ok(ProcessingJob {
        id: row.get(0)?,
        source_root: row.get(1)?,
        working_root: row.get(2)?,
        phase: phase.parse().unwrap_or(JobPhase::Failed),
        status_message: row.get(4)?,
        error: row.get(5)?,
        progress_percent: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

pub fn insert_job(conn: &Connection, job: &ProcessingJob) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO processing_jobs (id, source_root, working_root, phase, status_message, error, progress_percent, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            job.id,
            job.source_root,
            job.working_root,
            job.phase.to_string(),
            job.status_message,
            job.error,
            job.progress_percent,
            job.created_at,
            job.updated_at,
            job.completed_at,
        ],
    )?;
    Ok(())
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<ProcessingJob>, AppError> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM processing_jobs WHERE id = ?1"),
            params![job_id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

pub fn require_job(conn: &Connection, job_id: &str) -> Result<ProcessingJob, AppError> {
    get_job(conn, job_id)?.ok_or_else(|| AppError::NotFound(format!("job {job_id}")))
}

/// Moves a job to `phase`, enforcing the state machine.
pub fn transition_job(
    conn: &Connection,
    job_id: &str,
    phase: JobPhase,
    message: Option<&str>,
) -> Result<(), AppError> {
    let job = require_job(conn, job_id)?;
    if !job.phase.can_transition_to(phase) {
        return Err(AppError::InvalidTransition {
            from: job.phase,
            to: phase,
        });
    }
    write_job_phase(conn, job_id, phase, message, None)
}

/// Writes a phase unconditionally. Only rollback uses this, to re-open a
/// completed job.
pub fn reset_job_phase(conn: &Connection, job_id: &str, phase: JobPhase) -> Result<(), AppError> {
    conn.execute(
        "UPDATE processing_jobs SET phase = ?2, error = NULL, completed_at = NULL, updated_at = ?3 WHERE id = ?1",
        params![job_id, phase.to_string(), Utc::now()],
    )?;
    Ok(())
}

pub fn fail_job(conn: &Connection, job_id: &str, error: &str) -> Result<(), AppError> {
    let job = require_job(conn, job_id)?;
    if job.phase.is_terminal() {
        return Ok(());
    }
    write_job_phase(conn, job_id, JobPhase::Failed, None, Some(error))
}

fn write_job_phase(
    conn: &Connection,
    job_id: &str,
    phase: JobPhase,
    message: Option<&str>,
    error: Option<&str>,
) -> Result<(), AppError> {
    let now = Utc::now();
    let completed_at: Option<DateTime<Utc>> = phase.is_terminal().then_some(now);
    let progress = phase_progress(phase);
    conn.execute(
        "UPDATE processing_jobs
         SET phase = ?2, status_message = ?3, error = COALESCE(?4, error), progress_percent = ?5, updated_at = ?6, completed_at = ?7
         WHERE id = ?1",
        params![job_id, phase.to_string(), message, error, progress, now, completed_at],
    )?;
    Ok(())
}

fn phase_progress(phase: JobPhase) -> u8 {
    use crate::models::job::PHASE_SEQUENCE;
    match phase {
        JobPhase::Failed | JobPhase::Cancelled => 0,
        _ => {
            let idx = PHASE_SEQUENCE.iter().position(|p| *p == phase).unwrap_or(0);
            ((idx * 100) / (PHASE_SEQUENCE.len() - 1)) as u8
        }
    }
}

// ---------------------------------------------------------------------------
// Inventory records
// ---------------------------------------------------------------------------

const RECORD_COLUMNS: &str = "id, job_id, current_path, current_name, extension, size_bytes, content_hash, modified_at, summary, document_type, key_topics, is_deleted, status, proposed_name, proposed_path, proposed_tags, organization_reasoning, final_name, final_path, applied, applied_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryRecord> {
    let topics: String = row.get(10)?;
    let status: String = row.get(12)?;
    let tags: String = row.get(15)?;
    Ok(InventoryRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        current_path: row.get(2)?,
        current_name: row.get(3)?,
        extension: row.get(4)?,
        size_bytes: row.get(5)?,
        content_hash: row.get(6)?,
        modified_at: row.get(7)?,
        summary: row.get(8)?,
        document_type: row.get(9)?,
        key_topics: serde_json::from_str(&topics).unwrap_or_default(),
        is_deleted: row.get(11)?,
        status: status.parse().unwrap_or(RecordStatus::Discovered),
        proposed_name: row.get(13)?,
        proposed_path: row.get(14)?,
        proposed_tags: serde_json::from_str(&tags).unwrap_or_default(),
        organization_reasoning: row.get(16)?,
        final_name: row.get(17)?,
        final_path: row.get(18)?,
        applied: row.get(19)?,
        applied_at: row.get(20)?,
    })
}

fn query_records(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<InventoryRecord>, AppError> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(args, record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn insert_record(conn: &Connection, record: &NewInventoryRecord) -> Result<i64, AppError> {
    let topics = serde_json::to_string(&record.key_topics)?;
    let status = if record.summary.is_some() {
        RecordStatus::Processed
    } else {
        RecordStatus::Discovered
    };
    conn.execute(
        "INSERT INTO inventory_records (job_id, current_path, current_name, extension, size_bytes, content_hash, modified_at, summary, document_type, key_topics, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.job_id,
            crate::scope_path::normalize(&record.current_path),
            record.current_name,
            record.extension.as_deref().map(|e| e.trim_start_matches('.').to_lowercase()),
            record.size_bytes,
            record.content_hash,
            record.modified_at,
            record.summary,
            record.document_type,
            topics,
            status.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_record(conn: &Connection, id: i64) -> Result<Option<InventoryRecord>, AppError> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM inventory_records WHERE id = ?1"),
            params![id],
            record_from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_records(conn: &Connection, job_id: &str) -> Result<Vec<InventoryRecord>, AppError> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM inventory_records
             WHERE job_id = ?1 AND is_deleted = 0 ORDER BY id"
        ),
        params![job_id],
    )
}

pub fn count_hashed_records(conn: &Connection, job_id: &str) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM inventory_records WHERE job_id = ?1 AND content_hash IS NOT NULL AND is_deleted = 0",
        params![job_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub struct HashBucket {
    pub content_hash: String,
    pub file_count: i64,
    pub total_size_bytes: i64,
}

/// Hashes shared by at least `min_group_size` live records of at least
/// `min_size_bytes`, largest total size first.
pub fn find_duplicate_hashes(
    conn: &Connection,
    job_id: &str,
    min_size_bytes: i64,
    min_group_size: usize,
) -> Result<Vec<HashBucket>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT content_hash, COUNT(*) AS file_count, SUM(size_bytes) AS total_size
         FROM inventory_records
         WHERE job_id = ?1 AND content_hash IS NOT NULL AND is_deleted = 0 AND size_bytes >= ?2
         GROUP BY content_hash
         HAVING COUNT(*) >= ?3
         ORDER BY total_size DESC, content_hash",
    )?;
    let buckets = stmt
        .query_map(params![job_id, min_size_bytes, min_group_size as i64], |row| {
            Ok(HashBucket {
                content_hash: row.get(0)?,
                file_count: row.get(1)?,
                total_size_bytes: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(buckets)
}

/// Members of one hash bucket, most recently modified first, unknown
/// modification times last.
pub fn records_by_hash(
    conn: &Connection,
    job_id: &str,
    content_hash: &str,
    min_size_bytes: i64,
) -> Result<Vec<InventoryRecord>, AppError> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM inventory_records
             WHERE job_id = ?1 AND content_hash = ?2 AND is_deleted = 0 AND size_bytes >= ?3
             ORDER BY modified_at IS NULL, modified_at DESC, id"
        ),
        params![job_id, content_hash, min_size_bytes],
    )
}

/// Records the planner should see: not soft-deleted, not a shortcut
/// duplicate, not a superseded version. Pairs each with its chain name.
pub fn planner_candidates(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<(InventoryRecord, Option<String>)>, AppError> {
    let columns = RECORD_COLUMNS
        .split(", ")
        .map(|c| format!("d.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {columns}, vc.chain_name
         FROM inventory_records d
         LEFT JOIN version_chain_members vcm ON vcm.record_id = d.id
         LEFT JOIN version_chains vc ON vc.id = vcm.chain_id
         WHERE d.job_id = ?1
           AND d.is_deleted = 0
           AND d.status IN ('discovered', 'processed', 'organized')
           AND NOT EXISTS (
               SELECT 1 FROM duplicate_members dm
               JOIN duplicate_groups dg ON dg.id = dm.group_id
               WHERE dm.record_id = d.id AND dm.action = 'shortcut' AND dg.job_id = ?1
           )
           AND (vcm.id IS NULL OR vcm.status = 'active')
         ORDER BY d.current_path, d.current_name"
    ))?;
    let rows = stmt
        .query_map(params![job_id], |row| {
            Ok((record_from_row(row)?, row.get::<_, Option<String>>(21)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Hashed, live records not yet claimed by a shortcut decision or a chain.
pub fn version_candidates(conn: &Connection, job_id: &str) -> Result<Vec<InventoryRecord>, AppError> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM inventory_records d
             WHERE d.job_id = ?1
               AND d.content_hash IS NOT NULL
               AND d.is_deleted = 0
               AND NOT EXISTS (
                   SELECT 1 FROM duplicate_members dm
                   JOIN duplicate_groups dg ON dg.id = dm.group_id
                   WHERE dm.record_id = d.id AND dm.action = 'shortcut' AND dg.job_id = ?1
               )
               AND NOT EXISTS (
                   SELECT 1 FROM version_chain_members vcm WHERE vcm.record_id = d.id
               )
             ORDER BY d.current_path, d.current_name, d.id"
        ),
        params![job_id],
    )
}

pub fn set_record_proposal(
    conn: &Connection,
    record_id: i64,
    proposed_name: Option<&str>,
    proposed_path: Option<&str>,
    proposed_tags: &[String],
    reasoning: Option<&str>,
) -> Result<(), AppError> {
    let tags = serde_json::to_string(proposed_tags)?;
    conn.execute(
        "UPDATE inventory_records
         SET proposed_name = ?2, proposed_path = ?3, proposed_tags = ?4, organization_reasoning = ?5, status = 'organized'
         WHERE id = ?1",
        params![record_id, proposed_name, proposed_path, tags, reasoning],
    )?;
    Ok(())
}

/// Records scheduled for materialization.
pub fn list_organized_records(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<InventoryRecord>, AppError> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM inventory_records
             WHERE job_id = ?1 AND is_deleted = 0 AND status IN ('organized', 'applied')
             ORDER BY id"
        ),
        params![job_id],
    )
}

pub fn mark_record_applied(
    conn: &Connection,
    record_id: i64,
    final_name: &str,
    final_path: &str,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE inventory_records
         SET final_name = ?2, final_path = ?3, applied = 1, applied_at = ?4, status = 'applied'
         WHERE id = ?1",
        params![record_id, final_name, final_path, Utc::now()],
    )?;
    Ok(())
}

pub fn restore_record(conn: &Connection, snapshot: &RecordSnapshot) -> Result<(), AppError> {
    conn.execute(
        "UPDATE inventory_records
         SET final_name = ?2, final_path = ?3, applied = ?4, applied_at = ?5, status = ?6
         WHERE id = ?1",
        params![
            snapshot.record_id,
            snapshot.final_name,
            snapshot.final_path,
            snapshot.applied,
            snapshot.applied_at,
            snapshot.status.to_string(),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Duplicate groups
// ---------------------------------------------------------------------------

/// Replaces any earlier decision for the same hash in this job.
pub fn upsert_duplicate_group(
    conn: &Connection,
    job_id: &str,
    bucket: &HashBucket,
    decision: &GroupDecision,
    decided_by: DecisionSource,
) -> Result<i64, AppError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO duplicate_groups (job_id, content_hash, file_count, total_size_bytes, primary_id, decided_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (job_id, content_hash) DO UPDATE SET
             file_count = excluded.file_count,
             total_size_bytes = excluded.total_size_bytes,
             primary_id = excluded.primary_id,
             decided_by = excluded.decided_by",
        params![
            job_id,
            bucket.content_hash,
            bucket.file_count,
            bucket.total_size_bytes,
            decision.primary_id,
            decided_by.to_string(),
        ],
    )?;
    let group_id: i64 = tx.query_row(
        "SELECT id FROM duplicate_groups WHERE job_id = ?1 AND content_hash = ?2",
        params![job_id, bucket.content_hash],
        |row| row.get(0),
    )?;
    tx.execute(
        "DELETE FROM duplicate_members WHERE group_id = ?1",
        params![group_id],
    )?;
    for member in &decision.decisions {
        tx.execute(
            "INSERT INTO duplicate_members (group_id, record_id, is_primary, action, reasoning)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group_id,
                member.record_id,
                member.record_id == decision.primary_id,
                member.action.to_string(),
                member.reasoning,
            ],
        )?;
    }
    tx.commit()?;
    Ok(group_id)
}

fn duplicate_members(conn: &Connection, group_id: i64) -> Result<Vec<DuplicateMember>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_id, is_primary, action, reasoning, shortcut_created, shortcut_target_path
         FROM duplicate_members WHERE group_id = ?1 ORDER BY id",
    )?;
    let members = stmt
        .query_map(params![group_id], |row| {
            let action: String = row.get(2)?;
            Ok(DuplicateMember {
                record_id: row.get(0)?,
                is_primary: row.get(1)?,
                action: action.parse().unwrap_or(DuplicateAction::KeepBoth),
                reasoning: row.get(3)?,
                shortcut_created: row.get(4)?,
                shortcut_target_path: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

pub fn list_duplicate_groups(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<DuplicateGroup>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, content_hash, file_count, total_size_bytes, primary_id, decided_by
         FROM duplicate_groups WHERE job_id = ?1 ORDER BY total_size_bytes DESC, id",
    )?;
    let headers = stmt
        .query_map(params![job_id], |row| {
            let decided_by: String = row.get(6)?;
            Ok(DuplicateGroup {
                id: row.get(0)?,
                job_id: row.get(1)?,
                content_hash: row.get(2)?,
                file_count: row.get(3)?,
                total_size_bytes: row.get(4)?,
                primary_id: row.get(5)?,
                decided_by: decided_by.parse().unwrap_or(DecisionSource::Heuristic),
                members: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups = Vec::with_capacity(headers.len());
    for mut group in headers {
        group.members = duplicate_members(conn, group.id)?;
        groups.push(group);
    }
    Ok(groups)
}

pub fn shortcut_record_ids(conn: &Connection, job_id: &str) -> Result<HashSet<i64>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT dm.record_id FROM duplicate_members dm
         JOIN duplicate_groups dg ON dg.id = dm.group_id
         WHERE dg.job_id = ?1 AND dm.action = 'shortcut'",
    )?;
    let ids = stmt
        .query_map(params![job_id], |row| row.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

pub fn set_member_shortcut(
    conn: &Connection,
    group_id: i64,
    record_id: i64,
    created: bool,
    target_path: Option<&str>,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE duplicate_members SET shortcut_created = ?3, shortcut_target_path = ?4
         WHERE group_id = ?1 AND record_id = ?2",
        params![group_id, record_id, created, target_path],
    )?;
    Ok(())
}

pub fn member_snapshots(conn: &Connection, job_id: &str) -> Result<Vec<MemberSnapshot>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT dm.group_id, dm.record_id, dm.shortcut_created, dm.shortcut_target_path
         FROM duplicate_members dm
         JOIN duplicate_groups dg ON dg.id = dm.group_id
         WHERE dg.job_id = ?1 ORDER BY dm.id",
    )?;
    let snapshots = stmt
        .query_map(params![job_id], |row| {
            Ok(MemberSnapshot {
                group_id: row.get(0)?,
                record_id: row.get(1)?,
                shortcut_created: row.get(2)?,
                shortcut_target_path: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(snapshots)
}

// ---------------------------------------------------------------------------
// Version chains
// ---------------------------------------------------------------------------

pub fn insert_version_chain(conn: &Connection, chain: &VersionChain) -> Result<i64, AppError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO version_chains (job_id, chain_name, base_path, extension, current_index, detection_method, confidence, archive_strategy, archive_path, reasoning)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            chain.job_id,
            chain.chain_name,
            chain.base_path,
            chain.extension,
            chain.current_index as i64,
            chain.detection_method.to_string(),
            chain.confidence,
            chain.archive_strategy.to_string(),
            chain.archive_path,
            chain.reasoning,
        ],
    )?;
    let chain_id = tx.last_insert_rowid();
    for member in &chain.members {
        tx.execute(
            "INSERT INTO version_chain_members (chain_id, record_id, version_number, version_label, version_date, is_current, status, proposed_version_name, proposed_version_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chain_id,
                member.record_id,
                member.version_number,
                member.version_label,
                member.version_date,
                member.is_current,
                member.status.to_string(),
                member.proposed_version_name,
                member.proposed_version_path,
            ],
        )?;
    }
    tx.commit()?;
    Ok(chain_id)
}

fn chain_members(conn: &Connection, chain_id: i64) -> Result<Vec<ChainMember>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT record_id, version_number, version_label, version_date, is_current, status, proposed_version_name, proposed_version_path
         FROM version_chain_members WHERE chain_id = ?1 ORDER BY version_number",
    )?;
    let members = stmt
        .query_map(params![chain_id], |row| {
            let status: String = row.get(5)?;
            Ok(ChainMember {
                record_id: row.get(0)?,
                version_number: row.get(1)?,
                version_label: row.get(2)?,
                version_date: row.get::<_, Option<NaiveDate>>(3)?,
                is_current: row.get(4)?,
                status: status.parse().unwrap_or(VersionStatus::Active),
                proposed_version_name: row.get(6)?,
                proposed_version_path: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}

pub fn list_version_chains(conn: &Connection, job_id: &str) -> Result<Vec<VersionChain>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, chain_name, base_path, extension, current_index, detection_method, confidence, archive_strategy, archive_path, reasoning
         FROM version_chains WHERE job_id = ?1 ORDER BY id",
    )?;
    let headers = stmt
        .query_map(params![job_id], |row| {
            let method: String = row.get(6)?;
            let strategy: String = row.get(8)?;
            let current_index: i64 = row.get(5)?;
            Ok(VersionChain {
                id: row.get(0)?,
                job_id: row.get(1)?,
                chain_name: row.get(2)?,
                base_path: row.get(3)?,
                extension: row.get(4)?,
                members: Vec::new(),
                current_index: current_index.max(0) as usize,
                detection_method: method
                    .parse()
                    .unwrap_or(crate::models::version::DetectionMethod::ExplicitMarker),
                confidence: row.get(7)?,
                archive_strategy: strategy
                    .parse()
                    .unwrap_or(crate::config::ArchiveStrategy::Subfolder),
                archive_path: row.get(9)?,
                reasoning: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut chains = Vec::with_capacity(headers.len());
    for mut chain in headers {
        chain.members = chain_members(conn, chain.id)?;
        chains.push(chain);
    }
    Ok(chains)
}

// ---------------------------------------------------------------------------
// Organization plan
// ---------------------------------------------------------------------------

/// Inserts a schema, retiring the previous active one for the same type.
pub fn insert_naming_schema(
    conn: &Connection,
    job_id: &str,
    schema: &NamingSchema,
) -> Result<i64, AppError> {
    let placeholders = serde_json::to_string(&schema.placeholders)?;
    conn.execute(
        "UPDATE naming_schemas SET is_active = 0
         WHERE job_id = ?1 AND document_type = ?2 AND is_active = 1",
        params![job_id, schema.document_type],
    )?;
    conn.execute(
        "INSERT INTO naming_schemas (job_id, document_type, pattern, example, description, placeholders, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            job_id,
            schema.document_type,
            schema.pattern,
            schema.example,
            schema.description,
            placeholders,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn active_naming_schemas(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<NamingSchema>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT document_type, pattern, example, description, placeholders
         FROM naming_schemas WHERE job_id = ?1 AND is_active = 1 ORDER BY document_type",
    )?;
    let schemas = stmt
        .query_map(params![job_id], |row| {
            let placeholders: String = row.get(4)?;
            Ok(NamingSchema {
                document_type: row.get(0)?,
                pattern: row.get(1)?,
                example: row.get(2)?,
                description: row.get(3)?,
                placeholders: serde_json::from_str(&placeholders).unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(schemas)
}

/// Writes the arena parents-first so every parent id exists when a child
/// row references it. Returns the number of tags written.
pub fn upsert_tag_taxonomy(
    conn: &Connection,
    job_id: &str,
    taxonomy: &TagTaxonomy,
) -> Result<usize, AppError> {
    let tx = conn.unchecked_transaction()?;
    let mut row_ids: Vec<Option<i64>> = vec![None; taxonomy.len()];
    let mut pending: Vec<usize> = taxonomy
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, node)| node.parent.is_none())
        .map(|(idx, _)| idx)
        .collect();

    let mut written = 0;
    while let Some(idx) = pending.pop() {
        let node = &taxonomy.nodes()[idx];
        let parent_id = node.parent.and_then(|p| row_ids[p]);
        tx.execute(
            "INSERT INTO tag_taxonomy (job_id, tag_name, parent_tag_id, description, color, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT (job_id, tag_name) DO UPDATE SET
                 parent_tag_id = excluded.parent_tag_id,
                 description = excluded.description,
                 color = excluded.color,
                 is_active = 1",
            params![job_id, node.name, parent_id, node.description, node.color],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM tag_taxonomy WHERE job_id = ?1 AND tag_name = ?2",
            params![job_id, node.name],
            |row| row.get(0),
        )?;
        row_ids[idx] = Some(id);
        written += 1;
        pending.extend(node.children.iter().copied());
    }
    tx.commit()?;
    Ok(written)
}

pub fn upsert_directory(
    conn: &Connection,
    job_id: &str,
    directory: &PlannedDirectory,
    expected_types: &[String],
    expected_tags: &[String],
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO directory_structure (job_id, path, folder_name, parent_path, depth, purpose, expected_types, expected_tags, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
         ON CONFLICT (job_id, path) DO UPDATE SET
             purpose = excluded.purpose,
             expected_types = excluded.expected_types,
             expected_tags = excluded.expected_tags,
             is_active = 1",
        params![
            job_id,
            directory.path,
            directory.folder_name,
            directory.parent_path,
            directory.depth as i64,
            directory.purpose,
            serde_json::to_string(expected_types)?,
            serde_json::to_string(expected_tags)?,
        ],
    )?;
    Ok(())
}

/// Active directories, shallowest first.
pub fn list_directories(conn: &Connection, job_id: &str) -> Result<Vec<PlannedDirectory>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT path, folder_name, parent_path, depth, purpose
         FROM directory_structure WHERE job_id = ?1 AND is_active = 1
         ORDER BY depth, path",
    )?;
    let dirs = stmt
        .query_map(params![job_id], |row| {
            let depth: i64 = row.get(3)?;
            Ok(PlannedDirectory {
                path: row.get(0)?,
                folder_name: row.get(1)?,
                parent_path: row.get(2)?,
                depth: depth.max(0) as usize,
                purpose: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(dirs)
}

// ---------------------------------------------------------------------------
// Shortcuts and manifests
// ---------------------------------------------------------------------------

pub fn insert_shortcut_file(
    conn: &Connection,
    job_id: &str,
    manifest_id: &str,
    entry: &ShortcutEntry,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO shortcut_files (job_id, manifest_id, group_id, record_id, link_path, target_path, kind)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            job_id,
            manifest_id,
            entry.group_id,
            entry.record_id,
            entry.link_path,
            entry.target_path,
            entry.kind,
        ],
    )?;
    Ok(())
}

pub fn delete_shortcut_files(conn: &Connection, manifest_id: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM shortcut_files WHERE manifest_id = ?1",
        params![manifest_id],
    )?;
    Ok(count)
}

pub fn insert_manifest(
    conn: &Connection,
    manifest_id: &str,
    job_id: &str,
    path: &str,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO manifests (id, job_id, path) VALUES (?1, ?2, ?3)",
        params![manifest_id, job_id, path],
    )?;
    Ok(())
}

pub struct ManifestRow {
    pub id: String,
    pub job_id: String,
    pub path: String,
    pub rolled_back: bool,
}

pub fn get_manifest(conn: &Connection, manifest_id: &str) -> Result<Option<ManifestRow>, AppError> {
    let row = conn
        .query_row(
            "SELECT id, job_id, path, rolled_back FROM manifests WHERE id = ?1",
            params![manifest_id],
            |row| {
                Ok(ManifestRow {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    path: row.get(2)?,
                    rolled_back: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn latest_manifest_for_job(
    conn: &Connection,
    job_id: &str,
) -> Result<Option<ManifestRow>, AppError> {
    let row = conn
        .query_row(
            "SELECT id, job_id, path, rolled_back FROM manifests
             WHERE job_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![job_id],
            |row| {
                Ok(ManifestRow {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    path: row.get(2)?,
                    rolled_back: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn mark_manifest_rolled_back(conn: &Connection, manifest_id: &str) -> Result<(), AppError> {
    conn.execute(
        "UPDATE manifests SET rolled_back = 1 WHERE id = ?1",
        params![manifest_id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Processing log and reports
// ---------------------------------------------------------------------------

pub fn insert_processing_log(
    conn: &Connection,
    job_id: &str,
    stage: &str,
    action: &str,
    details: &serde_json::Value,
    success: bool,
) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO processing_log (job_id, stage, action, details, success) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, stage, action, serde_json::to_string(details)?, success],
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct ProcessingLogEntry {
    pub stage: String,
    pub action: String,
    pub details: serde_json::Value,
    pub success: bool,
}

pub fn list_processing_log(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<ProcessingLogEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT stage, action, details, success FROM processing_log WHERE job_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![job_id], |row| {
            let details: Option<String> = row.get(2)?;
            Ok(ProcessingLogEntry {
                stage: row.get(0)?,
                action: row.get(1)?,
                details: details
                    .and_then(|d| serde_json::from_str(&d).ok())
                    .unwrap_or(serde_json::Value::Null),
                success: row.get(3)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(entries)
}

pub fn job_report(conn: &Connection, job_id: &str) -> Result<JobReport, AppError> {
    let count = |sql: &str| -> Result<i64, AppError> {
        Ok(conn.query_row(sql, params![job_id], |row| row.get(0))?)
    };
    let job = get_job(conn, job_id)?;
    Ok(JobReport {
        job_id: job_id.to_string(),
        phase: job.map(|j| j.phase),
        total_files: count(
            "SELECT COUNT(*) FROM inventory_records WHERE job_id = ?1 AND is_deleted = 0",
        )?,
        duplicate_groups: count("SELECT COUNT(*) FROM duplicate_groups WHERE job_id = ?1")?,
        shortcuts_planned: count(
            "SELECT COUNT(*) FROM duplicate_members dm JOIN duplicate_groups dg ON dg.id = dm.group_id
             WHERE dg.job_id = ?1 AND dm.action = 'shortcut'",
        )?,
        version_chains: count("SELECT COUNT(*) FROM version_chains WHERE job_id = ?1")?,
        superseded_versions: count(
            "SELECT COUNT(*) FROM version_chain_members vcm JOIN version_chains vc ON vc.id = vcm.chain_id
             WHERE vc.job_id = ?1 AND vcm.status = 'superseded'",
        )?,
        directories_planned: count(
            "SELECT COUNT(*) FROM directory_structure WHERE job_id = ?1 AND is_active = 1",
        )?,
        pending_changes: count(
            "SELECT COUNT(*) FROM inventory_records
             WHERE job_id = ?1 AND is_deleted = 0 AND applied = 0
               AND (proposed_name IS NOT NULL OR proposed_path IS NOT NULL)",
        )?,
        latest_manifest_id: latest_manifest_for_job(conn, job_id)?
            .filter(|row| !row.rolled_back)
            .map(|row| row.id),
    })
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
