use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS processing_jobs (
    id TEXT PRIMARY KEY,
    source_root TEXT NOT NULL,
    working_root TEXT NOT NULL,
    phase TEXT NOT NULL DEFAULT 'pending',
    status_message TEXT,
    error TEXT,
    progress_percent INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS inventory_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    current_path TEXT NOT NULL,
    current_name TEXT NOT NULL,
    extension TEXT,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT,
    modified_at TEXT,
    summary TEXT,
    document_type TEXT,
    key_topics TEXT NOT NULL DEFAULT '[]',
    is_deleted BOOLEAN NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'discovered',
    proposed_name TEXT,
    proposed_path TEXT,
    proposed_tags TEXT NOT NULL DEFAULT '[]',
    organization_reasoning TEXT,
    final_name TEXT,
    final_path TEXT,
    applied BOOLEAN NOT NULL DEFAULT 0,
    applied_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_records_job ON inventory_records(job_id);
CREATE INDEX IF NOT EXISTS idx_records_hash ON inventory_records(job_id, content_hash);

CREATE TABLE IF NOT EXISTS duplicate_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    file_count INTEGER NOT NULL,
    total_size_bytes INTEGER NOT NULL,
    primary_id INTEGER NOT NULL,
    decided_by TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (job_id, content_hash)
);

CREATE TABLE IF NOT EXISTS duplicate_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES duplicate_groups(id) ON DELETE CASCADE,
    record_id INTEGER NOT NULL,
    is_primary BOOLEAN NOT NULL DEFAULT 0,
    action TEXT NOT NULL,
    reasoning TEXT,
    shortcut_created BOOLEAN NOT NULL DEFAULT 0,
    shortcut_target_path TEXT,
    UNIQUE (group_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_dup_members_record ON duplicate_members(record_id);

CREATE TABLE IF NOT EXISTS version_chains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    chain_name TEXT NOT NULL,
    base_path TEXT NOT NULL,
    extension TEXT,
    current_index INTEGER NOT NULL,
    detection_method TEXT NOT NULL,
    confidence REAL NOT NULL,
    archive_strategy TEXT NOT NULL,
    archive_path TEXT,
    reasoning TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS version_chain_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id INTEGER NOT NULL REFERENCES version_chains(id) ON DELETE CASCADE,
    record_id INTEGER NOT NULL UNIQUE,
    version_number INTEGER NOT NULL,
    version_label TEXT,
    version_date TEXT,
    is_current BOOLEAN NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    proposed_version_name TEXT NOT NULL,
    proposed_version_path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS naming_schemas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    pattern TEXT NOT NULL,
    example TEXT,
    description TEXT,
    placeholders TEXT NOT NULL DEFAULT '{}',
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS tag_taxonomy (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    tag_name TEXT NOT NULL,
    parent_tag_id INTEGER REFERENCES tag_taxonomy(id),
    description TEXT,
    color TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    UNIQUE (job_id, tag_name)
);

CREATE TABLE IF NOT EXISTS directory_structure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    path TEXT NOT NULL,
    folder_name TEXT NOT NULL,
    parent_path TEXT,
    depth INTEGER NOT NULL,
    purpose TEXT,
    expected_types TEXT NOT NULL DEFAULT '[]',
    expected_tags TEXT NOT NULL DEFAULT '[]',
    is_active BOOLEAN NOT NULL DEFAULT 1,
    UNIQUE (job_id, path)
);

CREATE TABLE IF NOT EXISTS shortcut_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    manifest_id TEXT NOT NULL,
    group_id INTEGER NOT NULL,
    record_id INTEGER NOT NULL,
    link_path TEXT NOT NULL,
    target_path TEXT NOT NULL,
    kind TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS manifests (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    path TEXT NOT NULL,
    rolled_back BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS processing_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    action TEXT NOT NULL,
    details TEXT,
    success BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_processing_log_job ON processing_log(job_id, created_at DESC);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
