use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::inventory::RecordSnapshot;
use crate::models::job::JobPhase;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    CreateDir,
    Copy,
    Rename,
    Move,
    CreateShortcut,
    ArchiveVersion,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDir => write!(f, "create_dir"),
            Self::Copy => write!(f, "copy"),
            Self::Rename => write!(f, "rename"),
            Self::Move => write!(f, "move"),
            Self::CreateShortcut => write!(f, "create_shortcut"),
            Self::ArchiveVersion => write!(f, "archive_version"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_dir" => Ok(Self::CreateDir),
            "copy" => Ok(Self::Copy),
            "rename" => Ok(Self::Rename),
            "move" => Ok(Self::Move),
            "create_shortcut" => Ok(Self::CreateShortcut),
            "archive_version" => Ok(Self::ArchiveVersion),
            _ => Err(format!("unknown operation type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub source: Option<String>,
    pub target: String,
    pub record_id: Option<i64>,
    /// A move that also changed the file name.
    #[serde(default)]
    pub renamed: bool,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    pub fn succeeded(op_type: OperationType, source: Option<String>, target: String) -> Self {
        Self {
            op_type,
            source,
            target,
            record_id: None,
            renamed: false,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        op_type: OperationType,
        source: Option<String>,
        target: String,
        error: String,
    ) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::succeeded(op_type, source, target)
        }
    }

    pub fn for_record(mut self, record_id: i64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    fn is_file_operation(&self) -> bool {
        matches!(
            self.op_type,
            OperationType::Copy | OperationType::Rename | OperationType::Move
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutEntry {
    pub record_id: i64,
    pub group_id: i64,
    pub link_path: String,
    pub target_path: String,
    /// `symlink`, `url` or `desktop`.
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestError {
    pub stage: String,
    pub record_id: Option<i64>,
    pub path: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Pre-execution shortcut flags of one duplicate member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub group_id: i64,
    pub record_id: i64,
    pub shortcut_created: bool,
    pub shortcut_target_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStatistics {
    pub total_files: usize,
    pub directories_created: usize,
    pub files_copied: usize,
    pub files_renamed: usize,
    pub files_moved: usize,
    pub shortcuts_created: usize,
    pub version_archives: usize,
    pub errors: usize,
}

/// Append-only log of what one execution did. Statistics are derived from
/// the log, never stored alongside it in memory.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub manifest_id: String,
    pub job_id: String,
    pub executed_at: DateTime<Utc>,
    pub source_root: String,
    pub working_root: String,
    pub prior_job_phase: JobPhase,
    #[serde(default)]
    operations: Vec<Operation>,
    #[serde(default)]
    shortcuts: Vec<ShortcutEntry>,
    #[serde(default)]
    errors: Vec<ManifestError>,
    #[serde(default)]
    prior_state: Vec<RecordSnapshot>,
    #[serde(default)]
    prior_members: Vec<MemberSnapshot>,
}

impl Manifest {
    pub fn new(job_id: &str, source_root: &str, working_root: &str, prior_job_phase: JobPhase) -> Self {
        Self {
            manifest_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            executed_at: Utc::now(),
            source_root: source_root.to_string(),
            working_root: working_root.to_string(),
            prior_job_phase,
            operations: Vec::new(),
            shortcuts: Vec::new(),
            errors: Vec::new(),
            prior_state: Vec::new(),
            prior_members: Vec::new(),
        }
    }

    pub fn record(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn record_shortcut(&mut self, entry: ShortcutEntry) {
        self.shortcuts.push(entry);
    }

    pub fn record_error(
        &mut self,
        stage: &str,
        record_id: Option<i64>,
        path: Option<String>,
        message: impl Into<String>,
    ) {
        self.errors.push(ManifestError {
            stage: stage.to_string(),
            record_id,
            path,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn snapshot_records(&mut self, snapshots: Vec<RecordSnapshot>) {
        self.prior_state.extend(snapshots);
    }

    pub fn snapshot_members(&mut self, snapshots: Vec<MemberSnapshot>) {
        self.prior_members.extend(snapshots);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn shortcuts(&self) -> &[ShortcutEntry] {
        &self.shortcuts
    }

    pub fn errors(&self) -> &[ManifestError] {
        &self.errors
    }

    pub fn prior_state(&self) -> &[RecordSnapshot] {
        &self.prior_state
    }

    pub fn prior_members(&self) -> &[MemberSnapshot] {
        &self.prior_members
    }

    pub fn statistics(&self) -> ManifestStatistics {
        self.operations
            .iter()
            .fold(ManifestStatistics::default(), |mut stats, op| {
                if op.is_file_operation() {
                    stats.total_files += 1;
                }
                if op.success {
                    match op.op_type {
                        OperationType::CreateDir => stats.directories_created += 1,
                        OperationType::Copy => stats.files_copied += 1,
                        OperationType::Rename => stats.files_renamed += 1,
                        OperationType::Move => {
                            stats.files_moved += 1;
                            if op.renamed {
                                stats.files_renamed += 1;
                            }
                        }
                        OperationType::CreateShortcut => stats.shortcuts_created += 1,
                        OperationType::ArchiveVersion => stats.version_archives += 1,
                    }
                }
                stats
            })
            .with_errors(self.errors.len())
    }
}

impl ManifestStatistics {
    fn with_errors(mut self, errors: usize) -> Self {
        self.errors = errors;
        self
    }
}

#[derive(Serialize)]
struct ManifestView<'a> {
    manifest_version: u32,
    manifest_id: &'a str,
    job_id: &'a str,
    executed_at: &'a DateTime<Utc>,
    source_root: &'a str,
    working_root: &'a str,
    prior_job_phase: JobPhase,
    statistics: ManifestStatistics,
    operations: &'a [Operation],
    shortcuts: &'a [ShortcutEntry],
    errors: &'a [ManifestError],
    prior_state: &'a [RecordSnapshot],
    prior_members: &'a [MemberSnapshot],
}

impl Serialize for Manifest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ManifestView {
            manifest_version: MANIFEST_VERSION,
            manifest_id: &self.manifest_id,
            job_id: &self.job_id,
            executed_at: &self.executed_at,
            source_root: &self.source_root,
            working_root: &self.working_root,
            prior_job_phase: self.prior_job_phase,
            statistics: self.statistics(),
            operations: &self.operations,
            shortcuts: &self.shortcuts,
            errors: &self.errors,
            prior_state: &self.prior_state,
            prior_members: &self.prior_members,
        }
        .serialize(serializer)
    }
}
