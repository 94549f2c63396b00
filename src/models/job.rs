use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Extracting,
    Indexing,
    Summarizing,
    Deduplicating,
    Versioning,
    Organizing,
    ReviewRequired,
    Approved,
    Executing,
    Packaging,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

/// The linear happy path. `Failed` and `Cancelled` branch off it.
pub const PHASE_SEQUENCE: &[JobPhase] = &[
    JobPhase::Pending,
    JobPhase::Extracting,
    JobPhase::Indexing,
    JobPhase::Summarizing,
    JobPhase::Deduplicating,
    JobPhase::Versioning,
    JobPhase::Organizing,
    JobPhase::ReviewRequired,
    JobPhase::Approved,
    JobPhase::Executing,
    JobPhase::Packaging,
    JobPhase::Uploading,
    JobPhase::Completed,
];

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn position(self) -> Option<usize> {
        PHASE_SEQUENCE.iter().position(|phase| *phase == self)
    }

    pub fn next(self) -> Option<JobPhase> {
        let idx = self.position()?;
        PHASE_SEQUENCE.get(idx + 1).copied()
    }

    /// Forward moves along the sequence (phases may be skipped), or into
    /// `Failed`/`Cancelled` from any non-terminal phase.
    pub fn can_transition_to(self, to: JobPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, Self::Failed | Self::Cancelled) {
            return true;
        }
        match (self.position(), to.position()) {
            (Some(from), Some(target)) => target > from,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Indexing => "indexing",
            Self::Summarizing => "summarizing",
            Self::Deduplicating => "deduplicating",
            Self::Versioning => "versioning",
            Self::Organizing => "organizing",
            Self::ReviewRequired => "review_required",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Packaging => "packaging",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "extracting" => Ok(Self::Extracting),
            "indexing" => Ok(Self::Indexing),
            "summarizing" => Ok(Self::Summarizing),
            "deduplicating" => Ok(Self::Deduplicating),
            "versioning" => Ok(Self::Versioning),
            "organizing" => Ok(Self::Organizing),
            "review_required" => Ok(Self::ReviewRequired),
            "approved" => Ok(Self::Approved),
            "executing" => Ok(Self::Executing),
            "packaging" => Ok(Self::Packaging),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown job phase: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub source_root: String,
    pub working_root: String,
    pub phase: JobPhase,
    pub status_message: Option<String>,
    pub error: Option<String>,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Review summary handed to whoever approves or declines the plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub phase: Option<JobPhase>,
    pub total_files: i64,
    pub duplicate_groups: i64,
    pub shortcuts_planned: i64,
    pub version_chains: i64,
    pub superseded_versions: i64,
    pub directories_planned: i64,
    pub pending_changes: i64,
    /// Newest manifest not rolled back, if the job has executed.
    pub latest_manifest_id: Option<String>,
}
