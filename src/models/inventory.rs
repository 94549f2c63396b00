use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Discovered,
    Processed,
    Organized,
    Applied,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Processed => write!(f, "processed"),
            Self::Organized => write!(f, "organized"),
            Self::Applied => write!(f, "applied"),
        }
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "processed" => Ok(Self::Processed),
            "organized" => Ok(Self::Organized),
            "applied" => Ok(Self::Applied),
            _ => Err(format!("unknown record status: {s}")),
        }
    }
}

/// What the indexer hands over for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewInventoryRecord {
    pub job_id: String,
    /// Directory relative to the source root, `/`-rooted.
    pub current_path: String,
    pub current_name: String,
    pub extension: Option<String>,
    pub size_bytes: i64,
    pub content_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub document_type: Option<String>,
    pub key_topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: i64,
    pub job_id: String,
    pub current_path: String,
    pub current_name: String,
    pub extension: Option<String>,
    pub size_bytes: i64,
    pub content_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub document_type: Option<String>,
    pub key_topics: Vec<String>,
    pub is_deleted: bool,
    pub status: RecordStatus,
    pub proposed_name: Option<String>,
    pub proposed_path: Option<String>,
    pub proposed_tags: Vec<String>,
    pub organization_reasoning: Option<String>,
    pub final_name: Option<String>,
    pub final_path: Option<String>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl InventoryRecord {
    /// `current_path/current_name`, relative to the source root.
    pub fn full_path(&self) -> String {
        crate::scope_path::join(&self.current_path, &self.current_name)
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        match self.current_name.rfind('.') {
            Some(idx) if idx > 0 => &self.current_name[..idx],
            _ => &self.current_name,
        }
    }

    pub fn destination_path(&self) -> &str {
        self.proposed_path.as_deref().unwrap_or(&self.current_path)
    }

    pub fn destination_name(&self) -> &str {
        self.proposed_name.as_deref().unwrap_or(&self.current_name)
    }
}

/// Pre-execution values of the fields execution writes. Stored in the
/// manifest so rollback restores exactly these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record_id: i64,
    pub status: RecordStatus,
    pub final_name: Option<String>,
    pub final_path: Option<String>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

impl From<&InventoryRecord> for RecordSnapshot {
    fn from(record: &InventoryRecord) -> Self {
        Self {
            record_id: record.id,
            status: record.status,
            final_name: record.final_name.clone(),
            final_path: record.final_path.clone(),
            applied: record.applied,
            applied_at: record.applied_at,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(id: i64, path: &str, name: &str) -> InventoryRecord {
    InventoryRecord {
        id,
        job_id: "job".to_string(),
        current_path: path.to_string(),
        current_name: name.to_string(),
        extension: name.rsplit_once('.').map(|(_, ext)| ext.to_string()),
        size_bytes: 20_480,
        content_hash: None,
        modified_at: None,
        summary: None,
        document_type: None,
        key_topics: Vec::new(),
        is_deleted: false,
        status: RecordStatus::Processed,
        proposed_name: None,
        proposed_path: None,
        proposed_tags: Vec::new(),
        organization_reasoning: None,
        final_name: None,
        final_path: None,
        applied: false,
        applied_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_only_last_extension() {
        assert_eq!(sample_record(1, "/", "archive.tar.gz").stem(), "archive.tar");
        assert_eq!(sample_record(1, "/", "Makefile").stem(), "Makefile");
        assert_eq!(sample_record(1, "/", ".env").stem(), ".env");
    }

    #[test]
    fn destination_falls_back_to_current_location() {
        let mut record = sample_record(1, "/Projects", "plan.docx");
        assert_eq!(record.destination_path(), "/Projects");
        record.proposed_name = Some("Plan 2024.docx".to_string());
        assert_eq!(record.destination_name(), "Plan 2024.docx");
        assert_eq!(record.full_path(), "/Projects/plan.docx");
    }
}
