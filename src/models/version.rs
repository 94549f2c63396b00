use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::ArchiveStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    VersionNumber,
    RevisionNumber,
    CopyNumber,
    Date,
    DateCompact,
    Status,
}

impl MarkerKind {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::VersionNumber | Self::RevisionNumber | Self::CopyNumber
        )
    }

    pub fn is_date(self) -> bool {
        matches!(self, Self::Date | Self::DateCompact)
    }
}

impl std::fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionNumber => write!(f, "version_number"),
            Self::RevisionNumber => write!(f, "revision_number"),
            Self::CopyNumber => write!(f, "copy_number"),
            Self::Date => write!(f, "date"),
            Self::DateCompact => write!(f, "date_compact"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// A version marker recognised in a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub kind: MarkerKind,
    /// Captured value: `"3"`, `"2024-01-15"`, `"final"`.
    pub value: String,
    /// The matched text as it appeared in the stem, e.g. `"_v3"`.
    pub marker: String,
}

impl VersionMarker {
    /// Marker text without leading separators, for use in archive names.
    pub fn label(&self) -> &str {
        self.marker.trim_start_matches(['_', '-', ' '])
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        match self.kind {
            MarkerKind::Date => NaiveDate::parse_from_str(&self.value, "%Y-%m-%d").ok(),
            MarkerKind::DateCompact => NaiveDate::parse_from_str(&self.value, "%Y%m%d").ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ExplicitMarker,
    NameSimilarity,
}

impl DetectionMethod {
    pub fn confidence(self) -> f64 {
        match self {
            Self::ExplicitMarker => 0.95,
            Self::NameSimilarity => 0.75,
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExplicitMarker => write!(f, "explicit_marker"),
            Self::NameSimilarity => write!(f, "name_similarity"),
        }
    }
}

impl std::str::FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit_marker" => Ok(Self::ExplicitMarker),
            "name_similarity" => Ok(Self::NameSimilarity),
            _ => Err(format!("unknown detection method: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Active,
    Superseded,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("unknown version status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMember {
    pub record_id: i64,
    /// 1-based position in the chain, oldest first.
    pub version_number: i64,
    pub version_label: Option<String>,
    pub version_date: Option<NaiveDate>,
    pub is_current: bool,
    pub status: VersionStatus,
    pub proposed_version_name: String,
    pub proposed_version_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionChain {
    pub id: i64,
    pub job_id: String,
    pub chain_name: String,
    pub base_path: String,
    pub extension: Option<String>,
    pub members: Vec<ChainMember>,
    pub current_index: usize,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
    pub archive_strategy: ArchiveStrategy,
    pub archive_path: Option<String>,
    pub reasoning: Option<String>,
}

impl VersionChain {
    pub fn current(&self) -> Option<&ChainMember> {
        self.members.get(self.current_index)
    }

    pub fn superseded(&self) -> impl Iterator<Item = &ChainMember> {
        self.members
            .iter()
            .filter(|m| m.status == VersionStatus::Superseded)
    }
}
