use serde::{Deserialize, Serialize};

use crate::models::decision::DecisionSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    KeepPrimary,
    Shortcut,
    KeepBoth,
    /// Only ever proposed externally, and never executed automatically.
    Delete,
}

impl std::fmt::Display for DuplicateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepPrimary => write!(f, "keep_primary"),
            Self::Shortcut => write!(f, "shortcut"),
            Self::KeepBoth => write!(f, "keep_both"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for DuplicateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_primary" | "primary" => Ok(Self::KeepPrimary),
            "shortcut" => Ok(Self::Shortcut),
            "keep_both" => Ok(Self::KeepBoth),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("unknown duplicate action: {s}")),
        }
    }
}

/// First 16 characters of a content hash, for logs and prompts.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDecision {
    pub record_id: i64,
    pub action: DuplicateAction,
    pub reasoning: String,
}

/// Primary plus one decision per member, in member order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDecision {
    pub primary_id: i64,
    pub reasoning: Option<String>,
    pub decisions: Vec<MemberDecision>,
}

impl GroupDecision {
    pub fn shortcut_count(&self) -> usize {
        self.decisions
            .iter()
            .filter(|d| d.action == DuplicateAction::Shortcut)
            .count()
    }

    pub fn action_for(&self, record_id: i64) -> Option<DuplicateAction> {
        self.decisions
            .iter()
            .find(|d| d.record_id == record_id)
            .map(|d| d.action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMember {
    pub record_id: i64,
    pub is_primary: bool,
    pub action: DuplicateAction,
    pub reasoning: Option<String>,
    pub shortcut_created: bool,
    pub shortcut_target_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub id: i64,
    pub job_id: String,
    pub content_hash: String,
    pub file_count: i64,
    pub total_size_bytes: i64,
    pub primary_id: i64,
    pub decided_by: DecisionSource,
    pub members: Vec<DuplicateMember>,
}
