use serde::Serialize;

use crate::models::job::JobPhase;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Prerequisite not met: {0}")]
    Prerequisite(String),

    #[error("Decision service error: {0}")]
    Service(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: JobPhase, to: JobPhase },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    General(String),
}

impl AppError {
    /// Short label recorded with failures in the processing log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::Validation(_) => "validation",
            Self::Prerequisite(_) => "prerequisite",
            Self::Service(_) => "service",
            Self::Planner(_) => "planner",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound(_) => "not_found",
            Self::General(_) => "general",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
