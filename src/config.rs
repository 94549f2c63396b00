use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_MIN_DUPLICATE_SIZE_BYTES: i64 = 10 * 1024;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_MAX_DIRECTORY_DEPTH: usize = 4;
pub const DEFAULT_VERSION_FOLDER: &str = "_versions";
pub const DEFAULT_SEPARATE_ARCHIVE_ROOT: &str = "/Archive/Versions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStrategy {
    /// `<dir>/_versions/<base>/`
    Subfolder,
    /// Superseded versions stay next to the current one.
    Inline,
    /// `/Archive/Versions/<base>/`
    #[serde(rename = "archive", alias = "separate_archive")]
    SeparateArchive,
}

impl std::fmt::Display for ArchiveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subfolder => write!(f, "subfolder"),
            Self::Inline => write!(f, "inline"),
            Self::SeparateArchive => write!(f, "archive"),
        }
    }
}

impl std::str::FromStr for ArchiveStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subfolder" => Ok(Self::Subfolder),
            "inline" => Ok(Self::Inline),
            "archive" | "separate_archive" => Ok(Self::SeparateArchive),
            _ => Err(format!("unknown archive strategy: {s}")),
        }
    }
}

/// Whether duplicate groups are escalated to the decision service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPolicy {
    Manual,
    AutoApprove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutKind {
    Symlink,
    Url,
    Desktop,
    /// Symlink, falling back to a `.url` file.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: 120,
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

/// Run configuration. Built once, then shared read-only by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    pub source_root: PathBuf,
    pub working_root: PathBuf,
    pub reports_root: PathBuf,
    pub database_path: PathBuf,

    pub min_duplicate_size_bytes: i64,
    pub min_duplicate_group_size: usize,
    pub review_policy: ReviewPolicy,
    /// Groups larger than this are escalated under `ReviewPolicy::Manual`.
    pub escalation_group_size: usize,

    pub similarity_threshold: f64,
    pub confirm_similar_versions: bool,
    pub archive_strategy: ArchiveStrategy,
    pub version_folder_name: String,
    pub separate_archive_root: String,

    pub review_required: bool,
    pub dry_run: bool,
    pub max_directory_depth: usize,
    pub shortcut_kind: ShortcutKind,

    pub service_retry_attempts: usize,
    pub decision_concurrency: usize,

    pub logging: LoggingConfig,
    pub ollama: OllamaConfig,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        let data_root = default_data_root();
        Self {
            source_root: data_root.join("source"),
            working_root: data_root.join("working"),
            reports_root: data_root.join("reports"),
            database_path: data_root.join("docshelf.db"),
            min_duplicate_size_bytes: DEFAULT_MIN_DUPLICATE_SIZE_BYTES,
            min_duplicate_group_size: 2,
            review_policy: ReviewPolicy::Manual,
            escalation_group_size: 3,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            confirm_similar_versions: true,
            archive_strategy: ArchiveStrategy::Subfolder,
            version_folder_name: DEFAULT_VERSION_FOLDER.to_string(),
            separate_archive_root: DEFAULT_SEPARATE_ARCHIVE_ROOT.to_string(),
            review_required: true,
            dry_run: false,
            max_directory_depth: DEFAULT_MAX_DIRECTORY_DEPTH,
            shortcut_kind: ShortcutKind::Auto,
            service_retry_attempts: 3,
            decision_concurrency: 3,
            logging: LoggingConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

impl OrganizerConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Same defaults, with every data directory placed under `root`.
    pub fn with_data_root(root: &Path) -> Self {
        Self {
            source_root: root.join("source"),
            working_root: root.join("working"),
            reports_root: root.join("reports"),
            database_path: root.join("docshelf.db"),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();

        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            problems.push(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if self.min_duplicate_group_size < 2 {
            problems.push("min_duplicate_group_size must be at least 2".to_string());
        }
        if self.min_duplicate_size_bytes < 0 {
            problems.push("min_duplicate_size_bytes must not be negative".to_string());
        }
        if self.max_directory_depth == 0 {
            problems.push("max_directory_depth must be at least 1".to_string());
        }
        if self.decision_concurrency == 0 {
            problems.push("decision_concurrency must be at least 1".to_string());
        }
        if self.version_folder_name.trim().is_empty()
            || self.version_folder_name.contains(['/', '\\'])
        {
            problems.push(format!(
                "version_folder_name must be a single path component, got {:?}",
                self.version_folder_name
            ));
        }
        if self.source_root == self.working_root {
            problems.push("working_root must differ from source_root".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(problems))
        }
    }
}

fn default_data_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "docshelf")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrganizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_duplicate_size_bytes, 10 * 1024);
        assert_eq!(config.archive_strategy, ArchiveStrategy::Subfolder);
        assert_eq!(config.version_folder_name, "_versions");
        assert!(config.review_required);
        assert!(!config.dry_run);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"similarity_threshold": 0.8, "archive_strategy": "archive", "ollama": {"model": "mistral"}}"#,
        )
        .unwrap();

        let config = OrganizerConfig::load(&path).unwrap();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.archive_strategy, ArchiveStrategy::SeparateArchive);
        assert_eq!(config.ollama.model, "mistral");
        assert_eq!(config.ollama.host, "http://localhost:11434");
        assert_eq!(config.max_directory_depth, 4);
    }

    #[test]
    fn out_of_range_values_are_all_reported() {
        let config = OrganizerConfig {
            similarity_threshold: 1.5,
            min_duplicate_group_size: 1,
            version_folder_name: "a/b".to_string(),
            ..OrganizerConfig::with_data_root(Path::new("/tmp/docshelf"))
        };
        match config.validate() {
            Err(AppError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn archive_strategy_parses_both_spellings() {
        assert_eq!(
            "separate_archive".parse::<ArchiveStrategy>().unwrap(),
            ArchiveStrategy::SeparateArchive
        );
        assert_eq!(ArchiveStrategy::Inline.to_string(), "inline");
        assert!("nowhere".parse::<ArchiveStrategy>().is_err());
    }
}
