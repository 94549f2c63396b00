pub mod decision_service;
pub mod dedup_service;
pub mod execution_service;
pub mod file_service;
pub mod manifest_service;
pub mod ollama_service;
pub mod organize_service;
pub mod retry;
pub mod shortcut_service;
pub mod similarity;
pub mod version_service;
