use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::data::repository;
use crate::error::AppError;
use crate::models::manifest::Manifest;

pub fn manifest_path(reports_root: &Path, job_id: &str) -> PathBuf {
    reports_root.join(format!("{job_id}_manifest.json"))
}

/// Writes the manifest JSON under `reports_root` and registers it in the
/// store. Returns the file path.
pub fn write_manifest(
    conn: &Connection,
    reports_root: &Path,
    manifest: &Manifest,
) -> Result<PathBuf, AppError> {
    fs::create_dir_all(reports_root)?;
    let path = manifest_path(reports_root, &manifest.job_id);
    let body = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, body)?;

    repository::insert_manifest(
        conn,
        &manifest.manifest_id,
        &manifest.job_id,
        &path.to_string_lossy(),
    )?;
    tracing::info!(
        job_id = %manifest.job_id,
        manifest_id = %manifest.manifest_id,
        path = %path.display(),
        "manifest written"
    );
    Ok(path)
}

pub fn read_manifest(path: &Path) -> Result<Manifest, AppError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Loads the manifest registered under `manifest_id`. The file on disk must
/// still carry that id; a later execution of the same job replaces it.
pub fn load_manifest(conn: &Connection, manifest_id: &str) -> Result<Manifest, AppError> {
    let row = repository::get_manifest(conn, manifest_id)?
        .ok_or_else(|| AppError::NotFound(format!("manifest {manifest_id}")))?;
    let manifest = read_manifest(Path::new(&row.path))?;
    if manifest.manifest_id != manifest_id {
        return Err(AppError::NotFound(format!(
            "manifest {manifest_id} was superseded by {}",
            manifest.manifest_id
        )));
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::tests::{seed_job, setup_db};
    use crate::models::job::JobPhase;
    use crate::models::manifest::{Operation, OperationType};

    #[test]
    fn written_manifest_loads_by_id() {
        let conn = setup_db();
        seed_job(&conn, "job");
        let dir = tempfile::tempdir().unwrap();

        let mut manifest = Manifest::new("job", "/src", "/work", JobPhase::Approved);
        manifest.record(Operation::succeeded(OperationType::CreateDir, None, "/Finance".into()));
        let path = write_manifest(&conn, dir.path(), &manifest).unwrap();
        assert_eq!(path, dir.path().join("job_manifest.json"));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["statistics"]["directories_created"], 1);

        let loaded = load_manifest(&conn, &manifest.manifest_id).unwrap();
        assert_eq!(loaded.operations().len(), 1);
        assert!(matches!(load_manifest(&conn, "missing"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn overwritten_manifest_is_not_loaded_under_old_id() {
        let conn = setup_db();
        seed_job(&conn, "job");
        let dir = tempfile::tempdir().unwrap();

        let first = Manifest::new("job", "/src", "/work", JobPhase::Approved);
        write_manifest(&conn, dir.path(), &first).unwrap();
        let second = Manifest::new("job", "/src", "/work", JobPhase::Approved);
        write_manifest(&conn, dir.path(), &second).unwrap();

        assert!(load_manifest(&conn, &second.manifest_id).is_ok());
        assert!(matches!(
            load_manifest(&conn, &first.manifest_id),
            Err(AppError::NotFound(_))
        ));
    }
}
