use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::data::migrations;
use crate::error::AppError;

/// Shared store handle plus the set of jobs currently being driven.
pub struct PipelineState {
    db: Mutex<Connection>,
    running_jobs: Mutex<HashSet<String>>,
}

impl PipelineState {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            running_jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Opens (creating if needed) the SQLite store at `path` and migrates it.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    /// Runs `f` with the connection locked. Never call this across an
    /// `.await`.
    pub fn with_db<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let conn = self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    /// Claims `job_id` for the lifetime of the returned guard. Fails fast if
    /// another run already holds it.
    pub fn begin_run(&self, job_id: &str) -> Result<RunGuard<'_>, AppError> {
        let mut running = self
            .running_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(job_id.to_string()) {
            return Err(AppError::General(format!("job {job_id} is already running")));
        }
        Ok(RunGuard {
            state: self,
            job_id: job_id.to_string(),
        })
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(job_id)
    }
}

pub struct RunGuard<'a> {
    state: &'a PipelineState,
    job_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut running = self
            .state
            .running_jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.job_id);
    }
}
