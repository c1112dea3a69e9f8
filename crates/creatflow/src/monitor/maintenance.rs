//! Periodic housekeeping run as `maintenance` queue tasks.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use super::MonitorError;
use crate::db::{catalog_repo, format_ts, generated_asset_repo, job_repo, Database};
use crate::queue::{Clock, TaskContext, TaskError, TaskHandler, TaskKind};
use crate::storage::FileStorage;

/// Failed jobs older than this are deleted.
pub const FAILED_JOB_RETENTION_HOURS: i64 = 24;
/// Unreferenced files younger than this are left alone; an upload or a
/// fan-out may not have committed its row yet.
pub const ORPHAN_MIN_AGE_HOURS: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub jobs_deleted: usize,
    pub files_deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub scanned: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub database: bool,
    pub storage: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.database && self.storage
    }
}

pub struct Maintenance {
    db: Database,
    storage: FileStorage,
    clock: Arc<dyn Clock>,
}

impl Maintenance {
    pub fn new(db: Database, storage: FileStorage, clock: Arc<dyn Clock>) -> Self {
        Self { db, storage, clock }
    }

    /// Deletes Failed jobs past retention together with their outputs.
    pub fn cleanup_failed_jobs(&self) -> Result<CleanupReport, MonitorError> {
        let cutoff = format_ts(self.clock.now() - Duration::hours(FAILED_JOB_RETENTION_HOURS));
        let expired = self
            .db
            .with_conn(|conn| job_repo::failed_before(conn, &cutoff))?;

        let mut report = CleanupReport::default();
        for job in expired {
            let outputs = self
                .db
                .with_conn(|conn| generated_asset_repo::list_by_job(conn, &job.id))?;
            for output in &outputs {
                match self.storage.delete_relative(&output.storage_path) {
                    Ok(true) => report.files_deleted += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Could not delete {}: {}", output.storage_path, e),
                }
            }
            // generated_assets rows go with the job
            self.db.with_conn(|conn| job_repo::delete(conn, &job.id))?;
            report.jobs_deleted += 1;
        }

        if report.jobs_deleted > 0 {
            info!(
                "Removed {} failed jobs and {} files",
                report.jobs_deleted, report.files_deleted
            );
        }
        Ok(report)
    }

    /// Deletes files under the upload root that no asset or generated
    /// asset references.
    pub fn cleanup_orphaned_files(&self) -> Result<OrphanReport, MonitorError> {
        let mut referenced: HashSet<String> =
            catalog_repo::all_asset_paths(&self.db)?.into_iter().collect();
        referenced.extend(
            self.db
                .with_conn(generated_asset_repo::all_storage_paths)?,
        );

        let min_age = Duration::hours(ORPHAN_MIN_AGE_HOURS);
        let now = self.clock.now();
        let mut report = OrphanReport::default();
        for path in self.storage.list_files() {
            report.scanned += 1;
            if is_transient(&path) {
                continue;
            }
            let Ok(relative) = self.storage.relative(&path) else {
                continue;
            };
            if referenced.contains(&relative) {
                continue;
            }
            match modified_at(&path) {
                Some(modified) if now - modified >= min_age => {}
                _ => continue,
            }
            match self.storage.delete(&path) {
                Ok(true) => {
                    debug!("Deleted orphaned file {}", relative);
                    report.deleted += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Could not delete orphan {}: {}", relative, e),
            }
        }

        if report.deleted > 0 {
            info!("Removed {} orphaned files", report.deleted);
        }
        Ok(report)
    }

    /// Store round-trip and upload root writability.
    pub fn health_check(&self) -> HealthStatus {
        let mut errors = Vec::new();

        let database = match self
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
        {
            Ok(1) => true,
            Ok(other) => {
                errors.push(format!("database returned {}", other));
                false
            }
            Err(e) => {
                errors.push(format!("database: {}", e));
                false
            }
        };

        let storage = match self.storage.check_writable() {
            Ok(()) => true,
            Err(e) => {
                errors.push(format!("storage: {}", e));
                false
            }
        };

        HealthStatus {
            database,
            storage,
            errors,
        }
    }
}

/// Atomic-write temp files and writability probes.
fn is_transient(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(".tmp") || n.starts_with(".health-"))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

impl TaskHandler for Maintenance {
    fn handle(&self, ctx: &TaskContext) -> Result<Value, TaskError> {
        let permanent = |e: MonitorError| TaskError::Permanent(e.to_string());
        match ctx.kind() {
            TaskKind::CleanupFailedJobs => {
                let report = self.cleanup_failed_jobs().map_err(permanent)?;
                Ok(json!(report))
            }
            TaskKind::CleanupOrphanedFiles => {
                let report = self.cleanup_orphaned_files().map_err(permanent)?;
                Ok(json!(report))
            }
            TaskKind::HealthCheck => {
                let status = self.health_check();
                if status.is_healthy() {
                    Ok(json!(status))
                } else {
                    Err(TaskError::Permanent(format!(
                        "Health check failed: {}",
                        status.errors.join("; ")
                    )))
                }
            }
            other => Err(TaskError::Permanent(format!(
                "{} is not a maintenance task",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::generated_asset_repo::GeneratedAssetRow;
    use crate::db::job_repo::JobRow;
    use crate::queue::ManualClock;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup(start: DateTime<Utc>) -> (Maintenance, Database, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let maintenance = Maintenance::new(db.clone(), FileStorage::new(dir.path()), clock.clone());
        (maintenance, db, clock, dir)
    }

    fn seed_job(db: &Database, id: &str, status: &str, updated_at: &str) {
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT OR IGNORE INTO projects (id, user_id, name, status, created_at, updated_at)
                 VALUES ('p1', 'u1', 'Launch', 'processing', '2026-01-01T00:00:00.000Z',
                 '2026-01-01T00:00:00.000Z');
                 INSERT OR IGNORE INTO assets (id, project_id, original_filename, storage_path,
                 file_type, created_at)
                 VALUES ('a1', 'p1', 'hero.png', 'uploads/hero.png', 'image/png',
                 '2026-01-01T00:00:00.000Z');",
            )?;
            job_repo::insert(
                conn,
                &JobRow {
                    id: id.into(),
                    project_id: "p1".into(),
                    user_id: "u1".into(),
                    kind: "generation".into(),
                    status: status.into(),
                    progress: 0,
                    error: None,
                    task_id: None,
                    created_at: updated_at.into(),
                    updated_at: updated_at.into(),
                },
            )?;
            generated_asset_repo::insert(
                conn,
                &GeneratedAssetRow {
                    id: format!("{}-out", id),
                    job_id: id.into(),
                    original_asset_id: "a1".into(),
                    asset_format_id: None,
                    storage_path: format!("uploads/{}_out.png", id),
                    file_type: "image/png".into(),
                    width: 10,
                    height: 10,
                    is_nsfw: false,
                    manual_edits: None,
                    version: 1,
                    created_at: updated_at.into(),
                    updated_at: updated_at.into(),
                },
            )
        })
        .unwrap();
    }

    #[test]
    fn test_cleanup_failed_jobs_respects_retention() {
        let (maintenance, db, _clock, dir) =
            setup(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap());
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/old_out.png"), b"x").unwrap();

        seed_job(&db, "old", "failed", "2026-03-01T11:00:00.000Z");
        seed_job(&db, "recent", "failed", "2026-03-02T06:00:00.000Z");
        seed_job(&db, "done", "completed", "2026-02-01T00:00:00.000Z");

        let report = maintenance.cleanup_failed_jobs().unwrap();
        assert_eq!(report.jobs_deleted, 1);
        assert_eq!(report.files_deleted, 1);
        assert!(!dir.path().join("uploads/old_out.png").exists());

        db.with_conn(|conn| {
            assert!(job_repo::find_by_id(conn, "old")?.is_none());
            assert!(generated_asset_repo::find_by_id(conn, "old-out")?.is_none());
            assert!(job_repo::find_by_id(conn, "recent")?.is_some());
            assert!(job_repo::find_by_id(conn, "done")?.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_orphans_removed_only_when_old_and_unreferenced() {
        let (maintenance, db, clock, dir) = setup(Utc::now());
        seed_job(&db, "j1", "completed", "2026-03-01T00:00:00.000Z");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        for name in ["hero.png", "j1_out.png", "stray.png", ".stray.png.tmp"] {
            std::fs::write(uploads.join(name), b"x").unwrap();
        }

        // everything is fresh
        assert_eq!(maintenance.cleanup_orphaned_files().unwrap().deleted, 0);

        clock.advance(Duration::hours(2));
        let report = maintenance.cleanup_orphaned_files().unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.deleted, 1);
        assert!(!uploads.join("stray.png").exists());
        assert!(uploads.join("hero.png").exists());
        assert!(uploads.join("j1_out.png").exists());
        assert!(uploads.join(".stray.png.tmp").exists());
    }

    #[test]
    fn test_health_check() {
        let (maintenance, _db, _clock, _dir) = setup(Utc::now());
        let status = maintenance.health_check();
        assert!(status.is_healthy(), "{:?}", status.errors);
    }
}
