//! Reviewer edits on a generated asset, guarded by its version.

use std::path::{Path, PathBuf};

use image::GenericImageView;
use log::{info, warn};
use uuid::Uuid;

use super::job::{self, GeneratedAssetSummary};
use super::service::{summarize, JobService};
use super::OrchestratorError;
use crate::adapt::engine::decode;
use crate::adapt::{apply_edits, ManualEdits, SourceFormat};
use crate::db::generated_asset_repo;

const EDITED_MARKER: &str = "_edited_";

impl JobService {
    /// Applies `edits` to the current image of a generated asset and stores
    /// the result as a new version.
    ///
    /// `expected_version` is the version the caller last read. When another
    /// edit landed first the call fails with `Conflict` and nothing it wrote
    /// is kept.
    pub fn apply_manual_edits(
        &self,
        generated_asset_id: &str,
        edits: &ManualEdits,
        expected_version: u32,
        user_id: &str,
    ) -> Result<GeneratedAssetSummary, OrchestratorError> {
        let not_found = || OrchestratorError::NotFound {
            entity: "generated_asset",
            id: generated_asset_id.to_string(),
        };
        let row = self
            .database()
            .with_conn(|conn| generated_asset_repo::find_by_id(conn, generated_asset_id))?
            .ok_or_else(not_found)?;
        let owner = self
            .database()
            .with_conn(|conn| Ok(job::load(conn, &row.job_id)))??;
        if owner.user_id != user_id {
            return Err(not_found());
        }
        if row.version != expected_version {
            return Err(OrchestratorError::Conflict {
                id: row.id,
                expected: expected_version,
                actual: row.version,
            });
        }

        let current = self.storage().resolve(&row.storage_path)?;
        let format = SourceFormat::detect(&current)?;
        let edited = apply_edits(&decode(&current)?, edits)?;
        let (width, height) = edited.dimensions();

        let output = edited_path(&current, expected_version + 1);
        self.engine().save(&edited, &output, format)?;
        let storage_path = self.storage().relative(&output)?;
        let record = serde_json::to_string(edits)?;

        let now = self.now();
        let updated = self.database().with_conn(|conn| {
            generated_asset_repo::update_if_version(
                conn,
                &row.id,
                expected_version,
                &storage_path,
                width,
                height,
                &record,
                &now,
            )
        });

        match updated {
            Ok(1) => {}
            Ok(_) => {
                self.discard(&output);
                let actual = self
                    .database()
                    .with_conn(|conn| generated_asset_repo::find_by_id(conn, &row.id))?
                    .map(|r| r.version)
                    .unwrap_or(expected_version);
                return Err(OrchestratorError::Conflict {
                    id: row.id,
                    expected: expected_version,
                    actual,
                });
            }
            Err(e) => {
                self.discard(&output);
                return Err(e.into());
            }
        }

        info!(
            "Generated asset {} edited, now version {}",
            row.id,
            expected_version + 1
        );
        let stored = self
            .database()
            .with_conn(|conn| generated_asset_repo::find_by_id(conn, &row.id))?
            .ok_or_else(not_found)?;
        let format_name = match &stored.asset_format_id {
            Some(id) => self
                .catalog()
                .asset_formats(std::slice::from_ref(id))?
                .into_iter()
                .next()
                .map(|f| f.name),
            None => None,
        };
        Ok(summarize(stored, format_name))
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = self.storage().delete(path) {
            warn!("Failed to remove discarded edit: {}", e);
        }
    }
}

/// `<dir>/<base>_edited_v<version>_<id>.<ext>`, where `<base>` is the stem
/// with any earlier edit suffix removed. The random id keeps concurrent
/// editors of the same version from writing to one file.
fn edited_path(current: &Path, version: u32) -> PathBuf {
    let stem = current
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = stem
        .rsplit_once(EDITED_MARKER)
        .map(|(base, _)| base.to_string())
        .unwrap_or(stem);
    let id = Uuid::new_v4().simple().to_string();
    let name = format!("{}{}v{}_{}", base, EDITED_MARKER, version, &id[..8]);
    let file_name = match current.extension() {
        Some(ext) => format!("{}.{}", name, ext.to_string_lossy()),
        None => name,
    };
    current.with_file_name(file_name)
}
