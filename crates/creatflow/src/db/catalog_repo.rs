//! SQLite-backed [`Catalog`], plus the inserts the outer application (and
//! tests) use to populate it.

use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{format_ts, Database, DatabaseError};
use crate::adapt::metadata::AiMetadata;
use crate::adapt::strategy::{AdaptationMode, AdaptationSettings, FocalPointLogic};
use crate::catalog::{AssetFormat, Catalog, FormatType, Project, ProjectStatus, SourceAsset};

#[derive(Clone)]
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn project_from_row(row: &Row<'_>) -> Result<Project, rusqlite::Error> {
    let status: String = row.get("status")?;
    Ok(Project {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        organization_id: row.get("organization_id")?,
        name: row.get("name")?,
        status: ProjectStatus::parse(&status).unwrap_or(ProjectStatus::Processing),
    })
}

fn asset_from_row(row: &Row<'_>) -> Result<SourceAsset, rusqlite::Error> {
    let metadata: Option<String> = row.get("ai_metadata")?;
    let id: String = row.get("id")?;
    let ai_metadata = match metadata {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(m) => Some(m),
            Err(e) => {
                log::warn!("Ignoring unreadable AI metadata on asset {}: {}", id, e);
                None
            }
        },
        None => None,
    };
    Ok(SourceAsset {
        id,
        project_id: row.get("project_id")?,
        original_filename: row.get("original_filename")?,
        storage_path: row.get("storage_path")?,
        file_type: row.get("file_type")?,
        ai_metadata,
    })
}

fn format_from_row(row: &Row<'_>) -> Result<AssetFormat, rusqlite::Error> {
    let format_type: String = row.get("format_type")?;
    Ok(AssetFormat {
        id: row.get("id")?,
        name: row.get("name")?,
        format_type: FormatType::parse(&format_type).unwrap_or(FormatType::Resizing),
        width: row.get("width")?,
        height: row.get("height")?,
        platform_name: row.get("platform_name")?,
        category: row.get("category")?,
        is_active: row.get("is_active")?,
    })
}

impl Catalog for SqliteCatalog {
    fn project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT * FROM projects WHERE id = ?1",
                    params![id],
                    project_from_row,
                )
                .optional()?)
        })
    }

    fn project_assets(&self, project_id: &str) -> Result<Vec<SourceAsset>, DatabaseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM assets WHERE project_id = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![project_id], asset_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn asset(&self, id: &str) -> Result<Option<SourceAsset>, DatabaseError> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT * FROM assets WHERE id = ?1", params![id], asset_from_row)
                .optional()?)
        })
    }

    fn asset_formats(&self, ids: &[String]) -> Result<Vec<AssetFormat>, DatabaseError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM asset_formats WHERE id IN ({}) ORDER BY rowid",
                placeholders
            ))?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), format_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn adaptation_settings(
        &self,
        organization_id: Option<&str>,
    ) -> Result<AdaptationSettings, DatabaseError> {
        let Some(org) = organization_id else {
            return Ok(AdaptationSettings::default());
        };
        self.db.with_conn(|conn| {
            let stored: Option<(String, String)> = conn
                .query_row(
                    "SELECT ai_adaptation_strategy, focal_point_logic
                     FROM organization_settings WHERE organization_id = ?1",
                    params![org],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            Ok(match stored {
                Some((mode, logic)) => AdaptationSettings {
                    mode: AdaptationMode::parse_or_default(&mode),
                    focal_point_logic: FocalPointLogic::parse_or_default(&logic),
                },
                None => AdaptationSettings::default(),
            })
        })
    }

    fn set_project_status(&self, id: &str, status: ProjectStatus) -> Result<(), DatabaseError> {
        let now = format_ts(Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now],
            )?;
            Ok(())
        })
    }

    fn save_asset_metadata(
        &self,
        asset_id: &str,
        metadata: &AiMetadata,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE assets SET ai_metadata = ?2 WHERE id = ?1",
                params![asset_id, json],
            )?;
            Ok(())
        })
    }
}

pub fn insert_project(db: &Database, project: &Project) -> Result<(), DatabaseError> {
    let now = format_ts(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, user_id, organization_id, name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                project.id,
                project.user_id,
                project.organization_id,
                project.name,
                project.status.as_str(),
                now
            ],
        )?;
        Ok(())
    })
}

pub fn insert_asset(db: &Database, asset: &SourceAsset) -> Result<(), DatabaseError> {
    let metadata = asset
        .ai_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let now = format_ts(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO assets (id, project_id, original_filename, storage_path, file_type,
             ai_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                asset.id,
                asset.project_id,
                asset.original_filename,
                asset.storage_path,
                asset.file_type,
                metadata,
                now
            ],
        )?;
        Ok(())
    })
}

pub fn insert_format(db: &Database, format: &AssetFormat) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO asset_formats (id, name, format_type, width, height, platform_name,
             category, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                format.id,
                format.name,
                format.format_type.as_str(),
                format.width,
                format.height,
                format.platform_name,
                format.category,
                format.is_active
            ],
        )?;
        Ok(())
    })
}

pub fn upsert_settings(
    db: &Database,
    organization_id: &str,
    settings: &AdaptationSettings,
) -> Result<(), DatabaseError> {
    let now = format_ts(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO organization_settings
             (organization_id, ai_adaptation_strategy, focal_point_logic, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(organization_id) DO UPDATE SET
               ai_adaptation_strategy = excluded.ai_adaptation_strategy,
               focal_point_logic = excluded.focal_point_logic,
               updated_at = excluded.updated_at",
            params![
                organization_id,
                settings.mode.as_str(),
                settings.focal_point_logic.as_str(),
                now
            ],
        )?;
        Ok(())
    })
}

/// Storage paths of every uploaded source asset.
pub fn all_asset_paths(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT storage_path FROM assets")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(rows)
    })
}
