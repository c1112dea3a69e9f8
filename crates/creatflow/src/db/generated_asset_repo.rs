use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAssetRow {
    pub id: String,
    pub job_id: String,
    pub original_asset_id: String,
    pub asset_format_id: Option<String>,
    pub storage_path: String,
    pub file_type: String,
    pub width: u32,
    pub height: u32,
    pub is_nsfw: bool,
    /// JSON record of reviewer edits.
    pub manual_edits: Option<String>,
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl GeneratedAssetRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            original_asset_id: row.get("original_asset_id")?,
            asset_format_id: row.get("asset_format_id")?,
            storage_path: row.get("storage_path")?,
            file_type: row.get("file_type")?,
            width: row.get("width")?,
            height: row.get("height")?,
            is_nsfw: row.get("is_nsfw")?,
            manual_edits: row.get("manual_edits")?,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(conn: &Connection, asset: &GeneratedAssetRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO generated_assets (id, job_id, original_asset_id, asset_format_id,
         storage_path, file_type, width, height, is_nsfw, manual_edits, version,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            asset.id,
            asset.job_id,
            asset.original_asset_id,
            asset.asset_format_id,
            asset.storage_path,
            asset.file_type,
            asset.width,
            asset.height,
            asset.is_nsfw,
            asset.manual_edits,
            asset.version,
            asset.created_at,
            asset.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<GeneratedAssetRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM generated_assets WHERE id = ?1",
            params![id],
            GeneratedAssetRow::from_row,
        )
        .optional()?)
}

pub fn list_by_job(conn: &Connection, job_id: &str) -> Result<Vec<GeneratedAssetRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM generated_assets WHERE job_id = ?1 ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![job_id], GeneratedAssetRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces the edited output of an asset if nobody else changed it since
/// `expected_version`. Returns 0 on a version mismatch.
#[allow(clippy::too_many_arguments)]
pub fn update_if_version(
    conn: &Connection,
    id: &str,
    expected_version: u32,
    storage_path: &str,
    width: u32,
    height: u32,
    manual_edits: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE generated_assets SET storage_path = ?3, width = ?4, height = ?5,
         manual_edits = ?6, version = version + 1, updated_at = ?7
         WHERE id = ?1 AND version = ?2",
        params![id, expected_version, storage_path, width, height, manual_edits, now],
    )?)
}

/// Every storage path referenced by a generated asset.
pub fn all_storage_paths(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT storage_path FROM generated_assets")?;
    let rows = stmt
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}
