//! Read-mostly view of the outer application's records.
//!
//! Projects, uploaded assets, target formats and organization settings are
//! owned by the surrounding application. The job system only reads them,
//! plus two narrow writes: analysis results and project status.

use serde::{Deserialize, Serialize};

use crate::adapt::metadata::AiMetadata;
use crate::adapt::strategy::AdaptationSettings;
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Processing,
    ReadyForReview,
    Failed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Processing => "processing",
            ProjectStatus::ReadyForReview => "ready_for_review",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ProjectStatus::Processing),
            "ready_for_review" => Some(ProjectStatus::ReadyForReview),
            "failed" => Some(ProjectStatus::Failed),
            "archived" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub name: String,
    pub status: ProjectStatus,
}

/// An uploaded source image.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAsset {
    pub id: String,
    pub project_id: String,
    pub original_filename: String,
    /// Relative to the upload root.
    pub storage_path: String,
    pub file_type: String,
    pub ai_metadata: Option<AiMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    Resizing,
    Repurposing,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Resizing => "resizing",
            FormatType::Repurposing => "repurposing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resizing" => Some(FormatType::Resizing),
            "repurposing" => Some(FormatType::Repurposing),
            _ => None,
        }
    }
}

/// A named target size, e.g. "Instagram Story 1080x1920".
#[derive(Debug, Clone, PartialEq)]
pub struct AssetFormat {
    pub id: String,
    pub name: String,
    pub format_type: FormatType,
    pub width: u32,
    pub height: u32,
    pub platform_name: Option<String>,
    pub category: Option<String>,
    pub is_active: bool,
}

impl AssetFormat {
    /// Result grouping key: platform, then category, then "Custom".
    pub fn group_name(&self) -> String {
        self.platform_name
            .clone()
            .or_else(|| self.category.clone())
            .unwrap_or_else(|| CUSTOM_GROUP.to_string())
    }
}

/// Group used for outputs without a format (custom sizes, prompt edits).
pub const CUSTOM_GROUP: &str = "Custom";

/// Access to the outer application's records.
pub trait Catalog: Send + Sync {
    fn project(&self, id: &str) -> Result<Option<Project>, DatabaseError>;

    /// Assets of a project in upload order.
    fn project_assets(&self, project_id: &str) -> Result<Vec<SourceAsset>, DatabaseError>;

    fn asset(&self, id: &str) -> Result<Option<SourceAsset>, DatabaseError>;

    /// Looks up formats by id. Unknown ids are silently absent; inactive
    /// formats are returned with `is_active = false`.
    fn asset_formats(&self, ids: &[String]) -> Result<Vec<AssetFormat>, DatabaseError>;

    /// Settings of the organization, or defaults when none are stored.
    fn adaptation_settings(
        &self,
        organization_id: Option<&str>,
    ) -> Result<AdaptationSettings, DatabaseError>;

    fn set_project_status(&self, id: &str, status: ProjectStatus) -> Result<(), DatabaseError>;

    fn save_asset_metadata(&self, asset_id: &str, metadata: &AiMetadata)
        -> Result<(), DatabaseError>;
}
