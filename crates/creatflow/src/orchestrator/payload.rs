//! Task payloads. Stored as JSON on the task row, so field names are part
//! of the durable format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A target size not backed by an `AssetFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSize {
    pub width: u32,
    pub height: u32,
}

/// What the caller asks a generation job to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub format_ids: Vec<String>,
    #[serde(default)]
    pub custom_sizes: Vec<CustomSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPayload {
    pub job_id: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEditPayload {
    pub job_id: String,
    pub source_asset_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub project_id: String,
}

/// Job id carried by a job-driving payload, read without knowing its kind.
pub(crate) fn job_id_of(payload: &Value) -> Option<&str> {
    payload.get("job_id").and_then(Value::as_str)
}
