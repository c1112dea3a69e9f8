//! Analysis results attached to a source asset.
//!
//! Coordinates are percentages of the image size (0-100). Detection output
//! from the AI provider is loose, so every field has a default: a missing
//! position means "centered", a missing size means "a point".

use serde::{Deserialize, Serialize};

/// Element recorded for sources whose analysis was skipped.
pub const PSD_ELEMENT: &str = "psd_file";

fn default_center() -> f64 {
    50.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    #[serde(default = "default_center")]
    pub x: f64,
    #[serde(default = "default_center")]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub confidence: f64,
}

impl FaceBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_center")]
    pub x: f64,
    #[serde(default = "default_center")]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub confidence: f64,
}

fn default_label() -> String {
    "object".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiMetadata {
    #[serde(default)]
    pub faces: Vec<FaceBox>,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
    #[serde(default)]
    pub is_nsfw: bool,
    #[serde(default)]
    pub detected_elements: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub analysis_skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AiMetadata {
    /// Builds metadata from detection results and derives the UI element list:
    /// `faces` when any face was found, then one entry per object label.
    pub fn from_detections(faces: Vec<FaceBox>, objects: Vec<DetectedObject>, is_nsfw: bool) -> Self {
        let mut detected_elements = Vec::new();
        if !faces.is_empty() {
            detected_elements.push("faces".to_string());
        }
        detected_elements.extend(objects.iter().map(|o| o.label.clone()));

        Self {
            faces,
            objects,
            is_nsfw,
            detected_elements,
            analysis_skipped: false,
            reason: None,
        }
    }

    /// Metadata for a source the analyzers cannot read.
    pub fn skipped(reason: &str) -> Self {
        Self {
            detected_elements: vec![PSD_ELEMENT.to_string()],
            analysis_skipped: true,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}
