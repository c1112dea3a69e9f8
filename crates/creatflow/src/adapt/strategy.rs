//! Strategy selection for one adaptation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::geometry::FocalPoint;
use super::metadata::AiMetadata;

/// Organization-level choice between cropping and canvas extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationMode {
    #[default]
    Crop,
    Extend,
}

impl AdaptationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdaptationMode::Crop => "crop",
            AdaptationMode::Extend => "extend",
        }
    }

    /// Unknown values fall back to the default rather than failing a job.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "extend" => AdaptationMode::Extend,
            _ => AdaptationMode::Crop,
        }
    }
}

/// Which detection drives the smart-crop focal point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocalPointLogic {
    #[default]
    FaceCentric,
    ProductCentric,
}

impl FocalPointLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocalPointLogic::FaceCentric => "face-centric",
            FocalPointLogic::ProductCentric => "product-centric",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "product-centric" => FocalPointLogic::ProductCentric,
            _ => FocalPointLogic::FaceCentric,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptationSettings {
    pub mode: AdaptationMode,
    pub focal_point_logic: FocalPointLogic,
}

/// One link of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    AiEdit,
    SmartCrop,
    Extend,
    CenterCrop,
}

impl Strategy {
    /// File name suffix of outputs produced by this strategy.
    pub fn suffix(&self) -> &'static str {
        match self {
            Strategy::AiEdit => "ai_edit",
            Strategy::SmartCrop => "smart_crop",
            Strategy::Extend => "extended",
            Strategy::CenterCrop => "center_crop",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Builds the ordered chain for one resize. Center crop is always last.
pub fn plan(settings: &AdaptationSettings, ai_edit_enabled: bool, has_metadata: bool) -> Vec<Strategy> {
    let mut chain = Vec::with_capacity(3);
    if ai_edit_enabled {
        chain.push(Strategy::AiEdit);
    }
    match settings.mode {
        AdaptationMode::Crop if has_metadata => chain.push(Strategy::SmartCrop),
        AdaptationMode::Crop => {}
        AdaptationMode::Extend => chain.push(Strategy::Extend),
    }
    chain.push(Strategy::CenterCrop);
    chain
}

/// Picks the focal point from analysis metadata.
///
/// Face-centric uses the largest face by area, product-centric the most
/// confident object. `None` when the relevant list is empty.
pub fn select_focal_point(metadata: &AiMetadata, logic: FocalPointLogic) -> Option<FocalPoint> {
    let center = |x: f64, y: f64, w: f64, h: f64| FocalPoint {
        x: x + w / 2.0,
        y: y + h / 2.0,
    };

    match logic {
        FocalPointLogic::FaceCentric => metadata
            .faces
            .iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .map(|f| center(f.x, f.y, f.width, f.height)),
        FocalPointLogic::ProductCentric => metadata
            .objects
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|o| center(o.x, o.y, o.width, o.height)),
    }
}
