//! Image adaptation: turning one source image into one target size.
//!
//! The engine runs an ordered strategy chain (AI edit, smart crop or canvas
//! extension, center crop) and returns the first success. Geometry and
//! focal-point selection are pure functions so they can be tested without
//! touching pixels.

use std::path::PathBuf;

use thiserror::Error;

use crate::ai::AiError;
use crate::error::StorageError;

pub mod edits;
pub mod engine;
pub mod format;
pub mod geometry;
pub mod metadata;
pub mod strategy;

pub use edits::{apply_edits, CropFractions, ManualEdits};
pub use engine::{AdaptationEngine, AdaptedImage, ResizeRequest};
pub use format::SourceFormat;
pub use metadata::AiMetadata;
pub use strategy::{AdaptationMode, AdaptationSettings, FocalPointLogic, Strategy};

#[derive(Error, Debug)]
pub enum AdaptError {
    #[error("Unsupported source format '{extension}'")]
    Unsupported { extension: String },

    #[error("Invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },

    #[error("Failed to decode image '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to encode image '{path}': {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("AI edit failed: {0}")]
    Ai(#[from] AiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
