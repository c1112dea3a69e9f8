use std::path::Path;

use super::{AiError, AiProvider, GeneratedImage};
use crate::adapt::metadata::{DetectedObject, FaceBox};

/// Provider for deployments without model access.
///
/// Detection reports nothing and generative calls are unavailable, so the
/// adaptation chain falls straight through to the local strategies.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineProvider;

impl AiProvider for OfflineProvider {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn detect_faces(&self, _image: &Path) -> Result<Vec<FaceBox>, AiError> {
        Ok(Vec::new())
    }

    fn detect_objects(&self, _image: &Path) -> Result<Vec<DetectedObject>, AiError> {
        Ok(Vec::new())
    }

    fn detect_nsfw(&self, _image: &Path) -> Result<bool, AiError> {
        Ok(false)
    }

    fn resize_image(
        &self,
        _image: &Path,
        _width: u32,
        _height: u32,
        _prompt: Option<&str>,
    ) -> Result<GeneratedImage, AiError> {
        Err(AiError::NotSupported {
            operation: "resize_image",
            provider: self.name(),
        })
    }

    fn edit_image(&self, _image: &Path, _prompt: &str) -> Result<GeneratedImage, AiError> {
        Err(AiError::NotSupported {
            operation: "edit_image",
            provider: self.name(),
        })
    }
}
