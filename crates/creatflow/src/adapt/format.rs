//! Source format routing.

use std::path::Path;

use image::ImageFormat;

use super::AdaptError;

/// Raster formats the engine can both decode and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Webp,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SourceFormat::Png),
            "jpg" | "jpeg" => Some(SourceFormat::Jpeg),
            "gif" => Some(SourceFormat::Gif),
            "bmp" => Some(SourceFormat::Bmp),
            "tif" | "tiff" => Some(SourceFormat::Tiff),
            "webp" => Some(SourceFormat::Webp),
            _ => None,
        }
    }

    /// Detects the format from the path's extension. PSD and anything else
    /// the codec cannot write back are rejected.
    pub fn detect(path: &Path) -> Result<Self, AdaptError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(ext).ok_or_else(|| AdaptError::Unsupported {
            extension: ext.to_lowercase(),
        })
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            SourceFormat::Png => ImageFormat::Png,
            SourceFormat::Jpeg => ImageFormat::Jpeg,
            SourceFormat::Gif => ImageFormat::Gif,
            SourceFormat::Bmp => ImageFormat::Bmp,
            SourceFormat::Tiff => ImageFormat::Tiff,
            SourceFormat::Webp => ImageFormat::WebP,
        }
    }

    /// Whether the encoder accepts an alpha channel.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, SourceFormat::Jpeg)
    }
}

/// MIME type recorded on generated rows, guessed from the file name.
pub fn mime_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
