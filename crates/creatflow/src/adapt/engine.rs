use std::borrow::Cow;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use tracing::{debug, info, info_span, warn};

use super::format::SourceFormat;
use super::geometry::{center_crop_box, crop_around_point, CropBox};
use super::metadata::AiMetadata;
use super::strategy::{plan, select_focal_point, AdaptationSettings, Strategy};
use super::AdaptError;
use crate::ai::AiProvider;
use crate::sanitize::redact_path;
use crate::storage::FileStorage;

/// One resize to perform.
#[derive(Debug, Clone)]
pub struct ResizeRequest<'a> {
    /// Absolute path of the source image.
    pub source: &'a Path,
    pub width: u32,
    pub height: u32,
    pub metadata: Option<&'a AiMetadata>,
    pub prompt: Option<&'a str>,
    pub settings: AdaptationSettings,
}

/// Result of a successful adaptation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub strategy: Strategy,
}

pub struct AdaptationEngine {
    ai: Arc<dyn AiProvider>,
    storage: FileStorage,
    ai_edit_enabled: bool,
}

impl AdaptationEngine {
    pub fn new(ai: Arc<dyn AiProvider>, storage: FileStorage, ai_edit_enabled: bool) -> Self {
        Self {
            ai,
            storage,
            ai_edit_enabled,
        }
    }

    /// Adapts the source to the target size.
    ///
    /// Strategies run in order and the first success wins. Only a failure of
    /// the terminal center crop (or an unreadable source) is returned.
    pub fn resize(&self, request: &ResizeRequest<'_>) -> Result<AdaptedImage, AdaptError> {
        if request.width == 0 || request.height == 0 {
            return Err(AdaptError::InvalidTarget {
                width: request.width,
                height: request.height,
            });
        }
        let format = SourceFormat::detect(request.source)?;
        let has_metadata = request.metadata.is_some_and(|m| !m.analysis_skipped);
        let chain = plan(&request.settings, self.ai_edit_enabled, has_metadata);

        let _span = info_span!(
            "resize",
            file = %redact_path(request.source),
            width = request.width,
            height = request.height,
        )
        .entered();

        let mut decoded: Option<DynamicImage> = None;
        let mut last_error = None;

        for strategy in chain {
            let attempt = match strategy {
                Strategy::AiEdit => self.ai_resize(request, format),
                local => decoded_source(&mut decoded, request.source)
                    .and_then(|source| self.apply_local(local, source, request, format)),
            };

            match attempt {
                Ok(Some(adapted)) => {
                    info!(
                        "Adapted {} to {}x{} via {}",
                        redact_path(request.source),
                        adapted.width,
                        adapted.height,
                        adapted.strategy
                    );
                    return Ok(adapted);
                }
                Ok(None) => debug!("Strategy {} not applicable, falling through", strategy),
                Err(e) => {
                    warn!("Strategy {} failed: {}", strategy, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AdaptError::InvalidTarget {
            width: request.width,
            height: request.height,
        }))
    }

    fn ai_resize(
        &self,
        request: &ResizeRequest<'_>,
        format: SourceFormat,
    ) -> Result<Option<AdaptedImage>, AdaptError> {
        let generated =
            self.ai
                .resize_image(request.source, request.width, request.height, request.prompt)?;
        let image = image::load_from_memory(&generated.bytes).map_err(|e| AdaptError::Decode {
            path: request.source.to_path_buf(),
            reason: format!("AI output: {}", e),
        })?;

        let image = if image.dimensions() == (request.width, request.height) {
            image
        } else {
            image.resize_exact(request.width, request.height, FilterType::Lanczos3)
        };

        let path = output_path(request.source, request.width, request.height, Strategy::AiEdit);
        self.save(&image, &path, format)?;
        Ok(Some(AdaptedImage {
            path,
            width: request.width,
            height: request.height,
            strategy: Strategy::AiEdit,
        }))
    }

    fn apply_local(
        &self,
        strategy: Strategy,
        source: &DynamicImage,
        request: &ResizeRequest<'_>,
        format: SourceFormat,
    ) -> Result<Option<AdaptedImage>, AdaptError> {
        let (src_w, src_h) = source.dimensions();
        let (tw, th) = (request.width, request.height);

        let output = match strategy {
            Strategy::SmartCrop => {
                let focal = request
                    .metadata
                    .and_then(|m| select_focal_point(m, request.settings.focal_point_logic));
                let Some(focal) = focal else {
                    return Ok(None);
                };
                let crop = crop_around_point(src_w, src_h, tw, th, focal);
                crop_and_scale(source, crop, tw, th)
            }
            Strategy::Extend => extend_canvas(source, tw, th),
            Strategy::CenterCrop => crop_and_scale(source, center_crop_box(src_w, src_h, tw, th), tw, th),
            Strategy::AiEdit => return Ok(None),
        };

        let path = output_path(request.source, tw, th, strategy);
        self.save(&output, &path, format)?;
        Ok(Some(AdaptedImage {
            path,
            width: output.width(),
            height: output.height(),
            strategy,
        }))
    }

    /// Encodes `image` in the source format and writes it under the root.
    pub fn save(&self, image: &DynamicImage, path: &Path, format: SourceFormat) -> Result<(), AdaptError> {
        let bytes = encode(image, format).map_err(|e| AdaptError::Encode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.storage.write(path, &bytes)?;
        Ok(())
    }
}

fn decoded_source<'a>(
    slot: &'a mut Option<DynamicImage>,
    path: &Path,
) -> Result<&'a DynamicImage, AdaptError> {
    if slot.is_none() {
        *slot = Some(decode(path)?);
    }
    slot.as_ref().ok_or_else(|| AdaptError::Decode {
        path: path.to_path_buf(),
        reason: "source image unavailable".to_string(),
    })
}

/// Decodes an image file from disk.
pub fn decode(path: &Path) -> Result<DynamicImage, AdaptError> {
    image::open(path).map_err(|e| AdaptError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Encodes into a buffer, normalizing the pixel layout to one the encoder
/// accepts.
pub fn encode(image: &DynamicImage, format: SourceFormat) -> image::ImageResult<Vec<u8>> {
    let normalized: Cow<'_, DynamicImage> = match image {
        DynamicImage::ImageRgb8(_) => Cow::Borrowed(image),
        DynamicImage::ImageRgba8(_) if format.supports_alpha() => Cow::Borrowed(image),
        _ if format.supports_alpha() => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    };

    let mut buffer = Cursor::new(Vec::new());
    normalized.write_to(&mut buffer, format.image_format())?;
    Ok(buffer.into_inner())
}

fn crop_and_scale(source: &DynamicImage, crop: CropBox, width: u32, height: u32) -> DynamicImage {
    source
        .crop_imm(crop.left, crop.top, crop.width, crop.height)
        .resize_exact(width, height, FilterType::Lanczos3)
}

/// Centers the source on a white canvas of the target size. When the target
/// is smaller than the source in either dimension the source is returned
/// unchanged.
fn extend_canvas(source: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (src_w, src_h) = source.dimensions();
    if width < src_w || height < src_h {
        return source.clone();
    }

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let x = (width - src_w) / 2;
    let y = (height - src_h) / 2;
    imageops::overlay(&mut canvas, &source.to_rgba8(), x as i64, y as i64);
    DynamicImage::ImageRgba8(canvas)
}

/// `<dir>/<stem>_<w>x<h>_<suffix>.<ext>` next to the source.
///
/// Deterministic per (source, size, strategy), so reruns overwrite.
pub fn output_path(source: &Path, width: u32, height: u32, strategy: Strategy) -> PathBuf {
    sibling_path(
        source,
        &format!("{}x{}_{}", width, height, strategy.suffix()),
    )
}

/// `<dir>/<stem>_prompt_edited.<ext>` next to the source.
pub fn prompt_edit_path(source: &Path) -> PathBuf {
    sibling_path(source, "prompt_edited")
}

pub(crate) fn sibling_path(source: &Path, tag: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match source.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tag),
    };
    source.with_file_name(file_name)
}
