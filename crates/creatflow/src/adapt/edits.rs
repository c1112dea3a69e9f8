//! Manual edits applied by reviewers to a generated asset.

use image::{DynamicImage, GenericImageView, Rgba};
use serde::{Deserialize, Serialize};

use super::AdaptError;

/// Crop rectangle as fractions (0.0-1.0) of the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropFractions {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Stored verbatim in `generated_assets.manual_edits`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualEdits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropFractions>,
    /// 1.0 leaves colors unchanged, 0.0 is grayscale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
    /// Text/graphic overlays are rendered by the client; kept for the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlays: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Applies crop, then saturation.
pub fn apply_edits(image: &DynamicImage, edits: &ManualEdits) -> Result<DynamicImage, AdaptError> {
    let mut out = match edits.crop {
        Some(crop) => {
            let (w, h) = image.dimensions();
            let left = fraction_px(crop.x, w);
            let top = fraction_px(crop.y, h);
            let right = fraction_px(crop.x + crop.width, w);
            let bottom = fraction_px(crop.y + crop.height, h);
            if right <= left || bottom <= top {
                return Err(AdaptError::InvalidEdit(format!(
                    "crop {:?} is empty for a {}x{} image",
                    crop, w, h
                )));
            }
            image.crop_imm(left, top, right - left, bottom - top)
        }
        None => image.clone(),
    };

    if let Some(factor) = edits.saturation {
        if !factor.is_finite() || factor < 0.0 {
            return Err(AdaptError::InvalidEdit(format!(
                "saturation must be a non-negative number, got {}",
                factor
            )));
        }
        if (factor - 1.0).abs() > f32::EPSILON {
            out = saturate(&out, factor);
        }
    }

    Ok(out)
}

fn fraction_px(fraction: f64, size: u32) -> u32 {
    (fraction.clamp(0.0, 1.0) * size as f64).floor() as u32
}

/// Blends every pixel with its luma gray: `gray + (c - gray) * factor`.
fn saturate(image: &DynamicImage, factor: f32) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let gray = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        let mix = |c: u8| (gray + (c as f32 - gray) * factor).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([mix(r), mix(g), mix(b), a]);
    }
    DynamicImage::ImageRgba8(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(w: u32, h: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(color)))
    }

    #[test]
    fn test_crop_fractions() {
        let edits = ManualEdits {
            crop: Some(CropFractions {
                x: 0.25,
                y: 0.0,
                width: 0.5,
                height: 0.5,
            }),
            ..ManualEdits::default()
        };
        let out = apply_edits(&solid(400, 200, [10, 20, 30]), &edits).unwrap();
        assert_eq!(out.dimensions(), (200, 100));
    }

    #[test]
    fn test_empty_crop_rejected() {
        let edits = ManualEdits {
            crop: Some(CropFractions {
                x: 0.5,
                y: 0.5,
                width: 0.0,
                height: 0.2,
            }),
            ..ManualEdits::default()
        };
        assert!(matches!(
            apply_edits(&solid(10, 10, [0, 0, 0]), &edits),
            Err(AdaptError::InvalidEdit(_))
        ));
    }

    #[test]
    fn test_zero_saturation_is_grayscale() {
        let edits = ManualEdits {
            saturation: Some(0.0),
            ..ManualEdits::default()
        };
        let out = apply_edits(&solid(2, 2, [255, 0, 0]), &edits).unwrap().to_rgba8();
        let Rgba([r, g, b, _]) = *out.get_pixel(0, 0);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(r, 76);
    }

    #[test]
    fn test_unit_saturation_is_identity() {
        let edits = ManualEdits {
            saturation: Some(1.0),
            ..ManualEdits::default()
        };
        let src = solid(3, 3, [12, 200, 99]);
        assert_eq!(apply_edits(&src, &edits).unwrap(), src);
    }

    #[test]
    fn test_negative_saturation_rejected() {
        let edits = ManualEdits {
            saturation: Some(-1.0),
            ..ManualEdits::default()
        };
        assert!(apply_edits(&solid(1, 1, [0, 0, 0]), &edits).is_err());
    }
}
