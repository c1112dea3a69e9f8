//! Crop-box arithmetic.
//!
//! Ratios are compared by cross-multiplication in `u64` so the box sizes are
//! exact floors and never drift by a pixel on large sources.

/// A focal point in percent of the source size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
}

/// Pixel rectangle inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest box with the target aspect ratio that fits in the source.
///
/// When the source is wider than the target the height binds, otherwise
/// the width does.
pub fn aspect_crop_size(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let (sw, sh) = (src_w as u64, src_h as u64);
    let (tw, th) = (target_w.max(1) as u64, target_h.max(1) as u64);

    let (cw, ch) = if sw * th > tw * sh {
        (sh * tw / th, sh)
    } else {
        (sw, sw * th / tw)
    };
    (cw.clamp(1, sw.max(1)) as u32, ch.clamp(1, sh.max(1)) as u32)
}

/// Crop box of the target aspect ratio centered on `focal`, shifted back
/// inside the source when it would overhang. The box is never shrunk.
pub fn crop_around_point(
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
    focal: FocalPoint,
) -> CropBox {
    let (width, height) = aspect_crop_size(src_w, src_h, target_w, target_h);
    let fx = percent_to_px(focal.x, src_w);
    let fy = percent_to_px(focal.y, src_h);

    // Clamped in i64 so absurd focal points never wrap when narrowed.
    let left = (fx - (width / 2) as i64).clamp(0, src_w.saturating_sub(width) as i64) as u32;
    let top = (fy - (height / 2) as i64).clamp(0, src_h.saturating_sub(height) as i64) as u32;

    CropBox {
        left,
        top,
        width,
        height,
    }
}

/// Largest centered box of the target aspect ratio.
pub fn center_crop_box(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> CropBox {
    let (width, height) = aspect_crop_size(src_w, src_h, target_w, target_h);
    CropBox {
        left: (src_w - width) / 2,
        top: (src_h - height) / 2,
        width,
        height,
    }
}

fn percent_to_px(percent: f64, size: u32) -> i64 {
    if !percent.is_finite() {
        return (size / 2) as i64;
    }
    (percent * size as f64 / 100.0).floor() as i64
}
