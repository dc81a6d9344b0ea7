//! Stamp placement.
//!
//! Print labs crop a photo to the paper's aspect ratio before printing, so a
//! stamp placed relative to the full frame can end up cut off. When a
//! fine-tune ratio is configured the stamp is placed relative to the area
//! that survives the crop instead.
//!
//! ```text
//!  ┌──────────────────────────────┐
//!  │<-offset_w->┌─────────┐       │   landscape wider than the paper:
//!  │            │  kept   │       │   offset_w = (w - h / r) / 2
//!  │            │     `23 5 1     │   draw_x   = (w - offset_w) * pos_x
//!  │            └─────────┘       │
//!  └──────────────────────────────┘
//! ```
//!
//! Positions are measured from the image's left and top edges over
//! `w - offset_w` and `h - offset_h`, which keeps stamps near the right and
//! bottom edges inside the kept area.

use crate::config::{AnnotationConfig, AspectRatio, TextSize};

/// Ratios within this distance of the paper ratio count as a match.
pub const ASPECT_TOLERANCE: f64 = 0.01;

/// Long edge of the 6x4 inch reference print, in millimetres.
pub const REFERENCE_PRINT_MM: f64 = 152.0;

/// Divisor of the long edge for [`TextSize::Proportional`].
pub const PROPORTIONAL_DIVISOR: u32 = 36;

/// Where and how large the stamp is drawn on one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub draw_x: f64,
    pub draw_y: f64,
    pub offset_w: f64,
    pub offset_h: f64,
    pub font_px: u32,
}

impl Geometry {
    /// Whether the placement compensates for a print crop.
    pub fn is_cropped(&self) -> bool {
        self.offset_w != 0.0 || self.offset_h != 0.0
    }
}

/// Compute the stamp geometry for an image of `width` x `height`
/// (dimensions after orientation).
pub fn plan_geometry(width: u32, height: u32, config: &AnnotationConfig) -> Geometry {
    let (offset_w, offset_h) = aspect_offsets(width, height, config.fine_tune_aspect_ratio);
    Geometry {
        draw_x: (f64::from(width) - offset_w) * config.pos_x,
        draw_y: (f64::from(height) - offset_h) * config.pos_y,
        offset_w,
        offset_h,
        font_px: font_px(width, height, config.text_size),
    }
}

/// Crop compensation `(offset_w, offset_h)`. At most one is non-zero.
///
/// `ratio` is short edge over long edge, so for landscape images the paper's
/// width/height is `1 / r` and for portrait (or square) images it is `r`.
pub fn aspect_offsets(width: u32, height: u32, ratio: Option<AspectRatio>) -> (f64, f64) {
    let Some(ratio) = ratio else {
        return (0.0, 0.0);
    };
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    let r = ratio.value();
    let w = f64::from(width);
    let h = f64::from(height);
    let image_ratio = w / h;

    if width > height {
        let paper = 1.0 / r;
        if image_ratio > paper + ASPECT_TOLERANCE {
            ((w - h / r) / 2.0, 0.0)
        } else if image_ratio < paper - ASPECT_TOLERANCE {
            (0.0, (h - r * w) / 2.0)
        } else {
            (0.0, 0.0)
        }
    } else if image_ratio > r + ASPECT_TOLERANCE {
        ((w - r * h) / 2.0, 0.0)
    } else if image_ratio < r - ASPECT_TOLERANCE {
        (0.0, (h - w / r) / 2.0)
    } else {
        (0.0, 0.0)
    }
}

/// Font size in pixels, never below 1.
pub fn font_px(width: u32, height: u32, size: TextSize) -> u32 {
    let long_edge = width.max(height);
    let px = match size {
        TextSize::Proportional => long_edge / PROPORTIONAL_DIVISOR,
        TextSize::Millimeters(mm) => {
            (mm * f64::from(long_edge) / REFERENCE_PRINT_MM).floor() as u32
        }
    };
    px.max(1)
}
