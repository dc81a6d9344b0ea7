//! Pure calculation functions for text placement.
//!
//! All functions here are pure and testable without any I/O or fonts.

use super::params::{HorizontalAnchor, TextAnchor, VerticalAnchor};

/// Measured extents of one line of text, in pixels.
///
/// Vertical values are relative to the top of the line box (the y that
/// `imageproc::drawing::draw_text_mut` takes), growing downward. `descent`
/// follows font convention and is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextExtents {
    /// Sum of horizontal advances.
    pub advance: f32,
    pub ascent: f32,
    pub descent: f32,
    /// Topmost inked pixel row.
    pub ink_top: f32,
    /// Bottommost inked pixel row.
    pub ink_bottom: f32,
}

/// Translate an anchored draw coordinate into the top-left origin of the line box.
///
/// # Examples
/// ```
/// # use picdate::imaging::{TextExtents, TextAnchor, anchored_origin};
/// let extents = TextExtents { advance: 100.0, ascent: 40.0, descent: -10.0, ink_top: 8.0, ink_bottom: 40.0 };
/// let anchor: TextAnchor = "ls".parse().unwrap();
/// // Baseline sits at y = 200, so the line box starts one ascent above it.
/// assert_eq!(anchored_origin((50.0, 200.0), anchor, &extents), (50, 160));
/// ```
pub fn anchored_origin(position: (f64, f64), anchor: TextAnchor, extents: &TextExtents) -> (i32, i32) {
    let (x, y) = position;
    let width = f64::from(extents.advance);
    let ascent = f64::from(extents.ascent);
    let descent = f64::from(extents.descent);

    let left = match anchor.horizontal {
        HorizontalAnchor::Left => x,
        HorizontalAnchor::Middle => x - width / 2.0,
        HorizontalAnchor::Right => x - width,
    };
    let top = match anchor.vertical {
        VerticalAnchor::Ascender => y,
        VerticalAnchor::Top => y - f64::from(extents.ink_top),
        VerticalAnchor::Middle => y - (ascent - descent) / 2.0,
        VerticalAnchor::Baseline => y - ascent,
        VerticalAnchor::Bottom => y - f64::from(extents.ink_bottom),
        VerticalAnchor::Descender => y - (ascent - descent),
    };
    (left.round() as i32, top.round() as i32)
}

/// Offsets of a filled disc of radius `width`, used to draw the text outline.
///
/// Returns an empty list for `width == 0`. The center `(0, 0)` is excluded
/// because the fill pass covers it.
pub fn stroke_offsets(width: u32) -> Vec<(i32, i32)> {
    let r = width as i32;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx, dy) != (0, 0) && dx * dx + dy * dy <= r * r {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}
