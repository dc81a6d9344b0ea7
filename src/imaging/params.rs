//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the annotation worker (which decides where the date goes
//! and how it looks) and the [`backend`](super::backend) (which does the actual
//! pixel work). This separation allows swapping backends (e.g. for testing with
//! a mock) without changing pipeline logic.
//!
//! ## Types
//!
//! - [`Quality`]: JPEG encoding quality (1-100, default 95). Clamped on construction.
//! - [`TextAnchor`]: Which point of the rendered text lands on the draw coordinate.
//! - [`TextParams`]: Everything needed to render the date string.
//! - [`SaveParams`]: Output path, quality, chroma subsampling, EXIF to embed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// An 8-bit RGB triple.
pub type Rgb = [u8; 3];

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(95)
    }
}

/// Horizontal anchor: which x of the text box sits on the draw coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAnchor {
    Left,
    Middle,
    Right,
}

/// Vertical anchor: which y of the text box sits on the draw coordinate.
///
/// `Ascender`, `Middle`, `Baseline` and `Descender` come from the font's line
/// metrics. `Top` and `Bottom` use the ink extents of the actual glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalAnchor {
    Ascender,
    Top,
    Middle,
    Baseline,
    Bottom,
    Descender,
}

/// Two-letter text anchor, e.g. `rb` = right/bottom, `ls` = left/baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAnchor {
    pub horizontal: HorizontalAnchor,
    pub vertical: VerticalAnchor,
}

impl Default for TextAnchor {
    fn default() -> Self {
        Self {
            horizontal: HorizontalAnchor::Right,
            vertical: VerticalAnchor::Bottom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidAnchor(pub String);

impl fmt::Display for InvalidAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid text anchor '{}': expected two letters, horizontal [lmr] then vertical [atmsbd]",
            self.0
        )
    }
}

impl std::error::Error for InvalidAnchor {}

impl FromStr for TextAnchor {
    type Err = InvalidAnchor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || InvalidAnchor(s.to_string());
        let mut chars = s.trim().chars();
        let (Some(h), Some(v), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(err());
        };
        let horizontal = match h.to_ascii_lowercase() {
            'l' => HorizontalAnchor::Left,
            'm' => HorizontalAnchor::Middle,
            'r' => HorizontalAnchor::Right,
            _ => return Err(err()),
        };
        let vertical = match v.to_ascii_lowercase() {
            'a' => VerticalAnchor::Ascender,
            't' => VerticalAnchor::Top,
            'm' => VerticalAnchor::Middle,
            's' => VerticalAnchor::Baseline,
            'b' => VerticalAnchor::Bottom,
            'd' => VerticalAnchor::Descender,
            _ => return Err(err()),
        };
        Ok(Self {
            horizontal,
            vertical,
        })
    }
}

impl fmt::Display for TextAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = match self.horizontal {
            HorizontalAnchor::Left => 'l',
            HorizontalAnchor::Middle => 'm',
            HorizontalAnchor::Right => 'r',
        };
        let v = match self.vertical {
            VerticalAnchor::Ascender => 'a',
            VerticalAnchor::Top => 't',
            VerticalAnchor::Middle => 'm',
            VerticalAnchor::Baseline => 's',
            VerticalAnchor::Bottom => 'b',
            VerticalAnchor::Descender => 'd',
        };
        write!(f, "{h}{v}")
    }
}

/// Parameters for drawing the date string onto an image.
#[derive(Debug, Clone, PartialEq)]
pub struct TextParams<'a> {
    pub text: &'a str,
    /// Draw coordinate in pixels; `anchor` decides which point of the text lands here.
    pub position: (f64, f64),
    pub anchor: TextAnchor,
    pub font_path: &'a Path,
    pub font_px: u32,
    pub color: Rgb,
    pub stroke_width: u32,
    pub stroke_color: Rgb,
}

/// Parameters for encoding and persisting the annotated image.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveParams<'a> {
    pub output: PathBuf,
    pub quality: Quality,
    /// Always `false` from the worker: subsampled chroma smears the thin date strokes.
    pub chroma_subsampling: bool,
    /// Raw EXIF block (TIFF structure, no `Exif\0\0` prefix) to embed verbatim.
    pub exif: Option<&'a [u8]>,
}
