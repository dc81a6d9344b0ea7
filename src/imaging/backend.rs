//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations the annotation
//! pipeline needs from an imaging library: open (decode + metadata),
//! draw_text, and save.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Everything is
//! statically linked into the binary.

use super::exif_segment;
use super::params::{SaveParams, TextParams};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode: {0}")]
    Decode(String),
    #[error("Font error: {0}")]
    Font(String),
    #[error("Failed to encode: {0}")]
    Encode(String),
}

/// EXIF `Orientation` value meaning "stored pixels are already upright".
pub const ORIENTATION_NORMAL: u16 = 1;

/// Embedded metadata read from the source file's EXIF block.
///
/// - `capture_time`: raw `DateTimeOriginal` (`0x9003`) text, untouched
/// - `orientation`: EXIF `Orientation` (`0x0112`), 1 to 8
/// - `exif`: the whole EXIF block (TIFF structure), re-embedded verbatim on save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedMetadata {
    pub capture_time: Option<String>,
    pub orientation: Option<u16>,
    pub exif: Vec<u8>,
}

/// A decoded image owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: DynamicImage,
    metadata: Option<EmbeddedMetadata>,
    orientation_applied: bool,
}

impl SourceImage {
    pub fn new(pixels: DynamicImage, metadata: Option<EmbeddedMetadata>) -> Self {
        Self {
            pixels,
            metadata,
            orientation_applied: false,
        }
    }

    /// Current raster dimensions (after any applied orientation).
    pub fn dimensions(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }

    pub fn metadata(&self) -> Option<&EmbeddedMetadata> {
        self.metadata.as_ref()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut DynamicImage {
        &mut self.pixels
    }

    pub fn orientation_applied(&self) -> bool {
        self.orientation_applied
    }

    /// Rotate/flip the pixels so they display upright per the EXIF orientation.
    ///
    /// Returns `true` when the pixels changed. Applying twice is a no-op.
    pub fn apply_stored_orientation(&mut self) -> bool {
        if self.orientation_applied {
            return false;
        }
        let orientation = self
            .metadata
            .as_ref()
            .and_then(|m| m.orientation)
            .unwrap_or(ORIENTATION_NORMAL);
        let pixels = &self.pixels;
        let rotated = match orientation {
            2 => pixels.fliph(),
            3 => pixels.rotate180(),
            4 => pixels.flipv(),
            5 => pixels.rotate90().fliph(),
            6 => pixels.rotate90(),
            7 => pixels.rotate270().fliph(),
            8 => pixels.rotate270(),
            _ => return false,
        };
        self.pixels = rotated;
        self.orientation_applied = true;
        true
    }

    /// The EXIF block to write into the output file, if the source had one.
    ///
    /// When the pixels were physically rotated the Orientation tag is reset to
    /// normal, otherwise viewers would rotate the stamped image a second time.
    pub fn exif_to_embed(&self) -> Option<Vec<u8>> {
        let metadata = self.metadata.as_ref()?;
        if metadata.exif.is_empty() {
            return None;
        }
        let mut exif = metadata.exif.clone();
        if self.orientation_applied {
            exif_segment::normalize_orientation(&mut exif);
        }
        Some(exif)
    }
}

/// Trait for image processing backends.
///
/// Every backend must implement all three operations so the annotation
/// pipeline stays backend-agnostic. Backends are shared by every worker
/// thread, hence `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Decode the image and read its embedded metadata.
    ///
    /// A file without an EXIF block is not an error: `metadata()` is `None`.
    fn open(&self, path: &std::path::Path) -> Result<SourceImage, BackendError>;

    /// Render text onto the image.
    fn draw_text(&self, image: &mut SourceImage, params: &TextParams) -> Result<(), BackendError>;

    /// Encode and write the image.
    fn save(&self, image: &SourceImage, params: &SaveParams) -> Result<(), BackendError>;
}
