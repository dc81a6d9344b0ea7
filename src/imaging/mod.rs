//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` |
//! | **EXIF metadata** | `kamadak-exif` read, custom APP1 splice on write |
//! | **Orientation** | `DynamicImage::rotate*` / `flip*` per EXIF tag |
//! | **Date text** | `imageproc::drawing::draw_text_mut` + `ab_glyph` |
//! | **Encode** | `image` JPEG encoder (4:4:4), PNG/TIFF/WebP by extension |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for anchor and stroke math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **EXIF segment**: byte-level JPEG APP1 handling

pub mod backend;
mod calculations;
pub(crate) mod exif_segment;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, EmbeddedMetadata, ImageBackend, SourceImage};
pub use calculations::{TextExtents, anchored_origin, stroke_offsets};
pub use params::{
    HorizontalAnchor, InvalidAnchor, Quality, Rgb, SaveParams, TextAnchor, TextParams,
    VerticalAnchor,
};
pub use rust_backend::{RustBackend, supported_input_extensions};
