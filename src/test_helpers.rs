//! Shared test utilities for the picdate test suite.
//!
//! Builds real encoded images (with or without an EXIF block) so the
//! `RustBackend`, the date resolver and the worker can be exercised against
//! actual files instead of the mock.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let tiff = build_exif_tiff(Some("2023:05:01 10:00:00"), Some(6));
//! write_test_jpeg(&tmp.path().join("a.jpg"), 120, 80, Some(&tiff));
//! ```

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use walkdir::WalkDir;

use crate::imaging::exif_segment::insert_exif_segment;

// =========================================================================
// EXIF fixtures
// =========================================================================

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

fn push_entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&value);
}

/// Build a big-endian TIFF-structured EXIF block.
///
/// IFD0 carries `Orientation` and, when a capture time is given, a pointer to
/// an Exif sub-IFD holding `DateTimeOriginal`. With both arguments `None` the
/// block still carries `Orientation = 1`, so it is never empty.
pub fn build_exif_tiff(capture_time: Option<&str>, orientation: Option<u16>) -> Vec<u8> {
    let orientation = match (capture_time, orientation) {
        (None, None) => Some(1),
        (_, o) => o,
    };
    let ifd0_entries = orientation.is_some() as u32 + capture_time.is_some() as u32;
    let ifd0_offset = 8u32;
    let exif_ifd_offset = ifd0_offset + 2 + 12 * ifd0_entries + 4;
    let data_offset = exif_ifd_offset + 2 + 12 + 4;

    let mut out = Vec::new();
    out.extend_from_slice(b"MM");
    out.extend_from_slice(&42u16.to_be_bytes());
    out.extend_from_slice(&ifd0_offset.to_be_bytes());

    // IFD0, tags in ascending order
    out.extend_from_slice(&(ifd0_entries as u16).to_be_bytes());
    if let Some(value) = orientation {
        let v = value.to_be_bytes();
        push_entry(&mut out, 0x0112, TYPE_SHORT, 1, [v[0], v[1], 0, 0]);
    }
    if capture_time.is_some() {
        push_entry(&mut out, 0x8769, TYPE_LONG, 1, exif_ifd_offset.to_be_bytes());
    }
    out.extend_from_slice(&0u32.to_be_bytes());

    if let Some(text) = capture_time {
        assert_eq!(out.len() as u32, exif_ifd_offset);
        let count = text.len() as u32 + 1;
        out.extend_from_slice(&1u16.to_be_bytes());
        push_entry(&mut out, 0x9003, TYPE_ASCII, count, data_offset.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(text.as_bytes());
        out.push(0);
    }
    out
}

// =========================================================================
// Image files
// =========================================================================

/// Write a gradient JPEG, optionally carrying `exif` in an APP1 segment.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32, exif: Option<&[u8]>) {
    let pixels = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90)
        .write_image(pixels.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    if let Some(tiff) = exif {
        insert_exif_segment(&mut bytes, tiff).unwrap();
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

// =========================================================================
// Fonts
// =========================================================================

const FONT_DIRS: &[&str] = &[
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/System/Library/Fonts",
    "/Library/Fonts",
    "C:\\Windows\\Fonts",
];

/// Any TrueType font installed on this machine, DejaVu Sans if present.
///
/// Tests that rasterize text return early when this is `None`.
pub fn find_system_font() -> Option<PathBuf> {
    let fonts: Vec<PathBuf> = FONT_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("ttf"))
        })
        .collect();

    fonts
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == "DejaVuSans.ttf"))
        .or_else(|| fonts.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exif_fixture_is_readable_by_kamadak() {
        let tiff = build_exif_tiff(Some("2023:05:01 10:00:00"), Some(8));
        let exif = exif::Reader::new().read_raw(tiff).unwrap();
        let date = exif
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .unwrap();
        assert!(matches!(&date.value, exif::Value::Ascii(v) if v[0] == b"2023:05:01 10:00:00"));
        let orientation = exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        assert_eq!(orientation, Some(8));
    }

    #[test]
    fn empty_fixture_still_has_orientation() {
        let tiff = build_exif_tiff(None, None);
        let exif = exif::Reader::new().read_raw(tiff).unwrap();
        assert!(exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY).is_none());
        assert!(exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY).is_some());
    }
}
