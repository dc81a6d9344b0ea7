//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | EXIF read | `kamadak-exif` (`Reader::read_from_container`) |
//! | Glyph layout + metrics | `ab_glyph` |
//! | Text rasterization | `imageproc::drawing::draw_text_mut` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (always 4:4:4) + APP1 splice from [`exif_segment`](super::exif_segment) |
//! | Encode → PNG / WebP | `PngEncoder` / `WebPEncoder` with `set_exif_metadata` (`eXIf` / `EXIF` chunk) |
//! | Encode → TIFF | `kamadak-exif` `Writer`: one uncompressed strip, EXIF fields as tags |
//!
//! Outputs are encoded in memory and land on disk through a sibling
//! `.<name>.part` file that is renamed into place, so an interrupted run
//! never leaves a truncated image at the output path.

use super::backend::{BackendError, EmbeddedMetadata, ImageBackend, SourceImage};
use super::calculations::{TextExtents, anchored_origin, stroke_offsets};
use super::exif_segment;
use super::params::{Rgb, SaveParams, TextParams};
use ab_glyph::{Font, FontVec, GlyphId, PxScale, ScaleFont, point};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, Rgba};
use imageproc::drawing::draw_text_mut;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled() && fmt.writing_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that can be both decoded and re-encoded.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// Fonts are parsed on first use and shared by every later `draw_text` call
/// with the same path. See the [module docs](self) for the crate-to-operation
/// mapping.
#[derive(Default)]
pub struct RustBackend {
    fonts: Mutex<HashMap<PathBuf, Arc<FontVec>>>,
}

impl RustBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn font(&self, path: &Path) -> Result<Arc<FontVec>, BackendError> {
        let mut fonts = self.fonts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(font) = fonts.get(path) {
            return Ok(Arc::clone(font));
        }
        let font = Arc::new(load_font(path)?);
        tracing::debug!(font = %path.display(), "font parsed");
        fonts.insert(path.to_path_buf(), Arc::clone(&font));
        Ok(font)
    }
}

/// Extract the fields the pipeline cares about from the file's EXIF block.
///
/// A missing or unreadable EXIF container counts as "no metadata". Only the
/// capture-time field itself is judged strictly, later, by the date resolver.
fn read_metadata(bytes: &[u8], path: &Path) -> Option<EmbeddedMetadata> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return None,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "unreadable EXIF container, treating as absent");
            return None;
        }
    };

    let capture_time = exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .map(|field| match &field.value {
            exif::Value::Ascii(parts) => parts
                .first()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            // Wrong type for this tag: hand the rendering to the resolver, which rejects it.
            _ => field.display_value().to_string(),
        });

    let orientation = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(|v| u16::try_from(v).ok());

    Some(EmbeddedMetadata {
        capture_time,
        orientation,
        exif: exif.buf().to_vec(),
    })
}

fn load_font(path: &Path) -> Result<FontVec, BackendError> {
    let bytes = std::fs::read(path)?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| BackendError::Font(format!("{}: {e}", path.display())))
}

/// Lay the text out the same way `draw_text_mut` does and measure it.
///
/// Kerning is added after the advance and only between outlined glyphs,
/// matching imageproc's layout so right anchors land where the ink does.
fn measure_text(font: &FontVec, scale: PxScale, text: &str) -> TextExtents {
    let scaled = font.as_scaled(scale);
    let ascent = scaled.ascent();
    let mut caret = 0.0f32;
    let mut last: Option<GlyphId> = None;
    let mut ink_top = f32::MAX;
    let mut ink_bottom = f32::MIN;

    for c in text.chars() {
        let id = scaled.glyph_id(c);
        let glyph = id.with_scale_and_position(scale, point(caret, ascent));
        caret += scaled.h_advance(id);
        if let Some(outlined) = font.outline_glyph(glyph) {
            if let Some(last) = last {
                caret += scaled.kern(id, last);
            }
            last = Some(id);
            let bounds = outlined.px_bounds();
            ink_top = ink_top.min(bounds.min.y);
            ink_bottom = ink_bottom.max(bounds.max.y);
        }
    }

    // Whitespace-only text has no ink; collapse onto the baseline.
    if ink_top > ink_bottom {
        ink_top = ascent;
        ink_bottom = ascent;
    }

    TextExtents {
        advance: caret,
        ascent,
        descent: scaled.descent(),
        ink_top,
        ink_bottom,
    }
}

fn rgba(color: Rgb) -> Rgba<u8> {
    Rgba([color[0], color[1], color[2], 255])
}

fn encode_jpeg(pixels: &DynamicImage, params: &SaveParams) -> Result<Vec<u8>, BackendError> {
    let rgb = pixels.to_rgb8();
    let mut bytes = Vec::new();
    // The quality is clamped to 1..=100 by `Quality`, so it always fits in a u8.
    JpegEncoder::new_with_quality(&mut bytes, params.quality.value() as u8)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| encode_error(params, e))?;

    if let Some(exif) = params.exif {
        exif_segment::insert_exif_segment(&mut bytes, exif)?;
    }
    Ok(bytes)
}

/// Encode with an `image` encoder that carries EXIF in its own container chunk.
fn encode_with<E: ImageEncoder>(
    pixels: &DynamicImage,
    mut encoder: E,
    params: &SaveParams,
) -> Result<(), BackendError> {
    if let Some(exif) = params.exif {
        encoder
            .set_exif_metadata(exif.to_vec())
            .map_err(|e| encode_error(params, e))?;
    }
    pixels
        .write_with_encoder(encoder)
        .map_err(|e| encode_error(params, e))
}

/// TIFF tags that describe the pixel layout. The output's own layout replaces
/// whatever the source block said about these.
const TIFF_LAYOUT_TAGS: &[u16] = &[
    254, 255, 256, 257, 258, 259, 262, 266, 273, 277, 278, 279, 284, 317, 320, 322, 323, 324,
    325, 338, 339, 347, 530,
];
const TAG_EXTRA_SAMPLES: u16 = 338;

fn layout_field(number: u16, value: exif::Value) -> exif::Field {
    exif::Field {
        tag: exif::Tag(exif::Context::Tiff, number),
        ifd_num: exif::In::PRIMARY,
        value,
    }
}

fn carries_over(field: &exif::Field) -> bool {
    field.ifd_num == exif::In::PRIMARY
        && !matches!(field.value, exif::Value::Unknown(..))
        && !(field.tag.context() == exif::Context::Tiff
            && TIFF_LAYOUT_TAGS.contains(&field.tag.number()))
}

/// TIFF keeps EXIF as tags of the image's own IFD rather than a separate
/// block, so the file is written as one uncompressed strip with the source
/// fields merged in.
fn encode_tiff_with_exif(pixels: &DynamicImage, exif: &[u8]) -> Result<Vec<u8>, exif::Error> {
    let source = exif::Reader::new().read_raw(exif.to_vec())?;
    let (width, height) = (pixels.width(), pixels.height());
    let (samples, strip) = if pixels.color().has_alpha() {
        (4u16, pixels.to_rgba8().into_raw())
    } else {
        (3u16, pixels.to_rgb8().into_raw())
    };

    let mut fields = vec![
        layout_field(256, exif::Value::Long(vec![width])),
        layout_field(257, exif::Value::Long(vec![height])),
        layout_field(258, exif::Value::Short(vec![8; usize::from(samples)])),
        layout_field(259, exif::Value::Short(vec![1])),
        layout_field(262, exif::Value::Short(vec![2])),
        layout_field(277, exif::Value::Short(vec![samples])),
        layout_field(278, exif::Value::Long(vec![height])),
        layout_field(284, exif::Value::Short(vec![1])),
    ];
    if samples == 4 {
        // Unassociated alpha.
        fields.push(layout_field(TAG_EXTRA_SAMPLES, exif::Value::Short(vec![2])));
    }
    fields.extend(source.fields().filter(|f| carries_over(f)).cloned());

    let strips = [strip.as_slice()];
    let mut writer = exif::experimental::Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    writer.set_strips(&strips, exif::In::PRIMARY);
    let mut out = Cursor::new(Vec::new());
    writer.write(&mut out, source.little_endian())?;
    Ok(out.into_inner())
}

fn encode_error(params: &SaveParams, e: impl std::fmt::Display) -> BackendError {
    BackendError::Encode(format!("{}: {e}", params.output.display()))
}

/// Write `bytes` next to `path` and rename the file into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let Some(name) = path.file_name() else {
        return Err(BackendError::Encode(format!(
            "{}: output path has no file name",
            path.display()
        )));
    };
    let mut part_name = OsString::from(".");
    part_name.push(name);
    part_name.push(".part");
    let part = path.with_file_name(part_name);

    let written = std::fs::write(&part, bytes).and_then(|()| std::fs::rename(&part, path));
    if let Err(e) = written {
        let _ = std::fs::remove_file(&part);
        return Err(e.into());
    }
    Ok(())
}

impl ImageBackend for RustBackend {
    fn open(&self, path: &Path) -> Result<SourceImage, BackendError> {
        let bytes = std::fs::read(path)?;
        let pixels = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()?
            .decode()
            .map_err(|e| BackendError::Decode(format!("{}: {e}", path.display())))?;
        let metadata = read_metadata(&bytes, path);
        Ok(SourceImage::new(pixels, metadata))
    }

    fn draw_text(&self, image: &mut SourceImage, params: &TextParams) -> Result<(), BackendError> {
        let font = self.font(params.font_path)?;
        let font = font.as_ref();
        let scale = PxScale::from(params.font_px as f32);
        let extents = measure_text(font, scale, params.text);
        let (x, y) = anchored_origin(params.position, params.anchor, &extents);

        let pixels = image.pixels_mut();
        let keep_alpha = pixels.color().has_alpha();
        let mut canvas = pixels.to_rgba8();

        let stroke = rgba(params.stroke_color);
        for (dx, dy) in stroke_offsets(params.stroke_width) {
            draw_text_mut(&mut canvas, stroke, x + dx, y + dy, scale, font, params.text);
        }
        draw_text_mut(&mut canvas, rgba(params.color), x, y, scale, font, params.text);

        *pixels = if keep_alpha {
            DynamicImage::ImageRgba8(canvas)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).into_rgb8())
        };
        Ok(())
    }

    fn save(&self, image: &SourceImage, params: &SaveParams) -> Result<(), BackendError> {
        let format = ImageFormat::from_path(&params.output).map_err(|e| encode_error(params, e))?;
        if params.chroma_subsampling {
            tracing::debug!("chroma subsampling requested but the JPEG encoder always writes 4:4:4");
        }

        let pixels = image.pixels();
        let bytes = match (format, params.exif) {
            (ImageFormat::Jpeg, _) => encode_jpeg(pixels, params)?,
            (ImageFormat::Png, _) => {
                let mut bytes = Vec::new();
                encode_with(pixels, PngEncoder::new(&mut bytes), params)?;
                bytes
            }
            (ImageFormat::WebP, _) => {
                let mut bytes = Vec::new();
                encode_with(pixels, WebPEncoder::new_lossless(&mut bytes), params)?;
                bytes
            }
            (ImageFormat::Tiff, Some(exif)) => {
                encode_tiff_with_exif(pixels, exif).map_err(|e| encode_error(params, e))?
            }
            (other, _) => {
                let mut bytes = Cursor::new(Vec::new());
                pixels
                    .write_to(&mut bytes, other)
                    .map_err(|e| encode_error(params, e))?;
                bytes.into_inner()
            }
        };
        write_atomically(&params.output, &bytes)
    }
}
