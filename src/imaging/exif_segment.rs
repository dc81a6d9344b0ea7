//! Minimal EXIF plumbing for JPEG output.
//!
//! Two byte-level operations that the `image` crate does not offer:
//! - splice an APP1 `Exif\0\0` segment into an encoded JPEG stream
//! - reset the IFD0 Orientation tag of a raw EXIF block to "normal"
//!
//! The EXIF block is the TIFF structure as returned by `kamadak-exif`
//! (`Exif::buf`), i.e. without the `Exif\0\0` identifier.

use super::backend::BackendError;

/// Identifier that opens every EXIF APP1 segment.
pub const EXIF_IDENTIFIER: &[u8; 6] = b"Exif\0\0";

const MARKER_SOI: u8 = 0xD8;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const TAG_ORIENTATION: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;

/// Largest payload a single JPEG segment can carry (length field includes itself).
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

fn read_u16(bytes: &[u8], little_endian: bool) -> u16 {
    let pair = [bytes[0], bytes[1]];
    if little_endian {
        u16::from_le_bytes(pair)
    } else {
        u16::from_be_bytes(pair)
    }
}

fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let quad = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian {
        u32::from_le_bytes(quad)
    } else {
        u32::from_be_bytes(quad)
    }
}

/// Set IFD0 Orientation to 1 in place. Returns `true` if the tag was found.
///
/// Malformed or truncated blocks are left untouched.
pub fn normalize_orientation(tiff: &mut [u8]) -> bool {
    if tiff.len() < 8 {
        return false;
    }
    let little_endian = match &tiff[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return false,
    };
    let ifd = read_u32(&tiff[4..8], little_endian) as usize;
    if ifd + 2 > tiff.len() {
        return false;
    }
    let entries = read_u16(&tiff[ifd..ifd + 2], little_endian) as usize;
    for i in 0..entries {
        let entry = ifd + 2 + i * 12;
        if entry + 12 > tiff.len() {
            return false;
        }
        let tag = read_u16(&tiff[entry..entry + 2], little_endian);
        if tag != TAG_ORIENTATION {
            continue;
        }
        if read_u16(&tiff[entry + 2..entry + 4], little_endian) != TYPE_SHORT {
            return false;
        }
        let value = if little_endian {
            1u16.to_le_bytes()
        } else {
            1u16.to_be_bytes()
        };
        tiff[entry + 8..entry + 10].copy_from_slice(&value);
        return true;
    }
    false
}

/// Insert `tiff` as an EXIF APP1 segment into an encoded JPEG.
///
/// Any existing EXIF APP1 segment is replaced. The new segment goes after the
/// JFIF APP0 segment when the encoder wrote one, otherwise right after SOI.
pub fn insert_exif_segment(jpeg: &mut Vec<u8>, tiff: &[u8]) -> Result<(), BackendError> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != MARKER_SOI {
        return Err(BackendError::Encode("output is not a JPEG stream".into()));
    }
    let payload_len = EXIF_IDENTIFIER.len() + tiff.len();
    if payload_len > MAX_SEGMENT_PAYLOAD {
        return Err(BackendError::Encode(format!(
            "EXIF block of {} bytes does not fit in one APP1 segment",
            tiff.len()
        )));
    }

    remove_exif_segments(jpeg);

    let mut insert_at = 2;
    if jpeg.len() >= 6 && jpeg[2] == 0xFF && jpeg[3] == MARKER_APP0 {
        let len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        insert_at = (4 + len).min(jpeg.len());
    }

    let mut segment = Vec::with_capacity(4 + payload_len);
    segment.extend_from_slice(&[0xFF, MARKER_APP1]);
    segment.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
    segment.extend_from_slice(EXIF_IDENTIFIER);
    segment.extend_from_slice(tiff);
    jpeg.splice(insert_at..insert_at, segment);
    Ok(())
}

/// Drop every APP1 segment carrying the EXIF identifier, up to the first SOS.
fn remove_exif_segments(jpeg: &mut Vec<u8>) {
    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if marker == MARKER_SOS {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 {
            break;
        }
        let end = (pos + 2 + len).min(jpeg.len());
        let is_exif = marker == MARKER_APP1 && jpeg[pos + 4..end].starts_with(EXIF_IDENTIFIER);
        if is_exif {
            jpeg.drain(pos..end);
        } else {
            pos = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::build_exif_tiff;

    /// SOI + JFIF APP0 + a fake SOS segment.
    fn fake_jpeg() -> Vec<u8> {
        let mut jpeg = vec![0xFF, MARKER_SOI];
        jpeg.extend_from_slice(&[0xFF, MARKER_APP0, 0x00, 0x07]);
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[0xFF, MARKER_SOS, 0x00, 0x02, 0xAB, 0xFF, 0xD9]);
        jpeg
    }

    fn orientation_of(tiff: &[u8]) -> u16 {
        let exif = exif::Reader::new().read_raw(tiff.to_vec()).unwrap();
        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .unwrap() as u16
    }

    #[test]
    fn normalize_resets_orientation() {
        let mut tiff = build_exif_tiff(Some("2023:05:01 10:00:00"), Some(6));
        assert_eq!(orientation_of(&tiff), 6);
        assert!(normalize_orientation(&mut tiff));
        assert_eq!(orientation_of(&tiff), 1);
    }

    #[test]
    fn normalize_without_orientation_tag() {
        let mut tiff = build_exif_tiff(Some("2023:05:01 10:00:00"), None);
        let before = tiff.clone();
        assert!(!normalize_orientation(&mut tiff));
        assert_eq!(tiff, before);
    }

    #[test]
    fn normalize_ignores_garbage() {
        let mut garbage = b"not a tiff header".to_vec();
        assert!(!normalize_orientation(&mut garbage));
        let mut short = vec![0u8; 3];
        assert!(!normalize_orientation(&mut short));
    }

    #[test]
    fn insert_places_segment_after_app0() {
        let mut jpeg = fake_jpeg();
        insert_exif_segment(&mut jpeg, b"MM\0*data").unwrap();

        // SOI (2) + APP0 (2 + 7) = 11
        assert_eq!(&jpeg[11..13], &[0xFF, MARKER_APP1]);
        let len = u16::from_be_bytes([jpeg[13], jpeg[14]]) as usize;
        assert_eq!(len, 2 + 6 + 8);
        assert_eq!(&jpeg[15..21], EXIF_IDENTIFIER);
        assert_eq!(&jpeg[21..29], b"MM\0*data");
        assert_eq!(&jpeg[29..31], &[0xFF, MARKER_SOS]);
    }

    #[test]
    fn insert_replaces_existing_exif() {
        let mut jpeg = fake_jpeg();
        insert_exif_segment(&mut jpeg, b"first").unwrap();
        insert_exif_segment(&mut jpeg, b"second").unwrap();

        let count = jpeg
            .windows(EXIF_IDENTIFIER.len())
            .filter(|w| *w == EXIF_IDENTIFIER.as_slice())
            .count();
        assert_eq!(count, 1);
        assert!(jpeg.windows(6).any(|w| w == b"second"));
    }

    #[test]
    fn insert_rejects_non_jpeg() {
        let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
        assert!(insert_exif_segment(&mut png, b"MM\0*").is_err());
    }

    #[test]
    fn inserted_block_is_readable() {
        let tiff = build_exif_tiff(Some("2021:12:24 18:30:00"), Some(1));
        let mut jpeg = fake_jpeg();
        insert_exif_segment(&mut jpeg, &tiff).unwrap();

        let exif = exif::Reader::new()
            .read_from_container(&mut std::io::Cursor::new(&jpeg))
            .unwrap();
        assert_eq!(exif.buf(), tiff.as_slice());
    }
}
