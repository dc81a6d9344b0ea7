//! Capture date resolution.
//!
//! The date stamped onto a photo comes from one of two places, in order:
//!
//! 1. EXIF `DateTimeOriginal` (`0x9003`), the moment the shutter fired,
//!    stored as `YYYY:MM:DD hh:mm:ss` in camera-local time.
//! 2. The file's modification time, converted to local time.
//!
//! A missing field is an expected degradation (scans, screenshots, edited
//! exports) and silently falls back to the modification time. A field that is
//! present but unparseable is an error: the file claims to know when it was
//! taken, and stamping a different date would be wrong.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::fmt::Write;
use std::time::SystemTime;
use thiserror::Error;

/// Fixed textual layout of EXIF date/time fields.
pub const EXIF_DATETIME_LAYOUT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum DateError {
    #[error("malformed capture time '{value}' (expected YYYY:MM:DD hh:mm:ss)")]
    Malformed {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("cannot read file modification time")]
    ModifiedTime(#[source] std::io::Error),
    #[error("date format '{0}' cannot render a local date")]
    Format(String),
}

/// Where a [`ResolvedDate`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    MetadataOriginal,
    FileModified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub instant: NaiveDateTime,
    pub source: DateSource,
}

/// Parse an EXIF date/time value. Whitespace and NUL padding are ignored.
pub fn parse_capture_time(raw: &str) -> Result<NaiveDateTime, DateError> {
    let value = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    NaiveDateTime::parse_from_str(value, EXIF_DATETIME_LAYOUT).map_err(|source| {
        DateError::Malformed {
            value: value.to_string(),
            source,
        }
    })
}

/// Resolve the date to stamp.
///
/// `modified` is only called when the capture time is absent, so callers can
/// pass a lazy filesystem lookup.
pub fn resolve_date(
    capture_time: Option<&str>,
    modified: impl FnOnce() -> std::io::Result<SystemTime>,
) -> Result<ResolvedDate, DateError> {
    match capture_time {
        Some(raw) => Ok(ResolvedDate {
            instant: parse_capture_time(raw)?,
            source: DateSource::MetadataOriginal,
        }),
        None => {
            let mtime = modified().map_err(DateError::ModifiedTime)?;
            Ok(ResolvedDate {
                instant: DateTime::<Local>::from(mtime).naive_local(),
                source: DateSource::FileModified,
            })
        }
    }
}

/// Render a date with a strftime pattern (chrono syntax, e.g. `` `%y %-m %-d ``).
pub fn format_date(instant: &NaiveDateTime, pattern: &str) -> Result<String, DateError> {
    let mut out = String::new();
    write!(out, "{}", instant.format(pattern)).map_err(|_| DateError::Format(pattern.to_string()))?;
    Ok(out)
}

/// Check a pattern once, up front, so rendering never fails mid-batch.
pub fn validate_date_format(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("date format must not be empty".into());
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(format!("date format '{pattern}' has an unknown specifier"));
    }
    // Offsets and zone names need a timezone we never have.
    let sample = NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| "internal sample date is invalid".to_string())?;
    format_date(&sample, pattern).map(|_| ()).map_err(|e| e.to_string())
}
