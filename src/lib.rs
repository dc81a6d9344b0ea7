//! # picdate
//!
//! Stamp each photo's capture date onto the image, the way film cameras used
//! to print it in the corner of the frame.
//!
//! ```text
//! photos/IMG_0001.jpg  ──▶  picdate_result/IMG_0001.jpg   (`23 5 1 in the corner)
//! ```
//!
//! # Pipeline
//!
//! ```text
//! config + font ─▶ batch::run ─▶ plan_tasks ─▶ rayon pool ─▶ worker::annotate (per image)
//!                      │                                           │
//!                      └──────────── BatchEvent (mpsc) ◀───────────┘
//! ```
//!
//! Everything that can be decided once (settings, the font file) is decided
//! before the pool starts and shared read-only. Each image is then an
//! independent task: decode, find the date, place the stamp, draw, encode.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | TOML settings, flag overlays, validation, the immutable [`config::AnnotationConfig`] |
//! | [`date`] | Capture time from EXIF or file modification time, strftime rendering |
//! | [`geometry`] | Stamp position and size, including print-crop compensation |
//! | [`font`] | Locates or downloads the stamp font |
//! | [`imaging`] | [`imaging::ImageBackend`] trait and the pure-Rust backend |
//! | [`worker`] | One image from source to stamped output |
//! | [`batch`] | Enumeration, skip rules, worker pool, timeouts, cancellation |
//! | [`output`] | CLI formatting of batch events |
//!
//! # Design Decisions
//!
//! ## Sources Are Never Written
//!
//! Outputs always go to a separate path. A destination that resolves to its
//! own source is rejected in single-file mode and skipped in directory mode,
//! so a misplaced `--force` cannot destroy an original.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, drawing, and encoding use `image`, `imageproc` and `ab_glyph`.
//! EXIF is read with `kamadak-exif` and written back in whatever container
//! the output format uses. There are no system libraries to install.
//!
//! ## Slow Images Do Not Stall the Batch
//!
//! Every task gets a deadline once the coordinator starts waiting on it. A
//! task that misses it is reported and left behind; the rest of the batch
//! carries on.

pub mod batch;
pub mod config;
pub mod date;
pub mod font;
pub mod geometry;
pub mod imaging;
pub mod output;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;
