//! Single-image annotation.
//!
//! One call to [`annotate`] takes one [`ImageTask`] from source file to
//! stamped output:
//!
//! ```text
//! open ─▶ resolve date ─▶ orient ─▶ plan geometry ─▶ draw ─▶ mkdir ─▶ save
//! ```
//!
//! Every expected failure comes back as a [`TaskFailure`] naming the step
//! that failed, so the batch can report it and move on.

use crate::config::AnnotationConfig;
use crate::date::{DateError, DateSource, format_date, resolve_date};
use crate::geometry::{Geometry, plan_geometry};
use crate::imaging::{BackendError, ImageBackend, SaveParams, TextParams};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One source file and where its stamped copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Pipeline step, for failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Decode,
    ReadModifiedTime,
    ResolveDate,
    Render,
    CreateOutputDir,
    Encode,
    /// The worker panicked; the step is unknown.
    Internal,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Decode => "decode",
            Step::ReadModifiedTime => "read modification time",
            Step::ResolveDate => "resolve date",
            Step::Render => "render",
            Step::CreateOutputDir => "create output directory",
            Step::Encode => "encode",
            Step::Internal => "worker",
        })
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Date(#[from] DateError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// A task that could not be completed.
#[derive(Error, Debug)]
#[error("{}: {step} failed", input.display())]
pub struct TaskFailure {
    pub input: PathBuf,
    pub step: Step,
    /// Where the date came from, when the task got that far.
    pub date_source: Option<DateSource>,
    #[source]
    pub source: WorkerError,
}

impl TaskFailure {
    fn new(task: &ImageTask, step: Step, source: impl Into<WorkerError>) -> Self {
        Self {
            input: task.input.clone(),
            step,
            date_source: None,
            source: source.into(),
        }
    }

    fn dated(mut self, source: DateSource) -> Self {
        self.date_source = Some(source);
        self
    }

    pub fn panicked(input: PathBuf, message: String) -> Self {
        Self {
            input,
            step: Step::Internal,
            date_source: None,
            source: WorkerError::Panicked(message),
        }
    }
}

/// What a successful task did.
#[derive(Debug, Clone, PartialEq)]
pub struct StampReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub date_source: DateSource,
    /// The text that was drawn.
    pub formatted: String,
    pub geometry: Geometry,
}

/// Stamp one image. Never touches the input file.
pub fn annotate(
    backend: &impl ImageBackend,
    task: &ImageTask,
    config: &AnnotationConfig,
) -> Result<StampReport, TaskFailure> {
    let mut image = backend
        .open(&task.input)
        .map_err(|e| TaskFailure::new(task, Step::Decode, e))?;

    let capture_time = image.metadata().and_then(|m| m.capture_time.as_deref());
    let date = resolve_date(capture_time, || {
        std::fs::metadata(&task.input).and_then(|m| m.modified())
    })
    .map_err(|e| {
        let step = match e {
            DateError::ModifiedTime(_) => Step::ReadModifiedTime,
            _ => Step::ResolveDate,
        };
        TaskFailure::new(task, step, e)
    })?;
    if date.source == DateSource::FileModified {
        tracing::info!(input = %task.input.display(), "no capture time, using modification time");
    }
    let failed = |step: Step, e: WorkerError| TaskFailure::new(task, step, e).dated(date.source);

    // Without metadata there is no stored orientation to honour.
    if image.metadata().is_some() && image.apply_stored_orientation() {
        tracing::debug!(input = %task.input.display(), "applied stored orientation");
    }

    let (width, height) = image.dimensions();
    let geometry = plan_geometry(width, height, config);
    if geometry.is_cropped() {
        tracing::debug!(
            input = %task.input.display(),
            offset_w = geometry.offset_w,
            offset_h = geometry.offset_h,
            "placement adjusted for print crop"
        );
    }

    let text = format_date(&date.instant, &config.date_format)
        .map_err(|e| failed(Step::Render, e.into()))?;
    backend
        .draw_text(
            &mut image,
            &TextParams {
                text: &text,
                position: (geometry.draw_x, geometry.draw_y),
                anchor: config.text_anchor,
                font_path: &config.font_path,
                font_px: geometry.font_px,
                color: config.text_color,
                stroke_width: config.stroke_width,
                stroke_color: config.stroke_color,
            },
        )
        .map_err(|e| failed(Step::Render, e.into()))?;

    if let Some(parent) = task.output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| failed(Step::CreateOutputDir, e.into()))?;
    }

    let exif = image.exif_to_embed();
    backend
        .save(
            &image,
            &SaveParams {
                output: task.output.clone(),
                quality: config.quality,
                chroma_subsampling: false,
                exif: exif.as_deref(),
            },
        )
        .map_err(|e| failed(Step::Encode, e.into()))?;

    tracing::debug!(
        input = %task.input.display(),
        output = %task.output.display(),
        text = %text,
        "stamped"
    );
    Ok(StampReport {
        input: task.input.clone(),
        output: task.output.clone(),
        date_source: date.source,
        formatted: text,
        geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StampConfig;
    use crate::imaging::backend::tests::{MOCK_SAVE_MARKER, MockBackend, MockImage, RecordedOp};
    use std::path::Path;
    use tempfile::TempDir;

    fn config() -> AnnotationConfig {
        AnnotationConfig::from_settings(&StampConfig::default(), PathBuf::from("/fonts/stamp.ttf"))
            .unwrap()
    }

    fn task(tmp: &TempDir, name: &str) -> ImageTask {
        ImageTask {
            input: tmp.path().join("src").join(name),
            output: tmp.path().join("dst").join(name),
        }
    }

    // =========================================================================
    // Happy paths
    // =========================================================================

    #[test]
    fn stamps_capture_date() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "a.jpg");
        let backend = MockBackend::with_default(
            MockImage::new(6000, 4000).with_capture_time("2023:05:01 10:00:00"),
        );

        let report = annotate(&backend, &task, &config()).unwrap();

        assert_eq!(report.formatted, "`23 5 1");
        assert_eq!(report.date_source, DateSource::MetadataOriginal);
        assert_eq!(report.output, task.output);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], RecordedOp::Open(p) if Path::new(p) == task.input));
        match &ops[1] {
            RecordedOp::DrawText { text, x, y, font_px, anchor } => {
                assert_eq!(text, "`23 5 1");
                assert!((x - 6000.0 * 0.94).abs() < 1e-9);
                assert!((y - 4000.0 * 0.94).abs() < 1e-9);
                assert_eq!(*font_px, 167);
                assert_eq!(anchor, "rb");
            }
            other => panic!("expected DrawText, got {other:?}"),
        }
        match &ops[2] {
            RecordedOp::Save { quality, chroma_subsampling, exif, .. } => {
                assert_eq!(*quality, 95);
                assert!(!chroma_subsampling);
                assert_eq!(exif.as_deref(), Some(b"MM\0*mock".as_slice()));
            }
            other => panic!("expected Save, got {other:?}"),
        }
        assert_eq!(std::fs::read(&task.output).unwrap(), MOCK_SAVE_MARKER);
    }

    #[test]
    fn falls_back_to_modification_time() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "scan.png");
        std::fs::create_dir_all(task.input.parent().unwrap()).unwrap();
        std::fs::write(&task.input, b"pixels").unwrap();
        let backend = MockBackend::new();

        let report = annotate(&backend, &task, &config()).unwrap();

        assert_eq!(report.date_source, DateSource::FileModified);
        assert!(report.formatted.starts_with('`'));
        // No EXIF in, no EXIF out.
        assert!(matches!(
            backend.get_operations().last(),
            Some(RecordedOp::Save { exif: None, .. })
        ));
    }

    #[test]
    fn orientation_applied_before_planning() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "rotated.jpg");
        let backend = MockBackend::with_default(
            MockImage::new(600, 400)
                .with_capture_time("2020:01:02 03:04:05")
                .with_orientation(6),
        );

        let report = annotate(&backend, &task, &config()).unwrap();

        // Planned on the upright 400x600 frame.
        assert_eq!(report.geometry, plan_geometry(400, 600, &config()));
    }

    #[test]
    fn creates_missing_output_directories() {
        let tmp = TempDir::new().unwrap();
        let task = ImageTask {
            input: tmp.path().join("a.jpg"),
            output: tmp.path().join("deep/er/a.jpg"),
        };
        let backend =
            MockBackend::with_default(MockImage::new(100, 100).with_capture_time("2001:01:01 00:00:00"));

        annotate(&backend, &task, &config()).unwrap();
        assert!(task.output.exists());
    }

    #[test]
    fn uses_configured_style() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "a.jpg");
        let mut config = config();
        config.date_format = "%Y.%m.%d".into();
        config.quality = crate::imaging::Quality::new(70);
        let backend =
            MockBackend::with_default(MockImage::new(100, 100).with_capture_time("2009:11:07 00:00:00"));

        let report = annotate(&backend, &task, &config).unwrap();

        assert_eq!(report.formatted, "2009.11.07");
        assert!(matches!(
            backend.get_operations().last(),
            Some(RecordedOp::Save { quality: 70, .. })
        ));
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn decode_failure_names_step() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "broken.jpg");
        let backend = MockBackend::with_default(MockImage::new(1, 1).failing("bad huffman table"));

        let failure = annotate(&backend, &task, &config()).unwrap_err();

        assert_eq!(failure.step, Step::Decode);
        assert_eq!(failure.input, task.input);
        assert!(backend.saved_outputs().is_empty());
    }

    #[test]
    fn malformed_capture_time_fails_task() {
        let tmp = TempDir::new().unwrap();
        let task = task(&tmp, "odd.jpg");
        let backend =
            MockBackend::with_default(MockImage::new(100, 100).with_capture_time("yesterday"));

        let failure = annotate(&backend, &task, &config()).unwrap_err();

        assert_eq!(failure.step, Step::ResolveDate);
        assert!(matches!(failure.source, WorkerError::Date(DateError::Malformed { .. })));
        assert!(!task.output.exists());
    }

    #[test]
    fn unreadable_modification_time_fails_task() {
        let tmp = TempDir::new().unwrap();
        // The mock decodes anything, but the input does not exist on disk.
        let task = task(&tmp, "ghost.jpg");
        let backend = MockBackend::new();

        let failure = annotate(&backend, &task, &config()).unwrap_err();
        assert_eq!(failure.step, Step::ReadModifiedTime);
    }

    #[test]
    fn failure_after_fallback_keeps_date_source() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("blocker"), b"a file, not a directory").unwrap();
        let task = ImageTask {
            input: tmp.path().join("scan.png"),
            output: tmp.path().join("blocker/scan.png"),
        };
        std::fs::write(&task.input, b"pixels").unwrap();

        let failure = annotate(&MockBackend::new(), &task, &config()).unwrap_err();

        assert_eq!(failure.step, Step::CreateOutputDir);
        assert_eq!(failure.date_source, Some(DateSource::FileModified));
    }

    #[test]
    fn failure_before_date_has_no_date_source() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::with_default(MockImage::new(1, 1).failing("truncated"));
        let failure = annotate(&backend, &task(&tmp, "a.jpg"), &config()).unwrap_err();
        assert_eq!(failure.date_source, None);
    }

    #[test]
    fn failure_message_includes_path_and_step() {
        let failure = TaskFailure {
            input: PathBuf::from("/photos/a.jpg"),
            step: Step::Encode,
            date_source: None,
            source: WorkerError::Io(std::io::Error::other("disk full")),
        };
        assert_eq!(failure.to_string(), "/photos/a.jpg: encode failed");
    }

    #[test]
    fn panic_failure() {
        let failure = TaskFailure::panicked(PathBuf::from("a.jpg"), "boom".into());
        assert_eq!(failure.step, Step::Internal);
        assert_eq!(failure.source.to_string(), "panicked: boom");
    }
}
