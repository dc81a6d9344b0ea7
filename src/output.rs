//! CLI output formatting.
//!
//! Every batch event becomes one or more display lines. Outcomes lead with
//! the input file; details such as the stamped text or a crop adjustment go
//! on indented lines beneath it:
//!
//! ```text
//! Stamping 3 images with 8 workers
//! photos/a.jpg → picdate_result/a.jpg
//!     Stamp: `23 5 1
//!     Placement fine-tuned for print crop
//! 'photos/b.png' has no capture time, using modified date instead
//! photos/b.png → picdate_result/b.png
//!     Stamp: `21 12 24
//! Skipped photos/c.jpg: 'picdate_result/c.jpg' exists and overwrite is disabled
//!
//! Done: 2 stamped, 1 skipped
//! ```
//!
//! The `format_*` functions are pure and return lines; `main` owns printing.

use crate::batch::{BatchEvent, BatchOutcome, BatchSummary, SkipReason};
use std::error::Error;
use std::path::Path;

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn quoted(path: &Path) -> String {
    format!("'{}'", path.display())
}

/// Render an error and all of its sources as `outer: inner: root`.
///
/// A cause whose text the message already ends with is not repeated.
pub fn format_error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Format a single batch event as display lines.
pub fn format_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Started { submitted, jobs } => vec![format!(
            "Stamping {} with {}",
            plural(*submitted, "image", "images"),
            plural(*jobs, "worker", "workers")
        )],
        BatchEvent::Skipped {
            input,
            output,
            reason,
        } => {
            let line = match reason {
                SkipReason::OutputExists => {
                    format!("Skipped {}: {} {}", input.display(), quoted(output), reason)
                }
                SkipReason::SameAsInput | SkipReason::InsideDestination => {
                    format!("Skipped {}: {}", input.display(), reason)
                }
            };
            vec![line]
        }
        BatchEvent::DateFallback { input } => vec![format!(
            "{} has no capture time, using modified date instead",
            quoted(input)
        )],
        BatchEvent::Stamped(report) => {
            let mut lines = vec![
                format!("{} \u{2192} {}", report.input.display(), report.output.display()),
                format!("    Stamp: {}", report.formatted),
            ];
            if report.geometry.is_cropped() {
                lines.push("    Placement fine-tuned for print crop".to_string());
            }
            lines
        }
        BatchEvent::Failed(failure) => vec![format!("Error: {}", format_error_chain(failure))],
        BatchEvent::TimedOut { input, timeout } => vec![format!(
            "Timed out: {} did not finish within {}s",
            input.display(),
            timeout.as_secs_f64()
        )],
        BatchEvent::Cancelled { abandoned } => vec![format!(
            "Cancelled: {} not started or not awaited",
            plural(*abandoned, "image", "images")
        )],
    }
}

fn summary_counts(summary: &BatchSummary) -> String {
    let mut parts = vec![format!("{} stamped", summary.stamped)];
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }
    if summary.timed_out > 0 {
        parts.push(format!("{} timed out", summary.timed_out));
    }
    if summary.abandoned > 0 {
        parts.push(format!("{} abandoned", summary.abandoned));
    }
    parts.join(", ")
}

/// Final line printed after the batch.
pub fn format_summary(outcome: &BatchOutcome) -> String {
    match outcome {
        BatchOutcome::Completed(summary) if summary.discovered == 0 => {
            "Done: no images found".to_string()
        }
        BatchOutcome::Completed(summary) => format!("Done: {}", summary_counts(summary)),
        BatchOutcome::Cancelled(summary) => format!("Cancelled: {}", summary_counts(summary)),
    }
}
