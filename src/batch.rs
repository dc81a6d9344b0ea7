//! Batch scheduling.
//!
//! [`run`] turns a source path into stamped outputs:
//!
//! ```text
//! Enumerating ─▶ Dispatching ─▶ Awaiting ─┬─▶ Completed
//!                                          └─▶ Cancelled
//! ```
//!
//! ## Modes
//!
//! - **Single file**: the source is a file and the destination must be a file
//!   target. Destination problems are errors, not skips. The one task goes
//!   through the same pool as a directory batch, so the timeout and
//!   cancellation apply to it too.
//! - **Directory**: files with an allowed extension are mirrored from the
//!   source tree into the destination tree (`src/a/b.jpg` → `dst/a/b.jpg`).
//!   Files that cannot or should not be stamped are skipped with an event.
//!
//! ## Execution
//!
//! Tasks run on a dedicated rayon pool. Each task answers on its own channel
//! and the coordinator waits for the answers in submission order, giving
//! every task at most `task_timeout` once it reaches the head of the line. A
//! timed-out task is reported and left running; it is never retried.
//!
//! Workers never look at the [`CancelFlag`]. The coordinator checks it while
//! waiting; once it is raised, tasks that have not started yet are abandoned,
//! the pool is dropped without joining, and [`BatchOutcome::Cancelled`] is
//! returned. Outputs that were already written stay on disk.

use crate::config::AnnotationConfig;
use crate::date::DateSource;
use crate::imaging::ImageBackend;
use crate::worker::{self, ImageTask, StampReport, TaskFailure};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

/// How often the coordinator looks at the cancel flag while waiting.
const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("source '{}' does not exist", .0.display())]
    SourceNotFound(PathBuf),
    #[error("destination '{}' must be a file when the source is a file", .0.display())]
    DestinationNotFile(PathBuf),
    #[error("destination '{}' exists and overwrite is disabled (use --force)", .0.display())]
    DestinationExists(PathBuf),
    #[error("destination '{}' is the source file itself", .0.display())]
    SameAsSource(PathBuf),
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// What to stamp and where to put it.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub recursive: bool,
    pub overwrite: bool,
    pub jobs: usize,
    pub task_timeout: Duration,
}

/// Shared cancellation signal. Raised by the interrupt handler, read only by
/// the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a discovered file was not submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The output exists and overwrite is disabled.
    OutputExists,
    /// The output path is the input path.
    SameAsInput,
    /// The input is itself inside the destination tree.
    InsideDestination,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::OutputExists => "exists and overwrite is disabled",
            SkipReason::SameAsInput => "would overwrite its own input",
            SkipReason::InsideDestination => "is inside the destination directory",
        })
    }
}

/// Progress events, in the order they happen.
#[derive(Debug)]
pub enum BatchEvent {
    /// Enumeration finished; `submitted` tasks go to `jobs` workers.
    Started { submitted: usize, jobs: usize },
    Skipped {
        input: PathBuf,
        output: PathBuf,
        reason: SkipReason,
    },
    /// The image has no capture time; its modification time was used. Sent
    /// before the task's `Stamped` or `Failed` event.
    DateFallback { input: PathBuf },
    Stamped(StampReport),
    Failed(TaskFailure),
    TimedOut { input: PathBuf, timeout: Duration },
    /// The batch was interrupted; `abandoned` tasks were never observed.
    Cancelled { abandoned: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files with an allowed extension.
    pub discovered: usize,
    pub skipped: usize,
    pub submitted: usize,
    pub stamped: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Submitted but never observed because of cancellation.
    pub abandoned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed(BatchSummary),
    Cancelled(BatchSummary),
}

impl BatchOutcome {
    pub fn summary(&self) -> &BatchSummary {
        match self {
            BatchOutcome::Completed(s) | BatchOutcome::Cancelled(s) => s,
        }
    }
}

/// Result of enumeration: what will run and what will not.
#[derive(Debug, Default)]
pub struct Plan {
    pub discovered: usize,
    pub tasks: Vec<ImageTask>,
    pub skipped: Vec<(ImageTask, SkipReason)>,
}

fn emit(events: &Option<Sender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        // The printer going away must not stop the batch.
        let _ = tx.send(event);
    }
}

/// Best-effort absolute, symlink-free form of a path that may not exist yet.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        if let Ok(resolved) = fs::canonicalize(parent) {
            return resolved.join(name);
        }
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Stamp everything `request` describes.
pub fn run<B: ImageBackend + 'static>(
    request: &BatchRequest,
    config: Arc<AnnotationConfig>,
    backend: Arc<B>,
    cancel: &CancelFlag,
    events: Option<Sender<BatchEvent>>,
) -> Result<BatchOutcome, BatchError> {
    if request.source.is_file() {
        run_single(request, config, backend, cancel, &events)
    } else if request.source.is_dir() {
        let plan = plan_tasks(request, &config);
        run_directory(request, plan, config, backend, cancel, &events)
    } else {
        Err(BatchError::SourceNotFound(request.source.clone()))
    }
}

// =============================================================================
// Single-file mode
// =============================================================================

fn is_file_target(path: &Path, config: &AnnotationConfig) -> bool {
    path.is_file() || (!path.exists() && config.allows(path))
}

fn run_single<B: ImageBackend + 'static>(
    request: &BatchRequest,
    config: Arc<AnnotationConfig>,
    backend: Arc<B>,
    cancel: &CancelFlag,
    events: &Option<Sender<BatchEvent>>,
) -> Result<BatchOutcome, BatchError> {
    let destination = &request.destination;
    if !is_file_target(destination, &config) {
        return Err(BatchError::DestinationNotFile(destination.clone()));
    }
    let input = resolve_path(&request.source);
    let output = resolve_path(destination);
    if input == output {
        return Err(BatchError::SameAsSource(destination.clone()));
    }
    if destination.exists() && !request.overwrite {
        return Err(BatchError::DestinationExists(destination.clone()));
    }

    let task = ImageTask {
        input: request.source.clone(),
        output: destination.clone(),
    };
    let summary = BatchSummary {
        discovered: 1,
        submitted: 1,
        ..BatchSummary::default()
    };
    emit(events, BatchEvent::Started { submitted: 1, jobs: 1 });
    dispatch(request, vec![task], summary, config, backend, cancel, events)
}

// =============================================================================
// Directory mode
// =============================================================================

/// Enumerate the source tree and decide, per file, whether it becomes a task.
///
/// Files whose extension is not allowed are ignored without a trace.
/// Unreadable directory entries are logged and ignored.
pub fn plan_tasks(request: &BatchRequest, config: &AnnotationConfig) -> Plan {
    let source = resolve_path(&request.source);
    let destination = resolve_path(&request.destination);

    let mut walker = WalkDir::new(&source).min_depth(1).sort_by_file_name();
    if !request.recursive {
        walker = walker.max_depth(1);
    }

    let mut plan = Plan::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let input = entry.into_path();
        if !input.is_file() || !config.allows(&input) {
            continue;
        }
        plan.discovered += 1;

        let Ok(relative) = input.strip_prefix(&source) else {
            continue;
        };
        let output = destination.join(relative);
        let reason = if input == output {
            Some(SkipReason::SameAsInput)
        } else if input.starts_with(&destination) {
            Some(SkipReason::InsideDestination)
        } else if output.exists() && !request.overwrite {
            Some(SkipReason::OutputExists)
        } else {
            None
        };

        let task = ImageTask { input, output };
        match reason {
            Some(reason) => plan.skipped.push((task, reason)),
            None => plan.tasks.push(task),
        }
    }
    tracing::info!(
        source = %source.display(),
        discovered = plan.discovered,
        submitted = plan.tasks.len(),
        skipped = plan.skipped.len(),
        "enumeration finished"
    );
    plan
}

type TaskResult = Result<StampReport, TaskFailure>;

enum Awaited {
    Done(TaskResult),
    TimedOut,
    Cancelled,
    Lost,
}

fn run_directory<B: ImageBackend + 'static>(
    request: &BatchRequest,
    plan: Plan,
    config: Arc<AnnotationConfig>,
    backend: Arc<B>,
    cancel: &CancelFlag,
    events: &Option<Sender<BatchEvent>>,
) -> Result<BatchOutcome, BatchError> {
    let summary = BatchSummary {
        discovered: plan.discovered,
        skipped: plan.skipped.len(),
        submitted: plan.tasks.len(),
        ..BatchSummary::default()
    };
    for (task, reason) in plan.skipped {
        emit(
            events,
            BatchEvent::Skipped {
                input: task.input,
                output: task.output,
                reason,
            },
        );
    }

    let jobs = request.jobs.max(1);
    emit(
        events,
        BatchEvent::Started {
            submitted: summary.submitted,
            jobs,
        },
    );
    if plan.tasks.is_empty() {
        return Ok(BatchOutcome::Completed(summary));
    }
    dispatch(request, plan.tasks, summary, config, backend, cancel, events)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Run `tasks` on a fresh pool and await them in submission order.
fn dispatch<B: ImageBackend + 'static>(
    request: &BatchRequest,
    tasks: Vec<ImageTask>,
    mut summary: BatchSummary,
    config: Arc<AnnotationConfig>,
    backend: Arc<B>,
    cancel: &CancelFlag,
    events: &Option<Sender<BatchEvent>>,
) -> Result<BatchOutcome, BatchError> {
    let jobs = request.jobs.max(1).min(tasks.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("picdate-worker-{i}"))
        .build()?;
    let abandoned = Arc::new(AtomicBool::new(false));

    let mut pending: Vec<(PathBuf, Receiver<TaskResult>)> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (tx, rx) = mpsc::sync_channel(1);
        pending.push((task.input.clone(), rx));
        let backend = Arc::clone(&backend);
        let config = Arc::clone(&config);
        let abandoned = Arc::clone(&abandoned);
        pool.spawn(move || {
            if abandoned.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(guarded_annotate(&*backend, &task, &config));
        });
    }

    let total = pending.len();
    for (observed, (input, rx)) in pending.into_iter().enumerate() {
        match await_result(&rx, request.task_timeout, cancel) {
            Awaited::Done(result) => record(result, &mut summary, events),
            Awaited::TimedOut => {
                tracing::warn!(input = %input.display(), "task timed out");
                summary.timed_out += 1;
                emit(
                    events,
                    BatchEvent::TimedOut {
                        input,
                        timeout: request.task_timeout,
                    },
                );
            }
            Awaited::Lost => {
                summary.failed += 1;
                emit(
                    events,
                    BatchEvent::Failed(TaskFailure::panicked(
                        input,
                        "worker exited without reporting a result".into(),
                    )),
                );
            }
            Awaited::Cancelled => {
                abandoned.store(true, Ordering::SeqCst);
                summary.abandoned = total - observed;
                tracing::warn!(abandoned = summary.abandoned, "batch cancelled");
                emit(
                    events,
                    BatchEvent::Cancelled {
                        abandoned: summary.abandoned,
                    },
                );
                // Dropping the pool only signals its threads; in-flight tasks
                // keep running until the process exits.
                drop(pool);
                return Ok(BatchOutcome::Cancelled(summary));
            }
        }
    }
    Ok(BatchOutcome::Completed(summary))
}

/// Wait up to `timeout` for one answer, watching the cancel flag.
fn await_result(rx: &Receiver<TaskResult>, timeout: Duration, cancel: &CancelFlag) -> Awaited {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Awaited::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Awaited::TimedOut;
        }
        match rx.recv_timeout((deadline - now).min(POLL_SLICE)) {
            Ok(result) => return Awaited::Done(result),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Awaited::Lost,
        }
    }
}

/// Run the worker, turning a panic into an ordinary failure.
fn guarded_annotate(
    backend: &impl ImageBackend,
    task: &ImageTask,
    config: &AnnotationConfig,
) -> TaskResult {
    panic::catch_unwind(AssertUnwindSafe(|| worker::annotate(backend, task, config)))
        .unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TaskFailure::panicked(task.input.clone(), message))
        })
}

fn record(result: TaskResult, summary: &mut BatchSummary, events: &Option<Sender<BatchEvent>>) {
    let (input, date_source) = match &result {
        Ok(report) => (&report.input, Some(report.date_source)),
        Err(failure) => (&failure.input, failure.date_source),
    };
    if date_source == Some(DateSource::FileModified) {
        emit(
            events,
            BatchEvent::DateFallback {
                input: input.clone(),
            },
        );
    }

    match result {
        Ok(report) => {
            summary.stamped += 1;
            emit(events, BatchEvent::Stamped(report));
        }
        Err(failure) => {
            summary.failed += 1;
            tracing::debug!(error = %failure, "task failed");
            emit(events, BatchEvent::Failed(failure));
        }
    }
}
