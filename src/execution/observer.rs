use std::error::Error as StdError;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{AbortCause, ConfigError, PipelineError, SinkError, SourceError};

use super::PipelineState;

/// Events emitted by [`super::Pipeline`] while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    RunStarted,
    StateChanged { from: PipelineState, to: PipelineState },
    BatchStarted { index: u64, rows: usize },
    BatchFinished { index: u64, rows_written: u64 },
    /// The best-effort close after a failure did not succeed. The failure that aborted the run is
    /// still the one returned to the caller.
    SinkCloseFailed { message: String },
    RunFinished {
        elapsed: Duration,
        metrics: PipelineMetricsSnapshot,
    },
}

/// Severity classification used for failure callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// The run failed because of its data or configuration.
    Error,
    /// The run failed because of I/O or other infrastructure.
    Critical,
}

/// Source and sink locations of a run. Paths are `None` for runs driven through
/// [`super::Pipeline::run_with`].
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub source: Option<PathBuf>,
    pub sink: Option<PathBuf>,
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        write!(f, "source={} sink={}", show(&self.source), show(&self.sink))
    }
}

/// Observer hook for pipeline runs.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait PipelineObserver: Send + Sync {
    /// Called for every progress event.
    fn on_event(&self, _event: &PipelineEvent) {}

    /// Called once when a run aborts.
    fn on_failure(&self, _ctx: &RunContext, _severity: Severity, _error: &PipelineError) {}

    /// Called when a failure meets the pipeline's alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositePipelineObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositePipelineObserver {
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositePipelineObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositePipelineObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositePipelineObserver {
    fn on_event(&self, event: &PipelineEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Logs pipeline events to stderr.
#[derive(Debug, Default)]
pub struct StdErrPipelineObserver;

impl PipelineObserver for StdErrPipelineObserver {
    fn on_event(&self, event: &PipelineEvent) {
        eprintln!("[pipeline] {}", describe_event(event));
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        eprintln!("[pipeline][{severity:?}] {ctx} err={error}");
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        eprintln!("[ALERT][pipeline][{severity:?}] {ctx} err={error}");
    }
}

/// Appends pipeline events to a local log file.
#[derive(Debug)]
pub struct FilePipelineObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePipelineObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{} {line}", unix_ts());
        }
    }
}

impl PipelineObserver for FilePipelineObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.append_line(&describe_event(event));
    }

    fn on_failure(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        self.append_line(&format!("fail severity={severity:?} {ctx} err={error}"));
    }

    fn on_alert(&self, ctx: &RunContext, severity: Severity, error: &PipelineError) {
        self.append_line(&format!("ALERT severity={severity:?} {ctx} err={error}"));
    }
}

fn describe_event(event: &PipelineEvent) -> String {
    match event {
        PipelineEvent::RunStarted => "run started".to_string(),
        PipelineEvent::StateChanged { from, to } => format!("state {from:?} -> {to:?}"),
        PipelineEvent::BatchStarted { index, rows } => format!("batch {index} started rows={rows}"),
        PipelineEvent::BatchFinished { index, rows_written } => {
            format!("batch {index} finished rows_written={rows_written}")
        }
        PipelineEvent::SinkCloseFailed { message } => format!("sink close failed: {message}"),
        PipelineEvent::RunFinished { elapsed, metrics } => {
            format!("run finished in {elapsed:?}: {metrics}")
        }
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Classify a run failure: infrastructure (I/O) failures are `Critical`, everything else `Error`.
pub fn severity_for_error(e: &PipelineError) -> Severity {
    match e.cause() {
        AbortCause::Config(ConfigError::Io(_)) => Severity::Critical,
        AbortCause::Config(_) => Severity::Error,
        AbortCause::Source(SourceError::Unreadable(_)) => Severity::Critical,
        AbortCause::Source(SourceError::Malformed { .. }) => Severity::Error,
        AbortCause::Sink(SinkError::PathUnwritable { .. }) => Severity::Critical,
        AbortCause::Sink(SinkError::Write(err)) => {
            // Parquet wraps I/O failures inconsistently; look through the chain.
            if error_chain_contains_io(err) {
                Severity::Critical
            } else {
                Severity::Error
            }
        }
        AbortCause::Sink(_) => Severity::Error,
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

/// Real-time metrics for a pipeline run.
///
/// The pipeline updates these counters as batches flow; callers can snapshot them at any time,
/// including from another thread while the run is in progress.
#[derive(Debug)]
pub struct PipelineMetrics {
    state: AtomicU8,
    batches: AtomicU64,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    elapsed_ns: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Idle as u8),
            batches: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn on_batch_read(&self, rows: usize) {
        let _ = self.batches.fetch_add(1, Ordering::SeqCst);
        let _ = self.rows_read.fetch_add(rows as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_batch_written(&self, rows: usize) {
        let _ = self.rows_written.fetch_add(rows as u64, Ordering::SeqCst);
    }

    pub(crate) fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        PipelineMetricsSnapshot {
            state: PipelineState::from_u8(self.state.load(Ordering::SeqCst)),
            batches: self.batches.load(Ordering::SeqCst),
            rows_read: self.rows_read.load(Ordering::SeqCst),
            rows_written: self.rows_written.load(Ordering::SeqCst),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub state: PipelineState,
    pub batches: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    /// `None` until the run reaches a terminal state.
    pub elapsed: Option<Duration>,
}

impl fmt::Display for PipelineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={:?}, batches={}, rows_read={}, rows_written={}, elapsed={:?}",
            self.state, self.batches, self.rows_read, self.rows_written, self.elapsed
        )
    }
}
