//! Pipeline driver: the single-consumer loop that moves batches from a chunk source, through the
//! transformer and the statistics accumulator, into a columnar sink.
//!
//! This module sits "above" [`crate::ingestion`], [`crate::processing`] and [`crate::sink`] and
//! provides:
//!
//! - The run state machine (`Idle → Running → {Finished, Failed}`)
//! - Abort semantics: any component failure ends the run, and the sink is still closed
//! - Real-time metrics + observer hooks for monitoring
//!
//! Batches are strictly sequential: a batch is transformed, accumulated and appended before the
//! next one is pulled, so at most one batch is alive at a time.

mod observer;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::{ChunkSource, CsvChunkSource};
use crate::processing::{transform, transform_schema, ColumnStatistics, StatisticsAccumulator};
use crate::sink::{BatchSink, ParquetSink};

pub use observer::{
    severity_for_error, CompositePipelineObserver, FilePipelineObserver, PipelineEvent, PipelineMetrics,
    PipelineMetricsSnapshot, PipelineObserver, RunContext, Severity, StdErrPipelineObserver,
};

/// Lifecycle of a pipeline run. `Finished` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Running = 1,
    Finished = 2,
    Failed = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Finished,
            3 => Self::Failed,
            _ => Self::Idle,
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// A single conversion run.
///
/// Running consumes the pipeline, so a finished or failed pipeline cannot be restarted; build a
/// new one (cloning the config) for the next run.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use rust_data_streaming::config::PipelineConfig;
/// use rust_data_streaming::execution::{Pipeline, StdErrPipelineObserver};
///
/// # fn main() -> Result<(), rust_data_streaming::PipelineError> {
/// let stats = Pipeline::new(PipelineConfig::default())
///     .with_observer(Arc::new(StdErrPipelineObserver))
///     .run("telemetry.csv", "telemetry.parquet")?;
/// for col in stats.iter() {
///     println!("{}: mean={} std={}", col.column, col.mean, col.standard_deviation);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    observer: Option<Arc<dyn PipelineObserver>>,
    alert_at_or_above: Severity,
    metrics: Arc<PipelineMetrics>,
    state: PipelineState,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("state", &self.state)
            .finish()
    }
}

impl Pipeline {
    /// Create an idle pipeline. The config is validated when the run starts.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            observer: None,
            alert_at_or_above: Severity::Critical,
            metrics: Arc::new(PipelineMetrics::new()),
            state: PipelineState::Idle,
        }
    }

    /// Attach an observer for run events, failures and alerts.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Severity at or above which a failure also triggers `on_alert`. Defaults to `Critical`.
    pub fn with_alert_threshold(mut self, severity: Severity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    /// Get a handle to real-time run metrics. The handle outlives the pipeline.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Config the run will use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert the delimited-text file at `source` into a Parquet file at `sink`.
    ///
    /// Source options are checked first (`ConfigError` for a zero chunk size or a bad delimiter),
    /// then the sink is opened, then the source. The sink owns its codec settings, so an
    /// out-of-range high-ratio level aborts with `SinkError::UnsupportedConfig` before any file
    /// is created. A sink that cannot be created aborts the run before the input is touched.
    /// Call [`PipelineConfig::validate`] beforehand to get every config problem as a `ConfigError`.
    pub fn run(mut self, source: impl AsRef<Path>, sink: impl AsRef<Path>) -> PipelineResult<ColumnStatistics> {
        let (source, sink) = (source.as_ref(), sink.as_ref());
        let ctx = RunContext {
            source: Some(source.to_path_buf()),
            sink: Some(sink.to_path_buf()),
        };

        let start = self.begin();
        let result = self.open_and_drive(source, sink);
        self.end(&ctx, start, result)
    }

    /// Drive an already-open source and sink to completion.
    ///
    /// The sink is closed on every path, including failures.
    pub fn run_with<S, K>(mut self, source: S, sink: K) -> PipelineResult<ColumnStatistics>
    where
        S: ChunkSource,
        K: BatchSink,
    {
        let start = self.begin();
        let result = self.drive(source, sink);
        self.end(&RunContext::default(), start, result)
    }

    fn open_and_drive(&mut self, source: &Path, sink: &Path) -> PipelineResult<ColumnStatistics> {
        let source_opts = self.config.source_options()?;

        let mut parquet = ParquetSink::open(sink, &self.config.sink_options())?;
        let chunks = match CsvChunkSource::open(source, &source_opts) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.close_after_failure(&mut parquet);
                return Err(e.into());
            }
        };
        self.drive(chunks, parquet)
    }

    fn drive<S, K>(&mut self, mut source: S, mut sink: K) -> PipelineResult<ColumnStatistics>
    where
        S: ChunkSource,
        K: BatchSink,
    {
        let mut acc = StatisticsAccumulator::new();
        let mut index = 0u64;
        loop {
            match self.step(&mut source, &mut sink, &mut acc, index) {
                Ok(true) => index += 1,
                Ok(false) => break,
                Err(e) => {
                    self.close_after_failure(&mut sink);
                    return Err(e);
                }
            }
        }

        if index == 0 {
            // Empty input still produces a readable table with the right columns.
            if let Err(e) = sink.declare_schema(&transform_schema(source.schema())) {
                self.close_after_failure(&mut sink);
                return Err(e.into());
            }
        }
        sink.close()?;
        Ok(acc.finalize())
    }

    /// One pull → transform → accumulate → append cycle. `Ok(false)` at end of stream.
    fn step<S, K>(
        &self,
        source: &mut S,
        sink: &mut K,
        acc: &mut StatisticsAccumulator,
        index: u64,
    ) -> PipelineResult<bool>
    where
        S: ChunkSource,
        K: BatchSink,
    {
        let Some(batch) = source.next_batch()? else {
            return Ok(false);
        };
        let rows = batch.row_count();
        self.metrics.on_batch_read(rows);
        self.emit(PipelineEvent::BatchStarted { index, rows });

        let batch = transform(batch);
        acc.update(&batch);
        sink.append(&batch)?;

        self.metrics.on_batch_written(rows);
        self.emit(PipelineEvent::BatchFinished {
            index,
            rows_written: self.metrics.snapshot().rows_written,
        });
        Ok(true)
    }

    fn close_after_failure<K: BatchSink>(&self, sink: &mut K) {
        if let Err(e) = sink.close() {
            self.emit(PipelineEvent::SinkCloseFailed {
                message: e.to_string(),
            });
        }
    }

    fn begin(&mut self) -> Instant {
        self.emit(PipelineEvent::RunStarted);
        self.transition(PipelineState::Running);
        Instant::now()
    }

    fn end(
        mut self,
        ctx: &RunContext,
        start: Instant,
        result: PipelineResult<ColumnStatistics>,
    ) -> PipelineResult<ColumnStatistics> {
        let elapsed = start.elapsed();
        self.metrics.end_run(elapsed);

        match &result {
            Ok(_) => self.transition(PipelineState::Finished),
            Err(e) => {
                self.transition(PipelineState::Failed);
                self.report_failure(ctx, e);
            }
        }

        self.emit(PipelineEvent::RunFinished {
            elapsed,
            metrics: self.metrics.snapshot(),
        });
        result
    }

    fn transition(&mut self, to: PipelineState) {
        let from = self.state;
        self.state = to;
        self.metrics.set_state(to);
        self.emit(PipelineEvent::StateChanged { from, to });
    }

    fn report_failure(&self, ctx: &RunContext, e: &PipelineError) {
        if let Some(obs) = self.observer.as_ref() {
            let sev = severity_for_error(e);
            obs.on_failure(ctx, sev, e);
            if sev >= self.alert_at_or_above {
                obs.on_alert(ctx, sev, e);
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(obs) = self.observer.as_ref() {
            obs.on_event(&event);
        }
    }
}
