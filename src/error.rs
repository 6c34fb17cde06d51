use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for chunk sources.
pub type SourceResult<T> = Result<T, SourceError>;

/// Convenience result type for columnar sinks.
pub type SinkResult<T> = Result<T, SinkError>;

/// Convenience result type for configuration loading/validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Convenience result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by chunk sources ([`crate::ingestion::ChunkSource`]).
#[derive(Debug, Error)]
pub enum SourceError {
    /// A row (or the header) cannot be parsed against the run's schema: column-count mismatch,
    /// an unparsable value, invalid UTF-8, or a missing/duplicate column.
    ///
    /// `row` is 1-based and counts the header as row 1. `row == 0` means the reader options
    /// (chunk or batch size) were rejected before any row was read.
    #[error("malformed input at row {row}: {message}")]
    Malformed { row: u64, message: String },

    /// The underlying storage cannot be read (file not found, permission denied, truncated
    /// columnar file, ...).
    #[error("unreadable input: {0}")]
    Unreadable(#[from] std::io::Error),
}

impl SourceError {
    pub(crate) fn malformed(row: u64, message: impl Into<String>) -> Self {
        Self::Malformed {
            row,
            message: message.into(),
        }
    }

    /// Classify a csv crate error: I/O failures are `Unreadable`, everything else is `Malformed`.
    pub(crate) fn from_csv(row: u64, err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(row);
        match err.into_kind() {
            csv::ErrorKind::Io(e) => Self::Unreadable(e),
            csv::ErrorKind::UnequalLengths {
                expected_len, len, ..
            } => Self::malformed(
                line,
                format!("expected {expected_len} fields but found {len}"),
            ),
            csv::ErrorKind::Utf8 { err, .. } => Self::malformed(line, format!("invalid utf-8: {err}")),
            other => Self::malformed(line, format!("{other:?}")),
        }
    }
}

/// Error type returned by columnar sinks ([`crate::sink::BatchSink`]).
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination file cannot be created.
    #[error("cannot create output '{}': {source}", path.display())]
    PathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested compression/format combination is invalid.
    #[error("unsupported sink config: {message}")]
    UnsupportedConfig { message: String },

    /// A batch does not match the schema established by the first append.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// The sink has already been closed.
    #[error("sink is closed")]
    Closed,

    /// The Parquet writer failed while writing a row group or the footer.
    #[error("parquet write error: {0}")]
    Write(#[from] parquet::errors::ParquetError),
}

/// Error type returned when loading or validating a [`crate::config::PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `chunk_size` must be strictly positive.
    #[error("chunk_size must be > 0")]
    InvalidChunkSize,

    /// The delimiter must be a single ASCII byte that is not a quote or line terminator.
    #[error("invalid delimiter {0:?}: expected a single ASCII character other than '\"', '\\r', '\\n'")]
    InvalidDelimiter(char),

    /// The high-ratio compression level is outside the codec's range.
    #[error("high_ratio_level {level} out of range {min}..={max}")]
    InvalidCompressionLevel { level: i32, min: i32, max: i32 },

    /// Reading a config file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A config document could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error type returned when persisting a statistics report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The component failure that aborted a pipeline run.
#[derive(Debug, Error)]
pub enum AbortCause {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Error type returned by [`crate::execution::Pipeline`] runs.
///
/// There is no partial-success mode: any component failure aborts the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline aborted: {0}")]
    Aborted(#[source] AbortCause),
}

impl PipelineError {
    /// The component failure behind this error.
    pub fn cause(&self) -> &AbortCause {
        match self {
            Self::Aborted(cause) => cause,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::Aborted(AbortCause::Config(err))
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        Self::Aborted(AbortCause::Source(err))
    }
}

impl From<SinkError> for PipelineError {
    fn from(err: SinkError) -> Self {
        Self::Aborted(AbortCause::Sink(err))
    }
}

impl From<AbortCause> for PipelineError {
    fn from(cause: AbortCause) -> Self {
        Self::Aborted(cause)
    }
}
