//! `rust-data-streaming` converts large delimited-text files into Parquet in bounded memory while
//! computing per-column statistics that are exact for the whole dataset.
//!
//! The input is read in fixed-size chunks ([`ingestion::CsvChunkSource`]). Each chunk is
//! canonicalised ([`processing::transform()`]), folded into a running statistics accumulator
//! ([`processing::StatisticsAccumulator`]) and appended as one row group to the output
//! ([`sink::ParquetSink`]) before the next chunk is read. Memory therefore depends on the chunk
//! size, not on the input size.
//!
//! The primary entrypoint is [`execution::Pipeline`].
//!
//! ## Quick example: convert a file
//!
//! ```no_run
//! use rust_data_streaming::config::{CompressionCodec, PipelineConfig};
//! use rust_data_streaming::execution::Pipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = PipelineConfig {
//!     chunk_size: 50_000,
//!     compression: CompressionCodec::Snappy,
//!     ..Default::default()
//! };
//! let stats = Pipeline::new(cfg).run("telemetry.csv", "telemetry.parquet")?;
//! stats.write_csv("statistics.csv")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Statistics
//!
//! For every numeric column ([`types::DataType::Int64`], [`types::DataType::Float64`]) the run
//! reports the count of non-null values, the mean, and the sample standard deviation. Each
//! batch contributes `(count, mean, sum of squared deviations)` which is merged into the running
//! state with the parallel-variance rule, so the result does not depend on how rows were split
//! into batches. Nulls and NaN are excluded.
//!
//! ## Reading the output back
//!
//! ```no_run
//! use rust_data_streaming::ingestion::ParquetBatchReader;
//!
//! # fn main() -> Result<(), rust_data_streaming::SourceError> {
//! let reader = ParquetBatchReader::open("telemetry.parquet", 100_000)?;
//! let mut rows = 0;
//! for batch in reader {
//!     rows += batch?.row_count();
//! }
//! println!("rows={rows}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: run options and their JSON form
//! - [`ingestion`]: chunk sources (delimited text in, Parquet readback)
//! - [`processing`]: header canonicalisation and mergeable statistics
//! - [`sink`]: the Parquet sink
//! - [`execution`]: the pipeline driver, metrics and observers
//! - [`types`]: schema, value and batch types
//! - [`error`]: error types per component

pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod processing;
pub mod sink;
pub mod types;

pub use error::{
    AbortCause, ConfigError, PipelineError, PipelineResult, ReportError, SinkError, SourceError,
};
