//! Chunk sources.
//!
//! A [`ChunkSource`] produces a lazy, finite sequence of bounded [`Batch`]es. Implementations:
//!
//! - [`csv::CsvChunkSource`]: the row-oriented input of a conversion run
//! - [`parquet::ParquetBatchReader`]: a second pass over a finalized columnar store

pub mod csv;
pub mod parquet;

use crate::error::SourceResult;
use crate::types::{Batch, Schema};

pub use self::csv::{infer_schema, CsvChunkSource, CsvSourceOptions};
pub use self::parquet::{read_parquet_schema, ParquetBatchReader};

/// A lazy, finite, non-restartable sequence of batches sharing one schema.
pub trait ChunkSource {
    /// Schema shared by every batch this source yields.
    fn schema(&self) -> &Schema;

    /// Pull the next batch. `Ok(None)` marks end of stream; after an error or end of stream the
    /// source only returns `Ok(None)`.
    fn next_batch(&mut self) -> SourceResult<Option<Batch>>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for &mut S {
    fn schema(&self) -> &Schema {
        (**self).schema()
    }

    fn next_batch(&mut self) -> SourceResult<Option<Batch>> {
        (**self).next_batch()
    }
}
