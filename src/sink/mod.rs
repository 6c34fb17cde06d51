//! Columnar sinks.
//!
//! A [`BatchSink`] appends batches to a persistent columnar store and finalizes it exactly once.
//! The only implementation is [`parquet::ParquetSink`].

pub mod parquet;

use crate::config::CompressionCodec;
use crate::error::SinkResult;
use crate::types::{Batch, Schema};

pub use self::parquet::ParquetSink;

/// Options for opening a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Codec applied to every column chunk.
    pub compression: CompressionCodec,
    /// Level used by [`CompressionCodec::HighRatio`].
    pub high_ratio_level: i32,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            compression: CompressionCodec::default(),
            high_ratio_level: 9,
        }
    }
}

/// Append-only destination for the batches of one run.
///
/// Lifecycle: open → (`append` | `declare_schema`)* → `close`. Every method fails with
/// [`crate::error::SinkError::Closed`] once `close` has been called.
pub trait BatchSink {
    /// Establish the schema without writing rows, or check it against the established one.
    fn declare_schema(&mut self, schema: &Schema) -> SinkResult<()>;

    /// Append one batch. The first call establishes the schema.
    fn append(&mut self, batch: &Batch) -> SinkResult<()>;

    /// Flush and finalize the store, releasing every underlying resource.
    fn close(&mut self) -> SinkResult<()>;
}

impl<S: BatchSink + ?Sized> BatchSink for &mut S {
    fn declare_schema(&mut self, schema: &Schema) -> SinkResult<()> {
        (**self).declare_schema(schema)
    }

    fn append(&mut self, batch: &Batch) -> SinkResult<()> {
        (**self).append(batch)
    }

    fn close(&mut self) -> SinkResult<()> {
        (**self).close()
    }
}
