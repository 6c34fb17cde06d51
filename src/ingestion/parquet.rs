//! Lazy, batched reading of a finalized Parquet store.
//!
//! Consumers that need the full dataset after a run (plotting, validation, a second
//! aggregation) make an explicit second pass with [`ParquetBatchReader`] instead of loading the
//! file in one piece. The reader is itself a [`ChunkSource`], so a finished store can feed
//! another pipeline run.

use std::fs::File;
use std::path::Path;

use parquet::basic::{ConvertedType, Type as PhysicalType};
use parquet::errors::ParquetError;
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::reader::RowIter;
use parquet::record::Field as ParquetField;

use crate::error::{SourceError, SourceResult};
use crate::types::{Batch, DataType, Field, Schema, Value};

use super::ChunkSource;

/// Reads a Parquet file as a lazy sequence of [`Batch`]es of at most `batch_size` rows.
///
/// Row groups are decoded on demand by the Parquet record reader, so memory holds one batch
/// plus the current row group's pages.
pub struct ParquetBatchReader {
    rows: RowIter<'static>,
    schema: Schema,
    batch_size: usize,
    total_rows: u64,
    rows_read: u64,
    done: bool,
}

impl ParquetBatchReader {
    /// Open `path` and read its footer. `batch_size` must be > 0.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> SourceResult<Self> {
        if batch_size == 0 {
            return Err(SourceError::malformed(0, "batch_size must be > 0"));
        }
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file).map_err(unreadable)?;
        let schema = schema_from_metadata(&reader)?;
        let total_rows = reader.metadata().file_metadata().num_rows().max(0) as u64;

        Ok(Self {
            rows: reader.into_iter(),
            schema,
            batch_size,
            total_rows,
            rows_read: 0,
            done: false,
        })
    }

    /// Row count recorded in the footer.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }
}

impl ChunkSource for ParquetBatchReader {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_batch(&mut self) -> SourceResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }

        let mut out: Vec<Vec<Value>> = Vec::with_capacity(self.batch_size.min(4_096));
        while out.len() < self.batch_size {
            let row_num = self.rows_read + out.len() as u64 + 1;
            let row = match self.rows.next() {
                Some(Ok(row)) => row,
                Some(Err(e)) => {
                    self.done = true;
                    return Err(unreadable(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            };

            let mut out_row: Vec<Value> = Vec::with_capacity(self.schema.len());
            for ((name, value), f) in row.get_column_iter().zip(self.schema.fields.iter()) {
                if *name != f.name {
                    self.done = true;
                    return Err(SourceError::malformed(
                        row_num,
                        format!("expected column '{}' but found '{name}'", f.name),
                    ));
                }
                match convert_parquet_field(row_num, f, value) {
                    Ok(v) => out_row.push(v),
                    Err(e) => {
                        self.done = true;
                        return Err(e);
                    }
                }
            }
            out.push(out_row);
        }

        if out.is_empty() {
            return Ok(None);
        }
        self.rows_read += out.len() as u64;
        Ok(Some(Batch::new(self.schema.clone(), out)))
    }
}

impl Iterator for ParquetBatchReader {
    type Item = SourceResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Read only the footer of a Parquet file and map its columns to a [`Schema`].
pub fn read_parquet_schema(path: impl AsRef<Path>) -> SourceResult<Schema> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file).map_err(unreadable)?;
    schema_from_metadata(&reader)
}

fn schema_from_metadata<R: ChunkReader + 'static>(
    reader: &SerializedFileReader<R>,
) -> SourceResult<Schema> {
    let cols = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .to_vec();

    let mut fields = Vec::with_capacity(cols.len());
    for c in cols {
        let name = c.path().string();
        let data_type = match (c.physical_type(), c.converted_type()) {
            (PhysicalType::INT64, ConvertedType::TIMESTAMP_MICROS) => DataType::Timestamp,
            (PhysicalType::INT64 | PhysicalType::INT32, _) => DataType::Int64,
            (PhysicalType::DOUBLE | PhysicalType::FLOAT, _) => DataType::Float64,
            (PhysicalType::BOOLEAN, _) => DataType::Bool,
            (PhysicalType::BYTE_ARRAY, ConvertedType::UTF8) => DataType::Utf8,
            (physical, converted) => {
                return Err(SourceError::malformed(
                    0,
                    format!("column '{name}' has unsupported type {physical:?} ({converted:?})"),
                ));
            }
        };
        fields.push(Field::new(name, data_type));
    }
    Ok(Schema::new(fields))
}

fn convert_parquet_field(row: u64, field: &Field, f: &ParquetField) -> SourceResult<Value> {
    if let ParquetField::Null = f {
        return Ok(Value::Null);
    }

    let mismatch = |expected: &str| {
        SourceError::malformed(
            row,
            format!("column '{}': expected {expected} (raw='{f}')", field.name),
        )
    };

    match field.data_type {
        DataType::Utf8 => match f {
            ParquetField::Str(s) => Ok(Value::Utf8(s.clone())),
            _ => Err(mismatch("string")),
        },
        DataType::Bool => match f {
            ParquetField::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(mismatch("bool")),
        },
        DataType::Int64 => match f {
            ParquetField::Int(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Long(v) => Ok(Value::Int64(*v)),
            _ => Err(mismatch("integer")),
        },
        DataType::Float64 => match f {
            ParquetField::Float(v) => Ok(Value::Float64(f64::from(*v))),
            ParquetField::Double(v) => Ok(Value::Float64(*v)),
            _ => Err(mismatch("number")),
        },
        DataType::Timestamp => match f {
            ParquetField::TimestampMicros(v) | ParquetField::Long(v) => Ok(Value::Timestamp(*v)),
            ParquetField::TimestampMillis(v) => Ok(Value::Timestamp(v.saturating_mul(1_000))),
            _ => Err(mismatch("timestamp")),
        },
    }
}

fn unreadable(e: ParquetError) -> SourceError {
    SourceError::Unreadable(std::io::Error::other(e))
}
