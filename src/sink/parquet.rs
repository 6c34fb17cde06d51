//! Parquet sink: one row group per appended batch.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::basic::{Compression, ConvertedType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};

use crate::config::CompressionCodec;
use crate::error::{SinkError, SinkResult};
use crate::types::{Batch, DataType, Schema, Value};

use super::{BatchSink, SinkOptions};

/// An open Parquet file owned exclusively by one run.
///
/// The file is created by [`ParquetSink::open`]; the Parquet writer (and so the on-disk schema)
/// is created when the first batch or [`BatchSink::declare_schema`] establishes the schema. The
/// footer is written by [`BatchSink::close`], after which the file is independently readable.
///
/// Dropping an unclosed sink closes it on a best-effort basis. A sink closed before any schema
/// was established removes its empty placeholder file.
pub struct ParquetSink {
    path: PathBuf,
    props: Arc<WriterProperties>,
    /// Held until the schema is established, then moved into `writer`.
    file: Option<File>,
    writer: Option<SerializedFileWriter<File>>,
    schema: Option<Schema>,
    rows_written: u64,
    row_groups: usize,
    closed: bool,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("path", &self.path)
            .field("schema_established", &self.schema.is_some())
            .field("rows_written", &self.rows_written)
            .field("row_groups", &self.row_groups)
            .field("closed", &self.closed)
            .finish()
    }
}

impl ParquetSink {
    /// Validate `options` and create the destination file.
    pub fn open(path: impl AsRef<Path>, options: &SinkOptions) -> SinkResult<Self> {
        let path = path.as_ref();
        let props = writer_properties(options)?;
        let file = File::create(path).map_err(|source| SinkError::PathUnwritable {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            props: Arc::new(props),
            file: Some(file),
            writer: None,
            schema: None,
            rows_written: 0,
            row_groups: 0,
            closed: false,
        })
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Row groups written so far (one per non-empty batch).
    pub fn row_groups(&self) -> usize {
        self.row_groups
    }

    /// Schema established by the first append, if any.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Whether [`BatchSink::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn establish(&mut self, schema: &Schema) -> SinkResult<()> {
        if let Some(dup) = schema.first_duplicate_name() {
            return Err(SinkError::SchemaMismatch {
                message: format!("duplicate column '{dup}'"),
            });
        }
        let file = self.file.take().ok_or(SinkError::Closed)?;
        let writer = SerializedFileWriter::new(file, parquet_schema(schema)?, Arc::clone(&self.props))?;
        self.writer = Some(writer);
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn check_schema(&mut self, schema: &Schema) -> SinkResult<()> {
        match &self.schema {
            None => self.establish(schema),
            Some(established) if established == schema => Ok(()),
            Some(established) => Err(SinkError::SchemaMismatch {
                message: format!(
                    "batch columns {:?} do not match established columns {:?}",
                    describe(schema),
                    describe(established)
                ),
            }),
        }
    }

    fn finish(&mut self) -> SinkResult<()> {
        self.closed = true;
        self.file = None;
        match self.writer.take() {
            Some(writer) => {
                writer.close()?;
            }
            None => {
                // Never got a schema: nothing readable was written.
                let _ = std::fs::remove_file(&self.path);
            }
        }
        Ok(())
    }
}

impl BatchSink for ParquetSink {
    fn declare_schema(&mut self, schema: &Schema) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.check_schema(schema)
    }

    fn append(&mut self, batch: &Batch) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.check_schema(&batch.schema)?;
        if batch.row_count() == 0 {
            return Ok(());
        }

        // Encode (and type-check) every column before any bytes reach the file.
        let chunks = batch
            .schema
            .fields
            .iter()
            .enumerate()
            .map(|(idx, field)| encode_column(batch, idx, field.data_type, &field.name))
            .collect::<SinkResult<Vec<_>>>()?;

        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let mut rg = writer.next_row_group()?;
        let mut chunks = chunks.into_iter();
        while let Some(mut col) = rg.next_column()? {
            let chunk = chunks
                .next()
                .ok_or_else(|| ParquetError::General("more columns than buffers".to_string()))?;
            let defs = Some(chunk.def_levels.as_slice());
            match (col.untyped(), &chunk.values) {
                (ColumnWriter::Int64ColumnWriter(w), ColumnBuffer::Int64(v)) => {
                    w.write_batch(v, defs, None)?;
                }
                (ColumnWriter::DoubleColumnWriter(w), ColumnBuffer::Double(v)) => {
                    w.write_batch(v, defs, None)?;
                }
                (ColumnWriter::BoolColumnWriter(w), ColumnBuffer::Bool(v)) => {
                    w.write_batch(v, defs, None)?;
                }
                (ColumnWriter::ByteArrayColumnWriter(w), ColumnBuffer::Bytes(v)) => {
                    w.write_batch(v, defs, None)?;
                }
                _ => {
                    return Err(
                        ParquetError::General("column writer does not match buffer".to_string()).into(),
                    );
                }
            }
            col.close()?;
        }
        rg.close()?;

        self.rows_written += batch.row_count() as u64;
        self.row_groups += 1;
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.finish()
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.finish();
        }
    }
}

fn writer_properties(options: &SinkOptions) -> SinkResult<WriterProperties> {
    let compression = match options.compression {
        CompressionCodec::None => Compression::UNCOMPRESSED,
        CompressionCodec::Snappy => Compression::SNAPPY,
        CompressionCodec::HighRatio => {
            let level = ZstdLevel::try_new(options.high_ratio_level).map_err(|e| {
                SinkError::UnsupportedConfig {
                    message: format!("high-ratio level {}: {e}", options.high_ratio_level),
                }
            })?;
            Compression::ZSTD(level)
        }
    };
    Ok(WriterProperties::builder()
        .set_compression(compression)
        .set_created_by(concat!("rust-data-streaming version ", env!("CARGO_PKG_VERSION")).to_string())
        .build())
}

/// Map a [`Schema`] to a flat Parquet message type with one `OPTIONAL` leaf per field.
fn parquet_schema(schema: &Schema) -> SinkResult<TypePtr> {
    let mut fields: Vec<TypePtr> = Vec::with_capacity(schema.len());
    for f in &schema.fields {
        let builder = match f.data_type {
            DataType::Int64 => Type::primitive_type_builder(&f.name, PhysicalType::INT64),
            DataType::Float64 => Type::primitive_type_builder(&f.name, PhysicalType::DOUBLE),
            DataType::Bool => Type::primitive_type_builder(&f.name, PhysicalType::BOOLEAN),
            DataType::Utf8 => Type::primitive_type_builder(&f.name, PhysicalType::BYTE_ARRAY)
                .with_converted_type(ConvertedType::UTF8),
            DataType::Timestamp => Type::primitive_type_builder(&f.name, PhysicalType::INT64)
                .with_converted_type(ConvertedType::TIMESTAMP_MICROS),
        };
        fields.push(Arc::new(builder.with_repetition(Repetition::OPTIONAL).build()?));
    }
    let root = Type::group_type_builder("schema").with_fields(fields).build()?;
    Ok(Arc::new(root))
}

enum ColumnBuffer {
    Int64(Vec<i64>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
    Bytes(Vec<ByteArray>),
}

/// Non-null values plus one definition level per row (0 = null, 1 = present).
struct ColumnChunk {
    values: ColumnBuffer,
    def_levels: Vec<i16>,
}

fn encode_column(batch: &Batch, idx: usize, data_type: DataType, name: &str) -> SinkResult<ColumnChunk> {
    let n = batch.row_count();
    let mut def_levels = Vec::with_capacity(n);
    let mut values = match data_type {
        DataType::Int64 | DataType::Timestamp => ColumnBuffer::Int64(Vec::with_capacity(n)),
        DataType::Float64 => ColumnBuffer::Double(Vec::with_capacity(n)),
        DataType::Bool => ColumnBuffer::Bool(Vec::with_capacity(n)),
        DataType::Utf8 => ColumnBuffer::Bytes(Vec::with_capacity(n)),
    };

    for (row, cell) in batch.rows.iter().map(|r| r.get(idx)).enumerate() {
        let cell = cell.unwrap_or(&Value::Null);
        if !cell.fits(data_type) {
            return Err(SinkError::SchemaMismatch {
                message: format!("row {row} column '{name}' holds {cell:?}, expected {data_type:?}"),
            });
        }
        match (cell, &mut values) {
            (Value::Null, _) => {
                def_levels.push(0);
                continue;
            }
            (Value::Int64(v) | Value::Timestamp(v), ColumnBuffer::Int64(buf)) => buf.push(*v),
            (Value::Float64(v), ColumnBuffer::Double(buf)) => buf.push(*v),
            (Value::Bool(v), ColumnBuffer::Bool(buf)) => buf.push(*v),
            (Value::Utf8(s), ColumnBuffer::Bytes(buf)) => buf.push(ByteArray::from(s.as_str())),
            _ => unreachable!("fits() checked the value kind"),
        }
        def_levels.push(1);
    }

    Ok(ColumnChunk { values, def_levels })
}

fn describe(schema: &Schema) -> Vec<String> {
    schema
        .fields
        .iter()
        .map(|f| format!("{}:{:?}", f.name, f.data_type))
        .collect()
}
