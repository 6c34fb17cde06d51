//! Chunked CSV source.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::error::{SourceError, SourceResult};
use crate::processing::canonical_column_name;
use crate::types::{parse_timestamp_micros, Batch, DataType, Field, Schema, Value};

use super::ChunkSource;

/// Options for [`CsvChunkSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct CsvSourceOptions {
    /// Maximum rows per batch (must be > 0).
    pub chunk_size: usize,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Declared schema; `None` infers one from the header and the first chunk.
    ///
    /// Declared names are matched against the header after trimming and lower-casing both sides,
    /// so `speed` finds a ` Speed ` column.
    pub schema: Option<Schema>,
}

impl Default for CsvSourceOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            delimiter: b';',
            schema: None,
        }
    }
}

/// Reads a headered, delimited file as a lazy sequence of bounded [`Batch`]es.
///
/// Rules:
///
/// - The input must have a header row with unique, non-empty names.
/// - With a declared schema, the header must contain every declared field (order can differ,
///   names compare in canonical form); other columns are ignored.
/// - Without one, every header column is kept and typed from the first chunk (see
///   [`infer_schema`]). A later value that does not fit the inferred type is `Malformed`;
///   declare a schema to type such a column explicitly.
/// - Every record must have as many fields as the header.
///
/// The sequence is not restartable; open the file again to start over.
pub struct CsvChunkSource<R> {
    reader: csv::Reader<R>,
    schema: Schema,
    col_idxs: Vec<usize>,
    chunk_size: usize,
    record: StringRecord,
    /// Raw records read ahead during schema inference; drained by the first batch.
    pending: Vec<StringRecord>,
    /// Schema came from [`infer_schema`] rather than the caller.
    inferred: bool,
    rows_read: u64,
    done: bool,
}

impl CsvChunkSource<File> {
    /// Open `path` for chunked reading.
    pub fn open(path: impl AsRef<Path>, options: &CsvSourceOptions) -> SourceResult<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, options)
    }
}

impl<R: Read> CsvChunkSource<R> {
    /// Wrap any reader. The header (and, for inference, the first chunk) is read immediately.
    pub fn from_reader(rdr: R, options: &CsvSourceOptions) -> SourceResult<Self> {
        if options.chunk_size == 0 {
            return Err(SourceError::malformed(0, "chunk_size must be > 0"));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(options.delimiter)
            .flexible(false)
            .from_reader(rdr);

        let headers = reader
            .headers()
            .map_err(|e| SourceError::from_csv(1, e))?
            .clone();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(SourceError::malformed(1, "missing header row"));
        }
        if let Some(pos) = headers.iter().position(|h| h.trim().is_empty()) {
            return Err(SourceError::malformed(
                1,
                format!("empty column name at position {}", pos + 1),
            ));
        }

        let mut source = Self {
            reader,
            schema: Schema::new(Vec::new()),
            col_idxs: Vec::new(),
            chunk_size: options.chunk_size,
            record: StringRecord::new(),
            pending: Vec::new(),
            inferred: false,
            rows_read: 0,
            done: false,
        };

        match &options.schema {
            Some(declared) => {
                // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
                let mut col_idxs = Vec::with_capacity(declared.len());
                for field in &declared.fields {
                    let wanted = canonical_column_name(&field.name);
                    match headers.iter().position(|h| canonical_column_name(h) == wanted) {
                        Some(idx) => col_idxs.push(idx),
                        None => {
                            return Err(SourceError::malformed(
                                1,
                                format!(
                                    "missing required column '{field}'. headers={:?}",
                                    headers.iter().collect::<Vec<_>>(),
                                    field = field.name
                                ),
                            ));
                        }
                    }
                }
                source.schema = declared.clone();
                source.col_idxs = col_idxs;
            }
            None => {
                source.pending = source.read_raw_chunk()?;
                source.schema = infer_schema(&headers, &source.pending);
                source.col_idxs = (0..headers.len()).collect();
                source.inferred = true;
            }
        }

        if let Some(dup) = source.schema.first_duplicate_name() {
            return Err(SourceError::malformed(1, format!("duplicate column '{dup}'")));
        }

        Ok(source)
    }

    /// Total data rows handed out so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn read_raw_chunk(&mut self) -> SourceResult<Vec<StringRecord>> {
        let mut out = Vec::with_capacity(self.chunk_size.min(4_096));
        while out.len() < self.chunk_size {
            let user_row = self.rows_read + out.len() as u64 + 2;
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|e| SourceError::from_csv(user_row, e))?;
            if !more {
                break;
            }
            out.push(self.record.clone());
        }
        Ok(out)
    }

    fn parse_record(&self, user_row: u64, record: &StringRecord) -> SourceResult<Vec<Value>> {
        let mut row = Vec::with_capacity(self.schema.len());
        for (field, &csv_idx) in self.schema.fields.iter().zip(self.col_idxs.iter()) {
            let raw = record.get(csv_idx).unwrap_or("");
            let value = parse_typed_value(user_row, field, raw).map_err(|e| match e {
                SourceError::Malformed { row, message } if self.inferred => SourceError::Malformed {
                    row,
                    message: format!(
                        "{message}; type was inferred from the first chunk, declare a schema to override"
                    ),
                },
                other => other,
            })?;
            row.push(value);
        }
        Ok(row)
    }
}

impl<R: Read> ChunkSource for CsvChunkSource<R> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next_batch(&mut self) -> SourceResult<Option<Batch>> {
        if self.done {
            return Ok(None);
        }

        let raw = if self.pending.is_empty() {
            match self.read_raw_chunk() {
                Ok(raw) => raw,
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        } else {
            std::mem::take(&mut self.pending)
        };

        if raw.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(raw.len());
        for (i, record) in raw.iter().enumerate() {
            // 1-based for users; +1 again because the header is row 1.
            let user_row = self.rows_read + i as u64 + 2;
            match self.parse_record(user_row, record) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
        self.rows_read += rows.len() as u64;

        Ok(Some(Batch::new(self.schema.clone(), rows)))
    }
}

impl<R: Read> Iterator for CsvChunkSource<R> {
    type Item = SourceResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}

/// Infer a schema from header names and a sample of raw records.
///
/// Per column, considering only non-empty (trimmed) cells: all numbers → [`DataType::Float64`];
/// else all timestamps → [`DataType::Timestamp`]; else all `true`/`false` → [`DataType::Bool`];
/// else [`DataType::Utf8`]. A column with no non-empty cell in the sample is `Float64`.
///
/// Numbers are never inferred as [`DataType::Int64`]: an integer-looking first chunk followed by
/// a fraction would otherwise make the outcome depend on the chunk size. Declare `Int64` in the
/// schema to keep integer columns integral.
pub fn infer_schema(headers: &StringRecord, sample: &[StringRecord]) -> Schema {
    let fields = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = sample
                .iter()
                .filter_map(|r| r.get(idx))
                .map(str::trim)
                .filter(|s| !s.is_empty());
            Field::new(name, infer_column_type(cells))
        })
        .collect();
    Schema::new(fields)
}

fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> DataType {
    let mut cells = cells.peekable();
    if cells.peek().is_none() {
        return DataType::Float64;
    }
    let all = |pred: fn(&str) -> bool| cells.clone().all(pred);
    if all(|s| s.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if all(|s| parse_timestamp_micros(s).is_some()) {
        DataType::Timestamp
    } else if all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")) {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

fn parse_typed_value(row: u64, field: &Field, raw: &str) -> SourceResult<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let fail = |message: String| {
        SourceError::malformed(
            row,
            format!("column '{}': {message} (raw='{raw}')", field.name),
        )
    };

    match field.data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| fail(e.to_string())),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| fail(e.to_string())),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).map_err(fail),
        DataType::Timestamp => parse_timestamp_micros(trimmed)
            .map(Value::Timestamp)
            .ok_or_else(|| fail("expected timestamp".to_string())),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err("expected bool (true/false/1/0/yes/no)".to_string()),
    }
}
