//! Run configuration.
//!
//! Every run takes an explicit [`PipelineConfig`]; nothing is read from process-wide state. Use
//! [`Default`] for common cases or load a JSON document with [`PipelineConfig::from_json_path`].
//!
//! ```rust
//! use rust_data_streaming::config::{CompressionCodec, PipelineConfig};
//!
//! let cfg = PipelineConfig::from_json_str(r#"{ "chunk_size": 2, "compression": "snappy" }"#).unwrap();
//! assert_eq!(cfg.chunk_size, 2);
//! assert_eq!(cfg.compression, CompressionCodec::Snappy);
//! assert_eq!(cfg.delimiter, ';');
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::ingestion::csv::CsvSourceOptions;
use crate::sink::SinkOptions;
use crate::types::Schema;

/// Valid range for [`PipelineConfig::high_ratio_level`] (zstd).
pub const HIGH_RATIO_LEVELS: std::ops::RangeInclusive<i32> = 1..=22;

/// Compression codec applied by the columnar sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionCodec {
    /// No compression.
    None,
    /// Snappy: fast, moderate ratio.
    Snappy,
    /// Zstandard at [`PipelineConfig::high_ratio_level`]: slower, smaller files.
    #[default]
    HighRatio,
}

/// Options controlling a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows per batch. The only memory/throughput tuning knob; must be > 0.
    pub chunk_size: usize,
    /// Codec used by the columnar sink.
    pub compression: CompressionCodec,
    /// Codec level used when `compression` is [`CompressionCodec::HighRatio`].
    pub high_ratio_level: i32,
    /// Field delimiter of the row-oriented input.
    pub delimiter: char,
    /// Declared input schema. If `None`, the schema is inferred from the header and first chunk.
    pub schema: Option<Schema>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            compression: CompressionCodec::default(),
            high_ratio_level: 9,
            delimiter: ';',
            schema: None,
        }
    }
}

impl PipelineConfig {
    /// Parse a config from a JSON document. Missing keys take their default values.
    pub fn from_json_str(s: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every option without touching the filesystem.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        delimiter_byte(self.delimiter)?;
        if self.compression == CompressionCodec::HighRatio
            && !HIGH_RATIO_LEVELS.contains(&self.high_ratio_level)
        {
            return Err(ConfigError::InvalidCompressionLevel {
                level: self.high_ratio_level,
                min: *HIGH_RATIO_LEVELS.start(),
                max: *HIGH_RATIO_LEVELS.end(),
            });
        }
        Ok(())
    }

    /// Source-side view of this config.
    pub fn source_options(&self) -> ConfigResult<CsvSourceOptions> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        Ok(CsvSourceOptions {
            chunk_size: self.chunk_size,
            delimiter: delimiter_byte(self.delimiter)?,
            schema: self.schema.clone(),
        })
    }

    /// Sink-side view of this config.
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            compression: self.compression,
            high_ratio_level: self.high_ratio_level,
        }
    }
}

fn delimiter_byte(c: char) -> ConfigResult<u8> {
    match c {
        '"' | '\r' | '\n' => Err(ConfigError::InvalidDelimiter(c)),
        c if c.is_ascii() => Ok(c as u8),
        c => Err(ConfigError::InvalidDelimiter(c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Field};

    #[test]
    fn defaults_follow_the_semicolon_high_ratio_layout() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.chunk_size, 100_000);
        assert_eq!(cfg.delimiter, ';');
        assert_eq!(cfg.compression, CompressionCodec::HighRatio);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn codec_names_are_kebab_case() {
        let cfg = PipelineConfig::from_json_str(r#"{"compression":"high-ratio","high_ratio_level":3}"#)
            .unwrap();
        assert_eq!(cfg.compression, CompressionCodec::HighRatio);
        assert_eq!(cfg.high_ratio_level, 3);

        let cfg = PipelineConfig::from_json_str(r#"{"compression":"none"}"#).unwrap();
        assert_eq!(cfg.compression, CompressionCodec::None);

        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"compression":"lz77"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn declared_schema_round_trips_through_json() {
        let cfg = PipelineConfig {
            schema: Some(Schema::new(vec![
                Field::new("x", DataType::Float64),
                Field::new("when", DataType::Timestamp),
            ])),
            ..Default::default()
        };
        let text = serde_json::to_string(&cfg).unwrap();
        assert!(text.contains(r#"{"name":"when","data_type":"timestamp"}"#));
        assert_eq!(PipelineConfig::from_json_str(&text).unwrap(), cfg);
    }

    #[test]
    fn validate_rejects_bad_options() {
        let zero = PipelineConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidChunkSize)));

        for bad in ['"', '\n', 'é'] {
            let cfg = PipelineConfig {
                delimiter: bad,
                ..Default::default()
            };
            assert!(matches!(cfg.validate(), Err(ConfigError::InvalidDelimiter(c)) if c == bad));
        }

        let level = PipelineConfig {
            high_ratio_level: 40,
            ..Default::default()
        };
        assert!(matches!(
            level.validate(),
            Err(ConfigError::InvalidCompressionLevel { level: 40, .. })
        ));

        // Level only matters for the high-ratio codec.
        let snappy = PipelineConfig {
            compression: CompressionCodec::Snappy,
            high_ratio_level: 40,
            ..Default::default()
        };
        assert!(snappy.validate().is_ok());
    }

    #[test]
    fn source_options_carry_delimiter_byte() {
        let cfg = PipelineConfig {
            delimiter: '\t',
            chunk_size: 7,
            ..Default::default()
        };
        let opts = cfg.source_options().unwrap();
        assert_eq!(opts.delimiter, b'\t');
        assert_eq!(opts.chunk_size, 7);
    }
}
