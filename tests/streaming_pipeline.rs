use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rust_data_streaming::config::{CompressionCodec, PipelineConfig};
use rust_data_streaming::execution::{Pipeline, PipelineState};
use rust_data_streaming::ingestion::{read_parquet_schema, ChunkSource, ParquetBatchReader};
use rust_data_streaming::types::{DataType, Value};
use rust_data_streaming::{AbortCause, SourceError};

const TELEMETRY: &str = "tests/fixtures/telemetry.csv";
const TELEMETRY_ROWS: u64 = 11;

fn tmp_file(name: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("rust-data-streaming-{name}-{nanos}.{ext}"))
}

fn config(chunk_size: usize) -> PipelineConfig {
    PipelineConfig {
        chunk_size,
        ..Default::default()
    }
}

/// Count, mean and sample standard deviation of one column, computed in a single in-memory pass.
fn in_memory_stats(path: &str, column: &str) -> (u64, f64, f64) {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .unwrap();
    let idx = rdr
        .headers()
        .unwrap()
        .iter()
        .position(|h| h.trim().to_lowercase() == column)
        .unwrap();
    let values: Vec<f64> = rdr
        .records()
        .map(|r| r.unwrap())
        .filter_map(|r| r.get(idx).and_then(|s| s.trim().parse::<f64>().ok()))
        .collect();

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (values.len() as u64, mean, var.sqrt())
}

fn assert_close(a: f64, b: f64) {
    let scale = a.abs().max(b.abs()).max(1.0);
    assert!((a - b).abs() / scale < 1e-9, "{a} != {b}");
}

fn readback_rows(path: &Path) -> u64 {
    ParquetBatchReader::open(path, 5)
        .unwrap()
        .map(|b| b.unwrap().row_count() as u64)
        .sum()
}

#[test]
fn telemetry_converts_with_canonical_columns_and_all_rows() {
    let out = tmp_file("telemetry", "parquet");
    let pipeline = Pipeline::new(config(4));
    let metrics = pipeline.metrics();
    pipeline.run(TELEMETRY, &out).unwrap();

    let snap = metrics.snapshot();
    assert_eq!(snap.state, PipelineState::Finished);
    assert_eq!(snap.batches, 3);
    assert_eq!(snap.rows_read, TELEMETRY_ROWS);
    assert_eq!(snap.rows_written, TELEMETRY_ROWS);

    let mut reader = ParquetBatchReader::open(&out, 5).unwrap();
    assert_eq!(reader.total_rows(), TELEMETRY_ROWS);
    let fields: Vec<(&str, DataType)> = reader
        .schema()
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.data_type))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("timestamp", DataType::Timestamp),
            ("model", DataType::Utf8),
            ("speed_kmh", DataType::Float64),
            ("rpm", DataType::Float64),
            ("temperature_c", DataType::Float64),
            ("engine_on", DataType::Bool),
        ]
    );

    let sizes: Vec<usize> = reader.by_ref().map(|b| b.unwrap().row_count()).collect();
    assert_eq!(sizes, vec![5, 5, 1]);

    let first = ParquetBatchReader::open(&out, 1).unwrap().next().unwrap().unwrap();
    assert_eq!(first.rows[0][1], Value::Utf8("Civic".to_string()));
    assert_eq!(first.rows[0][5], Value::Bool(true));

    let _ = std::fs::remove_file(&out);
}

#[test]
fn statistics_match_a_single_in_memory_pass() {
    let out = tmp_file("stats", "parquet");
    let stats = Pipeline::new(config(4)).run(TELEMETRY, &out).unwrap();

    let names: Vec<&str> = stats.iter().map(|c| c.column.as_str()).collect();
    assert_eq!(names, vec!["speed_kmh", "rpm", "temperature_c"]);

    for column in ["speed_kmh", "rpm", "temperature_c"] {
        let (count, mean, std) = in_memory_stats(TELEMETRY, column);
        let got = stats.get(column).unwrap();
        assert_eq!(got.count, count, "{column}");
        assert_close(got.mean, mean);
        assert_close(got.standard_deviation, std);
    }
    // One empty speed cell and one empty temperature cell.
    assert_eq!(stats.get("speed_kmh").unwrap().count, TELEMETRY_ROWS - 1);
    assert_eq!(stats.get("temperature_c").unwrap().count, TELEMETRY_ROWS - 1);

    let _ = std::fs::remove_file(&out);
}

#[test]
fn statistics_do_not_depend_on_chunk_size() {
    let mut runs = Vec::new();
    for chunk_size in [1, 2, 3, 7, 100] {
        let out = tmp_file("partition", "parquet");
        let stats = Pipeline::new(config(chunk_size)).run(TELEMETRY, &out).unwrap();
        assert_eq!(readback_rows(&out), TELEMETRY_ROWS, "chunk_size={chunk_size}");
        runs.push(stats);
        let _ = std::fs::remove_file(&out);
    }

    let baseline = &runs[0];
    for other in &runs[1..] {
        for (a, b) in baseline.iter().zip(other.iter()) {
            assert_eq!(a.column, b.column);
            assert_eq!(a.count, b.count);
            assert_close(a.mean, b.mean);
            assert_close(a.standard_deviation, b.standard_deviation);
        }
    }
}

#[test]
fn every_codec_round_trips() {
    for compression in [CompressionCodec::None, CompressionCodec::Snappy, CompressionCodec::HighRatio] {
        let out = tmp_file("codec", "parquet");
        let cfg = PipelineConfig {
            chunk_size: 3,
            compression,
            high_ratio_level: 19,
            ..Default::default()
        };
        Pipeline::new(cfg).run(TELEMETRY, &out).unwrap();
        assert_eq!(readback_rows(&out), TELEMETRY_ROWS, "{compression:?}");
        let _ = std::fs::remove_file(&out);
    }
}

#[test]
fn header_only_input_yields_empty_readable_table() {
    let out = tmp_file("header-only", "parquet");
    let stats = Pipeline::new(config(10))
        .run("tests/fixtures/header_only.csv", &out)
        .unwrap();
    assert!(stats.is_empty());

    let mut reader = ParquetBatchReader::open(&out, 10).unwrap();
    assert_eq!(reader.total_rows(), 0);
    let names: Vec<&str> = reader.schema().field_names().collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(&read_parquet_schema(&out).unwrap(), reader.schema());
    assert!(reader.next().is_none());

    let _ = std::fs::remove_file(&out);
}

#[test]
fn bad_value_in_a_later_chunk_aborts_with_its_row() {
    let out = tmp_file("bad-value", "parquet");
    let pipeline = Pipeline::new(config(2));
    let metrics = pipeline.metrics();
    let err = pipeline.run("tests/fixtures/bad_value.csv", &out).unwrap_err();

    match err.cause() {
        AbortCause::Source(SourceError::Malformed { row, message }) => {
            assert_eq!(*row, 4);
            assert!(message.contains("value"), "{message}");
        }
        other => panic!("unexpected cause: {other:?}"),
    }
    let snap = metrics.snapshot();
    assert_eq!(snap.state, PipelineState::Failed);
    assert_eq!(snap.batches, 1);

    let _ = std::fs::remove_file(&out);
}

#[test]
fn json_config_drives_a_run() {
    let cfg_path = tmp_file("config", "json");
    std::fs::write(
        &cfg_path,
        r#"{ "chunk_size": 5, "compression": "snappy", "delimiter": ";" }"#,
    )
    .unwrap();
    let cfg = PipelineConfig::from_json_path(&cfg_path).unwrap();
    assert_eq!(cfg.compression, CompressionCodec::Snappy);

    let out = tmp_file("config-run", "parquet");
    Pipeline::new(cfg).run(TELEMETRY, &out).unwrap();
    assert_eq!(readback_rows(&out), TELEMETRY_ROWS);

    let _ = std::fs::remove_file(&cfg_path);
    let _ = std::fs::remove_file(&out);
}

#[test]
fn statistics_report_is_written_as_csv_and_json() {
    let out = tmp_file("report", "parquet");
    let stats = Pipeline::new(config(4)).run(TELEMETRY, &out).unwrap();

    let csv_path = tmp_file("statistics", "csv");
    stats.write_csv(&csv_path).unwrap();
    let mut rdr = csv::Reader::from_path(&csv_path).unwrap();
    let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(headers, vec!["column", "count", "mean", "standard_deviation"]);
    let records: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(&records[1][0], "rpm");
    assert_eq!(&records[1][1], "11");

    let json_path = tmp_file("statistics", "json");
    stats.write_json(&json_path).unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    let arr = parsed.as_array().unwrap();
    assert_eq!(arr.len(), 3);
    assert_eq!(arr[0]["column"], "speed_kmh");
    assert_eq!(arr[0]["count"], 10);

    for p in [&out, &csv_path, &json_path] {
        let _ = std::fs::remove_file(p);
    }
}

#[test]
fn finished_store_feeds_a_second_run() {
    let first = tmp_file("first", "parquet");
    let second = tmp_file("second", "parquet");
    let stats = Pipeline::new(config(4)).run(TELEMETRY, &first).unwrap();

    let source = ParquetBatchReader::open(&first, 3).unwrap();
    let sink = rust_data_streaming::sink::ParquetSink::open(&second, &config(4).sink_options()).unwrap();
    let again = Pipeline::new(config(4)).run_with(source, sink).unwrap();

    assert_eq!(readback_rows(&second), TELEMETRY_ROWS);
    for (a, b) in stats.iter().zip(again.iter()) {
        assert_eq!(a.count, b.count);
        assert_close(a.mean, b.mean);
        assert_close(a.standard_deviation, b.standard_deviation);
    }

    let _ = std::fs::remove_file(&first);
    let _ = std::fs::remove_file(&second);
}

#[test]
fn integers_then_fraction_convert_the_same_at_every_chunk_size() {
    let input = tmp_file("int-then-fraction", "csv");
    std::fs::write(&input, "x\n1\n2\n2.5\n").unwrap();

    let mut runs = Vec::new();
    for chunk_size in [1, 2, 3, 10] {
        let out = tmp_file("int-then-fraction", "parquet");
        let stats = Pipeline::new(config(chunk_size))
            .run(&input, &out)
            .unwrap_or_else(|e| panic!("chunk_size={chunk_size}: {e}"));
        assert_eq!(readback_rows(&out), 3, "chunk_size={chunk_size}");
        assert_eq!(
            read_parquet_schema(&out).unwrap().fields[0].data_type,
            DataType::Float64
        );
        runs.push(stats);
        let _ = std::fs::remove_file(&out);
    }

    let x = runs[0].get("x").unwrap();
    assert_eq!(x.count, 3);
    assert_close(x.mean, 5.5 / 3.0);
    for other in &runs[1..] {
        let y = other.get("x").unwrap();
        assert_eq!(y.count, x.count);
        assert_close(y.mean, x.mean);
        assert_close(y.standard_deviation, x.standard_deviation);
    }

    let _ = std::fs::remove_file(&input);
}
