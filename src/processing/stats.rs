//! Mergeable per-column statistics.
//!
//! Each batch is summarised locally per numeric column as `(n, mean, M2)` with Welford's update,
//! then folded into the running summary with the parallel-variance combination rule:
//!
//! ```text
//! delta = m_b - m
//! n'    = n + n_b
//! m'    = m + delta * n_b / n'
//! M2'   = M2 + M2_b + delta^2 * n * n_b / n'
//! ```
//!
//! The result does not depend on how the column was partitioned into batches. Averaging
//! per-batch means (or standard deviations) does, and is biased whenever batch sizes differ.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use crate::error::ReportError;
use crate::types::{Batch, Value};

/// Running `(count, mean, M2)` for one column.
///
/// Invariant: `count == 0` implies `mean == 0.0` and `sum_sq_diff == 0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    /// Number of values seen.
    pub count: u64,
    /// Mean of the values seen.
    pub mean: f64,
    /// Sum of squared deviations from `mean` (Welford's M2).
    pub sum_sq_diff: f64,
}

impl RunningStat {
    /// Summarise a sequence of values with Welford's single-pass update.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut s = Self::default();
        for x in values {
            s.push(x);
        }
        s
    }

    /// Add one value.
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.sum_sq_diff += delta * (x - self.mean);
    }

    /// Fold another summary into this one.
    pub fn merge(&mut self, other: &RunningStat) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }

        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = self.count + other.count;
        let n_f = n as f64;

        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n_f;
        self.sum_sq_diff += other.sum_sq_diff + delta * delta * n_a * n_b / n_f;
        self.count = n;
    }

    /// Sample variance (`M2 / (n - 1)`), defined only when `count > 1`.
    pub fn variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.sum_sq_diff / (self.count - 1) as f64)
    }

    /// Sample standard deviation, defined only when `count > 1`.
    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Accumulates [`RunningStat`]s for every numeric column across the batches of one run.
///
/// Columns are registered in the order they are first seen; non-numeric columns are ignored.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAccumulator {
    columns: Vec<(String, RunningStat)>,
    index: HashMap<String, usize>,
    batches: u64,
}

impl StatisticsAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches folded in so far.
    pub fn batches_seen(&self) -> u64 {
        self.batches
    }

    /// Running summary for `column`, if it is a numeric column seen so far.
    pub fn get(&self, column: &str) -> Option<&RunningStat> {
        self.index.get(column).map(|&i| &self.columns[i].1)
    }

    /// Fold one batch in.
    ///
    /// Batch-local summaries are computed per column in parallel; merging happens in column
    /// order. `Null` and NaN cells are excluded from the column's count for this batch.
    pub fn update(&mut self, batch: &Batch) {
        let numeric: Vec<(usize, &str)> = batch
            .schema
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.data_type.is_numeric())
            .map(|(i, f)| (i, f.name.as_str()))
            .collect();

        let locals: Vec<RunningStat> = numeric
            .par_iter()
            .map(|&(idx, _)| RunningStat::from_values(batch.column(idx).filter_map(Value::as_f64)))
            .collect();

        for ((_, name), local) in numeric.into_iter().zip(locals) {
            let slot = match self.index.get(name) {
                Some(&i) => i,
                None => {
                    self.columns.push((name.to_string(), RunningStat::default()));
                    self.index.insert(name.to_string(), self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            self.columns[slot].1.merge(&local);
        }
        self.batches += 1;
    }

    /// Consume the accumulator and produce the final statistics table.
    pub fn finalize(self) -> ColumnStatistics {
        let columns = self
            .columns
            .into_iter()
            .map(|(column, s)| ColumnSummary {
                column,
                count: s.count,
                mean: if s.count == 0 { f64::NAN } else { s.mean },
                standard_deviation: s.std_dev().unwrap_or(f64::NAN),
            })
            .collect();
        ColumnStatistics { columns }
    }
}

/// One row of the statistics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    /// Column name.
    pub column: String,
    /// Number of non-missing values.
    pub count: u64,
    /// Mean; `NaN` when `count == 0`.
    pub mean: f64,
    /// Sample standard deviation; `NaN` when `count < 2`.
    pub standard_deviation: f64,
}

/// Final per-column statistics of a run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ColumnStatistics {
    columns: Vec<ColumnSummary>,
}

impl ColumnStatistics {
    /// Summary for `column`, if it was a numeric column.
    pub fn get(&self, column: &str) -> Option<&ColumnSummary> {
        self.columns.iter().find(|c| c.column == column)
    }

    /// Summaries in column order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnSummary> {
        self.columns.iter()
    }

    /// Number of numeric columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether there were no numeric columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Write the report as CSV with header `column,count,mean,standard_deviation`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut wtr = csv::Writer::from_path(path)?;
        for row in &self.columns {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the report as a JSON array of records. Undefined values are written as `null`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Field, Schema};

    fn x_batch(values: &[f64]) -> Batch {
        let schema = Schema::new(vec![Field::new("x", DataType::Float64)]);
        Batch::new(
            schema,
            values.iter().map(|v| vec![Value::Float64(*v)]).collect(),
        )
    }

    fn assert_close(a: f64, b: f64) {
        let scale = a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() / scale < 1e-9, "{a} != {b}");
    }

    #[test]
    fn three_uneven_batches_match_single_pass() {
        let mut acc = StatisticsAccumulator::new();
        acc.update(&x_batch(&[1.0, 2.0, 3.0]));
        acc.update(&x_batch(&[4.0, 5.0]));
        acc.update(&x_batch(&[6.0]));

        let stats = acc.finalize();
        let x = stats.get("x").unwrap();
        assert_eq!(x.count, 6);
        assert_close(x.mean, 3.5);
        assert_close(x.standard_deviation, (17.5f64 / 5.0).sqrt());
        assert_close(x.standard_deviation, 1.870_828_693_386_970_7);
    }

    #[test]
    fn naive_mean_of_means_would_differ() {
        let parts: [&[f64]; 2] = [&[1.0, 2.0, 3.0, 4.0], &[100.0]];
        let naive = parts
            .iter()
            .map(|p| p.iter().sum::<f64>() / p.len() as f64)
            .sum::<f64>()
            / 2.0;

        let mut acc = StatisticsAccumulator::new();
        for p in parts {
            acc.update(&x_batch(p));
        }
        let merged = acc.finalize().get("x").unwrap().mean;
        assert_close(merged, 22.0);
        assert!((naive - merged).abs() > 1.0);
    }

    #[test]
    fn any_partition_gives_the_same_answer() {
        let values: Vec<f64> = (0..257)
            .map(|i| ((i * 37) % 101) as f64 * 0.25 + 1e6)
            .collect();
        let reference = RunningStat::from_values(values.iter().copied());

        for chunk in [1usize, 2, 3, 7, 64, 100, 256, 257, 1000] {
            let mut acc = StatisticsAccumulator::new();
            for part in values.chunks(chunk) {
                acc.update(&x_batch(part));
            }
            let s = *acc.get("x").unwrap();
            assert_eq!(s.count, reference.count);
            assert_close(s.mean, reference.mean);
            assert_close(s.sum_sq_diff, reference.sum_sq_diff);
        }
    }

    #[test]
    fn two_pass_reference_agrees_with_welford() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let m2: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();

        let s = RunningStat::from_values(values);
        assert_close(s.mean, mean);
        assert_close(s.sum_sq_diff, m2);
        assert_close(s.variance().unwrap(), m2 / 7.0);
    }

    #[test]
    fn nulls_and_nans_are_excluded_not_zeroed() {
        let schema = Schema::new(vec![Field::new("x", DataType::Float64)]);
        let batch = Batch::new(
            schema,
            vec![
                vec![Value::Float64(2.0)],
                vec![Value::Null],
                vec![Value::Float64(f64::NAN)],
                vec![Value::Float64(4.0)],
            ],
        );
        let mut acc = StatisticsAccumulator::new();
        acc.update(&batch);
        let x = acc.finalize().get("x").cloned().unwrap();
        assert_eq!(x.count, 2);
        assert_close(x.mean, 3.0);
    }

    #[test]
    fn non_numeric_columns_are_skipped_and_ints_count() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
            Field::new("at", DataType::Timestamp),
            Field::new("ok", DataType::Bool),
        ]);
        let batch = Batch::new(
            schema,
            vec![
                vec![
                    Value::Int64(1),
                    Value::Utf8("a".into()),
                    Value::Timestamp(5),
                    Value::Bool(true),
                ],
                vec![
                    Value::Int64(3),
                    Value::Utf8("b".into()),
                    Value::Timestamp(6),
                    Value::Bool(false),
                ],
            ],
        );
        let mut acc = StatisticsAccumulator::new();
        acc.update(&batch);
        let stats = acc.finalize();
        assert_eq!(stats.len(), 1);
        assert_close(stats.get("id").unwrap().mean, 2.0);
        assert!(stats.get("name").is_none());
    }

    #[test]
    fn small_counts_report_nan() {
        let mut acc = StatisticsAccumulator::new();
        acc.update(&x_batch(&[]));
        let empty = acc.clone().finalize();
        assert!(empty.get("x").unwrap().mean.is_nan());
        assert!(empty.get("x").unwrap().standard_deviation.is_nan());

        acc.update(&x_batch(&[42.0]));
        let one = acc.finalize();
        assert_eq!(one.get("x").unwrap().mean, 42.0);
        assert!(one.get("x").unwrap().standard_deviation.is_nan());
    }

    #[test]
    fn merge_with_empty_keeps_zero_invariant() {
        let mut s = RunningStat::default();
        s.merge(&RunningStat::default());
        assert_eq!(s, RunningStat::default());

        let other = RunningStat::from_values([1.0, 3.0]);
        s.merge(&other);
        assert_eq!(s, other);
    }
}
