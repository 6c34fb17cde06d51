//! Per-batch processing stages.
//!
//! - [`transform()`]: pure header canonicalisation applied to every batch
//! - [`StatisticsAccumulator`]: running, mergeable count/mean/variance per numeric column
//!
//! ## Example: transform → accumulate
//!
//! ```rust
//! use rust_data_streaming::processing::{transform, StatisticsAccumulator};
//! use rust_data_streaming::types::{Batch, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![Field::new(" X ", DataType::Float64)]);
//! let mut acc = StatisticsAccumulator::new();
//! for part in [vec![1.0, 2.0, 3.0], vec![4.0, 5.0], vec![6.0]] {
//!     let rows = part.into_iter().map(|v| vec![Value::Float64(v)]).collect();
//!     let batch = transform(Batch::new(schema.clone(), rows));
//!     acc.update(&batch);
//! }
//!
//! let stats = acc.finalize();
//! let x = stats.get("x").unwrap();
//! assert_eq!(x.mean, 3.5);
//! assert!((x.standard_deviation - (17.5f64 / 5.0).sqrt()).abs() < 1e-12);
//! ```

pub mod stats;
pub mod transform;

pub use stats::{ColumnStatistics, ColumnSummary, RunningStat, StatisticsAccumulator};
pub use transform::{canonical_column_name, transform, transform_schema};
