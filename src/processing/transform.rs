//! Header canonicalisation for [`crate::types::Batch`].

use crate::types::{Batch, Field, Schema};

/// Canonical form of a column name: surrounding whitespace trimmed, lower-cased.
pub fn canonical_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Returns `schema` with every field name canonicalised. Types and order are unchanged.
pub fn transform_schema(schema: &Schema) -> Schema {
    Schema::new(
        schema
            .fields
            .iter()
            .map(|f| Field::new(canonical_column_name(&f.name), f.data_type))
            .collect(),
    )
}

/// Canonicalise the batch's column names. Row values are moved through untouched.
///
/// Pure and idempotent: `transform(transform(b)) == transform(b)`.
pub fn transform(batch: Batch) -> Batch {
    let schema = transform_schema(&batch.schema);
    Batch::new(schema, batch.rows)
}
