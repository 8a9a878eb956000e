use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

use claimdex_core::types::meta_keys;

/// Record layout for chunk and summary tables: id, one Utf8 column per
/// filterable metadata key, then the vector.
pub fn build_record_schema(dim: usize) -> Arc<Schema> {
    let mut fields = vec![Field::new("id", DataType::Utf8, false)];
    fields.extend(meta_keys::ALL.iter().map(|k| Field::new(*k, DataType::Utf8, false)));
    fields.push(Field::new(
        "vector",
        DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
        true,
    ));
    Arc::new(Schema::new(fields))
}

pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}
