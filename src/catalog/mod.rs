//! Catalog model: compiled documents, component identity, and metrics buckets.

use serde_json::{Map, Value};

pub mod compile;
pub mod repo_spec;
pub mod store;

/// Get a field from a component's `metrics.<bucket>` object, if present.
#[must_use]
pub fn bucket_field<'a>(item: &'a Map<String, Value>, bucket: &str, field: &str) -> Option<&'a Value> {
    item.get("metrics")?.as_object()?.get(bucket)?.as_object()?.get(field)
}

/// Get a component's `metrics.<bucket>` object, creating it (and `metrics`)
/// on demand. Non-object values in the way are replaced.
pub fn ensure_bucket<'a>(item: &'a mut Map<String, Value>, bucket: &str) -> &'a mut Map<String, Value> {
    let metrics = item.entry("metrics").or_insert_with(|| Value::Object(Map::new()));
    if !metrics.is_object() {
        *metrics = Value::Object(Map::new());
    }
    let metrics = metrics.as_object_mut().expect("metrics is an object");

    let bucket_value = metrics.entry(bucket).or_insert_with(|| Value::Object(Map::new()));
    if !bucket_value.is_object() {
        *bucket_value = Value::Object(Map::new());
    }
    bucket_value.as_object_mut().expect("bucket is an object")
}
