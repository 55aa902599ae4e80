//! Schemaless document model.
//!
//! Rows mirror whatever columns the source table has, so a document is a map
//! from column name to a dynamically typed JSON value. Timestamps travel as
//! RFC 3339 strings, UUIDs as strings and `json`/`jsonb` columns as nested
//! values. NUMERIC values an `f64` cannot hold exactly stay strings. Enums,
//! intervals and other types without a direct mapping take their `to_jsonb`
//! form.

use serde_json::{Map, Value as JsonValue};

/// A single row, keyed by column name.
pub type Document = Map<String, JsonValue>;

/// One page of rows, in source order.
pub type Batch = Vec<Document>;

/// Encode a batch as the JSON array body Meilisearch expects.
pub fn encode_batch(batch: &[Document]) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(batch)
        .map_err(|e| crate::Error::serialization("Failed to encode document batch", e))
}
