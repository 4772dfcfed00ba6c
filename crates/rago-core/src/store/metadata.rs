//! Heterogeneous metadata values attached to documents and chunks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single metadata value. Tagged so the set stays losslessly JSON-round-trippable
/// even though the persistence layer stores it as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Tags(Vec<String>),
    Json(serde_json::Value),
}

/// An open string-keyed metadata mapping.
pub type Metadata = HashMap<String, MetadataValue>;

/// Serializes a [`Metadata`] map to a JSON string for storage.
pub fn to_json(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

/// Parses a [`Metadata`] map from its stored JSON string. Empty/absent input
/// yields an empty map rather than an error.
pub fn from_json(json: &str) -> Result<Metadata> {
    if json.trim().is_empty() {
        return Ok(Metadata::new());
    }
    Ok(serde_json::from_str(json)?)
}

/// Merges `extra` into `base`, with `extra` taking precedence on key conflicts.
/// Used by the ingestion pipeline to layer pipeline-added keys (`chunk_index`,
/// `source`, `file_ext`) onto inherited document metadata.
pub fn merge(base: &Metadata, extra: &Metadata) -> Metadata {
    let mut merged = base.clone();
    for (key, value) in extra {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Equality-mapping filter as used by Vector/Keyword search and Query
/// Request: a candidate matches only if every key in the filter is present
/// in its metadata with an equal value.
pub fn matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}
