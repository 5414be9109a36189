use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata keys that attribute a chunk to its originating document, in
/// order of preference.
pub const SOURCE_KEYS: [&str; 2] = ["source_file", "source"];

/// A retrievable span of document text plus attribution metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, metadata: BTreeMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }

    pub fn with_source(content: impl Into<String>, source_file: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("source_file".to_string(), Value::String(source_file.into()));
        Self::new(content, metadata)
    }

    /// Document identifier, taken from `source_file` and then `source`.
    pub fn source(&self) -> Option<&str> {
        SOURCE_KEYS
            .iter()
            .filter_map(|key| self.metadata.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn page(&self) -> Option<u64> {
        self.metadata.get("page").and_then(|value| match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
    }
}
