//! The loaded document type shared by every loader.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A piece of text plus free-form metadata about where it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` metadata entry, when it is a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_and_source() {
        let doc = Document::new("Hello World!")
            .with_metadata("source", "ABC title")
            .with_metadata("loc", json!({ "pageNumber": 1 }));
        assert_eq!(doc.source(), Some("ABC title"));
        assert_eq!(doc.metadata["loc"]["pageNumber"], 1);
    }

    #[test]
    fn test_deserialize_without_metadata() {
        let doc: Document = serde_json::from_str(r#"{"page_content": "x"}"#).unwrap();
        assert!(doc.metadata.is_empty());
        assert!(doc.source().is_none());
    }
}
