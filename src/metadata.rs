//! Structural metadata supplied by an external scraper
//!
//! The pipeline never computes metadata itself; it merges whatever record the
//! index holds for a URL into that URL's row and page record.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ordered key/value pairs describing one page
pub type MetadataRecord = BTreeMap<String, String>;

/// URL → metadata record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataIndex {
    records: BTreeMap<String, MetadataRecord>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON object of the form `{"<url>": {"key": "value", ...}, ...}`.
    ///
    /// Non-string values are stored in their JSON text form so numbers and
    /// booleans from the scraper survive.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::InputError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> =
            serde_json::from_str(text).map_err(|e| Error::InputError(format!("metadata index: {}", e)))?;

        let records = raw
            .into_iter()
            .map(|(url, fields)| {
                let record = fields
                    .into_iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Null => String::new(),
                            other => other.to_string(),
                        };
                        (k, value)
                    })
                    .collect();
                (url.trim().to_string(), record)
            })
            .collect();
        Ok(Self { records })
    }

    pub fn insert(&mut self, url: impl Into<String>, record: MetadataRecord) {
        self.records.insert(url.into().trim().to_string(), record);
    }

    pub fn get(&self, url: &str) -> Option<&MetadataRecord> {
        self.records.get(url.trim())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sorted union of the keys of every record
    pub fn keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.records.values().flat_map(|r| r.keys()).collect();
        keys.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_stringifies_values() {
        let index = MetadataIndex::from_json_str(
            r#"{
                "https://a.test/": {"language": "en", "fonts": 3},
                "https://b.test/": {"host": "neocities", "has_js": true, "notes": null}
            }"#,
        )
        .unwrap();
        assert_eq!(index.len(), 2);
        let a = index.get("https://a.test/").unwrap();
        assert_eq!(a["fonts"], "3");
        assert_eq!(index.get("https://b.test/").unwrap()["has_js"], "true");
        assert_eq!(index.keys(), vec!["fonts", "has_js", "host", "language", "notes"]);
    }

    #[test]
    fn malformed_index_is_an_input_error() {
        assert!(matches!(
            MetadataIndex::from_json_str("[1, 2]"),
            Err(Error::InputError(_))
        ));
    }
}
