//! Raw documents as delivered by a remote collection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A schemaless remote document: an id assigned by the remote store and the
/// field map. Either may be missing in a malformed notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl RawDocument {
    pub fn new(id: Option<String>, data: Option<Map<String, Value>>) -> Self {
        Self { id, data }
    }

    /// Build a document from an id and a JSON object; non-object values yield
    /// a document without data.
    pub fn from_json(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id.into()),
            data: match data {
                Value::Object(map) => Some(map),
                _ => None,
            },
        }
    }
}
