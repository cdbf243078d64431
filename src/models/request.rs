//! Blood request record and its decoding from remote documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RawDocument;

/// One blood-donation request as mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodRequest {
    pub id: String,
    pub blood_group: String,
    pub requester_name: String,
    pub contact: String,
    pub units_required: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hospital_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_image: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl BloodRequest {
    /// Decode a remote document, substituting defaults for absent or
    /// mistyped fields. Returns `None` when the document has no id or no data.
    pub fn from_document(doc: &RawDocument) -> Option<Self> {
        let id = doc.id.as_deref().filter(|id| !id.is_empty())?;
        let data = doc.data.as_ref()?;

        Some(Self {
            id: id.to_string(),
            blood_group: string_field(data, "bloodGroup"),
            requester_name: string_field(data, "requesterName"),
            contact: string_field(data, "contact"),
            units_required: string_field(data, "unitsRequired"),
            latitude: float_field(data, "latitude"),
            longitude: float_field(data, "longitude"),
            hospital_name: string_field(data, "hospitalName"),
            document_image: data
                .get("documentImage")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp: data.get("timestamp").and_then(millis).unwrap_or(0),
        })
    }
}

/// Decode a whole notification, skipping documents that fail to decode.
pub fn decode_batch(docs: &[RawDocument]) -> Vec<BloodRequest> {
    let requests: Vec<BloodRequest> = docs.iter().filter_map(BloodRequest::from_document).collect();

    let skipped = docs.len() - requests.len();
    if skipped > 0 {
        tracing::debug!("Skipped {} undecodable documents out of {}", skipped, docs.len());
    }

    requests
}

fn string_field(data: &Map<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

fn float_field(data: &Map<String, Value>, key: &str) -> f64 {
    data.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

// Fractional millis truncate toward zero; out-of-range values saturate.
fn millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}
