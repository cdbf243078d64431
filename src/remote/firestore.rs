//! Firestore REST collection, polled at a fixed interval.
//!
//! Each poll lists every document of the collection (following page tokens)
//! and delivers the result as one snapshot notification.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{RemoteCollection, Subscription};
use crate::config::FirestoreConfig;
use crate::errors::AppError;
use crate::models::RawDocument;

const PAGE_SIZE: u32 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsPage {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Polling client for one Firestore collection.
#[derive(Clone)]
pub struct FirestoreCollection {
    client: reqwest::Client,
    documents_url: String,
    token: Option<String>,
    poll_interval: Duration,
}

impl FirestoreCollection {
    pub fn new(config: &FirestoreConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let documents_url = format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            config.base_url.trim_end_matches('/'),
            config.project_id,
            config.collection
        );

        Ok(Self {
            client,
            documents_url,
            token: config.token.clone(),
            poll_interval: config.poll_interval,
        })
    }

    /// Fetch every document currently in the collection.
    pub async fn fetch_all(&self) -> Result<Vec<RawDocument>, AppError> {
        let mut docs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&self.documents_url)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let page: ListDocumentsPage = request
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            docs.extend(page.documents.into_iter().map(raw_document));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(docs)
    }
}

impl RemoteCollection for FirestoreCollection {
    fn name(&self) -> String {
        self.documents_url.clone()
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let collection = self.clone();

        let feeder = tokio::spawn(async move {
            loop {
                let result = collection.fetch_all().await;
                let failed = result.is_err();
                if tx.send(result).is_err() || failed {
                    break;
                }
                tokio::time::sleep(collection.poll_interval).await;
            }
        });

        Subscription::with_feeder(rx, feeder)
    }
}

fn raw_document(doc: FirestoreDocument) -> RawDocument {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    RawDocument::new(id, Some(decode_fields(&doc.fields)))
}

fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), decode_value(value)))
        .collect()
}

/// Convert a typed Firestore value (`{"stringValue": "O+"}`) into plain JSON.
fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|obj| obj.iter().next()) else {
        return Value::Null;
    };

    match kind.as_str() {
        // int64 travels as a decimal string
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        },
        "mapValue" => inner
            .get("fields")
            .and_then(Value::as_object)
            .map(|fields| Value::Object(decode_fields(fields)))
            .unwrap_or_else(|| Value::Object(Map::new())),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "nullValue" => Value::Null,
        _ => inner.clone(),
    }
}
