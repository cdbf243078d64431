//! Mirror snapshots and refresh batches.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::BloodRequest;
use crate::errors::AppError;

/// The mirrored list as published to observers, newest request first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSnapshot {
    /// Bumps every time the visible list changes
    pub revision: u64,
    pub requests: Arc<Vec<BloodRequest>>,
}

impl MirrorSnapshot {
    pub fn find(&self, id: &str) -> Option<&BloodRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Every record delivered by one remote notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Strictly increasing per store; older versions are discarded
    pub version: u64,
    pub requests: Vec<BloodRequest>,
}

impl Batch {
    pub fn new(version: u64, requests: Vec<BloodRequest>) -> Self {
        Self { version, requests }
    }
}

/// What `replace_all` did with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Committed; `changed` is false when the content was already mirrored
    Applied { changed: bool, records: usize },
    /// A batch with the same or a newer version was applied first
    Superseded { latest: u64 },
}

/// Where `lookup` reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LookupSource {
    /// Last published snapshot
    #[default]
    Cached,
    /// Fresh query against the table
    Durable,
}

impl FromStr for LookupSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cached" => Ok(LookupSource::Cached),
            "durable" => Ok(LookupSource::Durable),
            other => Err(AppError::BadRequest(format!(
                "Unknown lookup source {:?}, expected \"cached\" or \"durable\"",
                other
            ))),
        }
    }
}
