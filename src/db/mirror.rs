//! The local mirror store.
//!
//! Writes go through one transaction per batch and are published to observers
//! only after commit, so readers see either the previous complete list or the
//! new one.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::{watch, Mutex};

use crate::errors::AppError;
use crate::models::{Batch, BloodRequest, LookupSource, MirrorSnapshot, ReplaceOutcome};

const SELECT_REQUESTS: &str = "SELECT id, blood_group, requester_name, contact, units_required, latitude, longitude, hospital_name, document_image, timestamp FROM requests";

/// Durable, observable copy of the remote request collection.
pub struct MirrorStore {
    pool: SqlitePool,
    snapshot: watch::Sender<MirrorSnapshot>,
    write_lock: Mutex<()>,
}

impl MirrorStore {
    /// Open the store and publish whatever the table already holds.
    pub async fn open(pool: SqlitePool) -> Result<Self, AppError> {
        let revision: i64 = sqlx::query("SELECT revision FROM meta WHERE id = 1")
            .fetch_one(&pool)
            .await?
            .get("revision");
        let requests = list_requests(&pool).await?;

        tracing::info!(
            "Mirror opened with {} requests at revision {}",
            requests.len(),
            revision
        );

        let (snapshot, _) = watch::channel(MirrorSnapshot {
            revision: revision as u64,
            requests: Arc::new(requests),
        });

        Ok(Self {
            pool,
            snapshot,
            write_lock: Mutex::new(()),
        })
    }

    /// Live view of the mirrored list. New receivers start at the current state.
    pub fn observe_all(&self) -> watch::Receiver<MirrorSnapshot> {
        self.snapshot.subscribe()
    }

    /// The last published snapshot.
    pub fn current(&self) -> MirrorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.borrow().revision
    }

    /// Point lookup against the last published snapshot.
    pub fn lookup(&self, id: &str) -> Option<BloodRequest> {
        self.snapshot.borrow().find(id).cloned()
    }

    /// Point lookup against the table itself.
    pub async fn lookup_durable(&self, id: &str) -> Result<Option<BloodRequest>, AppError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_REQUESTS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(request_from_row))
    }

    pub async fn lookup_from(
        &self,
        id: &str,
        source: LookupSource,
    ) -> Result<Option<BloodRequest>, AppError> {
        match source {
            LookupSource::Cached => Ok(self.lookup(id)),
            LookupSource::Durable => self.lookup_durable(id).await,
        }
    }

    /// Version of the last applied batch.
    pub async fn batch_version(&self) -> Result<u64, AppError> {
        let version: i64 = sqlx::query("SELECT batch_version FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?
            .get("batch_version");
        Ok(version as u64)
    }

    /// When the last batch was applied (RFC 3339), if ever.
    pub async fn last_synced_at(&self) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT synced_at FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("synced_at"))
    }

    /// Replace the whole table with `batch` in one transaction.
    ///
    /// Duplicate ids within the batch resolve to the last occurrence. A batch
    /// not newer than the last applied one is discarded. Identical content
    /// commits the version but publishes nothing.
    pub async fn replace_all(&self, batch: Batch) -> Result<ReplaceOutcome, AppError> {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await?;

        let latest: i64 = sqlx::query("SELECT batch_version FROM meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?
            .get("batch_version");
        let latest = latest as u64;
        if batch.version <= latest {
            tracing::debug!(
                "Discarding batch {} (latest applied is {})",
                batch.version,
                latest
            );
            return Ok(ReplaceOutcome::Superseded { latest });
        }

        let requests = dedup_newest_first(batch.requests);
        let (changed, revision) = {
            let current = self.snapshot.borrow();
            let changed = *current.requests != requests;
            (changed, current.revision + u64::from(changed))
        };

        if changed {
            sqlx::query("DELETE FROM requests").execute(&mut *tx).await?;
            for request in &requests {
                insert_request(&mut tx, request).await?;
            }
        }

        sqlx::query("UPDATE meta SET batch_version = ?, revision = ?, synced_at = ? WHERE id = 1")
            .bind(batch.version as i64)
            .bind(revision as i64)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let records = requests.len();
        if changed {
            self.snapshot.send_replace(MirrorSnapshot {
                revision,
                requests: Arc::new(requests),
            });
            tracing::info!(
                "Applied batch {}: {} requests, revision {}",
                batch.version,
                records,
                revision
            );
        } else {
            tracing::debug!("Batch {} matches the mirror, nothing published", batch.version);
        }

        Ok(ReplaceOutcome::Applied { changed, records })
    }

    /// Remove every mirrored request. Returns whether anything was removed.
    pub async fn clear(&self) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        let revision = {
            let current = self.snapshot.borrow();
            if current.is_empty() {
                return Ok(false);
            }
            current.revision + 1
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM requests").execute(&mut *tx).await?;
        sqlx::query("UPDATE meta SET revision = ? WHERE id = 1")
            .bind(revision as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.snapshot.send_replace(MirrorSnapshot {
            revision,
            requests: Arc::new(Vec::new()),
        });
        tracing::info!("Mirror cleared, revision {}", revision);

        Ok(true)
    }
}

async fn list_requests(pool: &SqlitePool) -> Result<Vec<BloodRequest>, AppError> {
    let rows = sqlx::query(&format!("{} ORDER BY timestamp DESC, id ASC", SELECT_REQUESTS))
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(request_from_row).collect())
}

async fn insert_request(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    request: &BloodRequest,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT OR REPLACE INTO requests (id, blood_group, requester_name, contact, units_required, latitude, longitude, hospital_name, document_image, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&request.id)
    .bind(&request.blood_group)
    .bind(&request.requester_name)
    .bind(&request.contact)
    .bind(&request.units_required)
    .bind(request.latitude)
    .bind(request.longitude)
    .bind(&request.hospital_name)
    .bind(&request.document_image)
    .bind(request.timestamp)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Last occurrence of each id wins; result ordered newest first, ties by id.
fn dedup_newest_first(requests: Vec<BloodRequest>) -> Vec<BloodRequest> {
    let mut by_id: HashMap<String, BloodRequest> = HashMap::with_capacity(requests.len());
    for request in requests {
        by_id.insert(request.id.clone(), request);
    }

    let mut requests: Vec<BloodRequest> = by_id.into_values().collect();
    requests.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    requests
}

fn request_from_row(row: &sqlx::sqlite::SqliteRow) -> BloodRequest {
    BloodRequest {
        id: row.get("id"),
        blood_group: row.get("blood_group"),
        requester_name: row.get("requester_name"),
        contact: row.get("contact"),
        units_required: row.get("units_required"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        hospital_name: row.get("hospital_name"),
        document_image: row.get("document_image"),
        timestamp: row.get("timestamp"),
    }
}
