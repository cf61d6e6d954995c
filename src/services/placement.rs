//! Upload path: choose a tier, write the payload, record where it went.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::{
        ObjectMeta, Priority, StorageObjectRef, Tier, TierDecision,
        storage_object::StorageObjectRow,
    },
    services::{
        backends::{BackendError, BackendRegistry},
        tier_selector::TierSelector,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Source of the photos that belong to an event.
///
/// Event and photo CRUD live outside this service; the catalog is the seam
/// through which backups enumerate an event's current photo set.
#[async_trait]
pub trait PhotoCatalog: Send + Sync {
    /// Latest stored copy of every photo of the event, ordered by photo id.
    async fn list_event_photos(&self, event_id: &str) -> ServiceResult<Vec<StorageObjectRef>>;

    /// Remember a newly written copy.
    async fn record(&self, object: &StorageObjectRef) -> ServiceResult<()>;
}

/// Catalog backed by the `storage_objects` table.
#[derive(Clone)]
pub struct SqlitePhotoCatalog {
    db: SqlitePool,
}

impl SqlitePhotoCatalog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PhotoCatalog for SqlitePhotoCatalog {
    async fn list_event_photos(&self, event_id: &str) -> ServiceResult<Vec<StorageObjectRef>> {
        // Rows are immutable; the newest row per photo wins.
        let rows = sqlx::query_as::<_, StorageObjectRow>(
            "SELECT o.id, o.event_id, o.photo_id, o.backend, o.remote_key, o.size_bytes,
                    o.content_type, o.uploaded_at
             FROM storage_objects o
             WHERE o.event_id = ?
               AND o.uploaded_at = (
                   SELECT MAX(i.uploaded_at) FROM storage_objects i
                   WHERE i.event_id = o.event_id AND i.photo_id = o.photo_id
               )
             ORDER BY o.photo_id ASC, o.id ASC",
        )
        .bind(event_id)
        .fetch_all(&self.db)
        .await?;

        let mut photos: Vec<StorageObjectRef> = Vec::with_capacity(rows.len());
        for row in rows {
            let object = StorageObjectRef::try_from(row).map_err(ServiceError::Internal)?;
            // Same-millisecond re-uploads tie on uploaded_at; keep one.
            if photos.last().is_some_and(|prev| prev.photo_id == object.photo_id) {
                continue;
            }
            photos.push(object);
        }
        Ok(photos)
    }

    async fn record(&self, object: &StorageObjectRef) -> ServiceResult<()> {
        sqlx::query(
            "INSERT INTO storage_objects (
                id, event_id, photo_id, backend, remote_key, size_bytes, content_type, uploaded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id)
        .bind(&object.event_id)
        .bind(&object.photo_id)
        .bind(object.backend.as_str())
        .bind(&object.remote_key)
        .bind(object.size_bytes as i64)
        .bind(&object.content_type)
        .bind(object.uploaded_at.timestamp_millis())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PlacementService {
    selector: TierSelector,
    backends: BackendRegistry,
    catalog: Arc<dyn PhotoCatalog>,
}

impl PlacementService {
    pub fn new(selector: TierSelector, backends: BackendRegistry, catalog: Arc<dyn PhotoCatalog>) -> Self {
        Self {
            selector,
            backends,
            catalog,
        }
    }

    /// Store one photo payload.
    ///
    /// Writes to the selected tier first; when that backend rejects the
    /// write for capacity or stays unreachable after retries, the remaining
    /// tiers are tried in fallback order. The returned decision reflects the
    /// tier that actually holds the payload.
    pub async fn store_photo(
        &self,
        event_id: &str,
        photo_id: Option<&str>,
        mut meta: ObjectMeta,
        data: Bytes,
    ) -> ServiceResult<(StorageObjectRef, TierDecision)> {
        if event_id.trim().is_empty() {
            return Err(ServiceError::Validation("event id is required".into()));
        }
        if let Some(photo_id) = photo_id {
            validate_photo_id(photo_id)?;
        }
        let size = data.len() as u64;
        match meta.size_bytes {
            Some(declared) if declared != size => {
                return Err(ServiceError::Validation(format!(
                    "declared size {declared} does not match payload size {size}"
                )));
            }
            Some(_) => {}
            None => meta.size_bytes = Some(size),
        }

        let decision = self.selector.select_tier(&meta)?;
        let object_id = Uuid::new_v4();
        let key = format!("photos/{event_id}/{object_id}");

        // Tiers the tracker reports full are only tried as a last resort.
        let (fits, full): (Vec<Tier>, Vec<Tier>) = Tier::ALL
            .into_iter()
            .filter(|tier| *tier != decision.tier)
            .partition(|tier| self.selector.is_usable(*tier, size));
        let mut order = vec![decision.tier];
        order.extend(fits);
        order.extend(full);

        let mut last_error = None;
        let mut all_quota = true;
        for tier in order {
            let adapter = self.backends.get(tier);
            match adapter
                .put(&key, data.clone(), meta.content_type.as_deref())
                .await
            {
                Ok(_) => {
                    let object = StorageObjectRef {
                        id: object_id,
                        event_id: event_id.to_string(),
                        photo_id: photo_id.map_or_else(|| object_id.to_string(), str::to_string),
                        backend: tier,
                        remote_key: key,
                        size_bytes: size,
                        content_type: meta.content_type.clone(),
                        uploaded_at: Utc::now(),
                    };
                    self.catalog.record(&object).await?;

                    let decision = if tier == decision.tier {
                        decision
                    } else if tier == Tier::Local {
                        TierDecision {
                            tier,
                            compression_quality: None,
                            priority: Priority::Low,
                        }
                    } else {
                        TierDecision { tier, ..decision }
                    };
                    info!(
                        event_id,
                        photo_id = %object.photo_id,
                        tier = %tier,
                        size,
                        "photo stored"
                    );
                    return Ok((object, decision));
                }
                Err(err @ (BackendError::QuotaExceeded { .. } | BackendError::Unavailable { .. } | BackendError::Timeout { .. })) => {
                    warn!(event_id, tier = %tier, error = %err, "write rejected; trying next tier");
                    all_quota &= matches!(err, BackendError::QuotaExceeded { .. });
                    last_error = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        match last_error {
            Some(_) if all_quota => Err(ServiceError::QuotaExceeded {
                backend: "all tiers".into(),
            }),
            Some(err) => Err(err.into()),
            None => Err(ServiceError::Internal("no storage tier attempted".into())),
        }
    }

    pub async fn list_event_photos(&self, event_id: &str) -> ServiceResult<Vec<StorageObjectRef>> {
        self.catalog.list_event_photos(event_id).await
    }
}

/// Photo ids become the last segment of backup keys. Ids starting with `_`
/// are reserved for backup metadata such as the manifest.
fn validate_photo_id(photo_id: &str) -> ServiceResult<()> {
    if photo_id.trim().is_empty() || photo_id.contains('/') || photo_id.starts_with('_') {
        return Err(ServiceError::Validation(format!(
            "invalid photo id `{photo_id}`: must be non-empty, without `/`, and not start with `_`"
        )));
    }
    Ok(())
}
