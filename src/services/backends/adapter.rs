use super::{BackendError, BackendResult, ObjectBackend, RetryPolicy, validate_key};
use crate::{
    models::{ObjectInfo, Tier},
    services::quota_tracker::QuotaTracker,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One backend as seen by the rest of the service: retries, timeouts, and
/// usage accounting around a raw [`ObjectBackend`].
///
/// Each adapter owns its policy; a slow or failing backend never shares
/// retry state with another one.
pub struct BackendAdapter {
    tier: Tier,
    inner: Arc<dyn ObjectBackend>,
    retry: RetryPolicy,
    quota: Arc<QuotaTracker>,
}

impl BackendAdapter {
    pub fn new(
        tier: Tier,
        inner: Arc<dyn ObjectBackend>,
        retry: RetryPolicy,
        quota: Arc<QuotaTracker>,
    ) -> Self {
        Self {
            tier,
            inner,
            retry,
            quota,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn url_for(&self, key: &str) -> String {
        self.inner.url_for(key)
    }

    /// Store `data` under `key`, replacing any previous payload, and account
    /// the size difference against the backend's quota.
    pub async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<String> {
        validate_key(key)?;
        // Single unretried lookup; it does not count toward backend health.
        let previous = match timeout(self.retry.timeout, self.inner.head(key)).await {
            Ok(Ok(Some(info))) => info.size_bytes,
            _ => 0,
        };
        let size = data.len() as u64;

        let result = self
            .retry
            .run(self.inner.name(), "put", || {
                self.inner.put(key, data.clone(), content_type)
            })
            .await;
        let url = self.observe(result)?;

        self.quota.record_usage(self.tier, size as i64 - previous as i64);
        debug!(tier = %self.tier, key, size, "object stored");
        Ok(url)
    }

    pub async fn get(&self, key: &str) -> BackendResult<Bytes> {
        validate_key(key)?;
        let result = self
            .retry
            .run(self.inner.name(), "get", || self.inner.get(key))
            .await;
        self.observe(result)
    }

    pub async fn head(&self, key: &str) -> BackendResult<Option<ObjectInfo>> {
        validate_key(key)?;
        let result = self
            .retry
            .run(self.inner.name(), "head", || self.inner.head(key))
            .await;
        self.observe(result)
    }

    pub async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.head(key).await?.is_some())
    }

    pub async fn list(&self, prefix: &str, limit: usize) -> BackendResult<Vec<ObjectInfo>> {
        let result = self
            .retry
            .run(self.inner.name(), "list", || self.inner.list(prefix, limit))
            .await;
        self.observe(result)
    }

    /// Remove `key`. Deleting an absent key is `NotFound`.
    pub async fn delete(&self, key: &str) -> BackendResult<()> {
        let info = self.head(key).await?.ok_or_else(|| BackendError::NotFound {
            backend: self.inner.name().to_string(),
            key: key.to_string(),
        })?;
        let result = self
            .retry
            .run(self.inner.name(), "delete", || self.inner.delete(key))
            .await;
        self.observe(result)?;
        self.quota.record_usage(self.tier, -(info.size_bytes as i64));
        Ok(())
    }

    /// Replace tracked usage with the backend's own figure.
    ///
    /// A single attempt bounded by the retry policy's timeout; on failure the
    /// last known values stay in place and the backend is marked degraded.
    pub async fn refresh_usage(&self) -> BackendResult<u64> {
        let outcome = match timeout(self.retry.timeout, self.inner.usage()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: self.inner.name().to_string(),
                after: self.retry.timeout,
            }),
        };
        match outcome {
            Ok(used) => {
                let capacity = self
                    .quota
                    .snapshot(self.tier)
                    .map_or(0, |desc| desc.available_bytes);
                self.quota.refresh(self.tier, used, capacity);
                self.quota.mark_success(self.tier);
                Ok(used)
            }
            Err(err) => {
                warn!(tier = %self.tier, error = %err, "usage refresh failed; keeping last known values");
                self.quota.mark_degraded(self.tier);
                Err(err)
            }
        }
    }

    /// Feed the outcome of a retried call into the backend's health.
    fn observe<T>(&self, result: BackendResult<T>) -> BackendResult<T> {
        match &result {
            Ok(_) => self.quota.mark_success(self.tier),
            Err(err) if err.is_retryable() => self.quota.mark_failure(self.tier),
            Err(_) => {}
        }
        result
    }
}
