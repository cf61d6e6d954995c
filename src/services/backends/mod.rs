//! Storage backends.
//!
//! [`ObjectBackend`] is the raw capability each concrete provider exposes
//! (local disk, S3-compatible object stores). [`BackendAdapter`] wraps one
//! raw backend with its own retry policy, per-attempt timeout and quota
//! accounting; the rest of the service only ever talks to adapters, looked
//! up by [`Tier`] in a [`BackendRegistry`].

mod adapter;
mod local;
mod remote;
mod retry;

pub use self::adapter::BackendAdapter;
pub use self::local::LocalBackend;
pub use self::remote::RemoteBackend;
pub use self::retry::RetryPolicy;

use crate::{
    config::AppConfig,
    models::{ObjectInfo, Tier},
    services::quota_tracker::QuotaTracker,
};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::{path::Path, sync::Arc, time::Duration};
use thiserror::Error;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{key}` not found on `{backend}`")]
    NotFound { backend: String, key: String },
    /// The backend refused the write because it is out of capacity.
    #[error("`{backend}` rejected the write: {reason}")]
    QuotaExceeded { backend: String, reason: String },
    /// Network, auth or server-side failure; worth retrying.
    #[error("`{backend}` unavailable: {reason}")]
    Unavailable { backend: String, reason: String },
    #[error("`{backend}` timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
}

impl BackendError {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Uniform capability set of a storage provider.
///
/// Implementations perform a single attempt per call; retries, timeouts and
/// quota bookkeeping live in [`BackendAdapter`].
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Public URL (or URL prefix) of a key.
    fn url_for(&self, key: &str) -> String;

    /// Write an object, replacing any previous payload. Returns its URL.
    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<String>;

    async fn get(&self, key: &str) -> BackendResult<Bytes>;

    /// Metadata of a key, `None` when absent.
    async fn head(&self, key: &str) -> BackendResult<Option<ObjectInfo>>;

    /// Up to `limit` objects whose key starts with `prefix`.
    async fn list(&self, prefix: &str, limit: usize) -> BackendResult<Vec<ObjectInfo>>;

    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// Bytes currently stored, as reported by the backend.
    async fn usage(&self) -> BackendResult<u64>;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/`, contain `..`,
/// backslashes or control characters.
pub fn validate_key(key: &str) -> BackendResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(BackendError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// The three adapters, one per tier.
#[derive(Clone)]
pub struct BackendRegistry {
    primary: Arc<BackendAdapter>,
    secondary: Arc<BackendAdapter>,
    local: Arc<BackendAdapter>,
}

impl BackendRegistry {
    pub fn new(
        primary: Arc<BackendAdapter>,
        secondary: Arc<BackendAdapter>,
        local: Arc<BackendAdapter>,
    ) -> Self {
        Self {
            primary,
            secondary,
            local,
        }
    }

    /// Build adapters from configuration.
    ///
    /// Remote tiers without a bucket are served from `storage_dir/{tier}`.
    pub async fn from_config(cfg: &AppConfig, quota: Arc<QuotaTracker>) -> anyhow::Result<Self> {
        let storage_dir = Path::new(&cfg.storage_dir);
        let retry = cfg.retry_policy();

        let mut remotes = Vec::with_capacity(2);
        for (tier, settings) in [(Tier::Primary, &cfg.primary), (Tier::Secondary, &cfg.secondary)] {
            let backend = match settings.bucket {
                Some(_) => RemoteBackend::s3(tier.as_str(), settings)
                    .with_context(|| format!("configuring {tier} object store"))?,
                None => {
                    tracing::warn!(%tier, "no bucket configured; using a local directory store");
                    let public_url = settings
                        .public_url
                        .clone()
                        .unwrap_or_else(|| format!("{}/{}", cfg.local.public_url, tier));
                    RemoteBackend::local_fs(tier.as_str(), &storage_dir.join(tier.as_str()), public_url)
                        .with_context(|| format!("configuring {tier} directory store"))?
                }
            };
            remotes.push(Arc::new(BackendAdapter::new(
                tier,
                Arc::new(backend),
                retry.clone(),
                quota.clone(),
            )));
        }

        let local = LocalBackend::new(
            Tier::Local.as_str(),
            storage_dir.join(Tier::Local.as_str()),
            cfg.local.public_url.clone(),
        )
        .await
        .context("configuring local backend")?;
        let local = Arc::new(BackendAdapter::new(Tier::Local, Arc::new(local), retry, quota));

        let secondary = remotes.pop().context("secondary backend missing")?;
        let primary = remotes.pop().context("primary backend missing")?;
        Ok(Self::new(primary, secondary, local))
    }

    pub fn get(&self, tier: Tier) -> &Arc<BackendAdapter> {
        match tier {
            Tier::Primary => &self.primary,
            Tier::Secondary => &self.secondary,
            Tier::Local => &self.local,
        }
    }

    /// Destination of event backups.
    pub fn archive(&self) -> &Arc<BackendAdapter> {
        &self.secondary
    }

    pub fn all(&self) -> [&Arc<BackendAdapter>; 3] {
        [&self.primary, &self.secondary, &self.local]
    }
}
