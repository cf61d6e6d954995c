//! Remote backend over any [`ObjectStore`] implementation.
//!
//! Production tiers point at S3-compatible buckets; tests and development
//! setups use the in-memory or directory-backed stores. Authentication and
//! credential refresh are handled by the store's own credential provider.

use super::{BackendError, BackendResult, ObjectBackend, validate_key};
use crate::{config::RemoteSettings, models::ObjectInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    Attribute, Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path as StorePath,
};
use std::{path::Path, sync::Arc};
use tracing::error;

/// Lower-cased fragments by which providers report an exhausted quota.
const QUOTA_MARKERS: [&str; 5] = [
    "status 507",
    "insufficient storage",
    "insufficientstorage",
    "quota exceeded",
    "quotaexceeded",
];

#[derive(Clone)]
pub struct RemoteBackend {
    name: String,
    store: Arc<dyn ObjectStore>,
    public_url: String,
}

impl RemoteBackend {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>, public_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// S3-compatible bucket. Unset credentials fall back to the standard AWS
    /// environment variables.
    pub fn s3(name: &str, settings: &RemoteSettings) -> object_store::Result<Self> {
        let bucket = settings.bucket.clone().unwrap_or_default();
        let mut builder = AmazonS3Builder::from_env()
            .with_region(settings.region.clone())
            .with_bucket_name(bucket.clone());
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id.clone())
                .with_secret_access_key(secret.clone());
        }
        let store = builder.build()?;

        let public_url = match (&settings.public_url, &settings.endpoint) {
            (Some(url), _) => url.clone(),
            (None, Some(endpoint)) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
            (None, None) => format!("https://{}.s3.{}.amazonaws.com", bucket, settings.region),
        };
        Ok(Self::new(name, Arc::new(store), public_url))
    }

    /// Store rooted at a local directory, created if missing.
    pub fn local_fs(name: &str, root: &Path, public_url: String) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(name, Arc::new(store), public_url))
    }

    pub fn in_memory(name: &str, public_url: &str) -> Self {
        Self::new(name, Arc::new(InMemory::new()), public_url)
    }

    fn classify(&self, key: &str, err: object_store::Error) -> BackendError {
        match err {
            object_store::Error::NotFound { .. } => BackendError::NotFound {
                backend: self.name.clone(),
                key: key.to_string(),
            },
            object_store::Error::InvalidPath { .. } => BackendError::InvalidKey(key.to_string()),
            other => {
                let reason = other.to_string();
                let lowered = reason.to_ascii_lowercase();
                if QUOTA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                    BackendError::QuotaExceeded {
                        backend: self.name.clone(),
                        reason,
                    }
                } else {
                    error!(backend = %self.name, key, error = %reason, "object store call failed");
                    BackendError::Unavailable {
                        backend: self.name.clone(),
                        reason,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> BackendResult<String> {
        validate_key(key)?;
        let mut attributes = Attributes::new();
        if let Some(content_type) = content_type {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };
        self.store
            .put_opts(&StorePath::from(key), PutPayload::from(data), options)
            .await
            .map_err(|err| self.classify(key, err))?;
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> BackendResult<Bytes> {
        validate_key(key)?;
        let result = self
            .store
            .get(&StorePath::from(key))
            .await
            .map_err(|err| self.classify(key, err))?;
        result.bytes().await.map_err(|err| self.classify(key, err))
    }

    async fn head(&self, key: &str) -> BackendResult<Option<ObjectInfo>> {
        validate_key(key)?;
        match self.store.head(&StorePath::from(key)).await {
            Ok(meta) => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size_bytes: meta.size,
                last_modified: meta.last_modified,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(self.classify(key, err)),
        }
    }

    /// Lists from the deepest complete path segment of `prefix`, then keeps
    /// keys that start with the full prefix.
    async fn list(&self, prefix: &str, limit: usize) -> BackendResult<Vec<ObjectInfo>> {
        let segment_prefix = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let base = (!segment_prefix.is_empty()).then(|| StorePath::from(segment_prefix));

        let mut found: Vec<ObjectInfo> = self
            .store
            .list(base.as_ref())
            .map_err(|err| self.classify(prefix, err))
            .try_filter_map(|meta| {
                let key = meta.location.to_string();
                let keep = key.starts_with(prefix).then(|| ObjectInfo {
                    key,
                    size_bytes: meta.size,
                    last_modified: meta.last_modified,
                });
                futures::future::ready(Ok(keep))
            })
            .try_collect()
            .await?;
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found.truncate(limit);
        Ok(found)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        validate_key(key)?;
        self.store
            .delete(&StorePath::from(key))
            .await
            .map_err(|err| self.classify(key, err))
    }

    async fn usage(&self) -> BackendResult<u64> {
        self.store
            .list(None)
            .map_err(|err| self.classify("", err))
            .try_fold(0u64, |total, meta| futures::future::ready(Ok(total + meta.size)))
            .await
    }
}
