//! Local disk backend.
//!
//! Payloads live beneath `base_path/{shard}/{shard}/{key}`, where the two
//! shard directories come from the MD5 of the key. Writes go to a temporary
//! file that is synced and renamed into place, so readers never observe a
//! partial object.

use super::{BackendError, BackendResult, ObjectBackend, validate_key};
use crate::models::ObjectInfo;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    base_path: PathBuf,
    base_url: String,
}

impl LocalBackend {
    /// Create the backend, making sure `base_path` exists.
    pub async fn new(
        name: impl Into<String>,
        base_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            name: name.into(),
            base_path,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Two-level shard directories for a key: the first two bytes of
    /// MD5(key) as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn map_io(&self, key: &str, err: io::Error) -> BackendError {
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound {
                backend: self.name.clone(),
                key: key.to_string(),
            },
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => BackendError::QuotaExceeded {
                backend: self.name.clone(),
                reason: err.to_string(),
            },
            _ => BackendError::Unavailable {
                backend: self.name.clone(),
                reason: err.to_string(),
            },
        }
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written
    }

    /// Every stored object with its key, skipping in-flight temporary files.
    async fn walk(&self) -> io::Result<Vec<ObjectInfo>> {
        let mut found = Vec::new();
        let mut pending = vec![self.base_path.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let Some(key) = self.key_from_path(&entry.path()) else {
                    continue;
                };
                found.push(ObjectInfo {
                    key,
                    size_bytes: meta.len(),
                    last_modified: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                });
            }
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    /// Strip `base_path` and the two shard components.
    fn key_from_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let parts: Vec<_> = relative
            .components()
            .skip(2)
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Remove empty directories from `start` up to, but not including, the
    /// base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: Option<&str>) -> BackendResult<String> {
        validate_key(key)?;
        let path = self.object_path(key);
        self.write_atomic(&path, &data)
            .await
            .map_err(|err| self.map_io(key, err))?;
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> BackendResult<Bytes> {
        validate_key(key)?;
        fs::read(self.object_path(key))
            .await
            .map(Bytes::from)
            .map_err(|err| self.map_io(key, err))
    }

    async fn head(&self, key: &str) -> BackendResult<Option<ObjectInfo>> {
        validate_key(key)?;
        match fs::metadata(self.object_path(key)).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectInfo {
                key: key.to_string(),
                size_bytes: meta.len(),
                last_modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            })),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.map_io(key, err)),
        }
    }

    async fn list(&self, prefix: &str, limit: usize) -> BackendResult<Vec<ObjectInfo>> {
        let mut objects = self.walk().await.map_err(|err| self.map_io(prefix, err))?;
        objects.retain(|info| info.key.starts_with(prefix));
        objects.truncate(limit);
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        validate_key(key)?;
        let path = self.object_path(key);
        fs::remove_file(&path)
            .await
            .map_err(|err| self.map_io(key, err))?;
        debug!("removed physical file {}", path.display());
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn usage(&self) -> BackendResult<u64> {
        let objects = self.walk().await.map_err(|err| self.map_io("", err))?;
        Ok(objects.iter().map(|info| info.size_bytes).sum())
    }
}
