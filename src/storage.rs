//! Raw payload storage.
//!
//! Every fetched payload is archived before its document or snapshot is
//! written so extraction can be replayed later. Keys use a two-level layout
//! under the host: `{host}/{hash[0..2]}/{path_slug}-{hash[0..8]}.{ext}`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use crate::repository::StorageError;
use crate::utils::mime_to_extension;

/// Content-addressed store for raw fetched bytes.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Store bytes under `key`, returning a URI that `get` accepts.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError>;
}

/// SHA-256 of raw bytes, hex encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Build the storage key for a payload fetched from `url`.
pub fn payload_key(url: &str, bytes: &[u8], mime: &str) -> String {
    let hash = hash_bytes(bytes);
    let (host, slug) = match Url::parse(url) {
        Ok(u) => {
            let host = u.host_str().unwrap_or("unknown").to_lowercase();
            let slug = u.path().replace('/', "_").trim_matches('_').to_string();
            (host, slug)
        }
        Err(_) => ("unknown".to_string(), String::new()),
    };
    let slug = sanitize_slug(if slug.is_empty() { "index" } else { &slug });

    format!(
        "{}/{}/{}-{}.{}",
        host,
        &hash[..2],
        slug,
        &hash[..8],
        mime_to_extension(mime)
    )
}

fn sanitize_slug(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Drop the original extension; the stored one comes from the MIME type.
    let stem = match cleaned.rsplit_once('_') {
        Some((head, tail)) if matches!(tail, "pdf" | "html" | "htm" | "txt") => head.to_string(),
        _ => cleaned,
    };
    stem.chars().take(80).collect()
}

/// Filesystem-backed payload store.
///
/// With a bucket configured, URIs take the `s3://bucket/key` form and the
/// directory tree mirrors the bucket layout. Otherwise `file://` URIs are
/// returned.
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    root: PathBuf,
    bucket: Option<String>,
}

impl FsPayloadStore {
    pub fn new(root: impl Into<PathBuf>, bucket: Option<String>) -> Self {
        Self {
            root: root.into(),
            bucket,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for_uri(&self, uri: &str) -> Result<PathBuf, StorageError> {
        if let Some(rest) = uri.strip_prefix("s3://") {
            let (_, key) = rest
                .split_once('/')
                .ok_or_else(|| StorageError::Payload(format!("malformed uri {}", uri)))?;
            return Ok(self.root.join(key));
        }
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        Err(StorageError::Payload(format!("unsupported uri {}", uri)))
    }
}

#[async_trait]
impl PayloadStore for FsPayloadStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Payload(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Payload(format!("{}: {}", path.display(), e)))?;

        Ok(match &self.bucket {
            Some(bucket) => format!("s3://{}/{}", bucket, key),
            None => format!("file://{}", path.display()),
        })
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for_uri(uri)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::Payload(format!("{}: {}", path.display(), e)))
    }
}

/// Payload store held in memory.
#[derive(Default)]
pub struct InMemoryPayloadStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("payload store poisoned".to_string()))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(format!("mem://{}", key))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let key = uri
            .strip_prefix("mem://")
            .ok_or_else(|| StorageError::Payload(format!("unsupported uri {}", uri)))?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("payload store poisoned".to_string()))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }
}
