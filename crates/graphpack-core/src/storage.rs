//! Storage port and the stage that puts it at the end of a pipeline.
//!
//! # Implementations
//! - **MemoryStorage**: in-process map, for tests and short-lived caches
//! - **FileStorage**: one file per key under a root directory
//!
//! # Blob layout
//! ```text
//! "GPAK" | version: u32 LE | count: u32 LE | (len: u64 LE | bytes) * count
//! ```

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::pipeline::Stage;
use crate::value::{Frame, Value};

const MAGIC: &[u8; 4] = b"GPAK";
pub const FORMAT_VERSION: u32 = 1;

/// Byte storage addressed by key.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), CodecError>;

    /// `None` when nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CodecError>;

    /// Drop the entry; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), CodecError>;
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), CodecError> {
        self.entries.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CodecError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), CodecError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Stores each key as `<root>/<key>.<extension>`.
///
/// Writes go to a uniquely named temporary sibling first and are renamed
/// into place, so a reader never sees a half-written entry.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    extension: String,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `key`. Keys are plain file stems: ASCII alphanumerics,
    /// `-`, `_` and `.`, not starting with `.`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, CodecError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CodecError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid cache key '{key}'"),
            )));
        }
        Ok(self.root.join(format!("{key}.{}", self.extension)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), CodecError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let root = self.root.clone();
        let target = path.clone();
        let len = bytes.len();
        tokio::task::spawn_blocking(move || -> Result<(), CodecError> {
            let mut tmp = tempfile::Builder::new()
                .prefix(".graphpack-")
                .suffix(".tmp")
                .tempfile_in(&root)?;
            tmp.write_all(&bytes)?;
            tmp.persist(&target).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| CodecError::Io(std::io::Error::other(err)))??;

        debug!(path = %path.display(), bytes = len, "wrote cache file");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CodecError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes = bytes.len(), "read cache file");
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CodecError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pack byte sections into one blob.
pub fn pack(sections: &[&[u8]]) -> Vec<u8> {
    let body: usize = sections.iter().map(|s| s.len() + 8).sum();
    let mut blob = Vec::with_capacity(12 + body);
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    blob.extend_from_slice(&(sections.len() as u32).to_le_bytes());
    for section in sections {
        blob.extend_from_slice(&(section.len() as u64).to_le_bytes());
        blob.extend_from_slice(section);
    }
    blob
}

/// Inverse of [`pack`].
pub fn unpack(blob: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut cursor = blob;
    let mut take = |n: usize| -> Result<&[u8], CodecError> {
        if cursor.len() < n {
            return Err(CodecError::corrupt("cache blob is truncated"));
        }
        let (head, rest) = cursor.split_at(n);
        cursor = rest;
        Ok(head)
    };

    if take(4)? != MAGIC {
        return Err(CodecError::corrupt("cache blob has a bad magic number"));
    }
    let version = u32::from_le_bytes(take(4)?.try_into().map_err(|_| truncated())?);
    if version != FORMAT_VERSION {
        return Err(CodecError::corrupt(format!(
            "cache blob version {version}, expected {FORMAT_VERSION}"
        )));
    }
    let count = u32::from_le_bytes(take(4)?.try_into().map_err(|_| truncated())?);
    let mut sections = Vec::new();
    for _ in 0..count {
        let len = u64::from_le_bytes(take(8)?.try_into().map_err(|_| truncated())?);
        let len = usize::try_from(len).map_err(|_| truncated())?;
        sections.push(take(len)?.to_vec());
    }
    if !cursor.is_empty() {
        return Err(CodecError::corrupt("trailing bytes after cache blob"));
    }
    Ok(sections)
}

fn truncated() -> CodecError {
    CodecError::corrupt("cache blob is truncated")
}

/// Last pipeline stage: persists the byte frame under one key.
#[derive(Clone)]
pub struct StorageStage {
    storage: Arc<dyn Storage>,
    key: String,
}

impl StorageStage {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl Stage for StorageStage {
    fn name(&self) -> &str {
        "storage"
    }

    async fn forward(&self, frame: Frame) -> Result<Frame, CodecError> {
        let mut sections = Vec::with_capacity(frame.len());
        for value in &frame {
            match value {
                Value::Bytes(bytes) => sections.push(&bytes[..]),
                other => {
                    return Err(CodecError::corrupt(format!(
                        "storage expects byte buffers, got {}",
                        other.kind()
                    )));
                }
            }
        }
        let blob = pack(&sections);
        trace!(key = %self.key, sections = sections.len(), "storing blob");
        self.storage.put(&self.key, blob).await?;
        Ok(Vec::new())
    }

    async fn backward(&self, _frame: Frame) -> Result<Frame, CodecError> {
        let blob = self
            .storage
            .get(&self.key)
            .await?
            .ok_or_else(|| CodecError::NotFound(self.key.clone()))?;
        let sections = unpack(&blob)?;
        Ok(sections.into_iter().map(Value::from).collect())
    }
}
