//! GraphCache - keyed load/store of object graphs on top of a pipeline.
//!
//! A cache entry that cannot be read back (truncated file, stale format,
//! dangling reference) is treated as a miss: the entry is dropped and the
//! value is recomputed.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::ObjectCodec;
use crate::error::CodecError;
use crate::frame::JsonFrameStage;
use crate::pipeline::{Pipeline, Stage};
use crate::storage::{Storage, StorageStage};
use crate::value::Value;

#[derive(Clone)]
pub struct GraphCache {
    codec: ObjectCodec,
    frames: JsonFrameStage,
    storage: Arc<dyn Storage>,
}

impl GraphCache {
    pub fn new(codec: ObjectCodec, frames: JsonFrameStage, storage: Arc<dyn Storage>) -> Self {
        Self {
            codec,
            frames,
            storage,
        }
    }

    pub fn pipeline(&self, key: &str) -> Pipeline {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(self.codec.clone()),
            Arc::new(self.frames.clone()),
            Arc::new(StorageStage::new(self.storage.clone(), key)),
        ];
        Pipeline::new(stages)
    }

    pub async fn store(&self, key: &str, root: Value) -> Result<(), CodecError> {
        self.pipeline(key).write_root(root).await?;
        Ok(())
    }

    /// `Ok(None)` on a miss. Corrupt entries are deleted and reported as a
    /// miss; other failures (unregistered types, I/O) are returned.
    pub async fn load(&self, key: &str) -> Result<Option<Value>, CodecError> {
        match self.pipeline(key).read_root().await {
            Ok(root) => Ok(Some(root)),
            Err(CodecError::NotFound(_)) => Ok(None),
            Err(err) if err.is_corrupt_stream() => {
                warn!(key, error = %err, "discarding corrupt cache entry");
                self.storage.delete(key).await?;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Cached value for `key`, or the result of `compute` (which is then
    /// stored).
    pub async fn load_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<Value, CodecError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, CodecError>>,
    {
        if let Some(root) = self.load(key).await? {
            info!(key, "cache hit");
            return Ok(root);
        }
        info!(key, "cache miss");
        let root = compute().await?;
        self.store(key, root.clone()).await?;
        Ok(root)
    }
}
