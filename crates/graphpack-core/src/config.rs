//! Cache configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes (or can be absent entirely).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::ObjectCodec;
use crate::error::CodecError;
use crate::frame::JsonFrameStage;
use crate::pipeline::{Pipeline, Stage};
use crate::storage::{FileStorage, StorageStage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per cache key.
    pub cache_dir: PathBuf,

    /// Indent the JSON frames. Larger files, but readable with a pager.
    pub pretty_frames: bool,

    /// File extension for cache entries.
    pub extension: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".graphpack-cache"),
            pretty_frames: false,
            extension: "pack".to_string(),
        }
    }
}

impl CacheConfig {
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn storage(&self) -> FileStorage {
        FileStorage::new(&self.cache_dir, &self.extension)
    }

    /// `[object codec, json frames, file storage]` for one cache key.
    pub fn build_pipeline(&self, codec: ObjectCodec, key: &str) -> Pipeline {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(codec),
            Arc::new(JsonFrameStage::new().pretty(self.pretty_frames)),
            Arc::new(StorageStage::new(Arc::new(self.storage()), key)),
        ];
        Pipeline::new(stages)
    }
}
