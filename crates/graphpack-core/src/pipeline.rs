//! Pipeline - ordered chain of stages between a root value and storage.
//!
//! ```text
//! write: root -> [object codec] -> [frame encoder] -> [storage]
//! read:  root <- [object codec] <- [frame encoder] <- [storage]
//! ```
//!
//! Each stage's forward output is the next stage's forward input, and
//! backward undoes forward exactly. Stages may suspend (storage I/O, lazy
//! values); the runner awaits each one before starting the next.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CodecError;
use crate::value::{Frame, Value};

/// One reversible transform in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn forward(&self, frame: Frame) -> Result<Frame, CodecError>;

    async fn backward(&self, frame: Frame) -> Result<Frame, CodecError>;
}

/// Runs a fixed list of stages. The order is set at construction.
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Push `root` through every stage, first to last.
    ///
    /// Returns whatever the last stage produced (empty for a storage sink).
    pub async fn write_root(&self, root: Value) -> Result<Frame, CodecError> {
        let mut frame = vec![root];
        for stage in &self.stages {
            debug!(stage = stage.name(), items = frame.len(), "forward");
            frame = stage.forward(frame).await?;
        }
        Ok(frame)
    }

    /// Pull a root back out, running `backward` from the last stage to the
    /// first, starting from an empty frame.
    pub async fn read_root(&self) -> Result<Value, CodecError> {
        let mut frame = Vec::new();
        for stage in self.stages.iter().rev() {
            debug!(stage = stage.name(), items = frame.len(), "backward");
            frame = stage.backward(frame).await?;
        }
        let [root]: [Value; 1] = frame.try_into().map_err(|frame: Frame| {
            CodecError::corrupt(format!("expected a single root, got {} values", frame.len()))
        })?;
        Ok(root)
    }
}
