use thiserror::Error;

/// Errors raised while populating a [`SerializerRegistry`](crate::registry::SerializerRegistry).
///
/// These are configuration errors: they surface at registration time, never
/// in the middle of a serialize/deserialize call.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("global serializer name '{name}' is already bound to {existing}")]
    DuplicateGlobalName { name: String, existing: &'static str },

    #[error("global serializer for {0} needs an export name")]
    MissingGlobalName(&'static str),
}

/// Errors raised by a single encode/decode call or a pipeline run.
///
/// Any of these aborts the whole graph operation. A partially reconstructed
/// graph is never returned.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no serializer registered for type {0}")]
    UnregisteredType(String),

    #[error("type {0} is registered as not serializable")]
    NotSerializable(String),

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("back-reference {offset} does not resolve at position {position}")]
    UnresolvedReference { offset: i64, position: usize },

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("expected {expected}, found {found}")]
    FieldType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("object nesting exceeds the limit of {limit}")]
    NestingTooDeep { limit: usize },

    #[error("no cache entry for key '{0}'")]
    NotFound(String),

    #[error("lazy producer failed: {0}")]
    Producer(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptStream(message.into())
    }

    /// True for errors that mean the stored stream cannot be trusted.
    ///
    /// Callers should discard the entry and recompute instead of retrying.
    pub fn is_corrupt_stream(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEndOfStream
                | Self::UnresolvedReference { .. }
                | Self::CorruptStream(_)
                | Self::Json(_)
        )
    }
}
