//! graphpack-core
//!
//! Persistent object-graph codec for build caches.
//!
//! # Modules
//! - **value**: `Value`, `ObjectRef`, `Frame` (the unit every stage works on)
//! - **lazy**: deferred frames resolved at most once
//! - **registry**: type -> serializer bindings, global and module requests
//! - **serializer / fields**: the serializer capability and the field-list helper
//! - **builtin**: `List`, `Record`, `ValueMap` registered as globals
//! - **codec**: object graph <-> primitive stream (back-references, escapes)
//! - **pipeline**: ordered stage chain, `write_root` / `read_root`
//! - **frame**: primitive stream <-> JSON bytes
//! - **storage**: storage port, memory/file adapters, storage stage
//! - **cache / config**: keyed load-or-compute and its configuration

pub mod builtin;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fields;
pub mod frame;
pub mod lazy;
pub mod pipeline;
pub mod registry;
pub mod serializer;
pub mod storage;
pub mod value;

pub use builtin::{List, Record, ValueMap};
pub use cache::GraphCache;
pub use codec::{DEFAULT_MAX_DEPTH, ESCAPE, ESCAPE_ESCAPE_VALUE, ObjectCodec};
pub use config::CacheConfig;
pub use error::{CodecError, RegistryError};
pub use fields::FieldListSerializer;
pub use frame::JsonFrameStage;
pub use lazy::Lazy;
pub use pipeline::{Pipeline, Stage};
pub use registry::{ModuleResolver, Request, SerializerRegistry};
pub use serializer::{ObjectReader, ObjectWriter, Serializer};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageStage};
pub use value::{Frame, ObjectRef, Value};
