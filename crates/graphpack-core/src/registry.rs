//! SerializerRegistry - which serializer handles which runtime type
//!
//! The registry is built once by the host (plugins register into it at
//! startup) and then shared read-only, behind an `Arc`, by every codec call.
//!
//! Two lookup directions:
//! - encode: runtime `TypeId` -> [`RegistryEntry`]
//! - decode: `(request, export name)` recorded in the stream -> entry, either
//!   through the global-name table or through a [`ModuleResolver`]

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CodecError, RegistryError};
use crate::serializer::{ObjectSerializer, Serializer, TypedSerializer};
use crate::value::ObjectRef;

/// Where a serializer lives, as recorded in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Request {
    /// Resolvable by export name alone.
    Global,
    /// Stable module locator, persisted verbatim.
    Module(String),
}

impl Request {
    pub fn module(locator: impl Into<String>) -> Self {
        Request::Module(locator.into())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Global => f.write_str("<global>"),
            Request::Module(locator) => f.write_str(locator),
        }
    }
}

/// One registered type.
pub struct RegistryEntry {
    type_id: TypeId,
    type_name: &'static str,
    request: Request,
    export_name: Option<String>,
    serializer: Arc<dyn ObjectSerializer>,
}

impl RegistryEntry {
    /// The registered type.
    pub fn target_type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn export_name(&self) -> Option<&str> {
        self.export_name.as_deref()
    }

    pub fn serializer(&self) -> &Arc<dyn ObjectSerializer> {
        &self.serializer
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("type_name", &self.type_name)
            .field("request", &self.request)
            .field("export_name", &self.export_name)
            .finish()
    }
}

/// Maps a persisted `(request, export name)` back to a runtime type.
///
/// Stands in for dynamic module loading: the host decides which locators
/// exist. Tests can inject a fake.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, request: &str, export_name: Option<&str>) -> Option<TypeId>;
}

type ModuleKey = (String, Option<String>);

#[derive(Default)]
pub struct SerializerRegistry {
    entries: HashMap<TypeId, Arc<RegistryEntry>>,
    globals: HashMap<String, Arc<RegistryEntry>>,
    modules: HashMap<ModuleKey, TypeId>,
    not_serializable: HashMap<TypeId, &'static str>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed serializer for `T`.
    ///
    /// Re-registering `T` replaces its previous entry. A global name already
    /// bound to another type is rejected with
    /// [`RegistryError::DuplicateGlobalName`].
    pub fn register<T, S>(
        &mut self,
        request: Request,
        export_name: Option<&str>,
        serializer: S,
    ) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        S: Serializer<T> + 'static,
    {
        self.register_erased::<T>(
            request,
            export_name,
            Arc::new(TypedSerializer::<T, S>::new(serializer)),
        )
    }

    /// Register an object-safe serializer for `T` (ad-hoc serializers that
    /// work on [`ObjectRef`] directly).
    pub fn register_erased<T: Any>(
        &mut self,
        request: Request,
        export_name: Option<&str>,
        serializer: Arc<dyn ObjectSerializer>,
    ) -> Result<(), RegistryError> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if request == Request::Global {
            let name = export_name.ok_or(RegistryError::MissingGlobalName(type_name))?;
            if let Some(existing) = self.globals.get(name)
                && existing.type_id != type_id
            {
                return Err(RegistryError::DuplicateGlobalName {
                    name: name.to_string(),
                    existing: existing.type_name,
                });
            }
        }

        self.unbind(type_id);

        let entry = Arc::new(RegistryEntry {
            type_id,
            type_name,
            request: request.clone(),
            export_name: export_name.map(str::to_string),
            serializer,
        });

        match &request {
            Request::Global => {
                if let Some(name) = export_name {
                    self.globals.insert(name.to_string(), entry.clone());
                }
            }
            Request::Module(locator) => {
                let key = (locator.clone(), entry.export_name.clone());
                if let Some(previous) = self.modules.insert(key, type_id)
                    && previous != type_id
                {
                    warn!(
                        request = %locator,
                        export_name = ?export_name,
                        "module locator rebound to {type_name}"
                    );
                }
            }
        }

        debug!(type_name, %request, export_name = ?export_name, "registered serializer");
        self.entries.insert(type_id, entry);
        Ok(())
    }

    /// Shorthand for `register(Request::Global, Some(name), serializer)`.
    pub fn register_global<T, S>(&mut self, name: &str, serializer: S) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        S: Serializer<T> + 'static,
    {
        self.register::<T, S>(Request::Global, Some(name), serializer)
    }

    /// Mark `T` as explicitly not serializable.
    ///
    /// Encoding a `T` then fails with [`CodecError::NotSerializable`] instead
    /// of the generic unregistered-type error.
    pub fn register_not_serializable<T: Any>(&mut self) {
        let type_id = TypeId::of::<T>();
        self.unbind(type_id);
        self.not_serializable
            .insert(type_id, std::any::type_name::<T>());
    }

    fn unbind(&mut self, type_id: TypeId) {
        self.not_serializable.remove(&type_id);
        let Some(entry) = self.entries.remove(&type_id) else {
            return;
        };
        match &entry.request {
            Request::Global => {
                if let Some(name) = &entry.export_name {
                    self.globals.remove(name);
                }
            }
            Request::Module(locator) => {
                let key = (locator.clone(), entry.export_name.clone());
                if self.modules.get(&key) == Some(&type_id) {
                    self.modules.remove(&key);
                }
            }
        }
    }

    /// Entry for the runtime type of `object`.
    pub fn resolve_for(&self, object: &ObjectRef) -> Result<Arc<RegistryEntry>, CodecError> {
        let type_id = object.type_id();
        if let Some(entry) = self.entries.get(&type_id) {
            return Ok(entry.clone());
        }
        if let Some(type_name) = self.not_serializable.get(&type_id) {
            return Err(CodecError::NotSerializable(type_name.to_string()));
        }
        Err(CodecError::UnregisteredType(object.type_name().to_string()))
    }

    pub fn entry_for_type(&self, type_id: TypeId) -> Option<Arc<RegistryEntry>> {
        self.entries.get(&type_id).cloned()
    }

    pub fn global(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.globals.get(name).cloned()
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModuleResolver for SerializerRegistry {
    fn resolve(&self, request: &str, export_name: Option<&str>) -> Option<TypeId> {
        let key = (request.to_string(), export_name.map(str::to_string));
        self.modules.get(&key).copied()
    }
}
