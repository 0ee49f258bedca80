//! FieldListSerializer - the common case of "write these fields in order".
//!
//! The field list order is the wire format: values go out positionally, no
//! names are written. Reordering the list breaks every stored stream, so
//! bump the registered locator/export name when the list changes.

use tracing::trace;

use crate::error::CodecError;
use crate::serializer::{ObjectReader, ObjectWriter, Serializer};
use crate::value::Value;

type Getter<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Box<dyn Fn(&mut T, Value) -> Result<(), CodecError> + Send + Sync>;

struct Field<T> {
    name: &'static str,
    get: Getter<T>,
    set: Setter<T>,
}

/// Serializer over an ordered list of named fields.
///
/// # Example
/// ```ignore
/// let serializer = FieldListSerializer::new(Config::default)
///     .field("name", |c: &Config| c.name.clone().into(), |c, v| {
///         c.name = v.try_into()?;
///         Ok(())
///     })
///     .on_construct(|c| c.rebuild_index());
/// registry.register::<Config, _>(Request::module("app/config"), None, serializer)?;
/// ```
pub struct FieldListSerializer<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    fields: Vec<Field<T>>,
    on_construct: Option<Box<dyn Fn(&mut T) + Send + Sync>>,
}

impl<T> FieldListSerializer<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            fields: Vec::new(),
            on_construct: None,
        }
    }

    /// Append a field. Order of calls is the order on the wire.
    pub fn field<G, S>(mut self, name: &'static str, get: G, set: S) -> Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> Result<(), CodecError> + Send + Sync + 'static,
    {
        self.fields.push(Field {
            name,
            get: Box::new(get),
            set: Box::new(set),
        });
        self
    }

    /// Hook run once on each freshly populated instance, before it is
    /// handed back to the codec.
    pub fn on_construct(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_construct = Some(Box::new(hook));
        self
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

impl<T> Serializer<T> for FieldListSerializer<T> {
    fn serialize(&self, value: &T, writer: &mut ObjectWriter<'_>) -> Result<(), CodecError> {
        for field in &self.fields {
            writer.write((field.get)(value))?;
        }
        Ok(())
    }

    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<T, CodecError> {
        let mut instance = (self.factory)();
        for field in &self.fields {
            let value = reader.read()?;
            (field.set)(&mut instance, value).inspect_err(|err| {
                trace!(field = field.name, %err, "field assignment failed");
            })?;
        }
        if let Some(hook) = &self.on_construct {
            hook(&mut instance);
        }
        Ok(instance)
    }
}
