//! Built-in container types, registered as globals.
//!
//! | type       | global name |
//! |------------|-------------|
//! | [`List`]     | `Array`     |
//! | [`Record`]   | `Object`    |
//! | [`ValueMap`] | `Map`       |

use std::sync::Arc;

use crate::error::{CodecError, RegistryError};
use crate::registry::SerializerRegistry;
use crate::serializer::{ObjectReader, ObjectWriter, Serializer};
use crate::value::Value;

/// Ordered list of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List(pub Vec<Value>);

/// Plain record: string keys in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(Arc<str>, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| &**k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((Arc::from(key), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (&**k, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Ordered key/value pairs with arbitrary keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMap(pub Vec<(Value, Value)>);

pub struct ListSerializer;

impl Serializer<List> for ListSerializer {
    fn serialize(&self, value: &List, writer: &mut ObjectWriter<'_>) -> Result<(), CodecError> {
        writer.write_seq(value.0.iter().cloned())
    }

    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<List, CodecError> {
        reader.read_seq().map(List)
    }
}

pub struct RecordSerializer;

impl Serializer<Record> for RecordSerializer {
    fn serialize(&self, value: &Record, writer: &mut ObjectWriter<'_>) -> Result<(), CodecError> {
        writer.write(value.fields.len())?;
        for (key, field) in &value.fields {
            writer.write(key.clone())?;
            writer.write(field.clone())?;
        }
        Ok(())
    }

    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<Record, CodecError> {
        let len = reader.read_len()?;
        let mut record = Record::new();
        for _ in 0..len {
            let key: Arc<str> = reader.read_as()?;
            let value = reader.read()?;
            record.fields.push((key, value));
        }
        Ok(record)
    }
}

pub struct ValueMapSerializer;

impl Serializer<ValueMap> for ValueMapSerializer {
    fn serialize(&self, value: &ValueMap, writer: &mut ObjectWriter<'_>) -> Result<(), CodecError> {
        writer.write(value.0.len())?;
        for (key, entry) in &value.0 {
            writer.write(key.clone())?;
            writer.write(entry.clone())?;
        }
        Ok(())
    }

    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<ValueMap, CodecError> {
        let len = reader.read_len()?;
        let mut pairs = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            let key = reader.read()?;
            let value = reader.read()?;
            pairs.push((key, value));
        }
        Ok(ValueMap(pairs))
    }
}

pub fn register_builtins(registry: &mut SerializerRegistry) -> Result<(), RegistryError> {
    registry.register_global::<List, _>("Array", ListSerializer)?;
    registry.register_global::<Record, _>("Object", RecordSerializer)?;
    registry.register_global::<ValueMap, _>("Map", ValueMapSerializer)?;
    Ok(())
}

impl SerializerRegistry {
    /// Registry pre-populated with the built-in container serializers.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtins(&mut registry)?;
        Ok(registry)
    }
}
