//! Serializer capability - how a registered type writes and reads itself.
//!
//! Two layers, like a typed surface over an object-safe core:
//! - [`Serializer<T>`]: what plugin authors implement, typed on `T`.
//! - [`ObjectSerializer`]: object-safe, works on [`ObjectRef`]; this is what
//!   the registry stores and the codec calls.
//!
//! [`TypedSerializer`] bridges the two by downcasting.

use std::any::Any;
use std::marker::PhantomData;

use crate::codec::{Decoder, Encoder};
use crate::error::CodecError;
use crate::value::{ObjectRef, Value};

/// Typed serializer for `T`.
///
/// `serialize` writes sub-values through the writer in whatever order it
/// likes; `deserialize` must read them back in the same order. The stream
/// carries no field names, so that order is the wire format.
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T, writer: &mut ObjectWriter<'_>) -> Result<(), CodecError>;
    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<T, CodecError>;
}

/// Object-safe serializer stored in the registry.
pub trait ObjectSerializer: Send + Sync {
    fn serialize(&self, object: &ObjectRef, writer: &mut ObjectWriter<'_>)
    -> Result<(), CodecError>;
    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<ObjectRef, CodecError>;
}

pub struct TypedSerializer<T, S> {
    serializer: S,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> TypedSerializer<T, S> {
    pub fn new(serializer: S) -> Self {
        Self {
            serializer,
            _marker: PhantomData,
        }
    }
}

impl<T, S> ObjectSerializer for TypedSerializer<T, S>
where
    T: Any + Send + Sync,
    S: Serializer<T>,
{
    fn serialize(
        &self,
        object: &ObjectRef,
        writer: &mut ObjectWriter<'_>,
    ) -> Result<(), CodecError> {
        let value = object
            .downcast_ref::<T>()
            .ok_or_else(|| CodecError::FieldType {
                expected: std::any::type_name::<T>(),
                found: object.type_name(),
            })?;
        self.serializer.serialize(value, writer)
    }

    fn deserialize(&self, reader: &mut ObjectReader<'_>) -> Result<ObjectRef, CodecError> {
        self.serializer.deserialize(reader).map(ObjectRef::new)
    }
}

/// Sink handed to [`Serializer::serialize`]. Every written value goes back
/// through the codec, so nested objects, shared references and escapes are
/// handled the same way as at top level.
pub struct ObjectWriter<'a> {
    encoder: &'a mut Encoder,
}

impl<'a> ObjectWriter<'a> {
    pub(crate) fn new(encoder: &'a mut Encoder) -> Self {
        Self { encoder }
    }

    pub fn write(&mut self, value: impl Into<Value>) -> Result<(), CodecError> {
        self.encoder.process(value.into())
    }

    /// Write a length followed by each element.
    pub fn write_seq<I>(&mut self, values: I) -> Result<(), CodecError>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        I::Item: Into<Value>,
    {
        let values = values.into_iter();
        self.write(values.len())?;
        for value in values {
            self.write(value)?;
        }
        Ok(())
    }
}

/// Source handed to [`Serializer::deserialize`].
pub struct ObjectReader<'a> {
    decoder: &'a mut Decoder,
}

impl<'a> ObjectReader<'a> {
    pub(crate) fn new(decoder: &'a mut Decoder) -> Self {
        Self { decoder }
    }

    pub fn read(&mut self) -> Result<Value, CodecError> {
        self.decoder.decode_value()
    }

    pub fn read_as<T>(&mut self) -> Result<T, CodecError>
    where
        T: TryFrom<Value, Error = CodecError>,
    {
        T::try_from(self.read()?)
    }

    /// Read a length written by [`ObjectWriter::write_seq`].
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let len: i64 = self.read_as()?;
        usize::try_from(len).map_err(|_| CodecError::corrupt(format!("negative length {len}")))
    }

    pub fn read_seq(&mut self) -> Result<Vec<Value>, CodecError> {
        let len = self.read_len()?;
        let mut values = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            values.push(self.read()?);
        }
        Ok(values)
    }
}
