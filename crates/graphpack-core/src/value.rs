//! Value model shared by every stage of the pipeline.
//!
//! A [`Value`] is either an object-graph value (what callers hand to the
//! codec) or a primitive stream item (what the codec hands downstream). The
//! two vocabularies overlap on purpose: a primitive stream is just a frame of
//! values that never contains [`Value::Object`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::CodecError;
use crate::lazy::Lazy;

/// A frame is an ordered sequence of values flowing between stages.
pub type Frame = Vec<Value>;

/// Runtime-typed object stored in the graph.
///
/// Blanket-implemented for every `Any + Send + Sync` type, so any plain Rust
/// struct can live in a graph. Serializability is decided by the registry,
/// not by this trait.
pub trait GraphObject: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> GraphObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Shared handle to a graph object. Identity is the allocation address.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn GraphObject>);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self(Arc::new(object))
    }

    fn inner(&self) -> &dyn GraphObject {
        &*self.0
    }

    /// Runtime type of the wrapped object (not of the handle).
    pub fn type_id(&self) -> TypeId {
        Any::type_id(GraphObject::as_any(self.inner()))
    }

    pub fn type_name(&self) -> &'static str {
        GraphObject::type_name(self.inner())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        GraphObject::as_any(self.inner()).downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.addr() == other.addr()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({} @ {:#x})", self.type_name(), self.addr())
    }
}

/// A value in an object graph or a primitive stream.
///
/// `Null` doubles as the escape sentinel on the primitive side; the codec
/// escapes data nulls so the two uses never collide.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Object(ObjectRef),
    Lazy(Lazy),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Object(_) => "object",
            Value::Lazy(_) => "lazy",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn object(object: impl Any + Send + Sync) -> Self {
        Value::Object(ObjectRef::new(object))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Identity comparison: objects, buffers and lazies compare by address,
    /// everything else by value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bytes(a), Value::Bytes(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Lazy(a), Value::Lazy(b)) => a.ptr_eq(b),
            _ => self == other,
        }
    }
}

/// Content equality for primitives; identity for objects and lazies.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Lazy(a), Value::Lazy(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Arc::from(value))
    }
}

impl From<Arc<[u8]>> for Value {
    fn from(value: Arc<[u8]>) -> Self {
        Value::Bytes(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl From<Lazy> for Value {
    fn from(value: Lazy) -> Self {
        Value::Lazy(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

fn mismatch(expected: &'static str, found: &Value) -> CodecError {
    CodecError::FieldType {
        expected,
        found: found.kind(),
    }
}

impl TryFrom<Value> for bool {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(n) => Ok(n),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float(x) => Ok(x),
            Value::Int(n) => Ok(n as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl TryFrom<Value> for Arc<str> {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Arc::<str>::try_from(value).map(|s| s.to_string())
    }
}

impl TryFrom<Value> for Arc<[u8]> {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl TryFrom<Value> for ObjectRef {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(object) => Ok(object),
            other => Err(mismatch("object", &other)),
        }
    }
}

impl TryFrom<Value> for Lazy {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Lazy(lazy) => Ok(lazy),
            other => Err(mismatch("lazy", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i64,
    }

    #[test]
    fn object_ref_reports_inner_type() {
        let obj = ObjectRef::new(Point { x: 3 });
        assert_eq!(obj.type_id(), TypeId::of::<Point>());
        assert!(obj.type_name().ends_with("Point"));
        assert_eq!(obj.downcast_ref::<Point>().map(|p| p.x), Some(3));
        assert!(obj.downcast_ref::<String>().is_none());
    }

    #[test]
    fn clones_share_identity() {
        let a = ObjectRef::new(Point { x: 1 });
        let b = a.clone();
        let c = ObjectRef::new(Point { x: 1 });
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn same_uses_identity_for_buffers() {
        let buf: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let a = Value::Bytes(buf.clone());
        let b = Value::Bytes(buf);
        let c = Value::from(vec![1u8, 2, 3]);
        assert!(a.same(&b));
        assert!(!a.same(&c));
        assert_eq!(a, c);
    }

    #[test]
    fn try_from_reports_kinds() {
        let err = i64::try_from(Value::from("nope")).unwrap_err();
        assert!(matches!(
            err,
            CodecError::FieldType {
                expected: "int",
                found: "string"
            }
        ));
        assert_eq!(String::try_from(Value::from("ok")).unwrap(), "ok");
        assert_eq!(f64::try_from(Value::Int(2)).unwrap(), 2.0);
    }

    #[test]
    fn option_none_is_null() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some(4i64)), Value::Int(4));
    }
}
