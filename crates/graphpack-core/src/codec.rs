//! ObjectCodec - object graph <-> primitive stream
//!
//! Encoding is a single forward traversal. Every string, byte buffer and
//! object gets a position in a per-call reference table the first time it
//! is seen; later occurrences become a relative back-reference instead of a
//! second copy. The decoder rebuilds the same table in the same order, so the
//! positions line up without ever being written to the stream.
//!
//! Control sequences start with the escape sentinel [`ESCAPE`]:
//!
//! ```text
//! [ESCAPE, Int(1)]                   data null
//! [ESCAPE, Int(n)]   n <= 0          back-reference to position pos + n
//! [ESCAPE, request, export_name]     object header, followed by its fields
//! ```
//!
//! `request` is `Str(locator)` for module entries and `Null` for globals.
//!
//! An object only enters the table once its fields are written (on both
//! sides). It can refer to anything completed before it, never to itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::CodecError;
use crate::lazy::Lazy;
use crate::pipeline::Stage;
use crate::registry::{ModuleResolver, RegistryEntry, Request, SerializerRegistry};
use crate::serializer::{ObjectReader, ObjectWriter};
use crate::value::{Frame, ObjectRef, Value};

/// Escape sentinel. `Null` is cheap to encode and compresses well downstream.
pub const ESCAPE: Value = Value::Null;

/// Second item of an escaped data null.
pub const ESCAPE_ESCAPE_VALUE: i64 = 1;

/// Default bound on nested object headers, per encode or decode call.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// The object-graph codec. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct ObjectCodec {
    registry: Arc<SerializerRegistry>,
    resolver: Arc<dyn ModuleResolver>,
    max_depth: usize,
}

impl ObjectCodec {
    /// Codec that resolves module locators through the registry itself.
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self {
            resolver: registry.clone(),
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Objects nested deeper than `max_depth` fail the call: encode with
    /// [`CodecError::NestingTooDeep`], decode with a corrupt stream.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    /// Encode a frame of values into a primitive stream.
    pub fn encode(&self, values: Frame) -> Result<Frame, CodecError> {
        let mut encoder = Encoder::new(self.clone());
        for value in values {
            encoder.process(value)?;
        }
        debug!(
            items = encoder.out.len(),
            referenceables = encoder.pos,
            "encoded frame"
        );
        Ok(encoder.out)
    }

    /// Decode a primitive stream produced by [`ObjectCodec::encode`].
    pub fn decode(&self, items: Frame) -> Result<Frame, CodecError> {
        let input_len = items.len();
        let mut decoder = Decoder::new(self.clone(), items);
        let mut values = Vec::new();
        while decoder.has_more() {
            values.push(decoder.decode_value()?);
        }
        debug!(
            items = input_len,
            values = values.len(),
            referenceables = decoder.table.len(),
            "decoded frame"
        );
        Ok(values)
    }

    /// Deferred encode: resolves `lazy` and encodes its frame as a separate
    /// call with its own reference table.
    fn encode_lazy(&self, lazy: Lazy) -> Lazy {
        let codec = self.clone();
        Lazy::new(move || {
            let codec = codec.clone();
            let lazy = lazy.clone();
            async move {
                let frame = lazy.resolve().await?;
                codec.encode(frame)
            }
        })
    }

    fn decode_lazy(&self, lazy: Lazy) -> Lazy {
        let codec = self.clone();
        Lazy::new(move || {
            let codec = codec.clone();
            let lazy = lazy.clone();
            async move {
                let items = lazy.resolve().await?;
                codec.decode(items)
            }
        })
    }

    fn entry_for_header(
        &self,
        request: Option<&str>,
        export_name: Option<&str>,
    ) -> Result<Arc<RegistryEntry>, CodecError> {
        match request {
            None => {
                let name = export_name
                    .ok_or_else(|| CodecError::corrupt("global object header without a name"))?;
                self.registry
                    .global(name)
                    .ok_or_else(|| CodecError::UnregisteredType(format!("global '{name}'")))
            }
            Some(locator) => {
                let describe = || match export_name {
                    Some(name) => format!("{locator}#{name}"),
                    None => locator.to_string(),
                };
                let type_id = self
                    .resolver
                    .resolve(locator, export_name)
                    .ok_or_else(|| CodecError::UnregisteredType(describe()))?;
                self.registry
                    .entry_for_type(type_id)
                    .ok_or_else(|| CodecError::UnregisteredType(describe()))
            }
        }
    }
}

#[async_trait]
impl Stage for ObjectCodec {
    fn name(&self) -> &str {
        "object"
    }

    async fn forward(&self, frame: Frame) -> Result<Frame, CodecError> {
        self.encode(frame)
    }

    async fn backward(&self, frame: Frame) -> Result<Frame, CodecError> {
        self.decode(frame)
    }
}

#[derive(PartialEq, Eq, Hash)]
enum RefKey {
    Str(Arc<str>),
    Addr(usize),
}

/// Write-side state of one encode call.
pub(crate) struct Encoder {
    codec: ObjectCodec,
    out: Frame,
    table: HashMap<RefKey, usize>,
    // keeps keyed allocations alive so an address is never reused mid-call
    retained: Vec<Value>,
    pos: usize,
    depth: usize,
}

impl Encoder {
    fn new(codec: ObjectCodec) -> Self {
        Self {
            codec,
            out: Vec::new(),
            table: HashMap::new(),
            retained: Vec::new(),
            pos: 0,
            depth: 0,
        }
    }

    fn ref_key(value: &Value) -> Option<RefKey> {
        match value {
            Value::Str(s) => Some(RefKey::Str(s.clone())),
            Value::Bytes(b) => Some(RefKey::Addr(Arc::as_ptr(b) as *const u8 as usize)),
            Value::Object(object) => Some(RefKey::Addr(object.addr())),
            _ => None,
        }
    }

    fn add_referenceable(&mut self, key: RefKey, value: Value) {
        self.table.insert(key, self.pos);
        if !matches!(value, Value::Str(_)) {
            self.retained.push(value);
        }
        self.pos += 1;
    }

    pub(crate) fn process(&mut self, value: Value) -> Result<(), CodecError> {
        let key = Self::ref_key(&value);
        if let Some(key) = &key
            && let Some(&position) = self.table.get(key)
        {
            let offset = position as i64 - self.pos as i64;
            self.out.push(ESCAPE);
            self.out.push(Value::Int(offset));
            return Ok(());
        }

        match value {
            Value::Object(object) => {
                let entry = self.codec.registry.resolve_for(&object)?;
                if self.depth >= self.codec.max_depth {
                    return Err(CodecError::NestingTooDeep {
                        limit: self.codec.max_depth,
                    });
                }
                trace!(type_name = entry.type_name(), pos = self.pos, "object header");
                self.out.push(ESCAPE);
                self.out.push(match entry.request() {
                    Request::Global => Value::Null,
                    Request::Module(locator) => Value::from(locator.as_str()),
                });
                self.out.push(entry.export_name().map_or(Value::Null, Value::from));
                self.depth += 1;
                let written = entry
                    .serializer()
                    .serialize(&object, &mut ObjectWriter::new(self));
                self.depth -= 1;
                written?;
                if let Some(key) = key {
                    self.add_referenceable(key, Value::Object(object));
                }
            }
            Value::Str(_) | Value::Bytes(_) => {
                if let Some(key) = key {
                    self.add_referenceable(key, value.clone());
                }
                self.out.push(value);
            }
            Value::Null => {
                self.out.push(ESCAPE);
                self.out.push(Value::Int(ESCAPE_ESCAPE_VALUE));
            }
            Value::Lazy(lazy) => {
                let deferred = self.codec.encode_lazy(lazy);
                self.out.push(Value::Lazy(deferred));
            }
            primitive => self.out.push(primitive),
        }
        Ok(())
    }
}

/// Read-side state of one decode call.
pub(crate) struct Decoder {
    codec: ObjectCodec,
    items: std::vec::IntoIter<Value>,
    // position == index; the table only ever grows by push
    table: Vec<Value>,
    depth: usize,
}

impl Decoder {
    fn new(codec: ObjectCodec, items: Frame) -> Self {
        Self {
            codec,
            items: items.into_iter(),
            table: Vec::new(),
            depth: 0,
        }
    }

    fn has_more(&self) -> bool {
        self.items.len() > 0
    }

    fn next_item(&mut self) -> Result<Value, CodecError> {
        self.items.next().ok_or(CodecError::UnexpectedEndOfStream)
    }

    pub(crate) fn decode_value(&mut self) -> Result<Value, CodecError> {
        match self.next_item()? {
            Value::Null => self.decode_escape(),
            item @ (Value::Str(_) | Value::Bytes(_)) => {
                self.table.push(item.clone());
                Ok(item)
            }
            Value::Lazy(lazy) => Ok(Value::Lazy(self.codec.decode_lazy(lazy))),
            Value::Object(object) => Err(CodecError::corrupt(format!(
                "unencoded object {} in primitive stream",
                object.type_name()
            ))),
            primitive => Ok(primitive),
        }
    }

    fn decode_escape(&mut self) -> Result<Value, CodecError> {
        match self.next_item()? {
            Value::Int(ESCAPE_ESCAPE_VALUE) => Ok(Value::Null),
            Value::Int(offset) => self.resolve_reference(offset),
            Value::Null => self.decode_object(None),
            Value::Str(locator) => self.decode_object(Some(locator)),
            other => Err(CodecError::corrupt(format!(
                "unexpected {} after escape",
                other.kind()
            ))),
        }
    }

    fn resolve_reference(&self, offset: i64) -> Result<Value, CodecError> {
        let position = self.table.len();
        let target = position as i64 + offset;
        usize::try_from(target)
            .ok()
            .and_then(|index| self.table.get(index))
            .cloned()
            .ok_or(CodecError::UnresolvedReference { offset, position })
    }

    fn decode_object(&mut self, request: Option<Arc<str>>) -> Result<Value, CodecError> {
        if self.depth >= self.codec.max_depth {
            return Err(CodecError::corrupt(format!(
                "object nesting deeper than {}",
                self.codec.max_depth
            )));
        }
        let export_name = match self.next_item()? {
            Value::Str(name) => Some(name),
            Value::Null => None,
            other => {
                return Err(CodecError::corrupt(format!(
                    "object header export name is {}",
                    other.kind()
                )));
            }
        };
        let entry = self
            .codec
            .entry_for_header(request.as_deref(), export_name.as_deref())?;
        trace!(type_name = entry.type_name(), pos = self.table.len(), "object header");

        self.depth += 1;
        let read = entry.serializer().deserialize(&mut ObjectReader::new(self));
        self.depth -= 1;
        let object: ObjectRef = read?;
        self.table.push(Value::Object(object.clone()));
        Ok(Value::Object(object))
    }
}

#[cfg(test)]
mod tests {
    use std::any::TypeId;

    use rstest::rstest;

    use super::*;
    use crate::builtin::List;
    use crate::fields::FieldListSerializer;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[derive(Default)]
    struct Labeled {
        label: String,
        target: Option<ObjectRef>,
    }

    struct Opaque;

    fn point_serializer() -> FieldListSerializer<Point> {
        FieldListSerializer::new(Point::default)
            .field("x", |p: &Point| p.x.into(), |p, v| {
                p.x = v.try_into()?;
                Ok(())
            })
            .field("y", |p: &Point| p.y.into(), |p, v| {
                p.y = v.try_into()?;
                Ok(())
            })
    }

    fn labeled_serializer() -> FieldListSerializer<Labeled> {
        FieldListSerializer::new(Labeled::default)
            .field(
                "label",
                |l: &Labeled| l.label.clone().into(),
                |l, v| {
                    l.label = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "target",
                |l: &Labeled| l.target.clone().into(),
                |l, v| {
                    l.target = match v {
                        Value::Null => None,
                        other => Some(other.try_into()?),
                    };
                    Ok(())
                },
            )
    }

    fn codec() -> ObjectCodec {
        let mut registry = SerializerRegistry::with_builtins().unwrap();
        registry
            .register::<Point, _>(Request::module("geo/point"), Some("Point"), point_serializer())
            .unwrap();
        registry
            .register::<Labeled, _>(Request::module("geo/labeled"), None, labeled_serializer())
            .unwrap();
        ObjectCodec::new(Arc::new(registry))
    }

    fn point(value: &Value) -> &Point {
        value
            .as_object()
            .and_then(|o| o.downcast_ref::<Point>())
            .expect("a Point")
    }

    #[test]
    fn primitives_pass_through() {
        let codec = codec();
        let input = vec![Value::Int(7), Value::Bool(true), Value::Float(1.5)];
        let items = codec.encode(input.clone()).unwrap();
        assert_eq!(items, input);
        assert_eq!(codec.decode(items).unwrap(), input);
    }

    #[test]
    fn data_null_is_escaped() {
        let codec = codec();
        let items = codec.encode(vec![Value::Null, Value::Int(1)]).unwrap();
        assert_eq!(
            items,
            vec![ESCAPE, Value::Int(ESCAPE_ESCAPE_VALUE), Value::Int(1)]
        );
        let values = codec.decode(items).unwrap();
        assert_eq!(values, vec![Value::Null, Value::Int(1)]);
    }

    #[test]
    fn repeated_string_becomes_back_reference() {
        let codec = codec();
        let s = Value::from("shared");
        let items = codec.encode(vec![s.clone(), s.clone()]).unwrap();
        assert_eq!(items, vec![s.clone(), ESCAPE, Value::Int(-1)]);

        let values = codec.decode(items).unwrap();
        assert_eq!(values, vec![s.clone(), s]);
        match (&values[0], &values[1]) {
            (Value::Str(a), Value::Str(b)) => assert!(Arc::ptr_eq(a, b)),
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn equal_strings_share_a_position() {
        let codec = codec();
        let items = codec
            .encode(vec![Value::from("a"), Value::from(String::from("a"))])
            .unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn buffers_dedupe_by_identity() {
        let codec = codec();
        let buf: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let items = codec
            .encode(vec![
                Value::Bytes(buf.clone()),
                Value::Bytes(buf),
                Value::from(vec![1u8, 2, 3]),
            ])
            .unwrap();
        // second buffer is a reference, third is an equal but distinct copy
        assert_eq!(items.len(), 4);
        assert_eq!(items[1..3], [ESCAPE, Value::Int(-1)]);

        let values = codec.decode(items).unwrap();
        assert!(values[0].same(&values[1]));
        assert!(!values[0].same(&values[2]));
    }

    #[test]
    fn module_object_header_layout() {
        let codec = codec();
        let items = codec
            .encode(vec![Value::object(Point { x: 3, y: 4 })])
            .unwrap();
        assert_eq!(
            items,
            vec![
                ESCAPE,
                Value::from("geo/point"),
                Value::from("Point"),
                Value::Int(3),
                Value::Int(4),
            ]
        );
        let values = codec.decode(items).unwrap();
        assert_eq!(point(&values[0]), &Point { x: 3, y: 4 });
    }

    #[test]
    fn global_object_header_layout() {
        let codec = codec();
        let items = codec
            .encode(vec![Value::object(List(vec![Value::Int(5)]))])
            .unwrap();
        assert_eq!(
            items,
            vec![ESCAPE, Value::Null, Value::from("Array"), Value::Int(1), Value::Int(5)]
        );
    }

    #[test]
    fn objects_register_after_their_children() {
        let codec = codec();
        let list = Value::object(List(vec![Value::from("s")]));
        let items = codec.encode(vec![list.clone(), list]).unwrap();
        // "s" takes position 0, the list position 1
        assert_eq!(
            items,
            vec![
                ESCAPE,
                Value::Null,
                Value::from("Array"),
                Value::Int(1),
                Value::from("s"),
                ESCAPE,
                Value::Int(-1),
            ]
        );
    }

    #[test]
    fn shared_objects_keep_identity() {
        let codec = codec();
        let shared = ObjectRef::new(Point { x: 1, y: 2 });
        let a = Labeled {
            label: "a".into(),
            target: Some(shared.clone()),
        };
        let b = Labeled {
            label: "b".into(),
            target: Some(shared.clone()),
        };
        let root = Value::object(List(vec![
            Value::object(a),
            Value::object(b),
            Value::Object(shared),
        ]));

        let items = codec.encode(vec![root]).unwrap();
        let values = codec.decode(items).unwrap();

        let list = values[0].as_object().unwrap().downcast_ref::<List>().unwrap();
        let target_of = |v: &Value| {
            v.as_object()
                .unwrap()
                .downcast_ref::<Labeled>()
                .unwrap()
                .target
                .clone()
                .unwrap()
        };
        let first = target_of(&list.0[0]);
        let second = target_of(&list.0[1]);
        let third = list.0[2].as_object().unwrap();
        assert!(first.ptr_eq(&second));
        assert!(first.ptr_eq(third));
        assert_eq!(first.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
    }

    #[test]
    fn unregistered_type_is_fatal() {
        let codec = codec();
        let err = codec
            .encode(vec![Value::Int(1), Value::object(Opaque)])
            .unwrap_err();
        match err {
            CodecError::UnregisteredType(name) => assert!(name.ends_with("Opaque")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unregistered_nested_type_aborts_the_call() {
        let codec = codec();
        let root = Value::object(List(vec![Value::Int(1), Value::object(Opaque)]));
        assert!(matches!(
            codec.encode(vec![root]),
            Err(CodecError::UnregisteredType(_))
        ));
    }

    #[rstest]
    #[case::escape_only(1)]
    #[case::request_only(2)]
    #[case::header_only(3)]
    #[case::first_field(4)]
    fn truncated_object_is_rejected(#[case] keep: usize) {
        let codec = codec();
        let mut items = codec
            .encode(vec![Value::object(Point { x: 3, y: 4 })])
            .unwrap();
        items.truncate(keep);
        assert!(matches!(
            codec.decode(items),
            Err(CodecError::UnexpectedEndOfStream)
        ));
    }

    #[rstest]
    #[case::before_start(-1)]
    #[case::self_position(0)]
    #[case::forward(2)]
    fn dangling_reference_is_rejected(#[case] offset: i64) {
        let codec = codec();
        let items = vec![ESCAPE, Value::Int(offset)];
        assert!(matches!(
            codec.decode(items),
            Err(CodecError::UnresolvedReference { position: 0, .. })
        ));
    }

    #[rstest]
    #[case::float_after_escape(vec![ESCAPE, Value::Float(1.0)])]
    #[case::bool_after_escape(vec![ESCAPE, Value::Bool(true)])]
    #[case::bad_export_name(vec![ESCAPE, Value::from("geo/point"), Value::Int(3)])]
    #[case::nameless_global(vec![ESCAPE, Value::Null, Value::Null])]
    fn malformed_control_sequences(#[case] items: Frame) {
        let codec = codec();
        assert!(matches!(
            codec.decode(items),
            Err(CodecError::CorruptStream(_))
        ));
    }

    #[test]
    fn unknown_locator_is_unregistered() {
        let codec = codec();
        let items = vec![ESCAPE, Value::from("geo/unknown"), Value::Null];
        match codec.decode(items) {
            Err(CodecError::UnregisteredType(name)) => assert_eq!(name, "geo/unknown"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    struct LegacyResolver;

    impl ModuleResolver for LegacyResolver {
        fn resolve(&self, request: &str, _export_name: Option<&str>) -> Option<TypeId> {
            (request == "legacy/point").then(TypeId::of::<Point>)
        }
    }

    #[test]
    fn injected_resolver_maps_locators() {
        let codec = codec().with_resolver(Arc::new(LegacyResolver));
        let items = vec![
            ESCAPE,
            Value::from("legacy/point"),
            Value::from("Point"),
            Value::Int(9),
            Value::Int(8),
        ];
        let values = codec.decode(items).unwrap();
        assert_eq!(point(&values[0]), &Point { x: 9, y: 8 });
    }

    #[tokio::test]
    async fn lazy_value_is_transparent() {
        let codec = codec();
        let lazy = Lazy::single(|| async { Ok(Value::object(Point { x: 5, y: 6 })) });
        let items = codec
            .encode(vec![Value::from("before"), Value::Lazy(lazy), Value::from("before")])
            .unwrap();

        // the lazy holds one slot and takes no table position
        assert_eq!(items.len(), 4);
        assert_eq!(items[2..], [ESCAPE, Value::Int(-1)]);
        let Value::Lazy(encoded) = &items[1] else {
            panic!("expected a lazy item, got {:?}", items[1]);
        };
        let inner = encoded.resolve().await.unwrap();
        assert_eq!(inner[0], ESCAPE);

        let values = codec.decode(items).unwrap();
        let Value::Lazy(decoded) = &values[1] else {
            panic!("expected a lazy value, got {:?}", values[1]);
        };
        let value = decoded.resolve_single().await.unwrap();
        assert_eq!(point(&value), &Point { x: 5, y: 6 });
    }

    #[tokio::test]
    async fn lazy_failure_propagates() {
        let codec = codec();
        let lazy = Lazy::single(|| async { Err(CodecError::Producer("boom".into())) });
        let items = codec.encode(vec![Value::Lazy(lazy)]).unwrap();
        let Value::Lazy(encoded) = &items[0] else {
            panic!("expected a lazy item");
        };
        assert!(matches!(
            encoded.resolve().await,
            Err(CodecError::Producer(_))
        ));
    }

    fn nested_lists(depth: usize) -> Value {
        (0..depth).fold(Value::Int(0), |inner, _| Value::object(List(vec![inner])))
    }

    #[test]
    fn encode_rejects_nesting_past_the_limit() {
        let codec = codec().with_max_depth(2);
        assert!(codec.encode(vec![nested_lists(2)]).is_ok());
        assert!(matches!(
            codec.encode(vec![nested_lists(3)]),
            Err(CodecError::NestingTooDeep { limit: 2 })
        ));
    }

    #[test]
    fn hostile_nesting_is_a_corrupt_stream() {
        let codec = codec();
        let mut items = Vec::new();
        for _ in 0..100_000 {
            items.extend([ESCAPE, Value::Null, Value::from("Array"), Value::Int(1)]);
        }
        items.push(Value::Int(0));

        let err = codec.decode(items).unwrap_err();
        assert!(matches!(err, CodecError::CorruptStream(_)), "{err}");
        assert!(err.is_corrupt_stream());
    }

    #[test]
    fn nesting_up_to_the_limit_round_trips() {
        let codec = codec().with_max_depth(8);
        let items = codec.encode(vec![nested_lists(8)]).unwrap();
        let values = codec.decode(items).unwrap();
        let mut current = values[0].clone();
        for _ in 0..8 {
            let list = current.as_object().unwrap().downcast_ref::<List>().unwrap();
            current = list.0[0].clone();
        }
        assert_eq!(current, Value::Int(0));
    }
}
