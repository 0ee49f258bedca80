//! JsonFrameStage - primitive stream <-> bytes.
//!
//! Sits between the object codec and storage. Every lazy item is resolved
//! and written inline as a nested section at the position it occupied, so
//! the byte layout follows stream order exactly.
//!
//! Items are written with one-letter tags; the escape sentinel is the bare
//! string `"z"`, which keeps the very frequent escape cheap.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;
use crate::lazy::Lazy;
use crate::pipeline::Stage;
use crate::value::{Frame, Value};

#[derive(Debug, Serialize, Deserialize)]
enum WireItem {
    #[serde(rename = "z")]
    Null,
    #[serde(rename = "b")]
    Bool(bool),
    #[serde(rename = "i")]
    Int(i64),
    #[serde(rename = "f")]
    Float(f64),
    #[serde(rename = "s")]
    Str(String),
    #[serde(rename = "x")]
    Bytes(Vec<u8>),
    #[serde(rename = "l")]
    Lazy(Vec<WireItem>),
}

type WireFuture = Pin<Box<dyn Future<Output = Result<Vec<WireItem>, CodecError>> + Send>>;

fn to_wire(frame: Frame) -> WireFuture {
    Box::pin(async move {
        let mut wire = Vec::with_capacity(frame.len());
        for item in frame {
            wire.push(match item {
                Value::Null => WireItem::Null,
                Value::Bool(b) => WireItem::Bool(b),
                Value::Int(n) => WireItem::Int(n),
                Value::Float(x) if x.is_finite() => WireItem::Float(x),
                Value::Float(_) => {
                    return Err(CodecError::FieldType {
                        expected: "finite float",
                        found: "float",
                    });
                }
                Value::Str(s) => WireItem::Str(s.to_string()),
                Value::Bytes(b) => WireItem::Bytes(b.to_vec()),
                Value::Lazy(lazy) => WireItem::Lazy(to_wire(lazy.resolve().await?).await?),
                Value::Object(object) => {
                    return Err(CodecError::corrupt(format!(
                        "object {} reached the frame encoder unencoded",
                        object.type_name()
                    )));
                }
            });
        }
        Ok(wire)
    })
}

fn from_wire(wire: Vec<WireItem>) -> Frame {
    wire.into_iter()
        .map(|item| match item {
            WireItem::Null => Value::Null,
            WireItem::Bool(b) => Value::Bool(b),
            WireItem::Int(n) => Value::Int(n),
            WireItem::Float(x) => Value::Float(x),
            WireItem::Str(s) => Value::from(s),
            WireItem::Bytes(b) => Value::from(b),
            WireItem::Lazy(section) => Value::Lazy(Lazy::ready(from_wire(section))),
        })
        .collect()
}

/// Frame encoder backed by `serde_json`.
#[derive(Debug, Clone, Default)]
pub struct JsonFrameStage {
    pretty: bool,
}

impl JsonFrameStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Human-readable output, for debugging cache entries.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub async fn encode(&self, items: Frame) -> Result<Vec<u8>, CodecError> {
        let wire = to_wire(items).await?;
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&wire)?
        } else {
            serde_json::to_vec(&wire)?
        };
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let wire: Vec<WireItem> = serde_json::from_slice(bytes)?;
        Ok(from_wire(wire))
    }
}

#[async_trait]
impl Stage for JsonFrameStage {
    fn name(&self) -> &str {
        "json-frame"
    }

    async fn forward(&self, frame: Frame) -> Result<Frame, CodecError> {
        let items = frame.len();
        let bytes = self.encode(frame).await?;
        debug!(items, bytes = bytes.len(), "framed stream");
        Ok(vec![Value::from(bytes)])
    }

    async fn backward(&self, frame: Frame) -> Result<Frame, CodecError> {
        let [Value::Bytes(bytes)]: [Value; 1] = frame
            .try_into()
            .map_err(|_| CodecError::corrupt("frame decoder expects a single buffer"))?
        else {
            return Err(CodecError::corrupt("frame decoder expects a byte buffer"));
        };
        self.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[tokio::test]
    async fn items_survive_framing() {
        let stage = JsonFrameStage::new();
        let items = vec![
            Value::Null,
            Value::Int(-1),
            Value::Float(0.5),
            Value::Bool(true),
            Value::from("text"),
            Value::from(vec![0u8, 255]),
        ];
        let framed = stage.forward(items.clone()).await.unwrap();
        assert_eq!(framed.len(), 1);
        assert_eq!(stage.backward(framed).await.unwrap(), items);
    }

    #[rstest]
    #[case::last_digit_rounding(1.0715660391465826e-75)]
    #[case::subnormal(5e-324)]
    #[case::largest(f64::MAX)]
    #[case::third(1.0 / 3.0)]
    #[tokio::test]
    async fn floats_keep_every_bit(#[case] x: f64) {
        let stage = JsonFrameStage::new();
        let framed = stage.forward(vec![Value::Float(x)]).await.unwrap();
        let back = stage.backward(framed).await.unwrap();
        let [Value::Float(y)] = back.as_slice() else {
            panic!("expected a single float, got {back:?}");
        };
        assert_eq!(y.to_bits(), x.to_bits(), "{x:e} came back as {y:e}");
    }

    #[tokio::test]
    async fn lazy_sections_are_inlined_in_place() {
        let stage = JsonFrameStage::new();
        let lazy = Lazy::new(|| async { Ok(vec![Value::Int(2), Value::from("deep")]) });
        let items = vec![Value::Int(1), Value::Lazy(lazy), Value::Int(3)];

        let bytes = stage.encode(items).await.unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert_eq!(text, r#"[{"i":1},{"l":[{"i":2},{"s":"deep"}]},{"i":3}]"#);

        let frame = stage.decode(&bytes).unwrap();
        assert_eq!(frame[0], Value::Int(1));
        assert_eq!(frame[2], Value::Int(3));
        let Value::Lazy(section) = &frame[1] else {
            panic!("expected a lazy section, got {:?}", frame[1]);
        };
        assert!(section.is_resolved());
        assert_eq!(
            section.resolve().await.unwrap(),
            vec![Value::Int(2), Value::from("deep")]
        );
    }

    #[tokio::test]
    async fn escape_is_compact() {
        let stage = JsonFrameStage::new();
        let bytes = stage.encode(vec![Value::Null]).await.unwrap();
        assert_eq!(bytes, br#"["z"]"#);
    }

    #[tokio::test]
    async fn objects_are_rejected() {
        let stage = JsonFrameStage::new();
        let result = stage.forward(vec![Value::object(5u8)]).await;
        assert!(matches!(result, Err(CodecError::CorruptStream(_))));
    }

    #[tokio::test]
    async fn non_finite_floats_are_rejected() {
        let stage = JsonFrameStage::new();
        let result = stage.forward(vec![Value::Float(f64::NAN)]).await;
        assert!(matches!(result, Err(CodecError::FieldType { .. })));
    }

    #[tokio::test]
    async fn garbage_is_a_corrupt_stream() {
        let stage = JsonFrameStage::new();
        let err = stage
            .backward(vec![Value::from(b"not json".to_vec())])
            .await
            .unwrap_err();
        assert!(err.is_corrupt_stream());

        let err = stage.backward(vec![Value::Int(1)]).await.unwrap_err();
        assert!(matches!(err, CodecError::CorruptStream(_)));
    }
}
