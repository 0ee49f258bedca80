//! JSON documents <-> graph values.
//!
//! Objects become [`Record`]s and arrays become [`List`]s, so repeated keys
//! and strings in a document are stored once.

use anyhow::{Result, bail};
use graphpack_core::{List, Record, Value, ValueMap};
use serde_json::{Map, Number, Value as Json};

pub fn from_json(json: Json) -> Result<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(x)) if n.is_f64() => Value::Float(x),
            _ => bail!("integer {n} does not fit in 64 signed bits"),
        },
        Json::String(s) => Value::from(s),
        Json::Array(items) => Value::object(List(
            items.into_iter().map(from_json).collect::<Result<_>>()?,
        )),
        Json::Object(fields) => {
            let mut record = Record::new();
            for (key, value) in fields {
                record.insert(&key, from_json(value)?);
            }
            Value::object(record)
        }
    })
}

pub fn to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(x) => match Number::from_f64(*x) {
            Some(n) => Json::Number(n),
            None => bail!("{x} has no JSON form"),
        },
        Value::Str(s) => Json::String(s.to_string()),
        Value::Bytes(bytes) => Json::from(bytes.to_vec()),
        Value::Lazy(_) => bail!("lazy values cannot be shown as JSON"),
        Value::Object(object) => {
            if let Some(list) = object.downcast_ref::<List>() {
                Json::Array(list.0.iter().map(to_json).collect::<Result<_>>()?)
            } else if let Some(record) = object.downcast_ref::<Record>() {
                let mut map = Map::new();
                for (key, field) in record.iter() {
                    map.insert(key.to_string(), to_json(field)?);
                }
                Json::Object(map)
            } else if let Some(pairs) = object.downcast_ref::<ValueMap>() {
                let pairs = pairs
                    .0
                    .iter()
                    .map(|(k, v)| Ok(Json::Array(vec![to_json(k)?, to_json(v)?])))
                    .collect::<Result<_>>()?;
                Json::Array(pairs)
            } else {
                bail!("no JSON form for {}", object.type_name())
            }
        }
    })
}
