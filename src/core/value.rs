//! SF-001: Tagged runtime values.
//!
//! Every parameter default produced by a definition, whether evaluated from a
//! legacy script or read from a declarative YAML file, is one of these.
//! Values serialize to plain JSON (no enum tags) so the form renderer sees
//! `8`, `false`, `"GB"` or `[8, 1, 2]` directly.

use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Scalars are everything except lists and maps.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Ruby truthiness: only `nil` and `false` are falsy.
    pub fn truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "array",
            Self::Map(_) => "hash",
        }
    }

    /// String rendering in the style of Ruby's `to_s`.
    pub fn to_display(&self) -> String {
        match self {
            Self::Nil => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(x) => format_float(*x),
            Self::Str(s) => s.clone(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_inspect).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{:?}=>{}", k, v.to_inspect()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    fn to_inspect(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Str(s) => format!("{:?}", s),
            other => other.to_display(),
        }
    }
}

fn format_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        x.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<serde_yaml_ng::Value> for Value {
    type Error = String;

    fn try_from(yaml: serde_yaml_ng::Value) -> Result<Self, Self::Error> {
        use serde_yaml_ng::Value as Y;
        match yaml {
            Y::Null => Ok(Self::Nil),
            Y::Bool(b) => Ok(Self::Bool(b)),
            Y::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(x) = n.as_f64() {
                    Ok(Self::Float(x))
                } else {
                    Err(format!("number {} is out of range", n))
                }
            }
            Y::String(s) => Ok(Self::Str(s)),
            Y::Sequence(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Y::Mapping(mapping) => {
                let mut map = IndexMap::new();
                for (k, v) in mapping {
                    let key = match k {
                        Y::String(s) => s,
                        other => return Err(format!("hash keys must be strings, got {:?}", other)),
                    };
                    map.insert(key, Value::try_from(v)?);
                }
                Ok(Self::Map(map))
            }
            Y::Tagged(tagged) => Err(format!("YAML tag {} is not allowed", tagged.tag)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a null, boolean, number, string, array or string-keyed map")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        Deserialize::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Value, E> {
        Ok(Value::Int(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Value, E> {
        i64::try_from(n)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {} is out of range", n)))
    }

    fn visit_f64<E: de::Error>(self, x: f64) -> Result<Value, E> {
        Ok(Value::Float(x))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::Str(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::Str(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = IndexMap::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sf001_serializes_untagged() {
        let v = Value::List(vec![Value::Int(8), Value::Int(1), Value::Int(2)]);
        assert_eq!(serde_json::to_string(&v).unwrap(), "[8,1,2]");
        assert_eq!(serde_json::to_string(&Value::Bool(false)).unwrap(), "false");
        assert_eq!(serde_json::to_string(&Value::Nil).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::from("GB")).unwrap(), "\"GB\"");
    }

    #[test]
    fn test_sf001_map_keeps_order() {
        let mut map = IndexMap::new();
        map.insert("zeta".to_string(), Value::Int(1));
        map.insert("alpha".to_string(), Value::Int(2));
        let json = serde_json::to_string(&Value::Map(map)).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2}"#);
    }

    #[test]
    fn test_sf001_truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::from("").truthy());
    }

    #[test]
    fn test_sf001_from_yaml() {
        let yaml: serde_yaml_ng::Value = serde_yaml_ng::from_str("[8, 1.5, true, x, ~]").unwrap();
        let v = Value::try_from(yaml).unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Int(8),
                Value::Float(1.5),
                Value::Bool(true),
                Value::from("x"),
                Value::Nil,
            ])
        );
    }

    #[test]
    fn test_sf001_yaml_rejects_tags() {
        let yaml: serde_yaml_ng::Value = serde_yaml_ng::from_str("!shell ls").unwrap();
        assert!(Value::try_from(yaml).unwrap_err().contains("tag"));
    }

    #[test]
    fn test_sf001_to_display() {
        assert_eq!(Value::Float(2.0).to_display(), "2.0");
        assert_eq!(Value::Nil.to_display(), "");
        assert_eq!(Value::from(vec!["a", "b"]).to_display(), r#"["a", "b"]"#);
    }

    #[test]
    fn test_sf001_deserialize_json() {
        let v: Value = serde_json::from_str(r#"{"a": [1, "x"], "b": null}"#).unwrap();
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(map["a"], Value::List(vec![Value::Int(1), Value::from("x")]));
        assert_eq!(map["b"], Value::Nil);
    }
}
