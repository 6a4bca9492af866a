//! Explicitly tagged XML-RPC wire values.
//!
//! Every argument and result is one of a fixed set of wire types. Nothing
//! here infers a type from string contents: a numeric-looking string is
//! still sent as `<string>`, which keeps the server from guessing.

use crate::error::{XenError, XenResult};
use crate::types::ObjectRef;

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Wire format for `dateTime.iso8601` values.
pub const DATETIME_FORMAT: &str = "%Y%m%dT%H:%M:%S";

/// A single XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    Bool(bool),
    String(String),
    /// `<i4>` / `<int>`
    Int(i32),
    /// `<i8>`
    Int64(i64),
    Double(f64),
    DateTime(NaiveDateTime),
    Nil,
    Array(Vec<XmlRpcValue>),
    Struct(BTreeMap<String, XmlRpcValue>),
}

impl XmlRpcValue {
    /// Force the string wire type.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Wire type name as it appears in the XML.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::String(_) => "string",
            Self::Int(_) => "i4",
            Self::Int64(_) => "i8",
            Self::Double(_) => "double",
            Self::DateTime(_) => "dateTime.iso8601",
            Self::Nil => "nil",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[XmlRpcValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, XmlRpcValue>> {
        match self {
            Self::Struct(m) => Some(m),
            _ => None,
        }
    }

    /// Struct member lookup (`None` for non-structs).
    pub fn get(&self, key: &str) -> Option<&XmlRpcValue> {
        self.as_struct().and_then(|m| m.get(key))
    }

    /// Interpret the value as a string, failing with a parse error otherwise.
    pub fn into_string(self) -> XenResult<String> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(XenError::parse(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }

    /// Interpret the value as an object reference.
    pub fn into_ref(self) -> XenResult<ObjectRef> {
        self.into_string().map(ObjectRef::from)
    }

    /// Interpret the value as an array of strings.
    pub fn into_string_list(self) -> XenResult<Vec<String>> {
        match self {
            Self::Array(items) => items.into_iter().map(Self::into_string).collect(),
            other => Err(XenError::parse(format!(
                "expected array, got {}",
                other.type_name()
            ))),
        }
    }

    /// Render a scalar for display; containers fall back to JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Int64(i) => i.to_string(),
            Self::Double(d) => d.to_string(),
            Self::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
            Self::Nil => String::new(),
            other => serde_json::Value::from(other.clone()).to_string(),
        }
    }
}

impl From<bool> for XmlRpcValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for XmlRpcValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for XmlRpcValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&String> for XmlRpcValue {
    fn from(v: &String) -> Self {
        Self::String(v.clone())
    }
}

impl From<i32> for XmlRpcValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for XmlRpcValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for XmlRpcValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<NaiveDateTime> for XmlRpcValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<&ObjectRef> for XmlRpcValue {
    fn from(v: &ObjectRef) -> Self {
        Self::String(v.as_str().to_string())
    }
}

impl From<ObjectRef> for XmlRpcValue {
    fn from(v: ObjectRef) -> Self {
        Self::String(v.into_inner())
    }
}

impl<T: Into<XmlRpcValue>> From<Vec<T>> for XmlRpcValue {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, XmlRpcValue>> for XmlRpcValue {
    fn from(v: BTreeMap<String, XmlRpcValue>) -> Self {
        Self::Struct(v)
    }
}

/// Bridge into serde so typed records can be decoded with `#[derive(Deserialize)]`.
impl From<XmlRpcValue> for serde_json::Value {
    fn from(v: XmlRpcValue) -> Self {
        use serde_json::Value;
        match v {
            XmlRpcValue::Bool(b) => Value::Bool(b),
            XmlRpcValue::String(s) => Value::String(s),
            XmlRpcValue::Int(i) => Value::from(i),
            XmlRpcValue::Int64(i) => Value::from(i),
            XmlRpcValue::Double(d) => serde_json::Number::from_f64(d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            XmlRpcValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            XmlRpcValue::Nil => Value::Null,
            XmlRpcValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            XmlRpcValue::Struct(m) => {
                Value::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Build a struct value from `(name, value)` pairs.
pub fn structure<I, K, V>(members: I) -> XmlRpcValue
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<XmlRpcValue>,
{
    XmlRpcValue::Struct(
        members
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}
