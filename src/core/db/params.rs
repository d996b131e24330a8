/// Parameter Module
///
/// Named, dynamically typed command parameters. A `Params` map is bound into a
/// command by name; each `ParamValue` knows exactly how it is encoded for the
/// driver, so binding is an exhaustive match rather than runtime inspection.
use crate::core::{DbError, Result};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use std::collections::hash_map::{self, HashMap};
use std::str::FromStr;
use uuid::Uuid;

/// Text layout used for date-time parameters and understood by the row readers.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Prefixes SQLite accepts in front of a named parameter.
pub(crate) const PARAM_PREFIXES: [char; 3] = ['@', ':', '$'];

/// A single bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Text(String),
    Char(char),
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Bytes(Vec<u8>),
    DateTime(NaiveDateTime),
    Guid(Uuid),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            ParamValue::Null => Value::Null,
            ParamValue::Text(s) => return Ok(ToSqlOutput::from(s.as_str())),
            ParamValue::Char(c) => Value::Text(c.to_string()),
            ParamValue::Bool(b) => Value::Integer(i64::from(*b)),
            ParamValue::Byte(v) => Value::Integer(i64::from(*v)),
            ParamValue::Int16(v) => Value::Integer(i64::from(*v)),
            ParamValue::Int32(v) => Value::Integer(i64::from(*v)),
            ParamValue::Int64(v) => Value::Integer(*v),
            ParamValue::Float(v) => Value::Real(f64::from(*v)),
            ParamValue::Double(v) => Value::Real(*v),
            ParamValue::Decimal(d) => Value::Text(d.to_string()),
            ParamValue::Bytes(b) => return Ok(ToSqlOutput::from(b.as_slice())),
            ParamValue::DateTime(dt) => Value::Text(dt.format(DATETIME_FORMAT).to_string()),
            ParamValue::Guid(g) => Value::Text(g.hyphenated().to_string()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

macro_rules! impl_from_native {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(v: $ty) -> Self {
                    ParamValue::$variant(v)
                }
            }
        )*
    };
}

impl_from_native! {
    String => Text,
    char => Char,
    bool => Bool,
    u8 => Byte,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    Vec<u8> => Bytes,
    NaiveDateTime => DateTime,
    Uuid => Guid,
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<&[u8]> for ParamValue {
    fn from(v: &[u8]) -> Self {
        ParamValue::Bytes(v.to_vec())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

/// A container for named command parameters.
///
/// Keys are unique and stored without their `@`, `:` or `$` prefix, so `"d"`
/// and `"@d"` name the same parameter. Nothing in this API replaces a value
/// that is already present: `with` keeps the first value written under a
/// name, and `merge` is a left-biased union.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Creates a map holding one parameter.
    pub fn single(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Params::new().with(name, value)
    }

    /// Adds a parameter unless the name is already taken.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        let name = name.into();
        self.values
            .entry(bare_name(&name).to_string())
            .or_insert_with(|| value.into());
        self
    }

    /// Returns this map with every entry of `other` whose name is not already present.
    pub fn merge(mut self, other: &Params) -> Self {
        for (name, value) in &other.values {
            self.values
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Looks a parameter up with or without its prefix.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(bare_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(bare_name(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, ParamValue> {
        self.values.iter()
    }

    /// Builds a map from a flat JSON object.
    ///
    /// JSON carries no type tags, so strings always stay text. Integers become
    /// `Int64`, other numbers `Double`, `null` becomes `Null`, and arrays of
    /// values in `0..=255` become `Bytes`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| DbError::Config("parameters must be a JSON object".to_string()))?;

        let mut params = Params::new();
        for (name, value) in object {
            params = params.with(name.as_str(), json_to_param(name, value)?);
        }
        Ok(params)
    }

    /// Parses a JSON object from text; see [`Params::from_json`].
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json = serde_json::Value::from_str(text)?;
        Params::from_json(&json)
    }
}

fn json_to_param(name: &str, value: &serde_json::Value) -> Result<ParamValue> {
    use serde_json::Value as Json;

    match value {
        Json::Null => Ok(ParamValue::Null),
        Json::Bool(b) => Ok(ParamValue::Bool(*b)),
        Json::String(s) => Ok(ParamValue::Text(s.clone())),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(ParamValue::Int64(i)),
            None => n
                .as_f64()
                .map(ParamValue::Double)
                .ok_or_else(|| DbError::Config(format!("parameter `{}` is out of range", name))),
        },
        Json::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(ParamValue::Bytes)
            .ok_or_else(|| {
                DbError::Config(format!("parameter `{}` must be an array of bytes", name))
            }),
        Json::Object(_) => Err(DbError::Config(format!(
            "parameter `{}` cannot be a nested object",
            name
        ))),
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a ParamValue);
    type IntoIter = hash_map::Iter<'a, String, ParamValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Params::new(), |params, (k, v)| params.with(k, v))
    }
}

/// Strips a leading `@`, `:` or `$` from a parameter name.
pub(crate) fn bare_name(name: &str) -> &str {
    name.strip_prefix(&PARAM_PREFIXES[..]).unwrap_or(name)
}

/// Builds a [`Params`] map from `name => value` pairs.
///
/// ```
/// use sqlbatch::db_params;
///
/// let params = db_params! { "description" => "x", "qty" => 3i32 };
/// assert_eq!(params.len(), 2);
/// ```
#[macro_export]
macro_rules! db_params {
    () => {
        $crate::core::db::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::core::db::Params::new()$(.with($name, $value))+
    };
}
