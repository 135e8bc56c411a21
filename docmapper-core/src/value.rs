//! In-memory values held by document instances.
//!
//! A [`Value`] is the canonical in-memory representation of one field value. Fields convert
//! between [`Value`] and the wire representation ([`Bson`]); values that a field could not
//! coerce are kept as they are so that validation can report them.

use bson::{Binary, Bson, DateTime as BsonDateTime, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::document::DocumentInstance;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An explicit null.
    Null,
    /// A UTF-8 string.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// A 32-bit integer.
    Int(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A double precision float.
    Float(f64),
    /// A fixed-point decimal.
    Decimal(Decimal),
    /// A boolean.
    Boolean(bool),
    /// A UTC timestamp.
    DateTime(DateTime<Utc>),
    /// A calendar date.
    Date(NaiveDate),
    /// A store object id.
    ObjectId(ObjectId),
    /// An embedded document instance.
    Embedded(Box<DocumentInstance>),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A wire value that has not been coerced into a canonical form.
    Raw(Bson),
}

impl Value {
    /// Converts a wire value into a [`Value`] without any field-specific coercion.
    ///
    /// Nested documents are kept as [`Value::Raw`]; only fields that know the target schema
    /// can turn them into [`Value::Embedded`].
    pub fn from_bson(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::String(value) => Value::String(value),
            Bson::Int32(value) => Value::Int(value),
            Bson::Int64(value) => Value::Long(value),
            Bson::Double(value) => Value::Float(value),
            Bson::Boolean(value) => Value::Boolean(value),
            Bson::ObjectId(value) => Value::ObjectId(value),
            Bson::DateTime(value) => match DateTime::from_timestamp_millis(value.timestamp_millis()) {
                Some(datetime) => Value::DateTime(datetime),
                None => Value::Raw(Bson::DateTime(value)),
            },
            Bson::Binary(binary) => Value::Binary(binary.bytes),
            Bson::Array(items) => Value::List(items.into_iter().map(Value::from_bson).collect()),
            other => Value::Raw(other),
        }
    }

    /// Converts this value into a wire value without any field-specific conversion.
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::String(value) => Bson::String(value.clone()),
            Value::Binary(bytes) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            }),
            Value::Int(value) => Bson::Int32(*value),
            Value::Long(value) => Bson::Int64(*value),
            Value::Float(value) => Bson::Double(*value),
            Value::Decimal(value) => Bson::String(value.to_string()),
            Value::Boolean(value) => Bson::Boolean(*value),
            Value::DateTime(value) => Bson::DateTime(BsonDateTime::from_millis(value.timestamp_millis())),
            Value::Date(value) => Bson::DateTime(BsonDateTime::from_millis(
                value.and_time(chrono::NaiveTime::MIN).and_utc().timestamp_millis(),
            )),
            Value::ObjectId(value) => Bson::ObjectId(*value),
            Value::Embedded(document) => Bson::Document(document.to_wire(None)),
            Value::List(items) => Bson::Array(items.iter().map(Value::to_bson).collect()),
            Value::Raw(bson) => bson.clone(),
        }
    }

    /// Returns `true` for [`Value::Null`] and for a raw BSON null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Raw(Bson::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(i64::from(*value)),
            Value::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<&Decimal> {
        match self {
            Value::Decimal(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Value::Date(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Value::ObjectId(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&DocumentInstance> {
        match self {
            Value::Embedded(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut DocumentInstance> {
        match self {
            Value::Embedded(document) => Some(document),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::String(value) => f.write_str(value),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Int(value) => write!(f, "{value}"),
            Value::Long(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Decimal(value) => write!(f, "{value}"),
            Value::Boolean(value) => write!(f, "{value}"),
            Value::DateTime(value) => write!(f, "{}", value.to_rfc3339()),
            Value::Date(value) => write!(f, "{value}"),
            Value::ObjectId(value) => write!(f, "{}", value.to_hex()),
            Value::Embedded(document) => write!(f, "{}", document.to_wire(None)),
            Value::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Raw(bson) => write!(f, "{bson}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<DocumentInstance> for Value {
    fn from(value: DocumentInstance) -> Self {
        Value::Embedded(Box::new(value))
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        Value::from_bson(value)
    }
}

impl From<bson::Document> for Value {
    fn from(value: bson::Document) -> Self {
        Value::Raw(Bson::Document(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn nested_documents_stay_raw() {
        let value = Value::from_bson(Bson::Document(doc! { "p": "Shanghai" }));
        assert_eq!(value, Value::Raw(Bson::Document(doc! { "p": "Shanghai" })));
    }

    #[test]
    fn arrays_become_lists() {
        let value = Value::from_bson(Bson::Array(vec![Bson::Int32(1), Bson::Null]));
        assert_eq!(value, Value::List(vec![Value::Int(1), Value::Null]));
    }

    #[test]
    fn datetimes_keep_millisecond_precision() {
        let now = BsonDateTime::from_millis(1_700_000_000_123);
        let value = Value::from_bson(Bson::DateTime(now));

        assert_eq!(value.to_bson(), Bson::DateTime(now));
    }

    #[test]
    fn optional_values_map_none_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
