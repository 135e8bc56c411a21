//! Field descriptors.
//!
//! A [`Field`] describes one declared attribute of a schema: its kind, its storage name, and
//! the policies that apply to it (required, nullable, default, uniqueness, choices, custom
//! validation). Fields are built fluently and handed to a
//! [`SchemaBuilder`](crate::schema::SchemaBuilder), which assigns the logical name and owner.
//!
//! Each field kind knows how to:
//!
//! - coerce loosely typed input into its canonical in-memory [`Value`] ([`Field::to_internal`]),
//! - convert a canonical value into its wire form ([`Field::to_wire`]),
//! - check a value's type and range ([`Field::validate`]),
//! - normalize a value used inside a filter or update ([`Field::prepare_query_value`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use docmapper_core::field::{Field, Rounding};
//!
//! let name = Field::string().storage_name("n").required().max_length(50);
//! let price = Field::decimal().precision(2).rounding(Rounding::HalfUp).force_string();
//! let tags = Field::list(Field::string()).max_length(10);
//! ```

use bson::{Bson, DateTime as BsonDateTime, oid::ObjectId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};
use tracing::trace;

use crate::{
    document::DocumentInstance,
    error::{DocumentError, DocumentResult},
    schema::{Schema, SchemaKind},
    validation::ValidationError,
    value::Value,
};

static CREATION_COUNTER: AtomicI64 = AtomicI64::new(0);
static AUTO_CREATION_COUNTER: AtomicI64 = AtomicI64::new(-1);

/// The storage name reserved for document identities.
pub const ID_STORAGE_NAME: &str = "_id";

/// A zero-argument producer for default values.
pub type DefaultProducer = Arc<dyn Fn() -> Value + Send + Sync>;

/// A custom validator run after the kind check.
pub type FieldValidator = Arc<dyn Fn(&Value) -> Result<(), ValidationError> + Send + Sync>;

/// The default value of a field.
#[derive(Clone)]
pub enum DefaultValue {
    /// The same value for every instance.
    Static(Value),
    /// A producer called once per instance.
    Producer(DefaultProducer),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Producer(producer) => producer(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// Rounding modes for decimal quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    Ceiling,
    Down,
    Floor,
    HalfDown,
    HalfEven,
    #[default]
    HalfUp,
    Up,
    /// Toward zero, unless the last kept digit would be 0 or 5; then away from zero.
    ZeroFiveUp,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::Ceiling => RoundingStrategy::ToPositiveInfinity,
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::Floor => RoundingStrategy::ToNegativeInfinity,
            Rounding::HalfDown => RoundingStrategy::MidpointTowardZero,
            Rounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Rounding::Up => RoundingStrategy::AwayFromZero,
            Rounding::ZeroFiveUp => RoundingStrategy::ToZero,
        }
    }
}

/// Where an embedded-document field gets its schema from.
#[derive(Debug, Clone)]
pub enum EmbeddedTarget {
    /// A schema value, already built.
    Schema(Arc<Schema>),
    /// A class name, resolved through the registry when the owning schema is built.
    Named(String),
}

/// The kind of a field and its kind-specific options.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String {
        regex: Option<Regex>,
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    Int,
    Long,
    Float,
    Decimal {
        precision: u32,
        rounding: Rounding,
        force_string: bool,
    },
    Boolean,
    DateTime,
    Date,
    ObjectId,
    Embedded(EmbeddedTarget),
    List {
        item: Box<Field>,
        max_length: Option<usize>,
    },
}

impl FieldKind {
    /// The descriptor name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String { .. } => "StringField",
            FieldKind::Int => "IntField",
            FieldKind::Long => "LongField",
            FieldKind::Float => "FloatField",
            FieldKind::Decimal { .. } => "DecimalField",
            FieldKind::Boolean => "BooleanField",
            FieldKind::DateTime => "DateTimeField",
            FieldKind::Date => "DateField",
            FieldKind::ObjectId => "ObjectIdField",
            FieldKind::Embedded(_) => "EmbeddedDocumentField",
            FieldKind::List { .. } => "ListField",
        }
    }
}

/// A declared attribute of a schema.
#[derive(Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) storage_name: Option<String>,
    pub(crate) kind: FieldKind,
    pub(crate) required: bool,
    pub(crate) null: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) unique: bool,
    pub(crate) unique_with: Vec<String>,
    pub(crate) sparse: bool,
    pub(crate) primary_key: bool,
    pub(crate) choices: Option<Vec<Value>>,
    pub(crate) validator: Option<FieldValidator>,
    pub(crate) min_value: Option<Value>,
    pub(crate) max_value: Option<Value>,
    pub(crate) metadata: BTreeMap<String, Bson>,
    pub(crate) owner: Option<String>,
    pub(crate) creation_counter: i64,
    pub(crate) auto_generated: bool,
    pub(crate) definition_error: Option<String>,
}

impl Field {
    fn new(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            storage_name: None,
            kind,
            required: false,
            null: false,
            default: None,
            unique: false,
            unique_with: Vec::new(),
            sparse: false,
            primary_key: false,
            choices: None,
            validator: None,
            min_value: None,
            max_value: None,
            metadata: BTreeMap::new(),
            owner: None,
            creation_counter: CREATION_COUNTER.fetch_add(1, Ordering::Relaxed),
            auto_generated: false,
            definition_error: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String {
            regex: None,
            min_length: None,
            max_length: None,
        })
    }

    /// A 32-bit integer field.
    pub fn int() -> Self {
        Self::new(FieldKind::Int)
    }

    /// A 64-bit integer field. Always stored as `Int64`.
    pub fn long() -> Self {
        Self::new(FieldKind::Long)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    /// A fixed-point decimal field, quantized to two places with half-up rounding unless
    /// configured otherwise.
    pub fn decimal() -> Self {
        Self::new(FieldKind::Decimal {
            precision: 2,
            rounding: Rounding::HalfUp,
            force_string: false,
        })
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    /// A UTC timestamp field with millisecond precision.
    pub fn datetime() -> Self {
        Self::new(FieldKind::DateTime)
    }

    /// A calendar date field, stored as midnight UTC.
    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn object_id() -> Self {
        Self::new(FieldKind::ObjectId)
    }

    /// An embedded document field holding instances of `schema` (or its subclasses).
    pub fn embedded(schema: &Arc<Schema>) -> Self {
        Self::new(FieldKind::Embedded(EmbeddedTarget::Schema(schema.clone())))
    }

    /// An embedded document field whose schema is looked up by class name when the owning
    /// schema is built.
    pub fn embedded_named(class_name: impl Into<String>) -> Self {
        Self::new(FieldKind::Embedded(EmbeddedTarget::Named(class_name.into())))
    }

    /// An ordered list whose items are described by `item`. Defaults to an empty list.
    pub fn list(item: Field) -> Self {
        let mut field = Self::new(FieldKind::List {
            item: Box::new(item),
            max_length: None,
        });
        field.default = Some(DefaultValue::Producer(Arc::new(|| Value::List(Vec::new()))));
        field
    }

    /// The implicit identity field of top-level documents.
    pub(crate) fn implicit_id() -> Self {
        let mut field = Self::object_id().storage_name(ID_STORAGE_NAME);
        field.auto_generated = true;
        field.primary_key = true;
        field
    }

    /// Sets the name used in stored records. Fields stored under `_id` sort before every
    /// other field.
    pub fn storage_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name == ID_STORAGE_NAME && self.creation_counter >= 0 {
            self.creation_counter = AUTO_CREATION_COUNTER.fetch_sub(1, Ordering::Relaxed);
        }
        self.storage_name = Some(name);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allows explicit nulls to be kept (and stored) instead of being replaced by the default.
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Producer(Arc::new(producer)));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the combination of this field and `fields` unique.
    pub fn unique_with<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique = true;
        self.unique_with = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Stores this field as the document identity.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.required = true;
        self.storage_name(ID_STORAGE_NAME)
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn validation<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Lower bound for numeric fields.
    pub fn min_value(mut self, value: impl Into<Value>) -> Self {
        self.min_value = Some(value.into());
        self
    }

    /// Upper bound for numeric fields.
    pub fn max_value(mut self, value: impl Into<Value>) -> Self {
        self.max_value = Some(value.into());
        self
    }

    /// Minimum character count of a string field.
    pub fn min_length(mut self, length: usize) -> Self {
        if let FieldKind::String { min_length, .. } = &mut self.kind {
            *min_length = Some(length);
        }
        self
    }

    /// Maximum character count of a string field, or maximum item count of a list field.
    pub fn max_length(mut self, length: usize) -> Self {
        match &mut self.kind {
            FieldKind::String { max_length, .. } | FieldKind::List { max_length, .. } => {
                *max_length = Some(length);
            }
            _ => {}
        }
        self
    }

    /// Requires string values to match `pattern` from their start. An invalid pattern is
    /// reported when the owning schema is built.
    pub fn regex(mut self, pattern: &str) -> Self {
        if let FieldKind::String { regex, .. } = &mut self.kind {
            match Regex::new(pattern) {
                Ok(compiled) => *regex = Some(compiled),
                Err(e) => self.definition_error = Some(format!("invalid regex {pattern:?}: {e}")),
            }
        }
        self
    }

    /// Number of decimal places kept by a decimal field.
    pub fn precision(mut self, places: u32) -> Self {
        if let FieldKind::Decimal { precision, .. } = &mut self.kind {
            *precision = places;
        }
        self
    }

    pub fn rounding(mut self, mode: Rounding) -> Self {
        if let FieldKind::Decimal { rounding, .. } = &mut self.kind {
            *rounding = mode;
        }
        self
    }

    /// Stores decimal values as their quantized string instead of a double.
    pub fn force_string(mut self) -> Self {
        if let FieldKind::Decimal { force_string, .. } = &mut self.kind {
            *force_string = true;
        }
        self
    }

    /// The logical name, assigned by the schema builder.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key used in stored records.
    pub fn stored_as(&self) -> &str {
        self.storage_name.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_nullable(&self) -> bool {
        self.null
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn unique_with_fields(&self) -> &[String] {
        &self.unique_with
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Whether the value is produced by the store rather than supplied by callers.
    pub fn is_auto_generated(&self) -> bool {
        self.auto_generated
    }

    pub fn creation_counter(&self) -> i64 {
        self.creation_counter
    }

    /// The class name of the schema this field was declared on.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Bson> {
        self.metadata.get(key)
    }

    pub fn choices_list(&self) -> Option<&[Value]> {
        self.choices.as_deref()
    }

    pub fn default_value(&self) -> Option<Value> {
        self.default.as_ref().map(DefaultValue::resolve)
    }

    /// The schema held by an embedded-document field, once resolved.
    pub fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        match &self.kind {
            FieldKind::Embedded(EmbeddedTarget::Schema(schema)) => Some(schema),
            _ => None,
        }
    }

    /// The item descriptor of a list field.
    pub fn item_field(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::List { item, .. } => Some(item),
            _ => None,
        }
    }

    /// Whether the field holds other values (lists and embedded documents).
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, FieldKind::Embedded(_) | FieldKind::List { .. })
    }

    /// Coerces `value` into this field's canonical in-memory form.
    ///
    /// Never fails: input that cannot be coerced is returned unchanged so that
    /// [`validate`](Self::validate) can report it.
    pub fn to_internal(&self, value: Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        match &self.kind {
            FieldKind::String { .. } => match value {
                Value::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Value::String(text),
                    Err(e) => Value::Binary(e.into_bytes()),
                },
                other => other,
            },
            FieldKind::Int => match coerce_integer(&value) {
                Some(number) => i32::try_from(number).map(Value::Int).unwrap_or(Value::Long(number)),
                None => self.unchanged(value),
            },
            FieldKind::Long => match coerce_integer(&value) {
                Some(number) => Value::Long(number),
                None => self.unchanged(value),
            },
            FieldKind::Float => match coerce_float(&value) {
                Some(number) => Value::Float(number),
                None => self.unchanged(value),
            },
            FieldKind::Decimal {
                precision,
                rounding,
                ..
            } => match coerce_decimal(&value) {
                Some(number) => Value::Decimal(quantize(number, *precision, *rounding)),
                None => self.unchanged(value),
            },
            FieldKind::Boolean => match value {
                Value::Boolean(flag) => Value::Boolean(flag),
                Value::Int(number) => Value::Boolean(number != 0),
                Value::Long(number) => Value::Boolean(number != 0),
                Value::Float(number) => Value::Boolean(number != 0.0),
                Value::Decimal(number) => Value::Boolean(!number.is_zero()),
                Value::String(text) => Value::Boolean(!text.is_empty()),
                Value::List(items) => Value::Boolean(!items.is_empty()),
                other => self.unchanged(other),
            },
            FieldKind::DateTime => match coerce_datetime(&value) {
                Some(datetime) => Value::DateTime(truncate_to_millis(datetime)),
                None => self.unchanged(value),
            },
            FieldKind::Date => match coerce_datetime(&value) {
                Some(datetime) => Value::Date(datetime.date_naive()),
                None => self.unchanged(value),
            },
            FieldKind::ObjectId => match value {
                Value::String(text) => match ObjectId::parse_str(&text) {
                    Ok(oid) => Value::ObjectId(oid),
                    Err(_) => self.unchanged(Value::String(text)),
                },
                other => other,
            },
            FieldKind::Embedded(target) => match (target, value) {
                (EmbeddedTarget::Schema(schema), Value::Raw(Bson::Document(record))) => {
                    match DocumentInstance::from_wire_with(schema, record.clone(), true) {
                        Ok(document) => Value::Embedded(Box::new(document)),
                        Err(e) => {
                            trace!(field = %self.name, error = %e, "embedded document left raw");
                            Value::Raw(Bson::Document(record))
                        }
                    }
                }
                (_, other) => other,
            },
            FieldKind::List { item, .. } => match value {
                Value::List(items) => Value::List(items.into_iter().map(|v| item.to_internal(v)).collect()),
                other => other,
            },
        }
    }

    fn unchanged(&self, value: Value) -> Value {
        trace!(field = %self.name, kind = self.kind.type_name(), "value kept uncoerced");
        value
    }

    /// Converts a stored value into this field's canonical form.
    ///
    /// Unlike [`to_internal`](Self::to_internal), hydration of embedded documents is strict:
    /// a nested record that cannot be converted is an error.
    pub fn from_wire(&self, bson: Bson) -> DocumentResult<Value> {
        if matches!(bson, Bson::Null | Bson::Undefined) {
            return Ok(Value::Null);
        }

        match (&self.kind, bson) {
            (FieldKind::Embedded(EmbeddedTarget::Schema(schema)), Bson::Document(record)) => {
                DocumentInstance::from_wire(schema, record).map(|document| Value::Embedded(Box::new(document)))
            }
            (FieldKind::List { item, .. }, Bson::Array(items)) => items
                .into_iter()
                .map(|bson| item.from_wire(bson))
                .collect::<DocumentResult<Vec<_>>>()
                .map(Value::List),
            (_, bson) => Ok(self.to_internal(Value::from_bson(bson))),
        }
    }

    /// Converts a canonical value into its wire form.
    pub fn to_wire(&self, value: &Value) -> Bson {
        if value.is_null() {
            return Bson::Null;
        }

        match &self.kind {
            FieldKind::Int => match coerce_integer(value) {
                Some(number) => i32::try_from(number).map(Bson::Int32).unwrap_or(Bson::Int64(number)),
                None => value.to_bson(),
            },
            FieldKind::Long => match coerce_integer(value) {
                Some(number) => Bson::Int64(number),
                None => value.to_bson(),
            },
            FieldKind::Float => match coerce_float(value) {
                Some(number) => Bson::Double(number),
                None => value.to_bson(),
            },
            FieldKind::Decimal {
                precision,
                rounding,
                force_string,
            } => match coerce_decimal(value) {
                Some(number) => {
                    let number = quantize(number, *precision, *rounding);
                    if *force_string {
                        Bson::String(number.to_string())
                    } else {
                        number.to_f64().map(Bson::Double).unwrap_or_else(|| Bson::String(number.to_string()))
                    }
                }
                None => value.to_bson(),
            },
            FieldKind::DateTime => match coerce_datetime(value) {
                Some(datetime) => Bson::DateTime(BsonDateTime::from_millis(datetime.timestamp_millis())),
                None => value.to_bson(),
            },
            FieldKind::Date => match coerce_datetime(value) {
                Some(datetime) => Bson::DateTime(BsonDateTime::from_millis(
                    midnight(datetime.date_naive()).timestamp_millis(),
                )),
                None => value.to_bson(),
            },
            FieldKind::List { item, .. } => match value {
                Value::List(items) => Bson::Array(items.iter().map(|v| item.to_wire(v)).collect()),
                other => other.to_bson(),
            },
            _ => value.to_bson(),
        }
    }

    fn error(&self, message: impl Into<String>) -> ValidationError {
        ValidationError::for_field(message, self.name.clone())
    }

    /// Checks the type and range of a non-null value, then its choices and custom validator.
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.validate_within(value, None)
    }

    /// Validates `value` as part of the document identified by `owner_pk`. Embedded documents
    /// report that identity in their aggregate error.
    pub(crate) fn validate_within(&self, value: &Value, owner_pk: Option<&Bson>) -> Result<(), ValidationError> {
        self.validate_kind(value, owner_pk)?;

        if let Some(choices) = &self.choices {
            let candidate = self.to_internal(value.clone());
            if !choices.iter().any(|choice| self.to_internal(choice.clone()) == candidate) {
                let allowed = choices.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                return Err(self.error(format!("Value must be one of [{allowed}]")));
            }
        }

        if let Some(validator) = &self.validator {
            validator(value).map_err(|e| e.with_field_name(Some(self.name.clone())))?;
        }

        Ok(())
    }

    fn validate_kind(&self, value: &Value, owner_pk: Option<&Bson>) -> Result<(), ValidationError> {
        match &self.kind {
            FieldKind::String {
                regex,
                min_length,
                max_length,
            } => {
                let Value::String(text) = value else {
                    return Err(self.error("StringField only accepts string values"));
                };
                let length = text.chars().count();
                if max_length.is_some_and(|max| length > max) {
                    return Err(self.error("String value is too long"));
                }
                if min_length.is_some_and(|min| length < min) {
                    return Err(self.error("String value is too short"));
                }
                if let Some(regex) = regex {
                    if !regex.find(text).is_some_and(|m| m.start() == 0) {
                        return Err(self.error("String value did not match validation regex"));
                    }
                }
                Ok(())
            }
            FieldKind::Int => {
                let number = coerce_integer(value)
                    .ok_or_else(|| self.error(format!("{value} could not be converted to int")))?;
                if i32::try_from(number).is_err() {
                    return Err(self.error(if number < 0 {
                        "Integer value is too small"
                    } else {
                        "Integer value is too large"
                    }));
                }
                self.check_range(number, coerce_integer, "Integer")
            }
            FieldKind::Long => {
                let number = coerce_integer(value)
                    .ok_or_else(|| self.error(format!("{value} could not be converted to long")))?;
                self.check_range(number, coerce_integer, "Long")
            }
            FieldKind::Float => {
                let number = match value {
                    Value::Float(number) => *number,
                    Value::Int(number) => f64::from(*number),
                    Value::Long(number) => *number as f64,
                    _ => return Err(self.error("FloatField only accepts float and integer values")),
                };
                self.check_range(number, coerce_float, "Float")
            }
            FieldKind::Decimal {
                precision,
                rounding,
                ..
            } => {
                let number = coerce_decimal(value)
                    .ok_or_else(|| self.error(format!("Could not convert value to decimal: {value}")))?;
                let number = quantize(number, *precision, *rounding);
                self.check_range(number, coerce_decimal, "Decimal")
            }
            FieldKind::Boolean => match value {
                Value::Boolean(_) => Ok(()),
                _ => Err(self.error("BooleanField only accepts boolean values")),
            },
            FieldKind::DateTime | FieldKind::Date => match coerce_datetime(value) {
                Some(_) => Ok(()),
                None => Err(self.error(format!("cannot parse date \"{value}\""))),
            },
            FieldKind::ObjectId => match value {
                Value::ObjectId(_) => Ok(()),
                Value::String(text) if ObjectId::parse_str(text).is_ok() => Ok(()),
                _ => Err(self.error(format!("Invalid ObjectId {value}"))),
            },
            FieldKind::Embedded(target) => {
                let EmbeddedTarget::Schema(schema) = target else {
                    return Err(self.error("Embedded document type has not been resolved"));
                };
                let Value::Embedded(document) = value else {
                    return Err(self.error(format!(
                        "Invalid embedded document instance provided to an EmbeddedDocumentField ({})",
                        schema.class_name()
                    )));
                };
                if !document.schema().is_subclass_of(schema) {
                    return Err(self.error(format!(
                        "Invalid embedded document instance provided to an EmbeddedDocumentField ({})",
                        schema.class_name()
                    )));
                }
                crate::validation::validate_embedded(document, owner_pk)
                    .map_err(|e| e.with_field_name(Some(self.name.clone())))
            }
            FieldKind::List { item, max_length } => {
                let Value::List(items) = value else {
                    return Err(self.error("Only lists may be used in a list field"));
                };

                let mut first_invalid = None;
                let mut errors = Vec::new();
                for (index, v) in items.iter().enumerate() {
                    if let Err(e) = item.validate_within(v, owner_pk) {
                        first_invalid.get_or_insert(v);
                        errors.push((index.to_string(), e));
                    }
                }
                if let Some(invalid) = first_invalid {
                    return Err(self
                        .error(format!("Invalid {} item ({invalid})", item.kind.type_name()))
                        .with_errors(errors));
                }

                if max_length.is_some_and(|max| items.len() > max) {
                    return Err(self.error("List is too long"));
                }
                if self.required && items.is_empty() {
                    return Err(self.error("Field is required and cannot be empty"));
                }
                Ok(())
            }
        }
    }

    fn check_range<T, F>(&self, number: T, coerce: F, label: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd,
        F: Fn(&Value) -> Option<T>,
    {
        if self.min_value.as_ref().and_then(&coerce).is_some_and(|min| number < min) {
            return Err(self.error(format!("{label} value is too small")));
        }
        if self.max_value.as_ref().and_then(&coerce).is_some_and(|max| number > max) {
            return Err(self.error(format!("{label} value is too large")));
        }
        Ok(())
    }

    /// Normalizes a value used in a filter or update against this field.
    ///
    /// `op` is the store operator the value is used with (`"$eq"`, `"$in"`, `"$set"`, ...).
    pub fn prepare_query_value(&self, op: &str, value: &Value) -> DocumentResult<Bson> {
        if value.is_null() {
            return Ok(Bson::Null);
        }

        match (op, value) {
            ("$in" | "$nin" | "$all", Value::List(items)) => {
                let target = self.item_field().unwrap_or(self);
                return items
                    .iter()
                    .map(|item| target.prepare_query_value("$eq", item))
                    .collect::<DocumentResult<Vec<_>>>()
                    .map(Bson::Array);
            }
            ("$exists", _) => return Ok(value.to_bson()),
            _ => {}
        }

        match &self.kind {
            FieldKind::List { item, .. } => match value {
                Value::List(_) => Ok(self.to_wire(&self.to_internal(value.clone()))),
                scalar => item.prepare_query_value(op, scalar),
            },
            FieldKind::Embedded(target) => {
                let invalid = || {
                    let class_name = match target {
                        EmbeddedTarget::Schema(schema) => schema.class_name().to_string(),
                        EmbeddedTarget::Named(name) => name.clone(),
                    };
                    DocumentError::InvalidQuery(format!(
                        "Querying the embedded document '{class_name}' failed, due to an invalid query value"
                    ))
                };
                match (target, value) {
                    (_, Value::Embedded(document)) => Ok(Bson::Document(document.to_wire(None))),
                    (EmbeddedTarget::Schema(schema), Value::Raw(Bson::Document(record))) => {
                        DocumentInstance::from_wire_with(schema, record.clone(), true)
                            .map(|document| Bson::Document(document.to_wire(None)))
                            .map_err(|_| invalid())
                    }
                    _ => Err(invalid()),
                }
            }
            _ => Ok(self.to_wire(&self.to_internal(value.clone()))),
        }
    }

    /// Resolves embedded targets referenced by name and assigns names and owner. Called by the
    /// schema builder.
    pub(crate) fn bind(
        &mut self,
        name: &str,
        owner: &str,
        resolve: &dyn Fn(&str) -> DocumentResult<Arc<Schema>>,
    ) -> DocumentResult<()> {
        self.name = name.to_string();
        self.owner = Some(owner.to_string());

        if let Some(message) = &self.definition_error {
            return Err(DocumentError::InvalidSchema(format!("{owner}.{name}: {message}")));
        }

        let storage_name = self.stored_as().to_string();
        if storage_name.contains('.') || storage_name.contains('\0') || storage_name.starts_with('$') {
            return Err(DocumentError::InvalidSchema(format!(
                "{owner}.{name}: field names cannot contain dots (\".\") or null characters (\"\\0\"), \
                 and they must not start with a dollar sign (\"$\")"
            )));
        }

        match &mut self.kind {
            FieldKind::Embedded(target) => {
                let schema = match target {
                    EmbeddedTarget::Schema(schema) => schema.clone(),
                    EmbeddedTarget::Named(class_name) => resolve(class_name).map_err(|_| {
                        DocumentError::InvalidSchema(format!(
                            "{owner}.{name}: unknown embedded document type `{class_name}`"
                        ))
                    })?,
                };
                if schema.kind() != SchemaKind::Embedded {
                    return Err(DocumentError::InvalidSchema(format!(
                        "{owner}.{name}: invalid embedded document class `{}` provided to an EmbeddedDocumentField",
                        schema.class_name()
                    )));
                }
                *target = EmbeddedTarget::Schema(schema);
            }
            FieldKind::List { item, .. } => item.bind(name, owner, resolve)?,
            _ => {}
        }

        Ok(())
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("storage_name", &self.stored_as())
            .field("kind", &self.kind.type_name())
            .field("required", &self.required)
            .field("null", &self.null)
            .field("default", &self.default)
            .field("unique", &self.unique)
            .field("owner", &self.owner)
            .field("creation_counter", &self.creation_counter)
            .finish_non_exhaustive()
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(number) => Some(i64::from(*number)),
        Value::Long(number) => Some(*number),
        Value::Float(number) => number.trunc().to_i64(),
        Value::Decimal(number) => number.trunc().to_i64(),
        Value::Boolean(flag) => Some(i64::from(*flag)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(number) => Some(*number),
        Value::Int(number) => Some(f64::from(*number)),
        Value::Long(number) => Some(*number as f64),
        Value::Decimal(number) => number.to_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(number) => Some(*number),
        Value::Int(number) => Some(Decimal::from(*number)),
        Value::Long(number) => Some(Decimal::from(*number)),
        Value::Float(number) => Decimal::from_f64_retain(*number),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTime(datetime) => Some(*datetime),
        Value::Date(date) => Some(midnight(*date)),
        Value::String(text) => parse_datetime(text),
        Value::Raw(Bson::DateTime(datetime)) => DateTime::from_timestamp_millis(datetime.timestamp_millis()),
        _ => None,
    }
}

/// Rounds `number` to `precision` places with `rounding`, padding with zeros as needed.
pub fn quantize(number: Decimal, precision: u32, rounding: Rounding) -> Decimal {
    let mut quantized = number.round_dp_with_strategy(precision, rounding.strategy());
    quantized.rescale(precision);
    if rounding == Rounding::ZeroFiveUp && quantized != number && matches!(quantized.mantissa().abs() % 10, 0 | 5) {
        quantized = number.round_dp_with_strategy(precision, RoundingStrategy::AwayFromZero);
        quantized.rescale(precision);
    }
    quantized
}

/// Parses a timestamp, falling back through RFC 3339, full timestamps, minute-precision
/// timestamps and plain dates.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.with_timezone(&Utc));
    }

    const TIMESTAMP_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    if let Some(datetime) = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Some(datetime.and_utc());
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(midnight)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn truncate_to_millis(datetime: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(datetime.timestamp_millis()).unwrap_or(datetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn named(mut field: Field, name: &str) -> Field {
        field.name = name.to_string();
        field
    }

    fn dec(text: &str) -> Decimal {
        Decimal::from_str(text).unwrap()
    }

    #[test]
    fn creation_counters_increase() {
        let first = Field::string();
        let second = Field::int();
        assert!(first.creation_counter() < second.creation_counter());
    }

    #[test]
    fn identity_fields_sort_first() {
        let plain = Field::string();
        let id = Field::string().storage_name("_id");
        assert!(id.creation_counter() < 0);
        assert!(id.creation_counter() < plain.creation_counter());
    }

    #[test]
    fn decimal_quantizes_with_half_up() {
        let field = Field::decimal();
        assert_eq!(field.to_internal(Value::Decimal(dec("5.215"))), Value::Decimal(dec("5.22")));
        assert_eq!(field.to_internal(Value::from("5.2")).to_string(), "5.20");
        assert_eq!(field.to_internal(Value::Int(3)).to_string(), "3.00");
    }

    #[test]
    fn decimal_rounding_modes() {
        let field = Field::decimal().rounding(Rounding::HalfEven);
        assert_eq!(field.to_internal(Value::Decimal(dec("5.225"))), Value::Decimal(dec("5.22")));

        let field = Field::decimal().precision(0).rounding(Rounding::Floor);
        assert_eq!(field.to_internal(Value::Decimal(dec("-1.5"))), Value::Decimal(dec("-2")));

        let field = Field::decimal().rounding(Rounding::ZeroFiveUp);
        assert_eq!(field.to_internal(Value::Decimal(dec("5.219"))).to_string(), "5.21");
        assert_eq!(field.to_internal(Value::Decimal(dec("5.201"))).to_string(), "5.21");
        assert_eq!(field.to_internal(Value::Decimal(dec("5.251"))).to_string(), "5.26");
        assert_eq!(field.to_internal(Value::Decimal(dec("-5.201"))).to_string(), "-5.21");
        assert_eq!(field.to_internal(Value::Decimal(dec("5.2"))).to_string(), "5.20");
    }

    #[test]
    fn decimal_wire_form() {
        let field = Field::decimal();
        let Bson::Double(stored) = field.to_wire(&Value::Decimal(dec("5.215"))) else {
            panic!("expected a double");
        };
        assert!((stored - 5.22).abs() < 1e-9);

        let field = Field::decimal().force_string();
        assert_eq!(field.to_wire(&Value::Decimal(dec("5.2"))), Bson::String("5.20".into()));
    }

    #[test]
    fn decimal_validation_converts_strings() {
        let field = named(Field::decimal().min_value(dec("1")), "price");
        assert!(field.validate(&Value::from("12.5")).is_ok());

        let error = field.validate(&Value::from("cheap")).unwrap_err();
        assert_eq!(error.message(), "Could not convert value to decimal: cheap");

        let error = field.validate(&Value::from("0.5")).unwrap_err();
        assert_eq!(error.message(), "Decimal value is too small");
    }

    #[test]
    fn int_rejects_non_numeric_strings() {
        let field = named(Field::int(), "age");
        assert_eq!(field.to_internal(Value::from("42")), Value::Int(42));
        assert_eq!(field.to_internal(Value::from("abc")), Value::from("abc"));

        let error = field.validate(&Value::from("abc")).unwrap_err();
        assert_eq!(error.message(), "abc could not be converted to int");
        assert_eq!(error.field_name(), Some("age"));
    }

    #[test]
    fn int_enforces_range() {
        let field = Field::int().min_value(0).max_value(150);
        assert!(field.validate(&Value::Int(30)).is_ok());
        assert_eq!(field.validate(&Value::Int(-1)).unwrap_err().message(), "Integer value is too small");
        assert_eq!(field.validate(&Value::Int(151)).unwrap_err().message(), "Integer value is too large");
        assert_eq!(
            Field::int().validate(&Value::Long(i64::MAX)).unwrap_err().message(),
            "Integer value is too large"
        );
    }

    #[test]
    fn long_is_stored_as_int64() {
        let field = Field::long();
        assert_eq!(field.to_wire(&Value::Int(7)), Bson::Int64(7));
        assert_eq!(field.to_internal(Value::Float(7.9)), Value::Long(7));
    }

    #[test]
    fn floats_outside_the_integer_range_stay_invalid() {
        let field = named(Field::long(), "views");
        let coerced = field.to_internal(Value::Float(1e30));
        assert_eq!(coerced, Value::Float(1e30));
        assert!(field.validate(&coerced).unwrap_err().message().ends_with("could not be converted to long"));

        assert_eq!(field.to_internal(Value::Float(f64::NAN)).as_f64().map(f64::is_nan), Some(true));
        assert_eq!(field.to_internal(Value::Float(-9.0e18)), Value::Long(-9_000_000_000_000_000_000));
        assert!(named(Field::int(), "age").validate(&Value::Float(-1e19)).is_err());
    }

    #[test]
    fn float_accepts_integers() {
        let field = Field::float();
        assert!(field.validate(&Value::Int(3)).is_ok());
        assert_eq!(
            field.validate(&Value::from("x")).unwrap_err().message(),
            "FloatField only accepts float and integer values"
        );
    }

    #[test]
    fn boolean_coercion_is_truthiness() {
        let field = Field::boolean();
        assert_eq!(field.to_internal(Value::Int(0)), Value::Boolean(false));
        assert_eq!(field.to_internal(Value::from("yes")), Value::Boolean(true));
        assert_eq!(
            field.validate(&Value::Int(1)).unwrap_err().message(),
            "BooleanField only accepts boolean values"
        );
    }

    #[test]
    fn datetime_parsing_falls_back_through_formats() {
        let expected = Utc.with_ymd_and_hms(2020, 5, 17, 13, 45, 0).unwrap();
        assert_eq!(parse_datetime("2020-05-17T13:45:00Z"), Some(expected));
        assert_eq!(parse_datetime("2020-05-17 13:45:00"), Some(expected));
        assert_eq!(parse_datetime("2020-05-17 13:45"), Some(expected));
        assert_eq!(
            parse_datetime("2020-05-17"),
            Some(Utc.with_ymd_and_hms(2020, 5, 17, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn datetime_truncates_to_millis() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let Value::DateTime(stored) = Field::datetime().to_internal(Value::DateTime(precise)) else {
            panic!("expected a datetime");
        };
        assert_eq!(stored.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn date_drops_time_and_stores_midnight() {
        let field = Field::date();
        let value = field.to_internal(Value::from("2021-03-04 10:11:12"));
        assert_eq!(value, Value::Date(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()));

        let wire = field.to_wire(&value);
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 0, 0, 0).unwrap();
        assert_eq!(wire, Bson::DateTime(BsonDateTime::from_millis(expected.timestamp_millis())));

        let error = named(field, "born").validate(&Value::from("soon")).unwrap_err();
        assert_eq!(error.message(), "cannot parse date \"soon\"");
    }

    #[test]
    fn string_constraints() {
        let field = named(Field::string().min_length(2).max_length(4).regex("[a-z]+"), "code");
        assert!(field.validate(&Value::from("abc")).is_ok());
        assert_eq!(field.validate(&Value::from("a")).unwrap_err().message(), "String value is too short");
        assert_eq!(field.validate(&Value::from("abcde")).unwrap_err().message(), "String value is too long");
        assert_eq!(
            field.validate(&Value::from("1abc")).unwrap_err().message(),
            "String value did not match validation regex"
        );
        assert_eq!(
            field.validate(&Value::Int(1)).unwrap_err().message(),
            "StringField only accepts string values"
        );
    }

    #[test]
    fn invalid_regex_is_a_definition_error() {
        let field = Field::string().regex("(");
        assert!(field.definition_error.is_some());
    }

    #[test]
    fn list_errors_are_keyed_by_index() {
        let field = named(Field::list(named(Field::int(), "scores")), "scores");
        let error = field
            .validate(&Value::List(vec![Value::Int(1), Value::from("x"), Value::from("y")]))
            .unwrap_err();

        assert_eq!(error.message(), "Invalid IntField item (x)");
        assert_eq!(
            error.errors().iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>(),
            vec!["1", "2"]
        );
    }

    #[test]
    fn required_list_cannot_be_empty() {
        let field = named(Field::list(Field::string()).required(), "tags");
        assert_eq!(field.default_value(), Some(Value::List(Vec::new())));
        assert_eq!(
            field.validate(&Value::List(Vec::new())).unwrap_err().message(),
            "Field is required and cannot be empty"
        );
    }

    #[test]
    fn list_max_length() {
        let field = Field::list(Field::int()).max_length(1);
        assert_eq!(
            field.validate(&Value::from(vec![1, 2])).unwrap_err().message(),
            "List is too long"
        );
    }

    #[test]
    fn choices_and_custom_validators_run_after_kind_check() {
        let field = named(Field::string().choices(["S", "M", "L"]), "size");
        assert!(field.validate(&Value::from("M")).is_ok());
        assert_eq!(
            field.validate(&Value::from("XL")).unwrap_err().message(),
            "Value must be one of [S, M, L]"
        );

        let field = named(
            Field::int().validation(|value| match value.as_i64() {
                Some(n) if n % 2 == 0 => Ok(()),
                _ => Err(ValidationError::new("must be even")),
            }),
            "even",
        );
        assert!(field.validate(&Value::Int(4)).is_ok());
        let error = field.validate(&Value::Int(3)).unwrap_err();
        assert_eq!(error.message(), "must be even");
        assert_eq!(error.field_name(), Some("even"));
    }

    #[test]
    fn query_values_are_canonicalized() {
        let field = Field::long();
        assert_eq!(field.prepare_query_value("$gt", &Value::Int(3)).unwrap(), Bson::Int64(3));
        assert_eq!(
            field.prepare_query_value("$in", &Value::from(vec![1, 2])).unwrap(),
            Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)])
        );

        let tags = Field::list(Field::decimal().force_string());
        assert_eq!(
            tags.prepare_query_value("$eq", &Value::from("1.5")).unwrap(),
            Bson::String("1.50".into())
        );
    }

    #[test]
    fn object_ids_parse_from_hex() {
        let oid = ObjectId::new();
        assert_eq!(Field::object_id().to_internal(Value::from(oid.to_hex())), Value::ObjectId(oid));
        assert!(Field::object_id().validate(&Value::from("nope")).is_err());
    }
}
