//! Document instances and their wire (de)serialization.
//!
//! A [`DocumentInstance`] holds the values of one document of a given [`Schema`]. Values are
//! stored per logical field name in one of three states (see [`Slot`]): absent, explicitly
//! null, or present. Dynamic schemas additionally keep undeclared data as opaque BSON.
//!
//! Instances are created either directly from named values ([`DocumentInstance::new`]) or by
//! hydrating a stored record ([`DocumentInstance::from_wire`]), and serialized back with
//! [`DocumentInstance::to_wire`].
//!
//! # Example
//!
//! ```rust,ignore
//! use docmapper_core::document::DocumentInstance;
//!
//! let mut user = DocumentInstance::new(&user_schema, [("name", "ada"), ("age", "36")])?;
//! assert_eq!(user.get("age")?, Some(&Value::Int(36)));
//!
//! user.set("age", 37)?;
//! let record = user.to_wire(None);
//! assert_eq!(record.get_i32("a")?, 37);
//! ```

use bson::{Bson, Document};
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::warn;

use crate::{
    error::{DocumentError, DocumentResult},
    field::{Field, ID_STORAGE_NAME},
    registry,
    schema::Schema,
    validation,
    value::Value,
};

/// The discriminator key of stored records.
pub const CLASS_KEY: &str = "_cls";

/// The key holding a text-search score on query results.
pub const TEXT_SCORE_KEY: &str = "_text_score";

/// The state of one declared field on an instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot<'a> {
    /// No value has been set and the field has no default.
    Absent,
    /// The field is explicitly null.
    Null,
    /// The field holds a value.
    Present(&'a Value),
}

impl<'a> Slot<'a> {
    pub fn value(self) -> Option<&'a Value> {
        match self {
            Slot::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Slot::Absent)
    }
}

/// One document of a given schema.
#[derive(Clone)]
pub struct DocumentInstance {
    schema: Arc<Schema>,
    data: HashMap<String, Value>,
    extras: Document,
    class_name: String,
    text_score: Option<f64>,
    created: bool,
    loaded_paths: Option<Vec<String>>,
}

impl DocumentInstance {
    /// Creates a new instance from named values.
    ///
    /// Names may be logical or storage names, or one of the reserved names `id`/`pk`
    /// (identity), `_cls` (discriminator) and `_text_score`. Values are coerced through
    /// their field's [`to_internal`](Field::to_internal).
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::FieldDoesNotExist`] naming every unknown name when the schema
    /// is not dynamic.
    pub fn new<I, K, V>(schema: &Arc<Schema>, values: I) -> DocumentResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::construct(schema, values, true, true)
    }

    /// Creates an instance with every field at its default (or null) state.
    pub fn empty(schema: &Arc<Schema>) -> Self {
        Self::blank(schema, true)
    }

    fn blank(schema: &Arc<Schema>, created: bool) -> Self {
        let data = schema
            .fields()
            .iter()
            .filter_map(|field| match field.default_value() {
                Some(default) => Some((field.name().to_string(), field.to_internal(default))),
                None if field.is_nullable() => Some((field.name().to_string(), Value::Null)),
                None => None,
            })
            .collect();

        Self {
            schema: schema.clone(),
            data,
            extras: Document::new(),
            class_name: schema.class_name().to_string(),
            text_score: None,
            created,
            loaded_paths: None,
        }
    }

    fn construct(
        schema: &Arc<Schema>,
        values: Vec<(String, Value)>,
        auto_convert: bool,
        created: bool,
    ) -> DocumentResult<Self> {
        if !schema.is_dynamic() {
            let undefined = values
                .iter()
                .map(|(key, _)| key)
                .filter(|key| !is_reserved(key) && schema.lookup_field(key).is_none())
                .cloned()
                .collect::<Vec<_>>();
            if !undefined.is_empty() {
                return Err(DocumentError::FieldDoesNotExist {
                    fields: undefined,
                    class_name: schema.class_name().to_string(),
                });
            }
        }

        let mut document = Self::blank(schema, created);
        for (key, value) in values {
            match key.as_str() {
                CLASS_KEY => {
                    if let Value::String(class_name) = value {
                        document.class_name = class_name;
                    }
                }
                TEXT_SCORE_KEY => {
                    document.text_score = match value {
                        Value::Float(score) => Some(score),
                        Value::Int(score) => Some(f64::from(score)),
                        Value::Long(score) => Some(score as f64),
                        _ => None,
                    };
                }
                _ => {
                    match find_field(schema, &key) {
                        Some(field) => {
                            let value = if auto_convert { field.to_internal(value) } else { value };
                            document.store(field, value);
                        }
                        None if is_reserved(&key) => {}
                        None => {
                            document.extras.insert(key, value.to_bson());
                        }
                    }
                }
            }
        }

        Ok(document)
    }

    /// Writes `value` into the field's slot, applying the null/default policy: a null on a
    /// field that is not nullable falls back to the field's default.
    fn store(&mut self, field: &Field, value: Value) {
        let value = match value {
            value if !value.is_null() => value,
            _ if field.is_nullable() => Value::Null,
            _ => field
                .default_value()
                .map(|default| field.to_internal(default))
                .unwrap_or(Value::Null),
        };
        self.data.insert(field.name().to_string(), value);
    }

    /// Hydrates a stored record.
    ///
    /// The concrete schema is resolved from the record's `_cls` discriminator, falling back to
    /// `schema`. Storage names are mapped back to logical names and every value is converted
    /// through its field. The instance is marked as previously persisted.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::NotRegistered`] if the discriminator names an unknown class.
    /// - [`DocumentError::InvalidData`] listing every field whose value could not be converted.
    /// - [`DocumentError::FieldDoesNotExist`] for undeclared keys on a strict, non-dynamic schema.
    pub fn from_wire(schema: &Arc<Schema>, record: Document) -> DocumentResult<Self> {
        Self::from_wire_with(schema, record, false)
    }

    /// Hydrates a stored record, recording whether the result counts as newly created.
    pub fn from_wire_with(schema: &Arc<Schema>, mut record: Document, created: bool) -> DocumentResult<Self> {
        let schema = match record.get(CLASS_KEY) {
            Some(Bson::String(class_name)) if class_name != schema.class_name() => registry::get_document(class_name)?,
            _ => schema.clone(),
        };

        let mut values = Vec::with_capacity(record.len());
        let mut errors = Vec::new();
        for field in schema.fields() {
            let Some(raw) = record.remove(field.stored_as()) else {
                continue;
            };
            match field.from_wire(raw) {
                Ok(value) => values.push((field.name().to_string(), value)),
                Err(e) => errors.push((field.name().to_string(), e.to_string())),
            }
        }

        if !errors.is_empty() {
            warn!(class_name = %schema.class_name(), failed = errors.len(), "could not hydrate stored record");
            return Err(DocumentError::InvalidData {
                class_name: schema.class_name().to_string(),
                errors,
            });
        }

        for (key, raw) in record {
            match key.as_str() {
                CLASS_KEY | TEXT_SCORE_KEY => values.push((key, Value::from_bson(raw))),
                ID_STORAGE_NAME if schema.id_field().is_none() => {}
                _ if schema.is_dynamic() => values.push((key, Value::Raw(raw))),
                _ if !schema.is_strict() => {}
                _ => values.push((key, Value::Raw(raw))),
            }
        }

        Self::construct(&schema, values, false, created)
    }

    /// Serializes the instance into a wire record.
    ///
    /// The record starts with `_id` and `_cls`, followed by every declared field in schema
    /// order under its storage name; unset fields are written as explicit nulls. When `fields`
    /// is given only the root names of those (possibly dotted) paths are kept. `_id` is omitted
    /// when the instance has no identity yet.
    pub fn to_wire(&self, fields: Option<&[&str]>) -> Document {
        let roots = fields
            .unwrap_or_default()
            .iter()
            .map(|path| path.split('.').next().unwrap_or(path))
            .collect::<Vec<_>>();

        let mut record = Document::new();
        record.insert(ID_STORAGE_NAME, Bson::Null);
        record.insert(CLASS_KEY, self.class_name.clone());

        for field in self.schema.fields() {
            if !roots.is_empty() && !roots.contains(&field.name()) {
                continue;
            }
            let value = match self.data.get(field.name()) {
                Some(value) => field.to_wire(value),
                None => Bson::Null,
            };
            record.insert(field.stored_as(), value);
        }

        if matches!(record.get(ID_STORAGE_NAME), Some(Bson::Null)) {
            match self.pk_bson() {
                Some(pk) => {
                    record.insert(ID_STORAGE_NAME, pk);
                }
                None => {
                    record.remove(ID_STORAGE_NAME);
                }
            }
        }

        if roots.is_empty() {
            for (key, value) in &self.extras {
                record.insert(key.clone(), value.clone());
            }
        }

        record
    }

    /// Renders the instance as relaxed extended JSON.
    pub fn to_json(&self) -> DocumentResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_wire(None))?)
    }

    /// Creates a new instance from extended JSON produced by [`to_json`](Self::to_json).
    pub fn from_json(schema: &Arc<Schema>, json: serde_json::Value) -> DocumentResult<Self> {
        let record: Document = serde_json::from_value(json)?;
        Self::from_wire_with(schema, record, true)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The discriminator: the concrete class name of this instance.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `true` for instances that have not been loaded from or saved to a store.
    pub fn is_created(&self) -> bool {
        self.created
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.created = false;
    }

    /// The storage paths loaded by a projected query, or `None` when the whole record was
    /// loaded.
    pub fn loaded_paths(&self) -> Option<&[String]> {
        self.loaded_paths.as_deref()
    }

    /// `true` for instances loaded with a projection.
    pub fn is_partial(&self) -> bool {
        self.loaded_paths.is_some()
    }

    pub(crate) fn restrict_to(&mut self, paths: Vec<String>) {
        self.loaded_paths = Some(paths);
    }

    /// `true` unless the instance is partial and no loaded path starts at `field`.
    pub(crate) fn is_loaded(&self, field: &Field) -> bool {
        self.loaded_paths.as_ref().is_none_or(|paths| {
            paths
                .iter()
                .any(|path| path.split('.').next() == Some(field.stored_as()))
        })
    }

    pub fn text_score(&self) -> Option<f64> {
        self.text_score
    }

    fn declared(&self, name: &str) -> DocumentResult<&Field> {
        find_field(&self.schema, name).ok_or_else(|| DocumentError::KeyNotFound(name.to_string()))
    }

    /// The state of a declared field.
    pub fn slot(&self, name: &str) -> DocumentResult<Slot<'_>> {
        let field = self.declared(name)?;
        Ok(match self.data.get(field.name()) {
            None => Slot::Absent,
            Some(value) if value.is_null() => Slot::Null,
            Some(value) => Slot::Present(value),
        })
    }

    /// The value of a declared field, or `None` when it is absent or null.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::KeyNotFound`] for names that are not declared fields, even on
    /// dynamic schemas. Undeclared data is read with [`extra`](Self::extra).
    pub fn get(&self, name: &str) -> DocumentResult<Option<&Value>> {
        self.slot(name).map(Slot::value)
    }

    /// `true` only if `name` is a declared field holding a non-null value.
    pub fn contains(&self, name: &str) -> bool {
        self.slot(name).is_ok_and(|slot| slot.value().is_some())
    }

    /// Sets a field, coercing the value and applying the null/default policy.
    ///
    /// On dynamic schemas undeclared names are stored as extra data.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::KeyNotFound`] for undeclared names on other schemas.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> DocumentResult<()> {
        let value = value.into();
        let schema = self.schema.clone();
        match find_field(&schema, name) {
            Some(field) => {
                let value = field.to_internal(value);
                self.store(field, value);
                Ok(())
            }
            None if schema.is_dynamic() => {
                self.extras.insert(name, value.to_bson());
                Ok(())
            }
            None => Err(DocumentError::KeyNotFound(name.to_string())),
        }
    }

    /// Returns a declared field to the absent state.
    pub fn unset(&mut self, name: &str) -> DocumentResult<()> {
        let field_name = self.declared(name)?.name().to_string();
        self.data.remove(&field_name);
        Ok(())
    }

    /// Undeclared data kept by a dynamic schema.
    pub fn extra(&self, name: &str) -> Option<&Bson> {
        self.extras.get(name)
    }

    pub fn extras(&self) -> &Document {
        &self.extras
    }

    /// The raw slot content, including explicit nulls.
    pub(crate) fn raw(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Number of declared fields that are not absent.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Declared field names in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.schema.field_names()
    }

    /// Every declared field with its state, in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Slot<'_>)> {
        self.schema.fields().iter().map(|field| {
            let slot = match self.data.get(field.name()) {
                None => Slot::Absent,
                Some(value) if value.is_null() => Slot::Null,
                Some(value) => Slot::Present(value),
            };
            (field.name(), slot)
        })
    }

    /// The identity value, if set.
    pub fn pk(&self) -> Option<&Value> {
        let field = self.schema.id_field()?;
        self.data.get(field.name()).filter(|value| !value.is_null())
    }

    pub(crate) fn pk_bson(&self) -> Option<Bson> {
        let field = self.schema.id_field()?;
        self.pk().map(|value| field.to_wire(value))
    }

    /// Sets the identity value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::KeyNotFound`] if the schema has no identity field.
    pub fn set_pk(&mut self, value: impl Into<Value>) -> DocumentResult<()> {
        let schema = self.schema.clone();
        let field = schema
            .id_field()
            .ok_or_else(|| DocumentError::KeyNotFound("pk".to_string()))?;
        let value = field.to_internal(value.into());
        self.store(field, value);
        Ok(())
    }

    /// Validates the instance, running the schema's clean hook first.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Validation`] holding every field error.
    pub fn validate(&self) -> DocumentResult<()> {
        self.validate_with(true)
    }

    /// Validates the instance, optionally skipping the clean hook.
    pub fn validate_with(&self, clean: bool) -> DocumentResult<()> {
        validation::validate_document(self, clean).map_err(DocumentError::from)
    }
}

/// Resolves a logical name, storage name, `pk` or `id` to a declared field.
fn find_field<'s>(schema: &'s Schema, name: &str) -> Option<&'s Field> {
    schema
        .lookup_field(name)
        .or_else(|| if name == "id" { schema.id_field() } else { None })
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "id" | "pk" | CLASS_KEY | TEXT_SCORE_KEY)
}

impl PartialEq for DocumentInstance {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
            && self.extras == other.extras
            && self.schema.fields().iter().all(|field| {
                let mine = self.data.get(field.name()).filter(|value| !value.is_null());
                let theirs = other.data.get(field.name()).filter(|value| !value.is_null());
                mine == theirs
            })
    }
}

impl fmt::Debug for DocumentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct(&self.class_name);
        for (name, slot) in self.iter() {
            match slot {
                Slot::Absent => {}
                Slot::Null => {
                    debug.field(name, &Value::Null);
                }
                Slot::Present(value) => {
                    debug.field(name, value);
                }
            }
        }
        if !self.extras.is_empty() {
            debug.field("extras", &self.extras);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;
    use bson::{doc, oid::ObjectId};
    use pretty_assertions::assert_eq;

    fn user_schema(class_name: &str) -> Arc<Schema> {
        SchemaBuilder::document(class_name)
            .field("name", Field::string().storage_name("n").required())
            .field("age", Field::int().storage_name("a"))
            .field("nickname", Field::string().storage_name("nn").default("anon"))
            .field("bio", Field::string().nullable())
            .build()
            .unwrap()
    }

    #[test]
    fn construction_applies_defaults_and_coercion() {
        let schema = user_schema("DocDefaults");
        let user = DocumentInstance::new(&schema, [("name", "ada"), ("age", "36")]).unwrap();

        assert!(user.is_created());
        assert_eq!(user.class_name(), "DocDefaults");
        assert_eq!(user.get("age").unwrap(), Some(&Value::Int(36)));
        assert_eq!(user.get("nickname").unwrap(), Some(&Value::from("anon")));
        assert_eq!(user.slot("bio").unwrap(), Slot::Null);
        assert_eq!(user.slot("id").unwrap(), Slot::Absent);
        assert_eq!(user.len(), 4);
    }

    #[test]
    fn unknown_names_are_rejected_together() {
        let schema = user_schema("DocUnknownNames");
        let err = DocumentInstance::new(&schema, [("name", "ada"), ("color", "red"), ("shoe", "9")]).unwrap_err();

        assert_eq!(
            err.to_string(),
            "The fields \"color, shoe\" do not exist on the document \"DocUnknownNames\""
        );
    }

    #[test]
    fn storage_names_are_accepted_on_construction() {
        let schema = user_schema("DocStorageNames");
        let user = DocumentInstance::new(&schema, [("n", Value::from("ada")), ("a", Value::Int(3))]).unwrap();
        assert_eq!(user.get("name").unwrap(), Some(&Value::from("ada")));
        assert_eq!(user.get("age").unwrap(), Some(&Value::Int(3)));
    }

    #[test]
    fn null_writes_follow_the_field_policy() {
        let schema = user_schema("DocNullPolicy");
        let mut user = DocumentInstance::new(&schema, [("name", "ada")]).unwrap();

        user.set("nickname", Value::Null).unwrap();
        assert_eq!(user.get("nickname").unwrap(), Some(&Value::from("anon")));

        user.set("bio", Value::Null).unwrap();
        assert_eq!(user.slot("bio").unwrap(), Slot::Null);

        user.set("age", Value::Null).unwrap();
        assert_eq!(user.slot("age").unwrap(), Slot::Null);
        assert!(!user.contains("age"));
    }

    #[test]
    fn mapping_access_rejects_undeclared_names() {
        let schema = user_schema("DocMappingAccess");
        let mut user = DocumentInstance::new(&schema, [("name", "ada")]).unwrap();

        assert!(matches!(user.get("color"), Err(DocumentError::KeyNotFound(_))));
        assert!(matches!(user.set("color", "red"), Err(DocumentError::KeyNotFound(_))));
        assert!(user.contains("name"));
        assert!(!user.contains("color"));
    }

    #[test]
    fn dynamic_schemas_keep_extras() {
        let schema = SchemaBuilder::document("DocDynamic")
            .field("name", Field::string())
            .dynamic()
            .build()
            .unwrap();
        let mut page = DocumentInstance::new(&schema, [("name", "home"), ("color", "blue")]).unwrap();
        page.set("views", 3).unwrap();

        assert_eq!(page.extra("color"), Some(&Bson::String("blue".into())));
        assert!(matches!(page.get("color"), Err(DocumentError::KeyNotFound(_))));

        let record = page.to_wire(None);
        assert_eq!(record.get_i32("views").unwrap(), 3);

        let hydrated = DocumentInstance::from_wire(&schema, record).unwrap();
        assert_eq!(hydrated.extra("color"), Some(&Bson::String("blue".into())));
    }

    #[test]
    fn wire_layout_puts_identity_and_class_first() {
        let schema = user_schema("DocWireLayout");
        let oid = ObjectId::new();
        let user = DocumentInstance::new(
            &schema,
            [("id", Value::ObjectId(oid)), ("name", Value::from("ada"))],
        )
        .unwrap();

        let record = user.to_wire(None);
        assert_eq!(
            record,
            doc! {
                "_id": oid,
                "_cls": "DocWireLayout",
                "n": "ada",
                "a": Bson::Null,
                "nn": "anon",
                "bio": Bson::Null,
            }
        );
        assert_eq!(record.keys().take(2).collect::<Vec<_>>(), vec!["_id", "_cls"]);
    }

    #[test]
    fn wire_layout_omits_missing_identity_and_filters_roots() {
        let schema = user_schema("DocWireFilter");
        let user = DocumentInstance::new(&schema, [("name", "ada"), ("age", "3")]).unwrap();

        assert!(!user.to_wire(None).contains_key("_id"));
        assert_eq!(
            user.to_wire(Some(&["age", "name.first"])),
            doc! { "_cls": "DocWireFilter", "n": "ada", "a": 3 }
        );
    }

    #[test]
    fn round_trip_preserves_declared_fields() {
        let schema = user_schema("DocRoundTrip");
        let mut user = DocumentInstance::new(&schema, [("name", "ada"), ("age", "36")]).unwrap();
        user.set_pk(ObjectId::new()).unwrap();

        let hydrated = DocumentInstance::from_wire(&schema, user.to_wire(None)).unwrap();
        assert_eq!(hydrated, user);
        assert!(!hydrated.is_created());
    }

    #[test]
    fn hydration_rejects_unknown_keys_on_strict_schemas() {
        let schema = user_schema("DocStrictHydration");
        let err = DocumentInstance::from_wire(&schema, doc! { "n": "ada", "zzz": 1 }).unwrap_err();
        assert!(matches!(err, DocumentError::FieldDoesNotExist { .. }));

        let lenient = SchemaBuilder::document("DocLenientHydration")
            .field("name", Field::string())
            .strict(false)
            .build()
            .unwrap();
        let doc = DocumentInstance::from_wire(&lenient, doc! { "name": "ada", "zzz": 1 }).unwrap();
        assert_eq!(doc.get("name").unwrap(), Some(&Value::from("ada")));
    }

    #[test]
    fn hydration_reports_every_failing_field() {
        let address = SchemaBuilder::embedded("DocFailingAddress")
            .field("province", Field::string())
            .build()
            .unwrap();
        let schema = SchemaBuilder::document("DocFailingUser")
            .field("home", Field::embedded(&address))
            .field("work", Field::embedded(&address))
            .build()
            .unwrap();

        let err = DocumentInstance::from_wire(
            &schema,
            doc! { "home": { "planet": "mars" }, "work": { "moon": "io" } },
        )
        .unwrap_err();

        let DocumentError::InvalidData { class_name, errors } = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(class_name, "DocFailingUser");
        assert_eq!(
            errors.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            vec!["home", "work"]
        );
        assert!(err.to_string().contains("Field 'home' - "));
    }

    #[test]
    fn unknown_discriminators_are_not_registered() {
        let schema = user_schema("DocUnknownDiscriminator");
        let err = DocumentInstance::from_wire(&schema, doc! { "_cls": "DocNoSuchClass", "n": "x" }).unwrap_err();
        assert!(matches!(err, DocumentError::NotRegistered(name) if name == "DocNoSuchClass"));
    }

    #[test]
    fn json_round_trip() {
        let schema = user_schema("DocJson");
        let mut user = DocumentInstance::new(&schema, [("name", "ada")]).unwrap();
        user.set_pk(ObjectId::new()).unwrap();

        let json = user.to_json().unwrap();
        assert_eq!(json["n"], serde_json::json!("ada"));

        let parsed = DocumentInstance::from_json(&schema, json).unwrap();
        assert_eq!(parsed, user);
    }
}
