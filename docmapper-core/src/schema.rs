//! Document schemas and the schema builder.
//!
//! A [`Schema`] is the runtime description of a document class: its ordered fields, the
//! mapping between logical and storage names, the collection it lives in, its inheritance
//! chain and its index declarations. Schemas are built once with [`SchemaBuilder`], shared
//! as `Arc<Schema>` and never mutated afterwards.
//!
//! Building a schema registers it in the process-wide [registry](crate::registry) so that
//! stored records carrying a `_cls` discriminator can be hydrated into the right class.
//!
//! # Example
//!
//! ```rust,ignore
//! use docmapper_core::{field::Field, schema::{IndexSpec, SchemaBuilder}};
//!
//! let address = SchemaBuilder::embedded("Address")
//!     .field("province", Field::string().storage_name("p").required())
//!     .field("city", Field::string().storage_name("c"))
//!     .build()?;
//!
//! let user = SchemaBuilder::document("User")
//!     .field("name", Field::string().storage_name("n").required())
//!     .field("address", Field::embedded(&address).storage_name("ad"))
//!     .index(IndexSpec::new(["name"]))
//!     .allow_inheritance(true)
//!     .build()?;
//!
//! assert_eq!(user.collection_name(), Some("user"));
//! ```

use bson::{Document, doc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    document::DocumentInstance,
    error::{DocumentError, DocumentResult},
    field::{Field, ID_STORAGE_NAME},
    registry,
    validation::ValidationError,
};

/// A document-level validation hook, run before field validation.
pub type CleanHook = Arc<dyn Fn(&DocumentInstance) -> Result<(), ValidationError> + Send + Sync>;

/// Whether a schema describes top-level documents or documents embedded in other documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Document,
    Embedded,
}

/// An index declaration.
///
/// Field names prefixed with `-` are indexed in descending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            unique: false,
            sparse: false,
            name: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The index key document, e.g. `{ "n": 1, "age": -1 }`.
    pub fn keys(&self) -> Document {
        let mut keys = Document::new();
        for field in &self.fields {
            match split_direction(field) {
                (name, true) => keys.insert(name, -1),
                (name, false) => keys.insert(name, 1),
            };
        }
        keys
    }
}

fn split_direction(field: &str) -> (&str, bool) {
    match field.strip_prefix('-') {
        Some(name) => (name, true),
        None => (field.strip_prefix('+').unwrap_or(field), false),
    }
}

/// Declared schema options.
///
/// Options are merged along the inheritance chain: index lists concatenate (parent first),
/// every other option set on a child overrides its parent's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    /// Overrides the collection name derived from the class name.
    pub collection: Option<String>,
    /// Abstract schemas have no collection and cannot be saved.
    #[serde(rename = "abstract")]
    pub is_abstract: Option<bool>,
    pub allow_inheritance: Option<bool>,
    pub indexes: Vec<IndexSpec>,
    /// Default sort applied to queries, e.g. `["-created", "name"]`.
    pub ordering: Option<Vec<String>>,
    /// Dynamic schemas keep undeclared data instead of rejecting it.
    pub dynamic: Option<bool>,
    /// Strict schemas reject undeclared stored keys on hydration. Defaults to `true`.
    pub strict: Option<bool>,
}

impl SchemaOptions {
    pub fn merge(&mut self, other: SchemaOptions) {
        if other.collection.is_some() {
            self.collection = other.collection;
        }
        if other.is_abstract.is_some() {
            self.is_abstract = other.is_abstract;
        }
        if other.allow_inheritance.is_some() {
            self.allow_inheritance = other.allow_inheritance;
        }
        if other.ordering.is_some() {
            self.ordering = other.ordering;
        }
        if other.dynamic.is_some() {
            self.dynamic = other.dynamic;
        }
        if other.strict.is_some() {
            self.strict = other.strict;
        }
        self.indexes.extend(other.indexes);
    }
}

/// The runtime description of a document class.
pub struct Schema {
    class_name: String,
    kind: SchemaKind,
    fields: Vec<Field>,
    field_index: HashMap<String, usize>,
    storage_to_logical: HashMap<String, String>,
    id_field: Option<usize>,
    collection: Option<String>,
    superclasses: Vec<String>,
    options: SchemaOptions,
    clean: Option<CleanHook>,
}

impl Schema {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Declared fields ordered by creation counter, ties broken by logical name.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(Field::name)
    }

    /// Looks up a field by its logical name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.field_index.get(name).map(|&index| &self.fields[index])
    }

    /// Looks up a field by its logical name, its storage name, or `pk` for the identity.
    pub fn lookup_field(&self, name: &str) -> Option<&Field> {
        if name == "pk" {
            return self.id_field();
        }
        self.field(name)
            .or_else(|| self.logical_name(name).and_then(|logical| self.field(logical)))
    }

    pub fn storage_name(&self, logical: &str) -> Option<&str> {
        self.field(logical).map(Field::stored_as)
    }

    pub fn logical_name(&self, storage: &str) -> Option<&str> {
        self.storage_to_logical.get(storage).map(String::as_str)
    }

    /// The field stored under `_id`, if any.
    pub fn id_field(&self) -> Option<&Field> {
        self.id_field.map(|index| &self.fields[index])
    }

    /// The collection records of this schema are stored in. `None` for abstract and embedded
    /// schemas.
    pub fn collection_name(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.options.is_abstract.unwrap_or(false)
    }

    pub fn allows_inheritance(&self) -> bool {
        self.options.allow_inheritance.unwrap_or(false)
    }

    pub fn is_dynamic(&self) -> bool {
        self.options.dynamic.unwrap_or(false)
    }

    pub fn is_strict(&self) -> bool {
        self.options.strict.unwrap_or(true)
    }

    /// Index declarations, inherited ones first.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.options.indexes
    }

    pub fn ordering(&self) -> &[String] {
        self.options.ordering.as_deref().unwrap_or_default()
    }

    pub fn options(&self) -> &SchemaOptions {
        &self.options
    }

    /// Ancestor class names, root first.
    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.superclasses.last().map(String::as_str)
    }

    /// Returns `true` if this schema is `other` or inherits from it.
    pub fn is_subclass_of(&self, other: &Schema) -> bool {
        self.class_name == other.class_name || self.superclasses.iter().any(|name| *name == other.class_name)
    }

    pub fn clean_hook(&self) -> Option<&CleanHook> {
        self.clean.as_ref()
    }

    /// Resolves a dotted logical path (`"address.province"`, `"books.0.title"`) into its
    /// storage path and the field it ends on.
    pub fn resolve_path(&self, path: &str) -> DocumentResult<(String, &Field)> {
        let unresolved = |part: &str| {
            DocumentError::InvalidQuery(format!(
                "Cannot resolve field \"{part}\" of \"{path}\" on {}",
                self.class_name
            ))
        };

        let mut parts = path.split('.');
        let head = parts.next().unwrap_or(path);
        let mut field = self.lookup_field(head).ok_or_else(|| unresolved(head))?;
        let mut storage = vec![field.stored_as().to_string()];

        for part in parts {
            if let Some(item) = field.item_field() {
                field = item;
                if part == "$" || part.parse::<usize>().is_ok() {
                    storage.push(part.to_string());
                    continue;
                }
            }
            let schema = field.embedded_schema().ok_or_else(|| unresolved(part))?;
            field = schema.lookup_field(part).ok_or_else(|| unresolved(part))?;
            storage.push(field.stored_as().to_string());
        }

        Ok((storage.join("."), field))
    }

    /// Every index this schema needs in storage terms: declared indexes plus one unique
    /// index per `unique` field (extended with its `unique_with` fields).
    pub fn index_specs(&self) -> DocumentResult<Vec<IndexSpec>> {
        let mut specs = self.options.indexes.clone();
        for field in &self.fields {
            if field.is_unique() && !field.is_primary_key() {
                let mut fields = vec![field.name().to_string()];
                fields.extend(field.unique_with_fields().iter().cloned());
                specs.push(IndexSpec {
                    fields,
                    unique: true,
                    sparse: field.is_sparse(),
                    name: None,
                });
            }
        }

        specs
            .into_iter()
            .map(|spec| {
                let fields = spec
                    .fields
                    .iter()
                    .map(|field| {
                        let (name, descending) = split_direction(field);
                        let (path, _) = self.resolve_path(name)?;
                        Ok(if descending { format!("-{path}") } else { path })
                    })
                    .collect::<DocumentResult<Vec<_>>>()?;
                Ok(IndexSpec { fields, ..spec })
            })
            .collect()
    }

    /// The sort document for this schema's default ordering, in storage terms.
    pub fn ordering_document(&self) -> DocumentResult<Option<Document>> {
        if self.ordering().is_empty() {
            return Ok(None);
        }

        let mut sort = Document::new();
        for entry in self.ordering() {
            let (name, descending) = split_direction(entry);
            let (path, _) = self.resolve_path(name)?;
            sort.insert(path, if descending { -1 } else { 1 });
        }
        Ok(Some(sort))
    }

    /// The discriminator filter matching this class and every registered descendant, or
    /// `None` when the collection is not shared with other classes.
    pub fn class_filter(&self) -> Option<Document> {
        if self.superclasses.is_empty() {
            return None;
        }

        let mut names = vec![self.class_name.clone()];
        names.extend(
            registry::subclasses_of(&self.class_name)
                .iter()
                .map(|schema| schema.class_name().to_string()),
        );
        Some(doc! { "_cls": { "$in": names } })
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("class_name", &self.class_name)
            .field("kind", &self.kind)
            .field("collection", &self.collection)
            .field("superclasses", &self.superclasses)
            .field("fields", &self.fields)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builds and registers a [`Schema`].
pub struct SchemaBuilder {
    class_name: String,
    kind: SchemaKind,
    fields: Vec<(String, Field)>,
    options: SchemaOptions,
    parent: Option<Arc<Schema>>,
    clean: Option<CleanHook>,
}

impl SchemaBuilder {
    fn new(class_name: impl Into<String>, kind: SchemaKind) -> Self {
        Self {
            class_name: class_name.into(),
            kind,
            fields: Vec::new(),
            options: SchemaOptions::default(),
            parent: None,
            clean: None,
        }
    }

    /// Starts a top-level document schema.
    pub fn document(class_name: impl Into<String>) -> Self {
        Self::new(class_name, SchemaKind::Document)
    }

    /// Starts an embedded document schema.
    pub fn embedded(class_name: impl Into<String>) -> Self {
        Self::new(class_name, SchemaKind::Embedded)
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Inherits fields and options from `parent`.
    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Merges declared options, e.g. ones deserialized from configuration.
    pub fn options(mut self, options: SchemaOptions) -> Self {
        self.options.merge(options);
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.options.collection = Some(name.into());
        self
    }

    pub fn abstract_schema(mut self) -> Self {
        self.options.is_abstract = Some(true);
        self
    }

    pub fn allow_inheritance(mut self, allow: bool) -> Self {
        self.options.allow_inheritance = Some(allow);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.options.indexes.push(index);
        self
    }

    pub fn ordering<I, S>(mut self, ordering: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.ordering = Some(ordering.into_iter().map(Into::into).collect());
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.options.dynamic = Some(true);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = Some(strict);
        self
    }

    pub fn clean<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DocumentInstance) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.clean = Some(Arc::new(hook));
        self
    }

    /// Validates the definition, builds the schema and registers it.
    pub fn build(self) -> DocumentResult<Arc<Schema>> {
        let SchemaBuilder {
            class_name,
            kind,
            fields: declared,
            options: declared_options,
            parent,
            clean,
        } = self;

        let mut options = SchemaOptions::default();
        let mut fields: Vec<Field> = Vec::new();
        let mut superclasses = Vec::new();
        let mut inherited_collection = None;

        if let Some(parent) = &parent {
            if parent.kind != kind {
                return Err(DocumentError::InvalidSchema(format!(
                    "{class_name} cannot extend {} of a different document kind",
                    parent.class_name
                )));
            }
            if !parent.allows_inheritance() && !parent.is_abstract() {
                return Err(DocumentError::InvalidSchema(format!(
                    "Document {} may not be subclassed",
                    parent.class_name
                )));
            }

            options = parent.options.clone();
            options.is_abstract = None;
            if parent.is_abstract() {
                options.collection = None;
            } else {
                inherited_collection = parent.collection.clone();
            }
            fields = parent.fields.clone();
            superclasses = parent.superclasses.clone();
            superclasses.push(parent.class_name.clone());
        }

        if inherited_collection.is_some()
            && declared_options.collection.is_some()
            && declared_options.collection != inherited_collection
        {
            return Err(DocumentError::InvalidSchema(format!(
                "{class_name} shares its parent's collection and cannot override it"
            )));
        }
        options.merge(declared_options);

        let resolve = |name: &str| registry::get_document(name);
        for (name, mut field) in declared {
            field.bind(&name, &class_name, &resolve)?;
            match fields.iter_mut().find(|existing| existing.name() == name) {
                Some(existing) => *existing = field,
                None => fields.push(field),
            }
        }

        if kind == SchemaKind::Document && !fields.iter().any(|field| field.stored_as() == ID_STORAGE_NAME) {
            let mut name = "id".to_string();
            let mut suffix = 0;
            while fields.iter().any(|field| field.name() == name) {
                name = format!("auto_id_{suffix}");
                suffix += 1;
            }
            let mut id = Field::implicit_id();
            id.bind(&name, &class_name, &resolve)?;
            fields.push(id);
        }

        let mut by_storage: Vec<(&str, Vec<&str>)> = Vec::new();
        for field in &fields {
            match by_storage.iter_mut().find(|(storage, _)| *storage == field.stored_as()) {
                Some((_, names)) => names.push(field.name()),
                None => by_storage.push((field.stored_as(), vec![field.name()])),
            }
        }
        let duplicates = by_storage
            .iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(storage, names)| format!("{storage} ({})", names.join(", ")))
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            return Err(DocumentError::InvalidSchema(format!(
                "Multiple db_fields defined for: {}",
                duplicates.join(", ")
            )));
        }

        fields.sort_by(|a, b| {
            a.creation_counter()
                .cmp(&b.creation_counter())
                .then_with(|| a.name().cmp(b.name()))
        });

        let field_index = fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field.name().to_string(), index))
            .collect::<HashMap<_, _>>();
        let storage_to_logical = fields
            .iter()
            .map(|field| (field.stored_as().to_string(), field.name().to_string()))
            .collect::<HashMap<_, _>>();
        let id_field = fields.iter().position(|field| field.stored_as() == ID_STORAGE_NAME);

        let collection = match kind {
            SchemaKind::Embedded => None,
            SchemaKind::Document if options.is_abstract.unwrap_or(false) => None,
            SchemaKind::Document => inherited_collection
                .or_else(|| options.collection.clone())
                .or_else(|| Some(default_collection_name(&class_name))),
        };

        let schema = Arc::new(Schema {
            class_name,
            kind,
            fields,
            field_index,
            storage_to_logical,
            id_field,
            collection,
            superclasses,
            options,
            clean,
        });

        for index in schema.options.indexes.iter() {
            for field in &index.fields {
                schema.resolve_path(split_direction(field).0).map_err(|_| {
                    DocumentError::InvalidSchema(format!(
                        "{}: index references unknown field \"{field}\"",
                        schema.class_name
                    ))
                })?;
            }
        }

        registry::register(schema.clone());
        Ok(schema)
    }
}

/// Derives a collection name from a class name: `WordOneWordTwo` → `word_one_word_two`.
pub fn default_collection_name(class_name: &str) -> String {
    let mut name = String::with_capacity(class_name.len() + 4);
    for c in class_name.chars() {
        if c.is_uppercase() {
            name.push('_');
            name.extend(c.to_lowercase());
        } else {
            name.push(c);
        }
    }
    name.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn address(class_name: &str) -> Arc<Schema> {
        SchemaBuilder::embedded(class_name)
            .field("province", Field::string().storage_name("p").required())
            .field("city", Field::string().storage_name("c"))
            .build()
            .unwrap()
    }

    #[test]
    fn collection_names_follow_class_names() {
        assert_eq!(default_collection_name("WordOneWordTwo"), "word_one_word_two");
        assert_eq!(default_collection_name("User"), "user");
        assert_eq!(default_collection_name("HTMLPage"), "h_t_m_l_page");
    }

    #[test]
    fn fields_keep_declaration_order_with_identity_first() {
        let schema = SchemaBuilder::document("SchemaOrderUser")
            .field("name", Field::string().storage_name("n"))
            .field("age", Field::int().storage_name("a"))
            .build()
            .unwrap();

        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "name", "age"]);
        assert_eq!(schema.storage_name("name"), Some("n"));
        assert_eq!(schema.logical_name("a"), Some("age"));
        assert_eq!(schema.id_field().map(Field::stored_as), Some("_id"));
        assert_eq!(schema.collection_name(), Some("schema_order_user"));
        assert_eq!(schema.field("name").and_then(Field::owner), Some("SchemaOrderUser"));
    }

    #[test]
    fn duplicate_storage_names_fail_at_build() {
        let err = SchemaBuilder::document("SchemaDuplicateStorage")
            .field("name", Field::string().storage_name("n"))
            .field("nickname", Field::string().storage_name("n"))
            .build()
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Invalid schema: Multiple db_fields defined for: n (name, nickname)"
        );
        assert!(crate::registry::get_document("SchemaDuplicateStorage").is_err());
    }

    #[test]
    fn storage_names_are_checked() {
        for storage in ["a.b", "$a", "a\0b"] {
            let err = SchemaBuilder::document("SchemaBadStorage")
                .field("name", Field::string().storage_name(storage))
                .build()
                .unwrap_err();
            assert!(matches!(err, DocumentError::InvalidSchema(_)), "{storage:?}");
        }
    }

    #[test]
    fn embedded_targets_must_be_embedded_and_registered() {
        let err = SchemaBuilder::document("SchemaUnknownEmbedded")
            .field("address", Field::embedded_named("SchemaNeverDeclared"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown embedded document type"));

        let top = SchemaBuilder::document("SchemaTopLevelTarget").build().unwrap();
        let err = SchemaBuilder::document("SchemaWrongEmbedded")
            .field("other", Field::embedded(&top))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid embedded document class"));

        address("SchemaNamedAddress");
        let schema = SchemaBuilder::document("SchemaNamedEmbedded")
            .field("address", Field::embedded_named("SchemaNamedAddress"))
            .build()
            .unwrap();
        assert_eq!(
            schema.field("address").and_then(Field::embedded_schema).map(|s| s.class_name()),
            Some("SchemaNamedAddress")
        );
    }

    #[test]
    fn inheritance_must_be_allowed() {
        let closed = SchemaBuilder::document("SchemaClosedParent").build().unwrap();
        let err = SchemaBuilder::document("SchemaClosedChild")
            .extends(&closed)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid schema: Document SchemaClosedParent may not be subclassed");
    }

    #[test]
    fn subclasses_share_concrete_parent_collection() {
        let animal = SchemaBuilder::document("SchemaAnimal")
            .field("name", Field::string())
            .allow_inheritance(true)
            .index(IndexSpec::new(["name"]))
            .build()
            .unwrap();
        let cat = SchemaBuilder::document("SchemaCat")
            .extends(&animal)
            .field("lives", Field::int())
            .index(IndexSpec::new(["-lives"]))
            .build()
            .unwrap();

        assert_eq!(cat.collection_name(), Some("schema_animal"));
        assert_eq!(cat.superclasses(), ["SchemaAnimal".to_string()]);
        assert!(cat.is_subclass_of(&animal));
        assert!(!animal.is_subclass_of(&cat));
        assert_eq!(cat.field_names().collect::<Vec<_>>(), vec!["id", "name", "lives"]);
        assert_eq!(
            cat.indexes().iter().map(|i| i.fields.clone()).collect::<Vec<_>>(),
            vec![vec!["name".to_string()], vec!["-lives".to_string()]]
        );
        assert_eq!(
            cat.class_filter(),
            Some(doc! { "_cls": { "$in": ["SchemaCat"] } })
        );
    }

    #[test]
    fn abstract_parents_give_children_their_own_collection() {
        let base = SchemaBuilder::document("SchemaAbstractBase")
            .field("created", Field::datetime())
            .abstract_schema()
            .build()
            .unwrap();
        let child = SchemaBuilder::document("SchemaConcreteChild")
            .extends(&base)
            .build()
            .unwrap();

        assert_eq!(base.collection_name(), None);
        assert!(base.is_abstract());
        assert!(!child.is_abstract());
        assert_eq!(child.collection_name(), Some("schema_concrete_child"));
    }

    #[test]
    fn options_deserialize_from_configuration() {
        let options: SchemaOptions = serde_json::from_value(serde_json::json!({
            "collection": "people",
            "abstract": false,
            "indexes": [{ "fields": ["name"], "unique": true }],
            "strict": false
        }))
        .unwrap();

        let schema = SchemaBuilder::document("SchemaConfigured")
            .field("name", Field::string())
            .options(options)
            .build()
            .unwrap();

        assert_eq!(schema.collection_name(), Some("people"));
        assert!(!schema.is_strict());
        assert!(schema.indexes()[0].unique);
    }

    #[test]
    fn paths_resolve_to_storage_names() {
        let address = address("SchemaPathAddress");
        let schema = SchemaBuilder::document("SchemaPathUser")
            .field("address", Field::embedded(&address).storage_name("ad"))
            .field("addresses", Field::list(Field::embedded(&address)).storage_name("ads"))
            .build()
            .unwrap();

        assert_eq!(schema.resolve_path("address.province").unwrap().0, "ad.p");
        assert_eq!(schema.resolve_path("addresses.city").unwrap().0, "ads.c");
        assert_eq!(schema.resolve_path("addresses.0.city").unwrap().0, "ads.0.c");
        assert_eq!(schema.resolve_path("pk").unwrap().0, "_id");
        assert!(matches!(
            schema.resolve_path("address.zip"),
            Err(DocumentError::InvalidQuery(_))
        ));
    }

    #[test]
    fn unique_fields_become_indexes() {
        let schema = SchemaBuilder::document("SchemaUniqueIndexes")
            .field("sid", Field::string().storage_name("s").unique())
            .field("a", Field::int().unique_with(["b"]))
            .field("b", Field::int())
            .index(IndexSpec::new(["-a"]).named("by_a"))
            .build()
            .unwrap();

        let specs = schema.index_specs().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].keys(), doc! { "a": -1 });
        assert_eq!(specs[1].keys(), doc! { "s": 1 });
        assert!(specs[1].unique);
        assert_eq!(specs[2].keys(), doc! { "a": 1, "b": 1 });
    }
}
