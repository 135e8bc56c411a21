//! Schema-bound collections.
//!
//! A [`SchemaCollection`] ties a [`Schema`] to the collection it is stored in and to a
//! [`StoreBackend`]. It persists [`DocumentInstance`]s in their wire layout and hydrates
//! stored records back into instances, resolving the concrete class of every record through
//! its `_cls` discriminator.
//!
//! Collections of a subclass schema only see records of that class and its registered
//! descendants: every filter is scoped with `{"_cls": {"$in": [...]}}` unless the caller
//! already constrains `_cls`.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//!
//! let users = store.collection(&user_schema)?;
//!
//! let mut ada = DocumentInstance::new(&user_schema, [("name", "ada")])?;
//! users.save(&mut ada).await?;
//!
//! let adults = users
//!     .query(&Query::from(Filter::gte("age", 18)))
//!     .await?
//!     .try_collect::<Vec<_>>()
//!     .await?;
//! ```

use bson::{Bson, Document, doc};
use futures::{StreamExt, stream::BoxStream};
use std::sync::Arc;
use tracing::debug;

use crate::{
    backend::{FindOneAndUpdateOptions, FindOptions, StoreBackend, UpdateOptions, UpdateResult},
    document::{CLASS_KEY, DocumentInstance},
    error::{DocumentError, DocumentResult},
    field::ID_STORAGE_NAME,
    query::{Expr, Query, QueryVisitor, SchemaQueryTranslator, Update},
    schema::{Schema, SchemaKind},
    value::Value,
};

/// A stream of hydrated instances.
pub type InstanceStream = BoxStream<'static, DocumentResult<DocumentInstance>>;

/// Options for [`SchemaCollection::save_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Validate the instance before writing it.
    pub validate: bool,
    /// Run the schema's clean hook as part of validation.
    pub clean: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            clean: true,
        }
    }
}

/// A collection of documents of one schema (and its subclasses).
#[derive(Debug)]
pub struct SchemaCollection<'a, B: StoreBackend> {
    schema: Arc<Schema>,
    name: String,
    backend: &'a B,
}

impl<'a, B: StoreBackend> SchemaCollection<'a, B> {
    /// Binds `schema` to its collection on `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Operation`] for embedded and abstract schemas, which have no
    /// collection of their own.
    pub(crate) fn new(schema: &Arc<Schema>, backend: &'a B) -> DocumentResult<Self> {
        if schema.kind() == SchemaKind::Embedded {
            return Err(DocumentError::Operation(format!(
                "Embedded document `{}` cannot be stored in its own collection",
                schema.class_name()
            )));
        }
        let name = schema.collection_name().ok_or_else(|| {
            DocumentError::Operation(format!(
                "Abstract document `{}` has no collection",
                schema.class_name()
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            schema: schema.clone(),
            backend,
        })
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Translates a filter expression over logical names into a store filter.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::InvalidQuery`] for unknown fields or malformed values.
    pub fn filter(&self, expr: &Expr) -> DocumentResult<Document> {
        SchemaQueryTranslator::new(&self.schema).visit_expr(expr)
    }

    /// Translates an update over logical names into a store update document.
    pub fn update(&self, update: &Update) -> DocumentResult<Document> {
        SchemaQueryTranslator::new(&self.schema).update(update)
    }

    /// Restricts `filter` to this schema's class and its descendants.
    fn scoped(&self, mut filter: Document) -> Document {
        if let Some(Bson::Document(class_filter)) = self
            .schema
            .class_filter()
            .and_then(|mut class_filter| class_filter.remove(CLASS_KEY))
        {
            if !filter.contains_key(CLASS_KEY) {
                filter.insert(CLASS_KEY, class_filter);
            }
        }
        filter
    }

    fn id_filter(&self, document: &DocumentInstance) -> DocumentResult<Document> {
        match document.pk_bson() {
            Some(pk) => Ok(doc! { ID_STORAGE_NAME: pk }),
            None => Err(DocumentError::Operation(format!(
                "`{}` instance has no identity yet",
                document.class_name()
            ))),
        }
    }

    fn hydrate(&self, record: Document) -> DocumentResult<DocumentInstance> {
        hydrate_projected(&self.schema, record, None)
    }

    /// Validates and persists `document`, then assigns its identity.
    ///
    /// An instance with an identity replaces the stored record with that identity, or is
    /// inserted when there is none. An instance without one is inserted.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Validation`] if the instance is invalid.
    /// - [`DocumentError::NotUnique`] if the write violates a unique index.
    pub async fn save(&self, document: &mut DocumentInstance) -> DocumentResult<()> {
        self.save_with(document, SaveOptions::default()).await
    }

    /// Persists `document` with explicit validation settings.
    pub async fn save_with(&self, document: &mut DocumentInstance, options: SaveOptions) -> DocumentResult<()> {
        if !document.schema().is_subclass_of(&self.schema) {
            return Err(DocumentError::Operation(format!(
                "`{}` instances cannot be saved in the `{}` collection",
                document.class_name(),
                self.name
            )));
        }
        if options.validate {
            document.validate_with(options.clean)?;
        }
        if let Some(paths) = document.loaded_paths().map(<[String]>::to_vec) {
            return self.save_loaded(document, paths).await;
        }

        let record = document.to_wire(None);
        let id = match record.get(ID_STORAGE_NAME).cloned() {
            Some(id) => {
                let replaced = self
                    .backend
                    .replace_one(&self.name, doc! { ID_STORAGE_NAME: id.clone() }, record.clone())
                    .await?;
                match replaced {
                    Some(_) => id,
                    None => self.backend.insert_one(&self.name, record).await?,
                }
            }
            None => self.backend.insert_one(&self.name, record).await?,
        };

        debug!(collection = %self.name, id = %id, "saved document");
        if document.schema().id_field().is_some() {
            document.set_pk(Value::from_bson(id))?;
        }
        document.mark_persisted();
        Ok(())
    }

    /// Writes only the loaded paths of a partially loaded instance, leaving the rest of the
    /// stored record untouched.
    async fn save_loaded(&self, document: &mut DocumentInstance, paths: Vec<String>) -> DocumentResult<()> {
        let filter = self.id_filter(document)?;
        let record = document.to_wire(None);

        let mut changes = Document::new();
        for path in &paths {
            let (target, value) = loaded_value(&record, path)?;
            changes.insert(target, value);
        }

        if !changes.is_empty() {
            let result = self
                .backend
                .update_many(&self.name, filter, doc! { "$set": changes }, UpdateOptions::default())
                .await?;
            if result.matched_count == 0 {
                return Err(DocumentError::Operation("Document does not exist".to_string()));
            }
        }

        debug!(collection = %self.name, paths = ?paths, "saved partially loaded document");
        document.mark_persisted();
        Ok(())
    }

    /// Inserts `document` as a new record, failing if its identity is already stored.
    pub async fn insert(&self, document: &mut DocumentInstance) -> DocumentResult<()> {
        document.validate()?;
        let id = self.backend.insert_one(&self.name, document.to_wire(None)).await?;
        if document.schema().id_field().is_some() {
            document.set_pk(Value::from_bson(id))?;
        }
        document.mark_persisted();
        Ok(())
    }

    /// Returns the first instance matching `filter`.
    pub async fn get(&self, filter: Document) -> DocumentResult<Option<DocumentInstance>> {
        let options = FindOptions {
            sort: self.schema.ordering_document()?,
            ..Default::default()
        };
        self.backend
            .find_one(&self.name, self.scoped(filter), options)
            .await?
            .map(|record| self.hydrate(record))
            .transpose()
    }

    /// Returns the instance with identity `id`.
    pub async fn get_by_id(&self, id: impl Into<Value>) -> DocumentResult<Option<DocumentInstance>> {
        let field = self
            .schema
            .id_field()
            .ok_or_else(|| DocumentError::KeyNotFound("pk".to_string()))?;
        let id = field.prepare_query_value("$eq", &id.into())?;
        self.get(doc! { ID_STORAGE_NAME: id }).await
    }

    /// Streams every instance matching `filter`. The schema's default ordering applies when
    /// `options` carries no sort.
    pub async fn find(&self, filter: Document, mut options: FindOptions) -> DocumentResult<InstanceStream> {
        if options.sort.is_none() {
            options.sort = self.schema.ordering_document()?;
        }

        let schema = self.schema.clone();
        let projection = options.projection.clone();
        let records = self
            .backend
            .find(&self.name, self.scoped(filter), options)
            .await?;
        Ok(records
            .map(move |record| record.and_then(|record| hydrate_projected(&schema, record, projection.as_ref())))
            .boxed())
    }

    /// Streams the instances matching a logical query.
    pub async fn query(&self, query: &Query) -> DocumentResult<InstanceStream> {
        let (filter, options) = SchemaQueryTranslator::new(&self.schema).query(query)?;
        self.find(filter, options).await
    }

    pub async fn count(&self, filter: Document) -> DocumentResult<u64> {
        self.backend.count(&self.name, self.scoped(filter)).await
    }

    /// Deletes the stored record of `document`.
    ///
    /// # Returns
    ///
    /// Returns `true` if a record was removed.
    pub async fn delete(&self, document: &DocumentInstance) -> DocumentResult<bool> {
        let filter = self.id_filter(document)?;
        Ok(self.backend.delete_many(&self.name, filter).await? > 0)
    }

    pub async fn delete_many(&self, filter: Document) -> DocumentResult<u64> {
        self.backend.delete_many(&self.name, self.scoped(filter)).await
    }

    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult> {
        self.backend
            .update_many(&self.name, self.scoped(filter), update, options)
            .await
    }

    /// Atomically updates the first matching record and returns it hydrated.
    ///
    /// The record is returned as it was before the update unless
    /// [`ReturnDocument::After`](crate::backend::ReturnDocument::After) is requested.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<DocumentInstance>> {
        let projection = options.projection.clone();
        self.backend
            .find_one_and_update(&self.name, self.scoped(filter), update, options)
            .await?
            .map(|record| hydrate_projected(&self.schema, record, projection.as_ref()))
            .transpose()
    }

    /// Replaces `document` with its stored version.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Operation`] if the instance has no identity or its record no
    /// longer exists.
    pub async fn reload(&self, document: &mut DocumentInstance) -> DocumentResult<()> {
        let filter = self.id_filter(document)?;
        let record = self
            .backend
            .find_one(&self.name, filter, FindOptions::default())
            .await?
            .ok_or_else(|| DocumentError::Operation("Document does not exist".to_string()))?;
        *document = self.hydrate(record)?;
        Ok(())
    }

    /// Creates every index the schema declares, including those implied by `unique` fields.
    pub async fn ensure_indexes(&self) -> DocumentResult<()> {
        for spec in self.schema.index_specs()? {
            debug!(collection = %self.name, fields = ?spec.fields, unique = spec.unique, "ensuring index");
            self.backend.create_index(&self.name, spec).await?;
        }
        Ok(())
    }
}

fn hydrate_projected(
    schema: &Arc<Schema>,
    record: Document,
    projection: Option<&Document>,
) -> DocumentResult<DocumentInstance> {
    let mut document = DocumentInstance::from_wire(schema, record)?;
    if let Some(paths) = projection.and_then(|projection| projected_paths(document.schema(), projection)) {
        document.restrict_to(paths);
    }
    Ok(document)
}

/// The storage paths a projection leaves loaded, or `None` if it loads every field.
fn projected_paths(schema: &Schema, projection: &Document) -> Option<Vec<String>> {
    let selected = |value: &Bson| match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        _ => true,
    };
    let entries = projection
        .iter()
        .filter(|(path, _)| path.as_str() != ID_STORAGE_NAME && path.as_str() != CLASS_KEY)
        .collect::<Vec<_>>();

    if entries.iter().any(|(_, value)| selected(*value)) {
        return Some(
            entries
                .into_iter()
                .filter(|(_, value)| selected(*value))
                .map(|(path, _)| path.clone())
                .collect(),
        );
    }

    let excluded = entries
        .iter()
        .map(|(path, _)| path.split('.').next().unwrap_or_default())
        .collect::<Vec<_>>();
    if excluded.is_empty() {
        return None;
    }
    Some(
        schema
            .fields()
            .iter()
            .map(|field| field.stored_as())
            .filter(|name| *name != ID_STORAGE_NAME && !excluded.contains(name))
            .map(str::to_string)
            .collect(),
    )
}

/// Resolves a loaded storage path against a wire record. A null or missing parent document
/// is written as null at the parent.
fn loaded_value(record: &Document, path: &str) -> DocumentResult<(String, Bson)> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut current = record;
    for (depth, segment) in segments.iter().enumerate() {
        let value = current.get(*segment);
        if depth + 1 == segments.len() {
            return Ok((path.to_string(), value.cloned().unwrap_or(Bson::Null)));
        }
        match value {
            Some(Bson::Document(child)) => current = child,
            None | Some(Bson::Null) => return Ok((segments[..=depth].join("."), Bson::Null)),
            Some(_) => {
                return Err(DocumentError::Operation(format!(
                    "Cannot save '{path}' of a partially loaded document"
                )));
            }
        }
    }
    Ok((path.to_string(), Bson::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::RecordStream,
        field::Field,
        schema::{IndexSpec, SchemaBuilder},
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct NoopBackend;

    #[async_trait]
    impl StoreBackend for NoopBackend {
        async fn find_one(&self, _: &str, _: Document, _: FindOptions) -> DocumentResult<Option<Document>> {
            Ok(None)
        }

        async fn find(&self, _: &str, _: Document, _: FindOptions) -> DocumentResult<RecordStream> {
            Ok(futures::stream::empty().boxed())
        }

        async fn insert_one(&self, _: &str, _: Document) -> DocumentResult<Bson> {
            Ok(Bson::Null)
        }

        async fn replace_one(&self, _: &str, _: Document, _: Document) -> DocumentResult<Option<Document>> {
            Ok(None)
        }

        async fn find_one_and_update(
            &self,
            _: &str,
            _: Document,
            _: Document,
            _: FindOneAndUpdateOptions,
        ) -> DocumentResult<Option<Document>> {
            Ok(None)
        }

        async fn update_many(&self, _: &str, _: Document, _: Document, _: UpdateOptions) -> DocumentResult<UpdateResult> {
            Ok(UpdateResult::default())
        }

        async fn delete_many(&self, _: &str, _: Document) -> DocumentResult<u64> {
            Ok(0)
        }

        async fn count(&self, _: &str, _: Document) -> DocumentResult<u64> {
            Ok(0)
        }

        async fn create_index(&self, _: &str, _: IndexSpec) -> DocumentResult<()> {
            Ok(())
        }

        async fn drop_collection(&self, _: &str) -> DocumentResult<()> {
            Ok(())
        }
    }

    #[test]
    fn subclass_filters_are_scoped_to_descendants() {
        let base = SchemaBuilder::document("CollectionVehicle")
            .allow_inheritance(true)
            .field("wheels", Field::int())
            .build()
            .unwrap();
        let car = SchemaBuilder::document("CollectionCar").extends(&base).build().unwrap();
        SchemaBuilder::document("CollectionSportsCar").extends(&car).build().unwrap();

        let cars = SchemaCollection::new(&car, &NoopBackend).unwrap();
        assert_eq!(cars.name(), "collection_vehicle");
        assert_eq!(
            cars.scoped(doc! { "wheels": 4 }),
            doc! {
                "wheels": 4,
                "_cls": { "$in": ["CollectionCar", "CollectionSportsCar"] },
            }
        );

        let explicit = doc! { "_cls": "CollectionSportsCar" };
        assert_eq!(cars.scoped(explicit.clone()), explicit);

        let vehicles = SchemaCollection::new(&base, &NoopBackend).unwrap();
        assert_eq!(vehicles.scoped(Document::new()), Document::new());
    }

    #[test]
    fn embedded_and_abstract_schemas_have_no_collection() {
        let embedded = SchemaBuilder::embedded("CollectionPart").build().unwrap();
        assert!(SchemaCollection::new(&embedded, &NoopBackend).is_err());

        let base = SchemaBuilder::document("CollectionAbstractBase")
            .abstract_schema()
            .build()
            .unwrap();
        assert!(SchemaCollection::new(&base, &NoopBackend).is_err());
    }

    #[tokio::test]
    async fn unsaved_instances_cannot_be_deleted_or_reloaded() {
        let schema = SchemaBuilder::document("CollectionUnsaved").build().unwrap();
        let collection = SchemaCollection::new(&schema, &NoopBackend).unwrap();
        let mut document = DocumentInstance::empty(&schema);

        assert!(matches!(collection.delete(&document).await, Err(DocumentError::Operation(_))));
        assert!(matches!(collection.reload(&mut document).await, Err(DocumentError::Operation(_))));
    }

    #[test]
    fn projections_determine_loaded_paths() {
        let schema = SchemaBuilder::document("CollectionProjected")
            .field("name", Field::string().storage_name("n"))
            .field("age", Field::int().storage_name("a"))
            .build()
            .unwrap();

        assert_eq!(
            projected_paths(&schema, &doc! { "_cls": 1, "n": 1, "ad.p": 1 }),
            Some(vec!["n".to_string(), "ad.p".to_string()])
        );
        assert_eq!(projected_paths(&schema, &doc! { "a": 0 }), Some(vec!["n".to_string()]));
        assert_eq!(projected_paths(&schema, &doc! { "_id": 0 }), None);
    }

    #[test]
    fn loaded_values_stop_at_null_parents() {
        let record = doc! { "_id": 1, "ad": { "p": "Paris" }, "home": null, "t": ["x"] };

        assert_eq!(
            loaded_value(&record, "ad.p").unwrap(),
            ("ad.p".to_string(), Bson::String("Paris".into()))
        );
        assert_eq!(loaded_value(&record, "home.p").unwrap(), ("home".to_string(), Bson::Null));
        assert_eq!(loaded_value(&record, "n").unwrap(), ("n".to_string(), Bson::Null));
        assert!(loaded_value(&record, "t.0").is_err());
    }
}
