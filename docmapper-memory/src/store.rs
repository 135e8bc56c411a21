//! In-memory storage implementation for document stores.
//!
//! Records are kept per collection in insertion order together with the collection's index
//! declarations. Every operation holds the store lock for its whole duration, so checking a
//! unique index and writing the record happen atomically.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use docmapper_core::{
    backend::{
        FindOneAndUpdateOptions, FindOptions, RecordStream, ReturnDocument, StoreBackend, StoreBackendBuilder,
        UpdateOptions, UpdateResult,
    },
    error::{DocumentError, DocumentResult},
    schema::IndexSpec,
};

use crate::{
    evaluator::{Comparable, compare_records, lookup, matches},
    update::{apply_update, project, upsert_seed},
};

const ID_KEY: &str = "_id";

#[derive(Debug, Default)]
struct CollectionState {
    records: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionState>;

impl CollectionState {
    /// Positions of the records matching `filter`, in sort order.
    fn matching(&self, filter: &Document, sort: Option<&Document>) -> DocumentResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, record) in self.records.iter().enumerate() {
            if matches(record, filter)? {
                positions.push(position);
            }
        }

        if let Some(sort) = sort.filter(|sort| !sort.is_empty()) {
            positions.sort_by(|a, b| compare_records(&self.records[*a], &self.records[*b], sort));
        }
        Ok(positions)
    }

    /// Fails with [`DocumentError::NotUnique`] if `candidate` collides with another record on
    /// `_id` or on a unique index. The record at `replacing` is not compared against.
    fn check_unique(&self, collection: &str, candidate: &Document, replacing: Option<usize>) -> DocumentResult<()> {
        let others = || {
            self.records
                .iter()
                .enumerate()
                .filter(move |(position, _)| Some(*position) != replacing)
                .map(|(_, record)| record)
        };

        if let Some(id) = candidate.get(ID_KEY) {
            let id = Comparable::from(id);
            if others().any(|record| record.get(ID_KEY).map(Comparable::from).as_ref() == Some(&id)) {
                return Err(duplicate_key(collection, "_id_", &doc_key(&[ID_KEY], candidate)));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let paths = index_paths(index);
            let Some(key) = unique_key(index, &paths, candidate) else {
                continue;
            };
            let collides = others().any(|record| {
                unique_key(index, &paths, record).is_some_and(|other| other == key)
            });
            if collides {
                return Err(duplicate_key(collection, &index_name(index), &doc_key(&paths, candidate)));
            }
        }
        Ok(())
    }
}

fn index_paths(index: &IndexSpec) -> Vec<&str> {
    index
        .fields
        .iter()
        .map(|field| field.strip_prefix('-').unwrap_or(field))
        .collect()
}

fn index_name(index: &IndexSpec) -> String {
    match &index.name {
        Some(name) => name.clone(),
        None => index
            .keys()
            .iter()
            .map(|(path, direction)| format!("{path}_{direction}"))
            .collect::<Vec<_>>()
            .join("_"),
    }
}

/// The values a unique index compares for `record`; `None` when a sparse index skips it.
fn unique_key<'a>(index: &IndexSpec, paths: &[&str], record: &'a Document) -> Option<Vec<Comparable<'a>>> {
    let values = paths
        .iter()
        .map(|path| lookup(record, path).first().copied())
        .collect::<Vec<_>>();
    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|value| value.map(Comparable::from).unwrap_or(Comparable::Null))
            .collect(),
    )
}

fn doc_key(paths: &[&str], record: &Document) -> Document {
    let mut key = Document::new();
    for path in paths {
        key.insert(
            *path,
            lookup(record, path).first().map(|value| (*value).clone()).unwrap_or(Bson::Null),
        );
    }
    key
}

fn duplicate_key(collection: &str, index: &str, key: &Document) -> DocumentError {
    DocumentError::NotUnique(format!(
        "E11000 duplicate key error collection: {collection} index: {index} dup key: {key}"
    ))
}

/// Returns `record` with an `_id` in first position, generating one when missing or null.
fn with_identity(record: Document) -> (Bson, Document) {
    let id = match record.get(ID_KEY) {
        Some(Bson::Null) | None => Bson::ObjectId(ObjectId::new()),
        Some(id) => id.clone(),
    };

    let mut identified = Document::new();
    identified.insert(ID_KEY, id.clone());
    for (key, value) in record {
        if key != ID_KEY {
            identified.insert(key, value);
        }
    }
    (id, identified)
}

fn apply_options(record: &Document, projection: Option<&Document>) -> DocumentResult<Document> {
    match projection {
        Some(projection) if !projection.is_empty() => project(record, projection),
        _ => Ok(record.clone()),
    }
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data.
///
/// # Performance
///
/// Queries scan all records of a collection. Indexes are only used to enforce uniqueness.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper_core::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert_one("users", doc! { "n": "Alice" }).await?;
/// let found = store.find_one("users", doc! { "_id": id }, FindOptions::default()).await?;
/// assert!(found.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> records and indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Names of every collection holding records or indexes.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names = self.store.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        let mut records = self.find(collection, filter, options).await?;
        records.next().await.transpose()
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<RecordStream> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(stream::empty().boxed());
        };

        let positions = state.matching(&filter, options.sort.as_ref())?;
        let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match options.limit.map(i64::unsigned_abs) {
            None | Some(0) => usize::MAX,
            Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
        };

        let records = positions
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|position| apply_options(&state.records[position], options.projection.as_ref()))
            .collect::<DocumentResult<Vec<_>>>()?;

        debug!(collection, found = records.len(), "memory find");
        Ok(stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn insert_one(&self, collection: &str, record: Document) -> DocumentResult<Bson> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();

        let (id, record) = with_identity(record);
        state.check_unique(collection, &record, None)?;
        state.records.push(record);

        debug!(collection, id = %id, "memory insert");
        Ok(id)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        record: Document,
    ) -> DocumentResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(None);
        };
        let Some(position) = state.matching(&filter, None)?.first().copied() else {
            return Ok(None);
        };

        let current_id = state.records[position].get(ID_KEY).cloned().unwrap_or(Bson::Null);
        let record = match record.get(ID_KEY) {
            Some(id) if Comparable::from(id) != Comparable::from(&current_id) => {
                return Err(DocumentError::Operation(
                    "After applying the update, the (immutable) field '_id' was found to have been altered"
                        .to_string(),
                ));
            }
            _ => with_identity(record_with_id(record, current_id)).1,
        };

        state.check_unique(collection, &record, Some(position))?;
        let previous = std::mem::replace(&mut state.records[position], record);
        debug!(collection, "memory replace");
        Ok(Some(previous))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<Document>> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();

        let position = state.matching(&filter, options.sort.as_ref())?.first().copied();
        let Some(position) = position else {
            if !options.upsert {
                return Ok(None);
            }

            let mut seeded = upsert_seed(&filter)?;
            apply_update(&mut seeded, &update)?;
            let (_, record) = with_identity(seeded);
            state.check_unique(collection, &record, None)?;
            let returned = match options.return_document {
                ReturnDocument::Before => None,
                ReturnDocument::After => Some(apply_options(&record, options.projection.as_ref())?),
            };
            state.records.push(record);
            debug!(collection, "memory find_one_and_update upserted");
            return Ok(returned);
        };

        let mut updated = state.records[position].clone();
        apply_update(&mut updated, &update)?;
        state.check_unique(collection, &updated, Some(position))?;
        let previous = std::mem::replace(&mut state.records[position], updated);

        debug!(collection, "memory find_one_and_update");
        match options.return_document {
            ReturnDocument::Before => apply_options(&previous, options.projection.as_ref()).map(Some),
            ReturnDocument::After => apply_options(&state.records[position], options.projection.as_ref()).map(Some),
        }
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();
        let positions = state.matching(&filter, None)?;

        if positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }
            let mut seeded = upsert_seed(&filter)?;
            apply_update(&mut seeded, &update)?;
            let (id, record) = with_identity(seeded);
            state.check_unique(collection, &record, None)?;
            state.records.push(record);
            return Ok(UpdateResult {
                upserted_id: Some(id),
                ..Default::default()
            });
        }

        let mut result = UpdateResult {
            matched_count: positions.len() as u64,
            ..Default::default()
        };
        for position in positions {
            let mut updated = state.records[position].clone();
            apply_update(&mut updated, &update)?;
            if updated == state.records[position] {
                continue;
            }
            state.check_unique(collection, &updated, Some(position))?;
            state.records[position] = updated;
            result.modified_count += 1;
        }

        debug!(collection, matched = result.matched_count, modified = result.modified_count, "memory update_many");
        Ok(result)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(0);
        };

        let doomed = state.matching(&filter, None)?;
        let mut position = 0;
        state.records.retain(|_| {
            let keep = doomed.binary_search(&position).is_err();
            position += 1;
            keep
        });

        let deleted = doomed.len() as u64;
        debug!(collection, deleted, "memory delete_many");
        Ok(deleted)
    }

    async fn count(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        let store = self.store.read().await;
        match store.get(collection) {
            Some(state) => Ok(state.matching(&filter, None)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();
        if state.indexes.iter().any(|existing| existing.fields == index.fields) {
            return Ok(());
        }

        if index.unique {
            let paths = index_paths(&index);
            let mut seen: Vec<Vec<Comparable<'_>>> = Vec::new();
            for record in &state.records {
                let Some(key) = unique_key(&index, &paths, record) else {
                    continue;
                };
                if seen.contains(&key) {
                    return Err(duplicate_key(collection, &index_name(&index), &doc_key(&paths, record)));
                }
                seen.push(key);
            }
        }

        debug!(collection, index = %index_name(&index), "memory create_index");
        state.indexes.push(index);
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> DocumentResult<()> {
        self.store.write().await.remove(collection);
        Ok(())
    }
}

fn record_with_id(mut record: Document, id: Bson) -> Document {
    record.insert(ID_KEY, id);
    record
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn insert_assigns_identity_first() {
        let store = InMemoryStore::new();
        let id = store.insert_one("users", doc! { "n": "Alice", "_id": null }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = store
            .find_one("users", doc! { "_id": id.clone() }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["_id", "n"]);

        let err = store.insert_one("users", doc! { "_id": id }).await.unwrap_err();
        assert!(err.is_not_unique());
    }

    #[tokio::test]
    async fn find_sorts_skips_limits_and_projects() {
        let store = InMemoryStore::new();
        for (name, age) in [("a", 3), ("b", 1), ("c", 2), ("d", 4)] {
            store.insert_one("users", doc! { "n": name, "a": age }).await.unwrap();
        }

        let options = FindOptions::default()
            .sort(doc! { "a": -1 })
            .skip(1)
            .limit(2)
            .projection(doc! { "n": 1, "_id": 0 });
        let records = store
            .find("users", doc! { "a": { "$gt": 1 } }, options)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap();
        assert_eq!(records, vec![doc! { "n": "a" }, doc! { "n": "c" }]);

        assert_eq!(store.count("users", doc! {}).await.unwrap(), 4);
        assert_eq!(store.count("missing", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_keeps_identity() {
        let store = InMemoryStore::new();
        let id = store.insert_one("users", doc! { "n": "Alice" }).await.unwrap();

        let previous = store
            .replace_one("users", doc! { "_id": id.clone() }, doc! { "n": "Bob" })
            .await
            .unwrap();
        assert_eq!(previous, Some(doc! { "_id": id.clone(), "n": "Alice" }));

        let missing = store
            .replace_one("users", doc! { "_id": ObjectId::new() }, doc! { "n": "Eve" })
            .await
            .unwrap();
        assert_eq!(missing, None);

        let err = store
            .replace_one("users", doc! { "_id": id.clone() }, doc! { "_id": 5, "n": "Eve" })
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Operation(_)));
        assert_eq!(store.count("users", doc! { "n": "Bob" }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn find_one_and_update_returns_previous_record_by_default() {
        let store = InMemoryStore::new();
        store.insert_one("counters", doc! { "_id": "hits", "value": 1 }).await.unwrap();

        let before = store
            .find_one_and_update(
                "counters",
                doc! { "_id": "hits" },
                doc! { "$inc": { "value": 1 } },
                FindOneAndUpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(before, Some(doc! { "_id": "hits", "value": 1 }));

        let after = store
            .find_one_and_update(
                "counters",
                doc! { "_id": "hits" },
                doc! { "$inc": { "value": 1 } },
                FindOneAndUpdateOptions {
                    return_document: ReturnDocument::After,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(after, Some(doc! { "_id": "hits", "value": 3 }));

        let upserted = store
            .find_one_and_update(
                "counters",
                doc! { "_id": "misses" },
                doc! { "$inc": { "value": 1 } },
                FindOneAndUpdateOptions {
                    upsert: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(upserted, None);
        assert_eq!(store.count("counters", doc! { "_id": "misses", "value": 1 }).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_many() {
        let store = InMemoryStore::new();
        for age in [10, 20, 30] {
            store.insert_one("users", doc! { "a": age, "t": [] }).await.unwrap();
        }

        let result = store
            .update_many(
                "users",
                doc! { "a": { "$gte": 20 } },
                doc! { "$push": { "t": "adult" } },
                UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 2);
        assert_eq!(store.count("users", doc! { "t": "adult" }).await.unwrap(), 2);

        let result = store
            .update_many(
                "users",
                doc! { "a": 99 },
                doc! { "$set": { "n": "new" } },
                UpdateOptions { upsert: true },
            )
            .await
            .unwrap();
        assert!(result.upserted_id.is_some());
        assert_eq!(store.count("users", doc! { "a": 99, "n": "new" }).await.unwrap(), 1);

        assert_eq!(store.delete_many("users", doc! { "a": { "$lt": 25 } }).await.unwrap(), 2);
        assert_eq!(store.count("users", doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let store = InMemoryStore::new();
        store
            .create_index("users", IndexSpec::new(["email"]).unique().sparse())
            .await
            .unwrap();

        store.insert_one("users", doc! { "email": "a@example.com" }).await.unwrap();
        store.insert_one("users", doc! { "n": "no email" }).await.unwrap();
        store.insert_one("users", doc! { "n": "no email either" }).await.unwrap();

        let err = store
            .insert_one("users", doc! { "email": "a@example.com" })
            .await
            .unwrap_err();
        assert!(err.is_not_unique());
        assert!(err.to_string().contains("index: email_1"));

        store.insert_one("dupes", doc! { "k": 1 }).await.unwrap();
        store.insert_one("dupes", doc! { "k": 1 }).await.unwrap();
        let err = store
            .create_index("dupes", IndexSpec::new(["k"]).unique())
            .await
            .unwrap_err();
        assert!(err.is_not_unique());
    }

    #[tokio::test]
    async fn concurrent_inserts_on_a_unique_index() {
        let store = InMemoryStore::new();
        store
            .create_index("users", IndexSpec::new(["email"]).unique())
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            store.insert_one("users", doc! { "email": "race@example.com" }),
            store.insert_one("users", doc! { "email": "race@example.com" }),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        assert!(first.err().or(second.err()).is_some_and(|err| err.is_not_unique()));
        assert_eq!(store.count("users", doc! {}).await.unwrap(), 1);
    }
}
