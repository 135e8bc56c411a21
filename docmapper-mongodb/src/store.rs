use async_trait::async_trait;
use bson::{Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument as MongoReturnDocument},
};
use tracing::debug;

use docmapper_core::{
    backend::{
        FindOneAndUpdateOptions, FindOptions, RecordStream, ReturnDocument, StoreBackend, StoreBackendBuilder,
        UpdateOptions, UpdateResult,
    },
    error::{DocumentError, DocumentResult},
    schema::IndexSpec,
};

use crate::settings::ConnectionSettings;

const DUPLICATE_KEY: i32 = 11000;

/// Returns `true` for server errors reporting a duplicate key.
fn is_duplicate_key(err: &MongoError) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn store_error(err: MongoError) -> DocumentError {
    if is_duplicate_key(&err) {
        DocumentError::NotUnique(err.to_string())
    } else {
        DocumentError::Operation(err.to_string())
    }
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(settings: ConnectionSettings) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(settings)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn shutdown(self) -> DocumentResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<Option<Document>> {
        let collection = self.get_collection(collection);
        let mut action = collection.find_one(filter);
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }
        if let Some(skip) = options.skip {
            action = action.skip(skip);
        }

        action.await.map_err(store_error)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<RecordStream> {
        let collection = self.get_collection(collection);
        let mut action = collection.find(filter);
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }
        if let Some(skip) = options.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit);
        }

        Ok(action
            .await
            .map_err(store_error)?
            .map_err(store_error)
            .boxed())
    }

    async fn insert_one(&self, collection: &str, mut record: Document) -> DocumentResult<Bson> {
        if matches!(record.get("_id"), Some(Bson::Null)) {
            record.remove("_id");
        }

        let result = self
            .get_collection(collection)
            .insert_one(record)
            .await
            .map_err(store_error)?;

        debug!(collection, id = %result.inserted_id, "mongodb insert");
        Ok(result.inserted_id)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        record: Document,
    ) -> DocumentResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_replace(filter, record)
            .return_document(MongoReturnDocument::Before)
            .await
            .map_err(store_error)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<Document>> {
        let collection = self.get_collection(collection);
        let mut action = collection
            .find_one_and_update(filter, update)
            .upsert(options.upsert)
            .return_document(match options.return_document {
                ReturnDocument::Before => MongoReturnDocument::Before,
                ReturnDocument::After => MongoReturnDocument::After,
            });
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }

        action.await.map_err(store_error)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult> {
        let result = self
            .get_collection(collection)
            .update_many(filter, update)
            .upsert(options.upsert)
            .await
            .map_err(store_error)?;

        Ok(UpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(filter)
            .await
            .map_err(store_error)?
            .deleted_count)
    }

    async fn count(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(store_error)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(index.keys())
                    .options(
                        IndexOptions::builder()
                            .unique(index.unique)
                            .sparse(index.sparse)
                            .name(index.name.clone())
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(store_error)?;

        debug!(collection, fields = ?index.fields, "mongodb create_index");
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn shutdown(self) -> DocumentResult<()> {
        self.shutdown().await
    }
}

/// Builds a [`MongoDbStore`] from [`ConnectionSettings`] or a connection string.
pub struct MongoDbStoreBuilder {
    settings: ConnectionSettings,
    dsn: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings, dsn: None }
    }

    /// Connects with a full connection string instead of the settings' hosts.
    pub fn from_dsn(dsn: &str, database: &str) -> Self {
        Self {
            settings: ConnectionSettings::new(database),
            dsn: Some(dsn.to_string()),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentResult<Self::Backend> {
        let options = match &self.dsn {
            Some(dsn) => ClientOptions::parse(dsn)
                .await
                .map_err(|e| DocumentError::Initialization(e.to_string()))?,
            None => self.settings.client_options().await?,
        };

        debug!(database = %self.settings.database, "connecting to mongodb");
        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| DocumentError::Initialization(e.to_string()))?,
            self.settings.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn unreachable_store() -> MongoDbStore {
        MongoDbStoreBuilder::from_dsn(
            "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=50&connectTimeoutMS=50",
            "docmapper_test",
        )
        .build()
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn reads_against_an_unreachable_server_fail_as_operations() {
        let store = unreachable_store().await;

        let err = store
            .find_one("people", doc! { "n": "ada" }, FindOptions::default().sort(doc! { "a": -1 }).skip(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Operation(_)));

        let Err(err) = store
            .find("people", doc! {}, FindOptions::default().projection(doc! { "n": 1 }).limit(2))
            .await
        else {
            panic!("find should not reach a server");
        };
        assert!(matches!(err, DocumentError::Operation(_)));
    }

    #[tokio::test]
    async fn updates_against_an_unreachable_server_fail_as_operations() {
        let store = unreachable_store().await;
        let options = FindOneAndUpdateOptions {
            return_document: ReturnDocument::After,
            sort: Some(doc! { "a": 1 }),
            ..Default::default()
        };

        let err = store
            .find_one_and_update("people", doc! { "n": "ada" }, doc! { "$inc": { "a": 1 } }, options)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Operation(_)));
    }
}
