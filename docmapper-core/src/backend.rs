//! Storage backend abstraction.
//!
//! This module defines the collection-scoped operations the mapper needs from a document
//! store. Backends exchange plain BSON records (already in storage layout) and opaque filter,
//! update, sort and projection documents using the store's operator vocabulary
//! (`$eq`, `$in`, `$set`, ...). Translating schema-level queries into these documents is the
//! job of [`query`](crate::query) and [`collection`](crate::collection).
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper_core::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//!
//! let id = backend.insert_one("user", doc! { "n": "Alice", "a": 30 }).await?;
//! let found = backend
//!     .find_one("user", doc! { "_id": id }, FindOptions::default())
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;
use std::{fmt::Debug, sync::Arc};

use crate::{error::DocumentResult, schema::IndexSpec};

/// A stream of stored records. Each call to [`StoreBackend::find`] starts a new stream.
pub type RecordStream = BoxStream<'static, DocumentResult<Document>>;

/// Options for [`StoreBackend::find`] and [`StoreBackend::find_one`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort document, e.g. `{ "a": -1 }`.
    pub sort: Option<Document>,
    /// Projection document, e.g. `{ "n": 1 }`.
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Which version of a record [`StoreBackend::find_one_and_update`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    /// The record as it was before the update.
    #[default]
    Before,
    /// The record as it is after the update.
    After,
}

/// Options for [`StoreBackend::find_one_and_update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
    /// Insert a record built from the filter's equality conditions when nothing matches.
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

/// Options for [`StoreBackend::update_many`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub upsert: bool,
}

/// The outcome of [`StoreBackend::update_many`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Concurrent inserts that would violate a unique index must fail with
/// [`DocumentError::NotUnique`](crate::error::DocumentError::NotUnique) for all but one
/// writer.
///
/// # Error Handling
///
/// Duplicate-key violations are reported as
/// [`DocumentError::NotUnique`](crate::error::DocumentError::NotUnique); every other store
/// failure as [`DocumentError::Operation`](crate::error::DocumentError::Operation).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the first record matching `filter`, honoring `sort`, `skip` and `projection`.
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<Option<Document>>;

    /// Streams every record matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<RecordStream>;

    /// Inserts a record, assigning an identity when `_id` is missing or null.
    ///
    /// # Returns
    ///
    /// Returns the identity of the inserted record.
    async fn insert_one(&self, collection: &str, record: Document) -> DocumentResult<Bson>;

    /// Replaces the first record matching `filter` with `record`.
    ///
    /// # Returns
    ///
    /// Returns the previous record, or `None` if nothing matched (and nothing was written).
    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        record: Document,
    ) -> DocumentResult<Option<Document>>;

    /// Atomically applies `update` to the first record matching `filter`.
    ///
    /// # Returns
    ///
    /// Returns the record before the update unless
    /// [`ReturnDocument::After`] is requested; `None` if nothing matched and no upsert
    /// happened (or an upsert happened and the previous version was requested).
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<Document>>;

    /// Applies `update` to every record matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult>;

    /// Deletes every record matching `filter` and returns how many were removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentResult<u64>;

    /// Counts the records matching `filter`.
    async fn count(&self, collection: &str, filter: Document) -> DocumentResult<u64>;

    /// Creates an index. Fields in `index` are storage paths; a `-` prefix means descending.
    ///
    /// Creating an index that already exists is a no-op. Creating a unique index over
    /// records that already violate it fails with
    /// [`DocumentError::NotUnique`](crate::error::DocumentError::NotUnique).
    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentResult<()>;

    /// Drops a collection with its records and indexes. Dropping a missing collection is a
    /// no-op.
    async fn drop_collection(&self, collection: &str) -> DocumentResult<()>;

    /// Releases backend resources.
    async fn shutdown(self) -> DocumentResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend + ?Sized,
{
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<Option<Document>> {
        (**self).find_one(collection, filter, options).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<RecordStream> {
        (**self).find(collection, filter, options).await
    }

    async fn insert_one(&self, collection: &str, record: Document) -> DocumentResult<Bson> {
        (**self).insert_one(collection, record).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        record: Document,
    ) -> DocumentResult<Option<Document>> {
        (**self).replace_one(collection, filter, record).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<Document>> {
        (**self)
            .find_one_and_update(collection, filter, update, options)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult> {
        (**self)
            .update_many(collection, filter, update, options)
            .await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        (**self).delete_many(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        (**self).count(collection, filter).await
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentResult<()> {
        (**self).create_index(collection, index).await
    }

    async fn drop_collection(&self, collection: &str) -> DocumentResult<()> {
        (**self).drop_collection(collection).await
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend + ?Sized,
{
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<Option<Document>> {
        (**self).find_one(collection, filter, options).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
    ) -> DocumentResult<RecordStream> {
        (**self).find(collection, filter, options).await
    }

    async fn insert_one(&self, collection: &str, record: Document) -> DocumentResult<Bson> {
        (**self).insert_one(collection, record).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        record: Document,
    ) -> DocumentResult<Option<Document>> {
        (**self).replace_one(collection, filter, record).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: FindOneAndUpdateOptions,
    ) -> DocumentResult<Option<Document>> {
        (**self)
            .find_one_and_update(collection, filter, update, options)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DocumentResult<UpdateResult> {
        (**self)
            .update_many(collection, filter, update, options)
            .await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        (**self).delete_many(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> DocumentResult<u64> {
        (**self).count(collection, filter).await
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> DocumentResult<()> {
        (**self).create_index(collection, index).await
    }

    async fn drop_collection(&self, collection: &str) -> DocumentResult<()> {
        (**self).drop_collection(collection).await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentResult<Self::Backend>;
}
