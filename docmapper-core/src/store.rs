//! Main document store interface.
//!
//! [`DocumentStore`] owns a [`StoreBackend`] and hands out [`SchemaCollection`]s bound to a
//! schema.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{DocumentStore, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let users = store.collection(&user_schema)?;
//! users.ensure_indexes().await?;
//! ```

use std::sync::Arc;

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::SchemaCollection,
    error::DocumentResult,
    schema::Schema,
};

/// A document store bound to a specific backend implementation.
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Builds the backend and wraps it in a store.
    pub async fn connect<T>(builder: T) -> DocumentResult<Self>
    where
        T: StoreBackendBuilder<Backend = B>,
    {
        Ok(Self::new(builder.build().await?))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets the collection storing documents of `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Operation`](crate::error::DocumentError::Operation) for
    /// embedded and abstract schemas.
    pub fn collection<'a>(&'a self, schema: &Arc<Schema>) -> DocumentResult<SchemaCollection<'a, B>> {
        SchemaCollection::new(schema, &self.backend)
    }

    /// Drops (deletes) a collection with the given name.
    pub async fn drop_collection(&self, name: &str) -> DocumentResult<()> {
        self.backend.drop_collection(name).await
    }

    /// Shuts down the backend.
    pub async fn shutdown(self) -> DocumentResult<()> {
        self.backend.shutdown().await
    }
}
