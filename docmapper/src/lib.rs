//! Main docmapper crate providing an object-document mapper for BSON document stores.
//!
//! This crate is the primary entry point for users of the docmapper framework. It re-exports
//! the core types from the sub-crates and provides access to the storage backends.
//!
//! # Features
//!
//! - **Declarative schemas** - Document kinds assembled from typed fields, with inheritance
//! - **Validation** - Aggregated, nested validation errors for documents, lists and embedded documents
//! - **Round-trip serialization** - Stable storage layout with `_id` and `_cls` first
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> DocumentResult<()> {
//!     let user = SchemaBuilder::document("User")
//!         .field("name", Field::string().required().max_length(50))
//!         .field("age", Field::int().storage_name("a").min_value(0))
//!         .field("email", Field::string().unique())
//!         .build()?;
//!
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let users = store.collection(&user)?;
//!     users.ensure_indexes().await?;
//!
//!     let mut alice = DocumentInstance::new(&user, [("name", Value::from("Alice")), ("age", Value::from(30))])?;
//!     users.save(&mut alice).await?;
//!
//!     let adults = users
//!         .query(&Query::from(Filter::gte("age", 18)))
//!         .await?
//!         .try_collect::<Vec<_>>()
//!         .await?;
//!     println!("Queried users: {adults:?}");
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Inheritance
//!
//! Schemas that allow inheritance share their collection with their subclasses. Records carry
//! the concrete class in `_cls`, so loading through the base schema yields instances of the
//! right subclass.
//!
//! ```ignore
//! let animal = SchemaBuilder::document("Animal")
//!     .allow_inheritance(true)
//!     .field("name", Field::string())
//!     .build()?;
//! let cat = SchemaBuilder::document("Cat")
//!     .extends(&animal)
//!     .field("lives", Field::int().default(9))
//!     .build()?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmapper_core::{
    backend, collection, document, error, field, query, registry, schema, store, validation, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmapper_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmapper_mongodb::{ConnectionSettings, MongoDbStore, MongoDbStoreBuilder};
}
