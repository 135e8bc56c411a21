//! In-memory document storage backend for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Store filter vocabulary** - `$and`/`$or`/`$nor`, comparisons, `$in`/`$nin`/`$all`, `$exists`, `$not`
//! - **Update operators** - `$set`, `$unset`, `$inc` and `$push`, with upserts
//! - **Unique indexes** - Enforced atomically with the write, sparse indexes skip missing keys
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{DocumentStore, memory::InMemoryStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let user = SchemaBuilder::document("User")
//!         .field("name", Field::string().required())
//!         .build()?;
//!
//!     let store = DocumentStore::connect(InMemoryStore::builder()).await?;
//!     let users = store.collection(&user)?;
//!
//!     let mut alice = DocumentInstance::new(&user, [("name", "Alice")])?;
//!     users.save(&mut alice).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

pub mod evaluator;
pub mod store;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
