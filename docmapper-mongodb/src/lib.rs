//! MongoDB backend implementation for docmapper.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! updates, sorts and projections produced by the mapper are passed to the server unchanged,
//! and duplicate-key errors (code 11000) surface as `DocumentError::NotUnique`.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmapper = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! Connections are configured with [`ConnectionSettings`] (hosts, port, database,
//! credentials) or a full connection string through [`MongoDbStoreBuilder::from_dsn`].
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{backend::StoreBackendBuilder, mongodb::{ConnectionSettings, MongoDbStore}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder(ConnectionSettings::new("my_database"))
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_mongodb;

pub mod settings;
pub mod store;

pub use settings::ConnectionSettings;
pub use store::{MongoDbStore, MongoDbStoreBuilder};
