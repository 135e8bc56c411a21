//! An object-document mapping layer for BSON document stores.
//!
//! This crate is the core of the docmapper project and provides:
//!
//! - **Fields** ([`field`], [`value`]) - Typed field descriptors owning conversion and validation
//! - **Schemas** ([`schema`], [`registry`]) - Schema builder, inheritance and the class registry
//! - **Document instances** ([`document`]) - Field values with wire (de)serialization
//! - **Validation** ([`validation`]) - Recursive, aggregated validation errors
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Query and update API** ([`query`]) - Filters and updates over logical field names
//! - **Collections interface** ([`collection`]) - Persisting and loading instances of a schema
//! - **Document store** ([`store`]) - Main interface tying schemas to a backend
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmapper_core::{document::DocumentInstance, field::Field, schema::SchemaBuilder};
//!
//! let user = SchemaBuilder::document("User")
//!     .field("name", Field::string().required().max_length(50))
//!     .field("age", Field::int().storage_name("a").min_value(0))
//!     .build()?;
//!
//! let ada = DocumentInstance::new(&user, [("name", "ada")])?;
//! ada.validate()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod error;
pub mod field;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validation;
pub mod value;
