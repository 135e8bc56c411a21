//! Convenient re-exports of commonly used types from docmapper.
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```

pub use docmapper_core::{
    backend::{
        FindOneAndUpdateOptions, FindOptions, ReturnDocument, StoreBackend, StoreBackendBuilder, UpdateOptions,
        UpdateResult,
    },
    collection::{SaveOptions, SchemaCollection},
    document::{DocumentInstance, Slot},
    error::{DocumentError, DocumentResult},
    field::{Field, FieldKind, Rounding},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, SchemaQueryTranslator, SortDirection, Update},
    schema::{IndexSpec, Schema, SchemaBuilder, SchemaKind, SchemaOptions},
    store::DocumentStore,
    validation::ValidationError,
    value::Value,
};
