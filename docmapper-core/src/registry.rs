//! The process-wide document class registry.
//!
//! Every built schema is registered under its class name. Hydration uses the registry to
//! resolve the `_cls` discriminator of a stored record into the concrete schema, and
//! collections use it to find the descendants of a class for polymorphic queries.
//!
//! Registering a class name twice replaces the earlier schema; the replacement is logged.

use once_cell::sync::Lazy;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{debug, warn};

use crate::{
    error::{DocumentError, DocumentResult},
    schema::Schema,
};

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<Schema>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `schema` under its class name, replacing any earlier registration.
pub fn register(schema: Arc<Schema>) {
    let class_name = schema.class_name().to_string();
    let previous = REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(class_name.clone(), schema);

    if previous.is_some() {
        warn!(class_name = %class_name, "replaced a registered document class");
    } else {
        debug!(class_name = %class_name, "registered document class");
    }
}

/// Returns the schema registered under `class_name`.
pub fn get_document(class_name: &str) -> DocumentResult<Arc<Schema>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(class_name)
        .cloned()
        .ok_or_else(|| DocumentError::NotRegistered(class_name.to_string()))
}

pub fn is_registered(class_name: &str) -> bool {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(class_name)
}

/// Every registered schema that inherits (directly or not) from `class_name`, sorted by
/// class name.
pub fn subclasses_of(class_name: &str) -> Vec<Arc<Schema>> {
    let mut subclasses = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .values()
        .filter(|schema| schema.superclasses().iter().any(|name| name == class_name))
        .cloned()
        .collect::<Vec<_>>();
    subclasses.sort_by(|a, b| a.class_name().cmp(b.class_name()));
    subclasses
}

pub fn registered_names() -> Vec<String> {
    let mut names = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Field, schema::SchemaBuilder};

    #[test]
    fn unknown_classes_are_not_registered() {
        let err = get_document("RegistryNeverBuilt").unwrap_err();
        assert_eq!(
            err.to_string(),
            "`RegistryNeverBuilt` has not been registered in the document registry"
        );
        assert!(!is_registered("RegistryNeverBuilt"));
    }

    #[test]
    fn rebuilding_replaces_the_entry() {
        SchemaBuilder::document("RegistryReplaced").build().unwrap();
        SchemaBuilder::document("RegistryReplaced")
            .field("extra", Field::string())
            .build()
            .unwrap();

        let schema = get_document("RegistryReplaced").unwrap();
        assert!(schema.field("extra").is_some());
        assert!(registered_names().contains(&"RegistryReplaced".to_string()));
    }

    #[test]
    fn descendants_are_found_transitively() {
        let root = SchemaBuilder::document("RegistryRoot")
            .allow_inheritance(true)
            .build()
            .unwrap();
        let middle = SchemaBuilder::document("RegistryMiddle").extends(&root).build().unwrap();
        SchemaBuilder::document("RegistryLeaf").extends(&middle).build().unwrap();

        let names = subclasses_of("RegistryRoot")
            .iter()
            .map(|schema| schema.class_name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["RegistryLeaf", "RegistryMiddle"]);
    }
}
