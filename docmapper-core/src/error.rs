//! Error types and result types for schema, document and store operations.
//!
//! Every fallible operation in this crate returns [`DocumentResult<T>`]. Errors are grouped
//! by the phase that produces them: schema definition, construction, hydration, validation,
//! and store operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::validation::ValidationError;

/// Represents all possible errors raised by the mapper.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// The schema definition is malformed (duplicate or invalid storage names, unknown
    /// embedded document type, forbidden inheritance). Raised when the schema is built.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    /// One or more supplied names are not declared on the document.
    #[error("The fields \"{}\" do not exist on the document \"{class_name}\"", .fields.join(", "))]
    FieldDoesNotExist {
        /// The offending names, in the order they were supplied.
        fields: Vec<String>,
        /// The class name of the schema being constructed.
        class_name: String,
    },
    /// A stored record could not be converted into a document instance.
    /// Each entry is a `(field name, cause)` pair.
    #[error("Invalid data to create a `{class_name}` instance.\n{}", format_field_errors(.errors))]
    InvalidData {
        /// The class name of the schema the record resolved to.
        class_name: String,
        /// Per-field coercion failures.
        errors: Vec<(String, String)>,
    },
    /// The document failed validation. The wrapped error carries every field error.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// No schema is registered under the given class name.
    #[error("`{0}` has not been registered in the document registry")]
    NotRegistered(String),
    /// Mapping-style access used a name that is not a declared field.
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    /// A filter or update could not be prepared for the store.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A store operation violated a uniqueness constraint.
    #[error("Tried to save duplicate unique keys ({0})")]
    NotUnique(String),
    /// A store operation failed for any other reason.
    #[error("Operation failed: {0}")]
    Operation(String),
    /// Serialization/deserialization error when converting between BSON and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// A specialized `Result` type for mapper operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

fn format_field_errors(errors: &[(String, String)]) -> String {
    errors
        .iter()
        .map(|(field, cause)| format!("Field '{field}' - {cause}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl DocumentError {
    /// Returns `true` if this error is a uniqueness violation reported by the store.
    pub fn is_not_unique(&self) -> bool {
        matches!(self, DocumentError::NotUnique(_))
    }

    /// Returns the aggregate validation error, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            DocumentError::Validation(error) => Some(error),
            _ => None,
        }
    }
}

impl From<BsonError> for DocumentError {
    fn from(err: BsonError) -> Self {
        DocumentError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_does_not_exist_names_fields_and_class() {
        let err = DocumentError::FieldDoesNotExist {
            fields: vec!["nickname".into()],
            class_name: "User".into(),
        };

        assert_eq!(
            err.to_string(),
            "The fields \"nickname\" do not exist on the document \"User\""
        );
    }

    #[test]
    fn invalid_data_lists_every_field() {
        let err = DocumentError::InvalidData {
            class_name: "User".into(),
            errors: vec![
                ("address".into(), "bad".into()),
                ("books".into(), "worse".into()),
            ],
        };

        let message = err.to_string();
        assert!(message.starts_with("Invalid data to create a `User` instance."));
        assert!(message.contains("Field 'address' - bad"));
        assert!(message.contains("Field 'books' - worse"));
    }
}
