//! Validation errors and the document validation pass.
//!
//! Validation never mutates the instance. It runs the schema's clean hook (if any), checks
//! every declared field in schema order, and folds every failure into one aggregate
//! [`ValidationError`] tree instead of stopping at the first problem.

use bson::Bson;
use std::fmt;

use crate::{document::DocumentInstance, value::Value};

/// The key under which document-level (clean hook) errors are stored.
pub const NON_FIELD_ERRORS: &str = "__all__";

/// A validation failure, possibly holding nested per-field or per-item errors.
///
/// Field-level errors carry the field name. Composite fields (lists, embedded documents) and
/// the document-level pass attach their children under `errors`, keyed by field name, list
/// index or [`NON_FIELD_ERRORS`], in the order they were found.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationError {
    message: String,
    field_name: Option<String>,
    errors: Vec<(String, ValidationError)>,
    pk: Option<Bson>,
}

impl ValidationError {
    /// Creates an error with a message and no field context.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Creates an error reported by the named field.
    pub fn for_field(message: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field_name: Some(field_name.into()),
            ..Default::default()
        }
    }

    /// Attaches nested errors.
    pub fn with_errors(mut self, errors: Vec<(String, ValidationError)>) -> Self {
        self.errors = errors;
        self
    }

    pub(crate) fn with_field_name(mut self, field_name: Option<String>) -> Self {
        self.field_name = field_name;
        self
    }

    pub(crate) fn with_pk(mut self, pk: Option<Bson>) -> Self {
        self.pk = pk;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// The nested errors, in the order they were found.
    pub fn errors(&self) -> &[(String, ValidationError)] {
        &self.errors
    }

    /// The identity of the document that failed validation, when known.
    pub fn pk(&self) -> Option<&Bson> {
        self.pk.as_ref()
    }

    /// Returns the nested error stored under `key`.
    pub fn error(&self, key: &str) -> Option<&ValidationError> {
        self.errors
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, error)| error)
    }

    /// Looks up a nested error by a dotted path such as `"address.province"` or `"tags.1"`.
    pub fn error_at(&self, path: &str) -> Option<&ValidationError> {
        path.split('.')
            .try_fold(self, |error, key| error.error(key))
    }

    /// Flattens the tree into `(dotted path, message)` pairs for every leaf error.
    pub fn to_flat(&self) -> Vec<(String, String)> {
        let mut flat = Vec::new();
        for (key, error) in &self.errors {
            error.flatten_into(key, &mut flat);
        }
        flat
    }

    fn flatten_into(&self, prefix: &str, flat: &mut Vec<(String, String)>) {
        if self.errors.is_empty() {
            flat.push((prefix.to_string(), self.message.clone()));
            return;
        }

        for (key, error) in &self.errors {
            error.flatten_into(&format!("{prefix}.{key}"), flat);
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if !self.errors.is_empty() {
            let summary = self
                .to_flat()
                .into_iter()
                .map(|(path, message)| format!("{path}: {message}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " ({summary})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Validates `document` against its schema.
///
/// When `clean` is set the schema's clean hook runs first and its error is stored under
/// [`NON_FIELD_ERRORS`]. Absent or null slots are only reported when the field is required
/// and not auto-generated.
pub(crate) fn validate_document(document: &DocumentInstance, clean: bool) -> Result<(), ValidationError> {
    validate_with_pk(document, clean, document.pk_bson())
}

/// Validates a document embedded in the document identified by `owner_pk`.
pub(crate) fn validate_embedded(document: &DocumentInstance, owner_pk: Option<&Bson>) -> Result<(), ValidationError> {
    validate_with_pk(document, true, owner_pk.cloned())
}

fn validate_with_pk(document: &DocumentInstance, clean: bool, pk: Option<Bson>) -> Result<(), ValidationError> {
    let schema = document.schema();
    let mut errors = Vec::new();

    if clean {
        if let Some(hook) = schema.clean_hook() {
            if let Err(error) = hook(document) {
                errors.push((NON_FIELD_ERRORS.to_string(), error));
            }
        }
    }

    for field in schema.fields().iter().filter(|field| document.is_loaded(field)) {
        match document.raw(field.name()) {
            Some(value) if !value.is_null() => {
                if let Err(error) = field.validate_within(value, pk.as_ref()) {
                    errors.push((field.name().to_string(), error));
                }
            }
            _ if field.is_required() && !field.is_auto_generated() => {
                errors.push((
                    field.name().to_string(),
                    ValidationError::for_field("Field is required", field.name()),
                ));
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    let shown = pk
        .clone()
        .map(|pk| Value::from_bson(pk).to_string())
        .unwrap_or_else(|| "None".to_string());
    Err(
        ValidationError::new(format!("ValidationError ({}:{shown})", document.class_name()))
            .with_errors(errors)
            .with_pk(pk),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Field, schema::SchemaBuilder};
    use bson::oid::ObjectId;
    use pretty_assertions::assert_eq;

    fn sample() -> ValidationError {
        ValidationError::new("ValidationError (User:None)").with_errors(vec![
            ("name".into(), ValidationError::for_field("Field is required", "name")),
            (
                "address".into(),
                ValidationError::for_field("ValidationError (Address:None)", "address").with_errors(vec![(
                    "province".into(),
                    ValidationError::for_field("Field is required", "province"),
                )]),
            ),
        ])
    }

    #[test]
    fn nested_errors_are_addressable_by_path() {
        let error = sample();

        assert_eq!(error.error("name").map(|e| e.message()), Some("Field is required"));
        assert_eq!(
            error.error_at("address.province").map(|e| e.field_name()),
            Some(Some("province"))
        );
        assert!(error.error_at("address.city").is_none());
    }

    #[test]
    fn flattening_keeps_discovery_order() {
        assert_eq!(
            sample().to_flat(),
            vec![
                ("name".to_string(), "Field is required".to_string()),
                ("address.province".to_string(), "Field is required".to_string()),
            ]
        );
    }

    #[test]
    fn display_summarizes_leaves() {
        assert_eq!(
            sample().to_string(),
            "ValidationError (User:None) (name: Field is required, address.province: Field is required)"
        );
    }

    #[test]
    fn embedded_errors_report_the_owner_identity() {
        let address = SchemaBuilder::embedded("ValidationOwnerAddress")
            .field("province", Field::string().required())
            .build()
            .unwrap();
        let schema = SchemaBuilder::document("ValidationOwner")
            .field("address", Field::embedded(&address))
            .field("previous", Field::list(Field::embedded(&address)))
            .build()
            .unwrap();

        let oid = ObjectId::new();
        let mut person = DocumentInstance::new(&schema, [("id", Value::ObjectId(oid))]).unwrap();
        person.set("address", DocumentInstance::empty(&address)).unwrap();
        person.set("previous", vec![DocumentInstance::empty(&address)]).unwrap();

        let err = person.validate().unwrap_err();
        let validation = err.as_validation().unwrap();
        assert_eq!(validation.message(), format!("ValidationError (ValidationOwner:{})", oid.to_hex()));

        let nested = validation.error("address").unwrap();
        assert_eq!(nested.message(), format!("ValidationError (ValidationOwnerAddress:{})", oid.to_hex()));
        assert_eq!(nested.pk(), Some(&Bson::ObjectId(oid)));
        assert!(validation.error_at("address.province").is_some());
        assert_eq!(
            validation.error_at("previous.0").and_then(ValidationError::pk),
            Some(&Bson::ObjectId(oid))
        );
    }
}
