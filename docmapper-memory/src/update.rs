//! Update operators, projections and upsert seeding for in-memory records.

use bson::{Bson, Document};

use docmapper_core::error::{DocumentError, DocumentResult};

use crate::evaluator::lookup;

const ID_KEY: &str = "_id";

/// Applies an update document (`$set`, `$unset`, `$inc`, `$push`) to `record`.
///
/// # Errors
///
/// - [`DocumentError::InvalidQuery`] for unknown operators or documents without operators.
/// - [`DocumentError::Operation`] when the update would change `_id` or `$inc` a non-number.
pub(crate) fn apply_update(record: &mut Document, update: &Document) -> DocumentResult<()> {
    if update.is_empty() {
        return Err(DocumentError::InvalidQuery("Update document must not be empty".to_string()));
    }

    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            DocumentError::InvalidQuery(format!("Modifiers operate on fields but {operator} was given a non-document"))
        })?;

        for (path, value) in fields {
            if path == ID_KEY || path.starts_with("_id.") {
                return Err(DocumentError::Operation(format!(
                    "Performing an update on the path '{path}' would modify the immutable field '_id'"
                )));
            }

            match operator.as_str() {
                "$set" => set_path(record, path, value.clone())?,
                "$unset" => unset_path(record, path),
                "$inc" => {
                    let current = lookup(record, path).first().map(|value| (*value).clone());
                    let incremented = match current {
                        None | Some(Bson::Null) => value.clone(),
                        Some(current) => add(&current, value, path)?,
                    };
                    set_path(record, path, incremented)?;
                }
                "$push" => {
                    let items = match value {
                        Bson::Document(each) if each.contains_key("$each") => match each.get("$each") {
                            Some(Bson::Array(items)) => items.clone(),
                            _ => return Err(DocumentError::InvalidQuery("$each requires an array".to_string())),
                        },
                        single => vec![single.clone()],
                    };
                    let mut list = match lookup(record, path).first() {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(existing)) => existing.clone(),
                        Some(_) => {
                            return Err(DocumentError::Operation(format!(
                                "The field '{path}' must be an array"
                            )));
                        }
                    };
                    list.extend(items);
                    set_path(record, path, Bson::Array(list))?;
                }
                other => {
                    return Err(DocumentError::InvalidQuery(format!("Unknown modifier: {other}")));
                }
            }
        }
    }
    Ok(())
}

fn add(current: &Bson, amount: &Bson, path: &str) -> DocumentResult<Bson> {
    let overflow = || DocumentError::Operation(format!("Integer overflow applying $inc at '{path}'"));
    let long = |a: i64, b: i64| a.checked_add(b).map(Bson::Int64).ok_or_else(overflow);
    match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b)))),
        (Bson::Int32(a), Bson::Int64(b)) => long(i64::from(*a), *b),
        (Bson::Int64(a), Bson::Int32(b)) => long(*a, i64::from(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => long(*a, *b),
        (Bson::Double(a), other) => as_f64(other)
            .map(|b| Bson::Double(a + b))
            .ok_or_else(|| non_numeric(path)),
        (other, Bson::Double(b)) => as_f64(other)
            .map(|a| Bson::Double(a + b))
            .ok_or_else(|| non_numeric(path)),
        _ => Err(non_numeric(path)),
    }
}

fn non_numeric(path: &str) -> DocumentError {
    DocumentError::Operation(format!("Cannot apply $inc to a value of non-numeric type at '{path}'"))
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(number) => Some(*number as f64),
        Bson::Int64(number) => Some(*number as f64),
        Bson::Double(number) => Some(*number),
        _ => None,
    }
}

/// Sets a dotted path, creating intermediate documents as needed.
pub(crate) fn set_path(record: &mut Document, path: &str, value: Bson) -> DocumentResult<()> {
    match path.split_once('.') {
        None => {
            record.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if matches!(record.get(head), None | Some(Bson::Null)) {
                record.insert(head, Document::new());
            }
            match record.get_mut(head) {
                Some(child) => set_in(child, rest, value, path),
                None => Ok(()),
            }
        }
    }
}

fn set_in(current: &mut Bson, path: &str, value: Bson, full_path: &str) -> DocumentResult<()> {
    let cannot_create = || DocumentError::Operation(format!("Cannot create field in element at '{full_path}'"));
    match current {
        Bson::Document(doc) => set_path(doc, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let index = head.parse::<usize>().map_err(|_| cannot_create())?;
            if items.len() <= index {
                items.resize(index + 1, Bson::Null);
            }
            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if matches!(items[index], Bson::Null) {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in(&mut items[index], rest, value, full_path)
                }
            }
        }
        _ => Err(cannot_create()),
    }
}

/// Removes a dotted path if present.
pub(crate) fn unset_path(record: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            record.remove(path);
        }
        Some((head, rest)) => match record.get_mut(head) {
            Some(Bson::Document(child)) => unset_path(child, rest),
            Some(Bson::Array(items)) => {
                let (index, rest) = match rest.split_once('.') {
                    Some((index, rest)) => (index, Some(rest)),
                    None => (rest, None),
                };
                if let Ok(index) = index.parse::<usize>() {
                    match (items.get_mut(index), rest) {
                        (Some(item), None) => *item = Bson::Null,
                        (Some(Bson::Document(child)), Some(rest)) => unset_path(child, rest),
                        _ => {}
                    }
                }
            }
            _ => {}
        },
    }
}

/// Applies an inclusion (`{ "n": 1 }`) or exclusion (`{ "n": 0 }`) projection.
///
/// `_id` is kept by an inclusion projection unless it is explicitly excluded.
pub(crate) fn project(record: &Document, projection: &Document) -> DocumentResult<Document> {
    let included = |value: &Bson| match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        _ => true,
    };

    let paths = projection.keys().collect::<Vec<_>>();
    for path in &paths {
        if let Some(parent) = paths.iter().find(|other| path.starts_with(&format!("{other}."))) {
            return Err(DocumentError::InvalidQuery(format!(
                "Path collision at {path} (conflicts with {parent})"
            )));
        }
    }

    let inclusion = projection
        .iter()
        .any(|(path, value)| path != ID_KEY && included(value));

    if inclusion {
        let mut projected = Document::new();
        let keep_id = projection.get(ID_KEY).is_none_or(included);
        if keep_id {
            if let Some(id) = record.get(ID_KEY) {
                projected.insert(ID_KEY, id.clone());
            }
        }
        for (path, value) in projection {
            if path == ID_KEY || !included(value) {
                continue;
            }
            match path.split_once('.') {
                // Paths through arrays are kept whole at their root.
                Some((root, _)) if matches!(record.get(root), Some(Bson::Array(_))) => {
                    if let Some(root_value) = record.get(root) {
                        projected.insert(root, root_value.clone());
                    }
                }
                _ => {
                    if let Some(found) = lookup(record, path).first() {
                        set_path(&mut projected, path, (*found).clone())?;
                    }
                }
            }
        }
        Ok(projected)
    } else {
        let mut projected = record.clone();
        for (path, value) in projection {
            if !included(value) {
                unset_path(&mut projected, path);
            }
        }
        Ok(projected)
    }
}

/// Builds the record an upsert starts from: the equality conditions of `filter`.
pub(crate) fn upsert_seed(filter: &Document) -> DocumentResult<Document> {
    let mut seed = Document::new();
    collect_equalities(filter, &mut seed)?;
    Ok(seed)
}

fn collect_equalities(filter: &Document, seed: &mut Document) -> DocumentResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            if let Bson::Array(clauses) = condition {
                for clause in clauses.iter().filter_map(Bson::as_document) {
                    collect_equalities(clause, seed)?;
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }

        let value = match condition {
            Bson::Document(operators) if operators.keys().any(|op| op.starts_with('$')) => {
                match operators.get("$eq") {
                    Some(value) => value.clone(),
                    None => continue,
                }
            }
            other => other.clone(),
        };
        set_path(seed, key, value)?;
    }
    Ok(())
}
