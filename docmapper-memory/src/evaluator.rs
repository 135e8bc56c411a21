//! Filter evaluation and value ordering for in-memory records.
//!
//! Filters use the store operator vocabulary: top-level `$and`/`$or`/`$nor`, and per-path
//! `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$all`, `$exists` and `$not`.
//! Paths are dotted; a path segment crossing an array either indexes it (numeric segment) or
//! fans out over its embedded documents. A condition on an array field matches when the
//! array itself or any of its items matches.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docmapper_core::error::{DocumentError, DocumentResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(1)`, `Int64(1)` and `Double(1.0)`
/// compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values without a defined ordering (binary data, regular expressions, ...).
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Other(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used for sorting: values of different types order by type.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match self.partial_cmp(other) {
            Some(ordering) => ordering,
            None => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Collects every value reachable through a dotted `path` of `record`.
pub(crate) fn lookup<'a>(record: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts = path.split('.').collect::<Vec<_>>();
    let mut found = Vec::new();
    if let Some((head, rest)) = parts.split_first() {
        if let Some(value) = record.get(*head) {
            descend(value, rest, &mut found);
        }
    }
    found
}

fn descend<'a>(current: &'a Bson, parts: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        found.push(current);
        return;
    };

    match current {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                descend(next, rest, found);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(item) = items.get(index) {
                    descend(item, rest, found);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    descend(item, parts, found);
                }
            }
        },
        _ => {}
    }
}

/// The first value at `path`, or null when the path is missing.
pub(crate) fn sort_key<'a>(record: &'a Document, path: &str) -> Comparable<'a> {
    lookup(record, path)
        .first()
        .map(|value| Comparable::from(*value))
        .unwrap_or(Comparable::Null)
}

/// Orders `left` and `right` by a sort document such as `{ "a": -1, "n": 1 }`.
pub(crate) fn compare_records(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let ordering = sort_key(left, path).total_cmp(&sort_key(right, path));
        let ordering = if is_descending(direction) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn is_descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(value) => *value < 0,
        Bson::Int64(value) => *value < 0,
        Bson::Double(value) => *value < 0.0,
        _ => false,
    }
}

/// Returns `true` if `record` matches `filter`.
///
/// # Errors
///
/// Returns [`DocumentError::InvalidQuery`] for unknown or malformed operators.
pub(crate) fn matches(record: &Document, filter: &Document) -> DocumentResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(record, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(record, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(record, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            operator if operator.starts_with('$') => {
                return Err(DocumentError::InvalidQuery(format!("unknown top level operator: {operator}")));
            }
            path => matches_condition(&lookup(record, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> DocumentResult<Vec<&'a Document>> {
    let invalid = || DocumentError::InvalidQuery(format!("{operator} must be a nonempty array of documents"));
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_document().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(doc) if !doc.is_empty() && doc.keys().all(|key| key.starts_with('$')) => Some(doc),
        _ => None,
    }
}

fn matches_condition(values: &[&Bson], condition: &Bson) -> DocumentResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals_any(values, condition));
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compares_any(values, operand, |o| o == Ordering::Greater),
            "$gte" => compares_any(values, operand, |o| o != Ordering::Less),
            "$lt" => compares_any(values, operand, |o| o == Ordering::Less),
            "$lte" => compares_any(values, operand, |o| o != Ordering::Greater),
            "$in" => list_operand(operator, operand)?
                .iter()
                .any(|candidate| equals_any(values, candidate)),
            "$nin" => !list_operand(operator, operand)?
                .iter()
                .any(|candidate| equals_any(values, candidate)),
            "$all" => {
                let required = list_operand(operator, operand)?;
                !required.is_empty() && required.iter().all(|candidate| equals_any(values, candidate))
            }
            "$exists" => !values.is_empty() == truthy(operand),
            "$not" => !matches_condition(values, operand)?,
            other => {
                return Err(DocumentError::InvalidQuery(format!("unknown operator: {other}")));
            }
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list_operand<'a>(operator: &str, operand: &'a Bson) -> DocumentResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| DocumentError::InvalidQuery(format!("{operator} needs an array")))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Equality against every value and, for arrays, every item. A missing path equals null.
fn equals_any(values: &[&Bson], operand: &Bson) -> bool {
    let expected = Comparable::from(operand);
    if values.is_empty() {
        return expected == Comparable::Null;
    }

    values.iter().any(|value| {
        let actual = Comparable::from(*value);
        if actual == expected {
            return true;
        }
        match actual {
            Comparable::Array(items) => items.iter().any(|item| *item == expected),
            _ => false,
        }
    })
}

fn compares_any(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    let compare = |actual: &Comparable<'_>| actual.partial_cmp(&expected).is_some_and(&accept);

    values.iter().any(|value| match Comparable::from(*value) {
        Comparable::Array(items) => items.iter().any(compare),
        actual => compare(&actual),
    })
}
