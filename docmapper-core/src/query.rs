//! Query and update construction in terms of logical field names.
//!
//! Filters are built as [`Expr`] trees with the [`Filter`] helpers and translated against a
//! [`Schema`] by [`SchemaQueryTranslator`]: logical (possibly dotted) names become storage
//! paths and every value is normalized through its field's
//! [`prepare_query_value`](crate::field::Field::prepare_query_value), so a query on a decimal
//! or long field matches what was stored.
//!
//! # Query Building
//!
//! ```ignore
//! use docmapper_core::query::{Filter, Query, SortDirection, Update};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("address.province", "Shanghai").and(Filter::gte("age", 18)))
//!     .sort("age", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//!
//! let update = Update::new().set("name", "Bob").inc("logins", 1);
//! ```
//!
//! # Filter Expression API
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Existence: `exists`, `not_exists`
//! - Membership: `any_of`, `none_of`, `all`
//! - Logical: `and`, `or`, plus [`Expr::not`]

use bson::{Bson, Document, doc};

use crate::{
    backend::FindOptions,
    document::CLASS_KEY,
    error::{DocumentError, DocumentResult},
    schema::Schema,
    value::Value,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// The field (or one of its items) equals one of the values.
    AnyOf,
    /// The field (or every one of its items) equals none of the values.
    NoneOf,
    /// A list field contains every one of the values.
    All,
}

impl FieldOp {
    /// The store operator for this comparison.
    pub fn operator(self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
            FieldOp::All => "$all",
        }
    }
}

/// A filter expression over logical field names.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression.
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        field: String,
        op: FieldOp,
        value: Value,
    },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Value) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Helper struct for constructing filter expressions.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field is set (not missing).
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::field(field.into(), FieldOp::AnyOf, collect_list(values))
    }

    pub fn none_of<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::field(field.into(), FieldOp::NoneOf, collect_list(values))
    }

    pub fn all<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::field(field.into(), FieldOp::All, collect_list(values))
    }
}

fn collect_list<I, V>(values: I) -> Value
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Value::List(values.into_iter().map(Into::into).collect())
}

/// A structured query: filter, sort and pagination over logical field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Expr>,
    pub sort: Vec<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Logical field names to load; every field is loaded when empty.
    pub only: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Adds a sort key. Keys apply in the order they are added.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push((field.into(), direction));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.query.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Restricts the loaded fields.
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.only = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// A single update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, Value),
    Push(String, Value),
}

/// An update over logical field names, translated into `$set`/`$unset`/`$inc`/`$push`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, amount: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), amount.into()));
        self
    }

    /// Appends a value to a list field.
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push(field.into(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Visitor over filter expressions.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
        }
    }
}

/// Translates logical queries and updates into store documents for one schema.
pub struct SchemaQueryTranslator<'a> {
    schema: &'a Schema,
}

impl<'a> SchemaQueryTranslator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    fn path(&self, field: &str) -> DocumentResult<String> {
        if field == CLASS_KEY {
            return Ok(CLASS_KEY.to_string());
        }
        self.schema.resolve_path(field).map(|(path, _)| path)
    }

    fn prepare(&self, field: &str, op: &str, value: &Value) -> DocumentResult<(String, Bson)> {
        if field == CLASS_KEY {
            return Ok((CLASS_KEY.to_string(), value.to_bson()));
        }
        let (path, descriptor) = self.schema.resolve_path(field)?;
        Ok((path, descriptor.prepare_query_value(op, value)?))
    }

    /// Translates a filter expression; `None` yields an empty filter.
    pub fn filter(&mut self, expr: Option<&Expr>) -> DocumentResult<Document> {
        match expr {
            Some(expr) => self.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    /// Translates a sort specification into a sort document.
    pub fn sort(&self, sort: &[(String, SortDirection)]) -> DocumentResult<Option<Document>> {
        if sort.is_empty() {
            return self.schema.ordering_document();
        }

        let mut document = Document::new();
        for (field, direction) in sort {
            let direction = match direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            document.insert(self.path(field)?, direction);
        }
        Ok(Some(document))
    }

    /// Translates a whole query into a filter and find options.
    pub fn query(&mut self, query: &Query) -> DocumentResult<(Document, FindOptions)> {
        let filter = self.filter(query.filter.as_ref())?;
        let projection = if query.only.is_empty() {
            None
        } else {
            let mut projection = doc! { CLASS_KEY: 1 };
            for field in &query.only {
                projection.insert(self.path(field)?, 1);
            }
            Some(projection)
        };

        Ok((
            filter,
            FindOptions {
                sort: self.sort(&query.sort)?,
                projection,
                skip: query.skip,
                limit: query.limit,
            },
        ))
    }

    /// Translates an update into an update document.
    pub fn update(&self, update: &Update) -> DocumentResult<Document> {
        if update.is_empty() {
            return Err(DocumentError::InvalidQuery("No update operations were given".to_string()));
        }

        let mut translated = Document::new();
        for op in update.ops() {
            let (operator, path, value) = match op {
                UpdateOp::Set(field, value) => {
                    let (path, value) = self.prepare(field, "$set", value)?;
                    ("$set", path, value)
                }
                UpdateOp::Unset(field) => ("$unset", self.path(field)?, Bson::String(String::new())),
                UpdateOp::Inc(field, value) => {
                    let (path, value) = self.prepare(field, "$inc", value)?;
                    ("$inc", path, value)
                }
                UpdateOp::Push(field, value) => {
                    let (path, value) = self.prepare(field, "$push", value)?;
                    ("$push", path, value)
                }
            };

            match translated.get_mut(operator) {
                Some(Bson::Document(section)) => {
                    section.insert(path, value);
                }
                _ => {
                    translated.insert(operator, doc! { path: value });
                }
            }
        }
        Ok(translated)
    }
}

impl QueryVisitor for SchemaQueryTranslator<'_> {
    type Output = Document;
    type Error = DocumentError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Err(DocumentError::InvalidQuery("An OR needs at least one expression".to_string()));
        }
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            self.path(field)?: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let operator = op.operator();
        if matches!(op, FieldOp::AnyOf | FieldOp::NoneOf | FieldOp::All) && !matches!(value, Value::List(_)) {
            return Err(DocumentError::InvalidQuery(format!(
                "{operator} on \"{field}\" requires a list of values"
            )));
        }

        let (path, value) = self.prepare(field, operator, value)?;
        Ok(doc! {
            path: { operator: value },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Field, schema::SchemaBuilder};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn schema(class_name: &str) -> Arc<Schema> {
        let address = SchemaBuilder::embedded(format!("{class_name}Address"))
            .field("province", Field::string().storage_name("p"))
            .build()
            .unwrap();
        SchemaBuilder::document(class_name)
            .field("name", Field::string().storage_name("n"))
            .field("age", Field::long().storage_name("a"))
            .field("price", Field::decimal().force_string())
            .field("tags", Field::list(Field::string()).storage_name("t"))
            .field("address", Field::embedded(&address).storage_name("ad"))
            .ordering(["-age"])
            .build()
            .unwrap()
    }

    #[test]
    fn filters_use_storage_paths_and_canonical_values() {
        let schema = schema("QueryPaths");
        let expr = Filter::eq("address.province", "Shanghai")
            .and(Filter::gte("age", 18))
            .and(Filter::any_of("price", ["1.5", "2"]));

        let filter = SchemaQueryTranslator::new(&schema).filter(Some(&expr)).unwrap();
        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "ad.p": { "$eq": "Shanghai" } },
                    { "a": { "$gte": 18_i64 } },
                    { "price": { "$in": ["1.50", "2.00"] } },
                ]
            }
        );
    }

    #[test]
    fn membership_on_list_fields_uses_item_values() {
        let schema = schema("QueryListMembership");
        let filter = SchemaQueryTranslator::new(&schema)
            .filter(Some(&Filter::eq("tags", "rust").not()))
            .unwrap();
        assert_eq!(filter, doc! { "$nor": [{ "t": { "$eq": "rust" } }] });
    }

    #[test]
    fn unknown_fields_are_invalid_queries() {
        let schema = schema("QueryUnknownField");
        let err = SchemaQueryTranslator::new(&schema)
            .filter(Some(&Filter::eq("colour", "red")))
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidQuery(_)));

        let err = SchemaQueryTranslator::new(&schema)
            .filter(Some(&Filter::any_of("age", Vec::<i64>::new()).and(Filter::eq("address", "x"))))
            .unwrap_err();
        assert!(err.to_string().contains("Querying the embedded document"));
    }

    #[test]
    fn queries_fall_back_to_schema_ordering() {
        let schema = schema("QueryOrdering");
        let (_, options) = SchemaQueryTranslator::new(&schema).query(&Query::new()).unwrap();
        assert_eq!(options.sort, Some(doc! { "a": -1 }));

        let query = Query::builder()
            .sort("name", SortDirection::Asc)
            .only(["name"])
            .limit(5)
            .build();
        let (_, options) = SchemaQueryTranslator::new(&schema).query(&query).unwrap();
        assert_eq!(options.sort, Some(doc! { "n": 1 }));
        assert_eq!(options.projection, Some(doc! { "_cls": 1, "n": 1 }));
        assert_eq!(options.limit, Some(5));
    }

    #[test]
    fn updates_group_operations() {
        let schema = schema("QueryUpdates");
        let update = Update::new()
            .set("name", "Bob")
            .inc("age", 1)
            .set("price", 3)
            .unset("tags");

        assert_eq!(
            SchemaQueryTranslator::new(&schema).update(&update).unwrap(),
            doc! {
                "$set": { "n": "Bob", "price": "3.00" },
                "$inc": { "a": 1_i64 },
                "$unset": { "t": "" },
            }
        );
        assert!(SchemaQueryTranslator::new(&schema).update(&Update::new()).is_err());
    }
}
