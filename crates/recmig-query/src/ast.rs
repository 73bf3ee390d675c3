//! Structured query types.
//!
//! A [`Query`] is deliberately a plain value: the migration compiler rewrites
//! projections and predicates freely, so nothing here carries source spans.

/// A parsed `SELECT ... FROM ...` query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Projected field names, in order. Relationship paths keep their dots.
    pub fields: Vec<String>,
    /// The object being queried (the `FROM` target).
    pub object: String,
    /// Optional `WHERE` predicate.
    pub filter: Option<Condition>,
    /// `ORDER BY` items.
    pub order_by: Vec<OrderBy>,
    /// `LIMIT` value.
    pub limit: Option<u64>,
    /// `OFFSET` value.
    pub offset: Option<u64>,
}

impl Query {
    /// Create an unfiltered query projecting `fields` from `object`.
    pub fn new<I, S>(object: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            object: object.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Whether `field` is already projected.
    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Append `field` to the projection unless present. Returns true if added.
    pub fn ensure_field(&mut self, field: impl Into<String>) -> bool {
        let field = field.into();
        if self.contains_field(&field) {
            return false;
        }
        self.fields.push(field);
        true
    }

    /// Put `field` first in the projection, moving it if already present.
    pub fn ensure_field_first(&mut self, field: &str) {
        self.fields.retain(|f| f != field);
        self.fields.insert(0, field.to_string());
    }

    /// Remove `field` from the projection. Returns true if it was present.
    pub fn remove_field(&mut self, field: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f != field);
        before != self.fields.len()
    }

    /// Whether the query restricts its row count (a predicate or paging).
    pub fn has_limiting_predicate(&self) -> bool {
        self.filter.is_some() || self.limit.is_some() || self.offset.is_some()
    }

    /// AND an extra condition onto the predicate.
    pub fn and_where(&mut self, condition: Condition) {
        self.filter = Some(match self.filter.take() {
            None => condition,
            Some(Condition::And(mut conditions)) => {
                conditions.push(condition);
                Condition::And(conditions)
            }
            Some(existing) => Condition::And(vec![existing, condition]),
        });
    }

    /// A copy of this query with a replaced projection.
    pub fn with_fields<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    /// A copy of this query without ordering and paging.
    pub fn without_paging(&self) -> Self {
        Self {
            order_by: Vec::new(),
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    /// A copy of this query with no predicate, ordering or paging.
    pub fn unfiltered(&self) -> Self {
        Self {
            filter: None,
            ..self.without_paging()
        }
    }
}

/// A boolean predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field op value`
    Compare {
        field: String,
        op: CompareOp,
        value: Literal,
    },
    /// `field [NOT] IN (values)`
    In {
        field: String,
        values: Vec<Literal>,
        negated: bool,
    },
    /// `field [NOT] LIKE 'pattern'` with `%` and `_` wildcards.
    Like {
        field: String,
        pattern: String,
        negated: bool,
    },
    /// All conditions must hold.
    And(Vec<Condition>),
    /// Any condition must hold.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
}

impl Condition {
    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<Literal>) -> Self {
        Condition::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// `field IN (values)`
    pub fn in_list<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Literal>,
    {
        Condition::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Literal values in predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<&String> for Literal {
    fn from(value: &String) -> Self {
        Literal::String(value.clone())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

/// An `ORDER BY` item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_field() {
        let mut query = Query::new("Account", ["Name"]);
        assert!(query.ensure_field("Code__c"));
        assert!(!query.ensure_field("Name"));
        query.ensure_field_first("Id");
        assert_eq!(query.fields, vec!["Id", "Name", "Code__c"]);
    }

    #[test]
    fn test_and_where_flattens() {
        let mut query = Query::new("Account", ["Id"]);
        query.and_where(Condition::eq("Type", "Customer"));
        query.and_where(Condition::eq("Active__c", true));
        query.and_where(Condition::in_list("Id", ["a", "b"]));
        match &query.filter {
            Some(Condition::And(conditions)) => assert_eq!(conditions.len(), 3),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_limiting_predicate() {
        let mut query = Query::new("Contact", ["Id"]);
        assert!(!query.has_limiting_predicate());
        query.limit = Some(10);
        assert!(query.has_limiting_predicate());
        assert!(!query.without_paging().has_limiting_predicate());
    }
}
