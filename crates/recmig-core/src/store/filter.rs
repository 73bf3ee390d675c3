//! In-process evaluation of query conditions against records.

use crate::record::Value;
use recmig_query::{CompareOp, Condition, Literal, OrderBy, SortDirection};
use std::cmp::Ordering;

/// Evaluates query conditions against records.
///
/// Fields are read through an accessor so stores can resolve relationship
/// paths their own way. A missing field reads as null. Numeric strings
/// compare numerically and `LIKE` ignores case.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a condition through a field accessor.
    pub fn evaluate<F>(condition: &Condition, get: &F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        match condition {
            Condition::Compare { field, op, value } => {
                let actual = get(field).unwrap_or(Value::Null);
                Self::compare(&actual, *op, value)
            }
            Condition::In {
                field,
                values,
                negated,
            } => {
                let actual = get(field).unwrap_or(Value::Null);
                let found = values.iter().any(|v| Self::values_equal(&actual, v));
                found != *negated
            }
            Condition::Like {
                field,
                pattern,
                negated,
            } => {
                let matched = match get(field) {
                    Some(v) if !v.is_null() => {
                        Self::like_match(&v.to_text().to_lowercase(), &pattern.to_lowercase())
                    }
                    _ => false,
                };
                matched != *negated
            }
            Condition::And(parts) => parts.iter().all(|c| Self::evaluate(c, get)),
            Condition::Or(parts) => parts.iter().any(|c| Self::evaluate(c, get)),
            Condition::Not(inner) => !Self::evaluate(inner, get),
        }
    }

    fn compare(actual: &Value, op: CompareOp, expected: &Literal) -> bool {
        match op {
            CompareOp::Eq => Self::values_equal(actual, expected),
            CompareOp::Ne => !Self::values_equal(actual, expected),
            CompareOp::Lt => Self::order(actual, expected) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                Self::order(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => Self::order(actual, expected) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                Self::order(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }

    /// Check a value against a literal. Blank values equal `NULL`.
    fn values_equal(actual: &Value, expected: &Literal) -> bool {
        match expected {
            Literal::Null => actual.is_blank(),
            Literal::Bool(b) => match actual {
                Value::Bool(v) => v == b,
                Value::String(s) => s.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
                _ => false,
            },
            Literal::Int(_) | Literal::Float(_) => {
                Self::order(actual, expected) == Some(Ordering::Equal)
            }
            Literal::String(s) => !actual.is_null() && actual.to_text() == *s,
        }
    }

    fn order(actual: &Value, expected: &Literal) -> Option<Ordering> {
        if actual.is_blank() {
            return None;
        }
        match (as_number(actual), literal_number(expected)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match expected {
                Literal::String(s) => Some(actual.to_text().as_str().cmp(s.as_str())),
                _ => None,
            },
        }
    }

    /// Match a string against a LIKE pattern (`%` any run, `_` one char).
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let value: Vec<char> = value.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        Self::like_from(&value, &pattern)
    }

    fn like_from(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => (0..=value.len()).any(|skip| Self::like_from(&value[skip..], rest)),
            Some(('_', rest)) => !value.is_empty() && Self::like_from(&value[1..], rest),
            Some((p, rest)) => {
                value.first() == Some(p) && Self::like_from(&value[1..], rest)
            }
        }
    }

    /// Compare two records by a list of sort keys. Nulls sort first.
    pub fn compare_records(
        a: &dyn Fn(&str) -> Option<Value>,
        b: &dyn Fn(&str) -> Option<Value>,
        order_by: &[OrderBy],
    ) -> Ordering {
        for key in order_by {
            let left = a(&key.field).unwrap_or(Value::Null);
            let right = b(&key.field).unwrap_or(Value::Null);
            let ordering = match (left.is_blank(), right.is_blank()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => match (as_number(&left), as_number(&right)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    _ => left.to_text().cmp(&right.to_text()),
                },
            };
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn literal_number(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Int(i) => Some(*i as f64),
        Literal::Float(f) => Some(*f),
        Literal::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
