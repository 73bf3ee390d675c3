//! Composing structured queries back into text.

use crate::ast::*;
use std::fmt;

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT {} FROM {}", self.fields.join(", "), self.object)?;

        if let Some(filter) = &self.filter {
            write!(f, " WHERE {}", filter)?;
        }

        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| match o.direction {
                    SortDirection::Asc => o.field.clone(),
                    SortDirection::Desc => format!("{} DESC", o.field),
                })
                .collect();
            write!(f, " ORDER BY {}", items.join(", "))?;
        }

        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {}", offset)?;
        }

        Ok(())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { field, op, value } => write!(f, "{} {} {}", field, op, value),
            Condition::In {
                field,
                values,
                negated,
            } => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {} ({})", field, keyword, items.join(", "))
            }
            Condition::Like {
                field,
                pattern,
                negated,
            } => {
                let keyword = if *negated { "NOT LIKE" } else { "LIKE" };
                write!(f, "{} {} {}", field, keyword, quote(pattern))
            }
            Condition::And(parts) => write_joined(f, parts, " AND "),
            Condition::Or(parts) => write_joined(f, parts, " OR "),
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

/// Nested boolean groups are parenthesised so precedence survives a re-parse.
fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match part {
            Condition::And(_) | Condition::Or(_) => write!(f, "({})", part)?,
            _ => write!(f, "{}", part)?,
        }
    }
    Ok(())
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => f.write_str(&quote(s)),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(v) => write!(f, "{:?}", v),
            Literal::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use crate::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compose_preserves_nested_precedence() {
        let text = "SELECT Id, Name FROM Account WHERE (Type = 'A' OR Type = 'B') AND Rating >= 3";
        let query = parse(text).unwrap();
        assert_eq!(query.to_string(), text);
    }

    #[test]
    fn test_compose_quotes_strings() {
        let query = parse(r#"SELECT Id FROM Account WHERE Name = 'O\'Brien'"#).unwrap();
        assert_eq!(
            query.to_string(),
            r#"SELECT Id FROM Account WHERE Name = 'O\'Brien'"#
        );
    }

    #[test]
    fn test_compose_paging_and_not() {
        let query = parse(
            "select Id from Contact where not Email like '%@test.com' order by Name desc limit 5 offset 2",
        )
        .unwrap();
        assert_eq!(
            query.to_string(),
            "SELECT Id FROM Contact WHERE NOT (Email LIKE '%@test.com') ORDER BY Name DESC LIMIT 5 OFFSET 2"
        );
    }
}
