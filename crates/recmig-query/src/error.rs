//! Errors raised while reading query text.

use crate::lexer::Token;
use std::ops::Range;
use thiserror::Error;

/// What is wrong with a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    /// A token other than the one the grammar allows here.
    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },

    /// The text stops inside a clause.
    #[error("query ends before it is complete")]
    UnexpectedEnd,

    /// Input the lexer cannot read.
    #[error("unexpected character '{0}'")]
    InvalidCharacter(String),

    /// Tokens after the last clause.
    #[error("unexpected {0} after end of query")]
    TrailingInput(String),
}

/// A query that failed to lex or parse, with the byte range at fault.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub range: Range<usize>,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, range: Range<usize>) -> Self {
        Self { kind, range }
    }

    pub(crate) fn expected(expected: impl Into<String>, found: &Token, range: Range<usize>) -> Self {
        Self::new(
            ParseErrorKind::Expected {
                expected: expected.into(),
                found: found.describe(),
            },
            range,
        )
    }

    /// A suggestion for mistakes commonly made in script queries.
    pub fn hint(&self) -> Option<&'static str> {
        match &self.kind {
            ParseErrorKind::Expected { found, .. } if found == "EQ" => {
                Some("compare with a single '='")
            }
            ParseErrorKind::Expected { expected, .. } if expected == "FROM" => {
                Some("separate fields with commas and end the list with FROM <object>")
            }
            ParseErrorKind::UnexpectedEnd => {
                Some("look for a missing value or closing parenthesis")
            }
            _ => None,
        }
    }

    /// 1-based line and column of the error in `source`.
    pub fn position(&self, source: &str) -> (usize, usize) {
        let before = source.get(..self.range.start).unwrap_or(source);
        let line = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, column)
    }

    /// The error followed by the offending line with its range marked.
    pub fn render(&self, source: &str) -> String {
        let (line, column) = self.position(source);
        let mut out = format!("line {line}, column {column}: {}", self.kind);

        if let Some(text) = source.lines().nth(line - 1) {
            let width = source
                .get(self.range.clone())
                .map_or(0, |s| s.lines().next().unwrap_or_default().chars().count())
                .max(1);
            out.push_str(&format!(
                "\n  {text}\n  {}{}",
                " ".repeat(column - 1),
                "^".repeat(width)
            ));
        }
        if let Some(hint) = self.hint() {
            out.push_str(&format!("\n  hint: {hint}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    #[test]
    fn test_position_counts_lines() {
        let source = "SELECT Id\nFROM Account\nWHERE Name = #";
        let err = parse(source).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidCharacter("#".to_string()));
        assert_eq!(err.position(source), (3, 14));
    }

    #[test]
    fn test_render_marks_token() {
        let source = "SELECT Id FROM Account LIMIT many";
        let err = parse(source).unwrap_err();
        let rendered = err.render(source);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "line 1, column 30: expected non-negative integer after LIMIT, found identifier 'many'"
        );
        assert_eq!(lines[1], "  SELECT Id FROM Account LIMIT many");
        assert_eq!(lines[2], format!("  {}^^^^", " ".repeat(29)));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_hint_for_double_equals() {
        let source = "SELECT Id FROM Account WHERE Name == 'x'";
        let err = parse(source).unwrap_err();
        assert_eq!(err.range, 35..36);
        assert_eq!(err.hint(), Some("compare with a single '='"));
        assert!(err.render(source).ends_with("hint: compare with a single '='"));
    }

    #[test]
    fn test_end_of_input_marks_last_column() {
        let source = "SELECT Id FROM";
        let err = parse(source).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(err.position(source), (1, 15));
        assert!(err.render(source).contains(&format!("  {}^", " ".repeat(14))));
    }
}
