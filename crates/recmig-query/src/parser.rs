//! Recursive descent parser for query text.

use crate::ast::*;
use crate::error::{ParseError, ParseErrorKind};
use crate::lexer::{Lexer, SpannedToken, Token};

/// Parser for `SELECT` queries.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
        }
    }

    /// Parse a complete query; trailing input is an error.
    pub fn parse_query(&mut self) -> Result<Query, ParseError> {
        self.expect_token(Token::Select)?;
        let fields = self.parse_field_list()?;
        self.expect_token(Token::From)?;
        let object = self.expect_ident()?;

        let mut query = Query::new(object, fields);

        if self.eat(&Token::Where) {
            query.filter = Some(self.parse_or_condition()?);
        }

        if self.eat(&Token::Order) {
            self.expect_token(Token::By)?;
            query.order_by = self.parse_order_list()?;
        }

        if self.eat(&Token::Limit) {
            query.limit = Some(self.expect_count("LIMIT")?);
        }

        if self.eat(&Token::Offset) {
            query.offset = Some(self.expect_count("OFFSET")?);
        }

        if let Some(tok) = self.lexer.next_token() {
            return Err(ParseError::new(
                ParseErrorKind::TrailingInput(tok.token.describe()),
                tok.span,
            ));
        }
        self.check_invalid()?;

        Ok(query)
    }

    fn parse_field_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut fields = vec![self.parse_field_path()?];
        while self.eat(&Token::Comma) {
            fields.push(self.parse_field_path()?);
        }
        Ok(fields)
    }

    /// Parse `Ident(.Ident)*` into a dotted name.
    fn parse_field_path(&mut self) -> Result<String, ParseError> {
        let mut path = self.expect_ident()?;
        while self.eat(&Token::Dot) {
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(path)
    }

    fn parse_order_list(&mut self) -> Result<Vec<OrderBy>, ParseError> {
        let mut items = Vec::new();
        loop {
            let field = self.parse_field_path()?;
            let direction = if self.eat(&Token::Desc) {
                SortDirection::Desc
            } else {
                self.eat(&Token::Asc);
                SortDirection::Asc
            };
            items.push(OrderBy { field, direction });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_or_condition(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_and_condition()?;

        while self.eat(&Token::Or) {
            let right = self.parse_and_condition()?;
            left = match left {
                Condition::Or(mut conditions) => {
                    conditions.push(right);
                    Condition::Or(conditions)
                }
                _ => Condition::Or(vec![left, right]),
            };
        }

        Ok(left)
    }

    fn parse_and_condition(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_unary_condition()?;

        while self.eat(&Token::And) {
            let right = self.parse_unary_condition()?;
            left = match left {
                Condition::And(mut conditions) => {
                    conditions.push(right);
                    Condition::And(conditions)
                }
                _ => Condition::And(vec![left, right]),
            };
        }

        Ok(left)
    }

    fn parse_unary_condition(&mut self) -> Result<Condition, ParseError> {
        if self.eat(&Token::Not) {
            return Ok(Condition::Not(Box::new(self.parse_unary_condition()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.parse_or_condition()?;
            self.expect_token(Token::RParen)?;
            return Ok(inner);
        }
        self.parse_primary_condition()
    }

    fn parse_primary_condition(&mut self) -> Result<Condition, ParseError> {
        let field = self.parse_field_path()?;
        let op_tok = self.next_token()?;

        let op = match op_tok.token {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::In => return self.parse_in_list(field, false),
            Token::Like => return self.parse_like(field, false),
            Token::Not => {
                let next = self.next_token()?;
                return match next.token {
                    Token::In => self.parse_in_list(field, true),
                    Token::Like => self.parse_like(field, true),
                    other => Err(ParseError::expected("IN or LIKE after NOT", &other, next.span)),
                };
            }
            other => {
                return Err(ParseError::expected("comparison operator", &other, op_tok.span))
            }
        };

        let value = self.parse_literal()?;
        Ok(Condition::Compare { field, op, value })
    }

    fn parse_in_list(&mut self, field: String, negated: bool) -> Result<Condition, ParseError> {
        self.expect_token(Token::LParen)?;
        let mut values = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                values.push(self.parse_literal()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect_token(Token::RParen)?;
                break;
            }
        }
        Ok(Condition::In {
            field,
            values,
            negated,
        })
    }

    fn parse_like(&mut self, field: String, negated: bool) -> Result<Condition, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::String(pattern) => Ok(Condition::Like {
                field,
                pattern,
                negated,
            }),
            other => Err(ParseError::expected("pattern string after LIKE", &other, tok.span)),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::String(s) => Ok(Literal::String(s)),
            Token::Int(i) => Ok(Literal::Int(i)),
            Token::Float(f) => Ok(Literal::Float(f)),
            Token::True => Ok(Literal::Bool(true)),
            Token::False => Ok(Literal::Bool(false)),
            Token::Null => Ok(Literal::Null),
            other => Err(ParseError::expected("a literal", &other, tok.span)),
        }
    }

    fn expect_count(&mut self, clause: &str) -> Result<u64, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Int(n) if n >= 0 => Ok(n as u64),
            other => Err(ParseError::expected(
                format!("non-negative integer after {clause}"),
                &other,
                tok.span,
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) => Ok(name),
            other => Err(ParseError::expected("identifier", &other, tok.span)),
        }
    }

    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::expected(expected.describe(), &tok.token, tok.span))
        }
    }

    /// Consume the next token if it matches.
    fn eat(&mut self, expected: &Token) -> bool {
        match self.lexer.peek() {
            Some(tok) if &tok.token == expected => {
                self.lexer.next_token();
                true
            }
            _ => false,
        }
    }

    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => Ok(tok),
            None => {
                self.check_invalid()?;
                let end = self.source.len();
                Err(ParseError::new(ParseErrorKind::UnexpectedEnd, end..end))
            }
        }
    }

    fn check_invalid(&self) -> Result<(), ParseError> {
        match self.lexer.invalid_span() {
            Some(range) => {
                let text = self.source.get(range.clone()).unwrap_or_default().to_string();
                Err(ParseError::new(ParseErrorKind::InvalidCharacter(text), range))
            }
            None => Ok(()),
        }
    }
}

/// Parse query text into a [`Query`].
pub fn parse(source: &str) -> Result<Query, ParseError> {
    Parser::new(source).parse_query()
}
