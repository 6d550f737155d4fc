//! Recursive-descent parser over the token stream, implementing the
//! precedence grammar `OR < AND < NOT`.

use super::token::{tokenize, Spanned, Token};
use crate::condition::{CompiledPattern, ConditionNode};
use crate::error::ConfigError;
use crate::value::Value;

/// Parse a flat infix boolean expression into a [`ConditionNode`]. Bare
/// identifiers that don't already start with `$sys.` or `$req.` are
/// rewritten to `$req.<ident>`, per the "bare names are request fields"
/// convention.
pub fn parse_expr(input: &str) -> Result<ConditionNode, ConfigError> {
    let tokens = tokenize(input).map_err(|message| ConfigError::BadExpression {
        position: 0,
        message,
    })?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    parser.expect_end()?;
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.position)
            .unwrap_or_else(|| self.tokens.last().map(|s| s.position + 1).unwrap_or(0))
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|s| s.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_end(&self) -> Result<(), ConfigError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.err(format!("unexpected trailing token {:?}", self.peek())))
        }
    }

    fn err(&self, message: String) -> ConfigError {
        ConfigError::BadExpression {
            position: self.position(),
            message,
        }
    }

    // expr := or
    fn parse_or(&mut self) -> Result<ConditionNode, ConfigError> {
        let mut node = self.parse_and()?;
        let mut rest = Vec::new();
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            rest.push(self.parse_and()?);
        }
        if !rest.is_empty() {
            let mut children = vec![node];
            children.append(&mut rest);
            node = ConditionNode::or(children);
        }
        Ok(node)
    }

    // or := and ('OR' and)*
    fn parse_and(&mut self) -> Result<ConditionNode, ConfigError> {
        let mut node = self.parse_not()?;
        let mut rest = Vec::new();
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            rest.push(self.parse_not()?);
        }
        if !rest.is_empty() {
            let mut children = vec![node];
            children.append(&mut rest);
            node = ConditionNode::and(children);
        }
        Ok(node)
    }

    // not := 'NOT' not | primary
    fn parse_not(&mut self) -> Result<ConditionNode, ConfigError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let child = self.parse_not()?;
            return Ok(ConditionNode::not(child));
        }
        self.parse_primary()
    }

    // primary := '(' expr ')' | boolean | comparison
    fn parse_primary(&mut self) -> Result<ConditionNode, ConfigError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let node = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(node),
                    other => Err(self.err(format!("expected ')', found {other:?}"))),
                }
            }
            Some(Token::Bool(b)) => {
                let b = *b;
                self.advance();
                Ok(if b {
                    ConditionNode::AlwaysTrue
                } else {
                    ConditionNode::not(ConditionNode::AlwaysTrue)
                })
            }
            Some(Token::Ident(_)) => self.parse_comparison(),
            other => Err(self.err(format!("expected expression, found {other:?}"))),
        }
    }

    fn take_ident(&mut self) -> Result<String, ConfigError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(normalize_field(&name)),
            other => Err(self.err(format!("expected field reference, found {other:?}"))),
        }
    }

    // comparison := field ( EXISTS | IS_NULL | 'NOT' 'IN' list | 'IN' list
    //   | REGEX pattern | STARTS_WITH pattern | ENDS_WITH pattern
    //   | CONTAINS value | ('=='|'='|'!='|'>='|'>'|'<='|'<') value )
    fn parse_comparison(&mut self) -> Result<ConditionNode, ConfigError> {
        let field = self.take_ident()?;
        match self.peek() {
            Some(Token::Exists) => {
                self.advance();
                Ok(ConditionNode::Exists { field })
            }
            Some(Token::IsNull) => {
                self.advance();
                Ok(ConditionNode::IsNull { field })
            }
            Some(Token::Not) => {
                self.advance();
                self.expect(Token::In)?;
                let values = self.parse_list()?;
                Ok(ConditionNode::NotIn { field, values })
            }
            Some(Token::In) => {
                self.advance();
                let values = self.parse_list()?;
                Ok(ConditionNode::In { field, values })
            }
            Some(Token::Regex) => {
                self.advance();
                let pattern = self.parse_string_value()?;
                Ok(ConditionNode::Regex {
                    field,
                    pattern: CompiledPattern::new(pattern),
                })
            }
            Some(Token::StartsWith) => {
                self.advance();
                let prefix = self.parse_string_value()?;
                Ok(ConditionNode::StartsWith { field, prefix })
            }
            Some(Token::EndsWith) => {
                self.advance();
                let suffix = self.parse_string_value()?;
                Ok(ConditionNode::EndsWith { field, suffix })
            }
            Some(Token::Contains) => {
                self.advance();
                let value = self.parse_value()?;
                Ok(ConditionNode::Contains { field, value })
            }
            Some(Token::Eq) => {
                self.advance();
                Ok(ConditionNode::Equals {
                    field,
                    value: self.parse_value()?,
                })
            }
            Some(Token::Ne) => {
                self.advance();
                Ok(ConditionNode::NotEquals {
                    field,
                    value: self.parse_value()?,
                })
            }
            Some(Token::Gte) => {
                self.advance();
                Ok(ConditionNode::Gte {
                    field,
                    value: self.parse_value()?,
                })
            }
            Some(Token::Gt) => {
                self.advance();
                Ok(ConditionNode::Gt {
                    field,
                    value: self.parse_value()?,
                })
            }
            Some(Token::Lte) => {
                self.advance();
                Ok(ConditionNode::Lte {
                    field,
                    value: self.parse_value()?,
                })
            }
            Some(Token::Lt) => {
                self.advance();
                Ok(ConditionNode::Lt {
                    field,
                    value: self.parse_value()?,
                })
            }
            other => Err(self.err(format!("expected comparison operator, found {other:?}"))),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConfigError> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(self.err(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    // list := ('[' | '(') (value (',' value)*)? (']' | ')')
    fn parse_list(&mut self) -> Result<Vec<Value>, ConfigError> {
        let close = match self.advance() {
            Some(Token::LBracket) => Token::RBracket,
            Some(Token::LParen) => Token::RParen,
            other => return Err(self.err(format!("expected '[' or '(', found {other:?}"))),
        };

        let mut values = Vec::new();
        if self.peek() != Some(&close) {
            values.push(self.parse_value()?);
            while matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
                values.push(self.parse_value()?);
            }
        }
        self.expect(close)?;
        Ok(values)
    }

    // value := string | number | boolean | ident
    fn parse_value(&mut self) -> Result<Value, ConfigError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(if n.fract() == 0.0 {
                Value::Int(n as i64)
            } else {
                Value::Float(n)
            }),
            Some(Token::Bool(b)) => Ok(Value::Bool(b)),
            Some(Token::Ident(s)) => Ok(Value::String(s)),
            other => Err(self.err(format!("expected value, found {other:?}"))),
        }
    }

    fn parse_string_value(&mut self) -> Result<String, ConfigError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s),
            Some(Token::Ident(s)) => Ok(s),
            other => Err(self.err(format!("expected string literal, found {other:?}"))),
        }
    }
}

/// Bare identifiers that don't start with `$sys.`/`$req.`/`$ctx.` are
/// request fields by convention.
fn normalize_field(ident: &str) -> String {
    if ident.starts_with("$sys.") || ident.starts_with("$req.") || ident.starts_with("$ctx.") {
        ident.to_string()
    } else {
        format!("$req.{ident}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TaskContext;
    use std::collections::BTreeMap;

    #[test]
    fn parses_simple_comparison_with_bare_identifier() {
        let node = parse_expr("amount > 100").unwrap();
        match node {
            ConditionNode::Gt { field, value } => {
                assert_eq!(field, "$req.amount");
                assert_eq!(value, Value::Int(100));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn precedence_is_or_lt_and_lt_not() {
        // a AND NOT b OR c  ==  (a AND (NOT b)) OR c
        let node = parse_expr("a == 1 AND NOT b == 2 OR c == 3").unwrap();
        let mut req = BTreeMap::new();
        req.insert("a".to_string(), Value::Int(1));
        req.insert("b".to_string(), Value::Int(99));
        req.insert("c".to_string(), Value::Int(3));
        let ctx = TaskContext::new(req, BTreeMap::new(), None, None);
        assert!(crate::condition::evaluate(&node, &ctx));
    }

    #[test]
    fn parses_in_list_and_not_in() {
        let node = parse_expr(r#"tier IN ["GOLD", "PLATINUM"]"#).unwrap();
        assert!(matches!(node, ConditionNode::In { .. }));

        let node = parse_expr(r#"tier NOT IN ["GOLD"]"#).unwrap();
        assert!(matches!(node, ConditionNode::NotIn { .. }));
    }

    #[test]
    fn parenthesized_grouping_overrides_precedence() {
        let node = parse_expr("(a == 1 OR b == 2) AND c == 3").unwrap();
        assert!(matches!(node, ConditionNode::And(_)));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse_expr("a == 1 )").unwrap_err();
        assert!(matches!(err, ConfigError::BadExpression { .. }));
    }

    #[test]
    fn round_trip_reparses_to_equivalent_tree() {
        let node = parse_expr(r#"amount >= 100 AND tier == "GOLD""#).unwrap();
        let printed = node.to_expr_string();
        let reparsed = parse_expr(&printed).unwrap();
        assert_eq!(node.to_expr_string(), reparsed.to_expr_string());
    }
}
