//! Recursive-descent parser with name resolution.
//!
//! Identifiers are resolved against the variable schema and the built-in
//! function table while parsing, so an expression that parses never
//! refers to anything undefined. Literal regex patterns and literal
//! `timestamp(...)` arguments are validated here as well.

use chrono::{DateTime, Utc};
use regex::Regex;

use super::ast::{BinaryOp, Expr, Function, Literal, Pattern, UnaryOp, Variable};
use super::lexer::{Token, TokenKind, tokenize};
use crate::Result;
use crate::error::SiftError;

/// Maximum depth of the expression tree.
///
/// Every parenthesised group, unary operator, binary operator in a chain
/// and method call in a chain counts one level, so the checker and the
/// evaluator never recurse deeper than this.
pub(crate) const MAX_DEPTH: usize = 64;

/// Parses `source` into a resolved expression tree.
pub(crate) fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        depth: 0,
    };

    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(SiftError::filter_parse(
            format!("unexpected {}", trailing.kind),
            trailing.offset,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.position.min(self.tokens.len().saturating_sub(1))]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len().saturating_sub(1) {
            self.position = self.position.saturating_add(1);
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.advance();
        if token.kind == kind {
            Ok(token)
        } else {
            Err(SiftError::filter_parse(
                format!("expected {}, found {}", kind, token.kind),
                token.offset,
            ))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth = self.depth.saturating_add(1);
        if self.depth > MAX_DEPTH {
            return Err(SiftError::filter_parse(
                format!("expression nested deeper than {} levels", MAX_DEPTH),
                self.peek().offset,
            ));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        self.enter()?;
        let result = self.parse_or_chain();
        self.depth = base;
        result
    }

    // Each fold below nests the chain built so far one level deeper, so it
    // is charged against the depth limit until the chain ends.

    fn parse_or_chain(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            self.enter()?;
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_relation()?;
        while self.eat(&TokenKind::And) {
            self.enter()?;
            let right = self.parse_relation()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_relation(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                TokenKind::In => BinaryOp::In,
                _ => {
                    self.depth = base;
                    return Ok(left);
                }
            };
            self.advance();
            self.enter()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.parse_member(),
        };
        self.advance();

        let base = self.depth;
        self.enter()?;
        let operand = self.parse_unary();
        self.depth = base;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn parse_member(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut target = self.parse_primary()?;

        while self.eat(&TokenKind::Dot) {
            self.enter()?;
            let token = self.advance();
            let name = match token.kind {
                TokenKind::Ident(name) => name,
                other => {
                    return Err(SiftError::filter_parse(
                        format!("expected method name, found {}", other),
                        token.offset,
                    ));
                }
            };
            if self.peek().kind != TokenKind::LParen {
                return Err(SiftError::filter_parse(
                    format!("field selection '.{}' is not supported", name),
                    token.offset,
                ));
            }
            let args = self.parse_arguments()?;

            target = if name == "matches" {
                matches_call(target, args, token.offset)?
            } else {
                let function = Function::method(&name).ok_or_else(|| {
                    SiftError::filter_parse(
                        format!("undeclared reference to function '{}'", name),
                        token.offset,
                    )
                })?;
                let mut call_args = Vec::with_capacity(args.len().saturating_add(1));
                call_args.push(target);
                call_args.extend(args.into_iter().map(|(expr, _)| expr));
                Expr::Call(function, call_args)
            };
        }

        self.depth = base;
        Ok(target)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Int(value) => Ok(Expr::Literal(Literal::Int(value))),
            TokenKind::Str(value) => Ok(Expr::Literal(Literal::Str(value))),
            TokenKind::True => Ok(Expr::Literal(Literal::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Literal::Bool(false))),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.expect(TokenKind::Comma)?;
                    }
                }
                Ok(Expr::List(items))
            }
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    let args = self.parse_arguments()?;
                    global_call(&name, args, token.offset)
                } else {
                    Variable::from_name(&name)
                        .map(Expr::Var)
                        .ok_or(SiftError::UnknownVariable { name })
                }
            }
            other => Err(SiftError::filter_parse(
                format!("unexpected {}", other),
                token.offset,
            )),
        }
    }

    /// Parses `( expr, ... )`, keeping each argument's start offset.
    fn parse_arguments(&mut self) -> Result<Vec<(Expr, usize)>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            let offset = self.peek().offset;
            args.push((self.parse_or()?, offset));
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(TokenKind::Comma)?;
        }
    }
}

fn global_call(
    name: &str,
    args: Vec<(Expr, usize)>,
    offset: usize,
) -> Result<Expr> {
    let function = Function::global(name).ok_or_else(|| {
        SiftError::filter_parse(format!("undeclared reference to function '{}'", name), offset)
    })?;

    if function == Function::Timestamp
        && let [(Expr::Literal(Literal::Str(text)), arg_offset)] = args.as_slice()
    {
        let parsed = parse_timestamp(text).map_err(|message| {
            SiftError::filter_parse(message, *arg_offset)
        })?;
        return Ok(Expr::Literal(Literal::Timestamp(parsed)));
    }

    Ok(Expr::Call(
        function,
        args.into_iter().map(|(expr, _)| expr).collect(),
    ))
}

fn matches_call(
    target: Expr,
    args: Vec<(Expr, usize)>,
    offset: usize,
) -> Result<Expr> {
    let mut args = args.into_iter();
    let (pattern, pattern_offset) = match (args.next(), args.next()) {
        (Some(arg), None) => arg,
        _ => {
            return Err(SiftError::filter_parse(
                "matches expects exactly one argument",
                offset,
            ));
        }
    };

    let pattern = match pattern {
        Expr::Literal(Literal::Str(text)) => {
            let regex = Regex::new(&text).map_err(|e| {
                SiftError::filter_parse(
                    format!("invalid regular expression: {}", e),
                    pattern_offset,
                )
            })?;
            Pattern::Compiled(regex)
        }
        other => Pattern::Dynamic(Box::new(other)),
    };

    Ok(Expr::Matches(Box::new(target), pattern))
}

/// Parses an RFC 3339 timestamp into UTC.
pub(crate) fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
}
