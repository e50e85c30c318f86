//! Recursive-descent parser.
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, `== !=`, `< > <= >=`,
//! `+ -`, `* / %`, unary `! -`, primary. Binary levels are left-associative;
//! the conditional is right-associative. No semantic checks happen here:
//! unknown functions and arity are left to validation and evaluation.

use formwork_core::{split_path, Value};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{CompileError, ParseError};
use crate::token::{tokenize, Token, TokenKind};

/// Deepest nesting the parser accepts before giving up.
pub const MAX_PARSE_DEPTH: usize = 100;

/// Tokenize and parse formula source.
pub fn parse_source(source: &str) -> Result<Expr, CompileError> {
    let tokens = tokenize(source)?;
    Ok(parse_tokens(&tokens, source.len())?)
}

/// Parse a token sequence. `end_offset` is reported for errors at end of input.
pub fn parse_tokens(tokens: &[Token], end_offset: usize) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end_offset,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ParseError {
            offset: tok.offset,
            expected: "end of input".into(),
            found: describe(tok),
        }),
    }
}

fn describe(tok: &Token) -> String {
    format!("'{}'", tok.text)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
    end_offset: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError {
                offset: tok.offset,
                expected: expected.into(),
                found: describe(tok),
            },
            None => ParseError {
                offset: self.end_offset,
                expected: expected.into(),
                found: "end of input".into(),
            },
        }
    }

    fn eat(&mut self, symbol: &str) -> bool {
        if self.peek().is_some_and(|t| t.is(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, symbol: &str) -> Result<(), ParseError> {
        if self.eat(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("'{symbol}'")))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(self.error(format!("at most {MAX_PARSE_DEPTH} levels of nesting")));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.conditional();
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.logic_or()?;
        if !self.eat("?") {
            return Ok(condition);
        }
        let then_branch = self.expression()?;
        self.expect(":")?;
        let else_branch = self.expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    /// One left-associative binary level.
    fn binary_level(
        &mut self,
        operators: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        'outer: loop {
            for &(symbol, op) in operators {
                if self.peek().is_some_and(|t| t.kind == TokenKind::Operator && t.text == symbol) {
                    self.pos += 1;
                    let right = next(self)?;
                    left = Expr::binary(op, left, right);
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[("||", BinaryOp::Or)], Self::logic_and)
    }

    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[("&&", BinaryOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else {
            return self.primary();
        };
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(self.error("expression"));
        };
        match tok.kind {
            TokenKind::Number => {
                let n: f64 = tok.text.parse().map_err(|_| self.error("number"))?;
                self.pos += 1;
                Ok(Expr::number(n))
            }
            TokenKind::String => {
                let s = tok.string_value().ok_or_else(|| self.error("string literal"))?;
                self.pos += 1;
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::Variable => self.variable(tok),
            TokenKind::ObjectRef => {
                self.pos += 1;
                let mut segments = split_path(&tok.text);
                let object = segments.remove(0);
                Ok(Expr::ObjectRef {
                    object,
                    path: segments,
                })
            }
            TokenKind::Identifier => self.identifier(tok),
            TokenKind::Punctuation if tok.text == "(" => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::Operator | TokenKind::Punctuation => Err(self.error("expression")),
        }
    }

    fn variable(&mut self, tok: &Token) -> Result<Expr, ParseError> {
        self.pos += 1;
        Ok(Expr::Variable(tok.text[1..].to_string()))
    }

    fn identifier(&mut self, tok: &Token) -> Result<Expr, ParseError> {
        let is_call = self.peek_at(1).is_some_and(|t| t.is("("));
        if !is_call {
            return match tok.text.as_str() {
                "true" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(true)))
                }
                "false" => {
                    self.pos += 1;
                    Ok(Expr::Literal(Value::Bool(false)))
                }
                _ => Err(ParseError {
                    offset: tok.offset,
                    expected: "'(' after function name".into(),
                    found: self
                        .peek_at(1)
                        .map(describe)
                        .unwrap_or_else(|| "end of input".into()),
                }),
            };
        }
        self.pos += 2;
        let mut args = Vec::new();
        if !self.eat(")") {
            loop {
                args.push(self.expression()?);
                if self.eat(")") {
                    break;
                }
                self.expect(",")?;
            }
        }
        Ok(Expr::Call {
            function: tok.text.clone(),
            args,
        })
    }
}
