
use crate::domain::{BinaryOp, Expr, IncludeDirective, Literal, PathTemplate, Statement, UnaryOp};

use super::lexer::{tokenize, Token, TokenKind};
use super::ParseError;

/// Parse a module's source into its ordered statements.
pub fn parse_module(path: &str, source: &str) -> Result<Vec<Statement>, ParseError> {
    let tokens = tokenize(path, source)?;
    let mut parser = Parser {
        path,
        tokens,
        pos: 0,
    };

    let mut statements = Vec::new();
    while !parser.at_eof() {
        statements.push(parser.statement()?);
    }
    Ok(statements)
}

/// Parse a standalone expression (used by tests and the diagnostic CLI).
pub fn parse_expr(path: &str, source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(path, source)?;
    let mut parser = Parser {
        path,
        tokens,
        pos: 0,
    };
    let expr = parser.expr()?;
    if !parser.at_eof() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    path: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::new(self.path, token.line, token.col, message)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error(format!("expected {}, found {}", expected, describe(self.peek_kind())))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if *self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// Whether the next token is the given keyword.
    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Ident(id) if is_keyword(id, keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let line = self.peek().line;

        if self.eat_keyword("LET") {
            let name = match self.peek_kind() {
                TokenKind::Ident(name) if !is_reserved(name) => name.clone(),
                _ => return Err(self.unexpected("slot name")),
            };
            self.advance();
            self.expect(TokenKind::Assign, "`:=`")?;
            let expr = self.expr()?;
            let is_default = self.eat_keyword("DEFAULT");
            self.expect(TokenKind::Semi, "`;`")?;
            return Ok(Statement::Let {
                name,
                expr,
                is_default,
                line,
            });
        }

        if self.eat_keyword("INCLUDE") {
            let raw = match self.peek_kind() {
                TokenKind::Str(raw) => raw.clone(),
                _ => return Err(self.unexpected("include path string")),
            };
            let target = PathTemplate::parse(&raw).map_err(|message| self.error(message))?;
            self.advance();
            let gate = if self.eat_keyword("WHERE") {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(TokenKind::Semi, "`;`")?;
            return Ok(Statement::Include(IncludeDirective { target, gate, line }));
        }

        Err(self.unexpected("`LET` or `INCLUDE`"))
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("NOT") {
            let expr = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;

        let op = match self.peek_kind() {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::LtEq => Some(BinaryOp::LtEq),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.additive()?;
            left = Expr::binary(op, left, right);
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(self.unexpected("`NULL`"));
            }
            left = Expr::IsNull {
                expr: Box::new(left),
                negated,
            };
        }

        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Minus) {
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(n)))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(expr)
            }
            TokenKind::Ident(id) => {
                if is_keyword(&id, "NULL") {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Null));
                }
                if is_keyword(&id, "TRUE") {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Bool(true)));
                }
                if is_keyword(&id, "FALSE") {
                    self.advance();
                    return Ok(Expr::Literal(Literal::Bool(false)));
                }
                if is_reserved(&id) {
                    return Err(self.unexpected("expression"));
                }
                self.advance();
                if self.eat(&TokenKind::LParen) {
                    self.call(id)
                } else {
                    Ok(Expr::Name(id))
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Arguments of `func(`; grouping dimensions follow `BY`.
    fn call(&mut self, func: String) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        let mut by = Vec::new();

        if !self.eat(&TokenKind::RParen) {
            loop {
                if self.eat_keyword("BY") {
                    loop {
                        by.push(self.expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen, "`)`")?;
                    break;
                }
                args.push(self.expr()?);
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                if !self.at_keyword("BY") {
                    self.expect(TokenKind::Comma, "`,` or `)`")?;
                }
            }
        }

        Ok(Expr::Call { func, args, by })
    }
}

const RESERVED: &[&str] = &[
    "LET", "INCLUDE", "WHERE", "DEFAULT", "AND", "OR", "NOT", "IS", "NULL", "TRUE", "FALSE", "BY",
];

/// Keywords are written either fully upper- or fully lower-case.
fn is_keyword(ident: &str, keyword: &str) -> bool {
    ident == keyword || ident == keyword.to_ascii_lowercase()
}

fn is_reserved(ident: &str) -> bool {
    RESERVED.iter().any(|k| is_keyword(ident, k))
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(id) => format!("`{}`", id),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(s) => format!("string \"{}\"", s),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{:?}", other),
    }
}
